use super::Kernel;
use crate::{
    device::SurfaceStateSlot,
    error::ZeError,
    image::{Image, Sampler},
    memory::GraphicsAllocation,
    result::Result,
};
use neo_dispatch_core::{
    descriptor::{
        is_valid_offset, patch_non_pointer, patch_pointer, AddressQualifier, ArgDescImage, ArgDescPointer,
        ArgDescSampler, ArgDescValue, ArgDescriptor,
    },
    hw::cmds::RenderSurfaceState,
    mem::{align_up, patch_bytes, read_u32, KB},
};
use std::sync::Arc;

/// Value of a kernel argument.
#[derive(Clone, Copy, Debug)]
pub enum ArgValue<'a> {
    Null,
    /// Bytes of a value argument, or the address of a pointer argument.
    Bytes(&'a [u8]),
    Image(&'a Image),
    Sampler(&'a Sampler),
}

/// The last allocation a pointer argument was bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct ArgBinding {
    allocation_id: u64,
    generation: u32,
    value: u64,
}

const SAMPLER_NORMALIZED_COORDS_TRUE: u32 = 0x08;
const SAMPLER_NORMALIZED_COORDS_FALSE: u32 = 0x00;

impl Kernel {
    fn explicit_arg(&self, index: usize) -> Result<ArgDescriptor> {
        self.descriptor()
            .payload_mappings
            .explicit_args
            .get(index)
            .cloned()
            .ok_or(ZeError::InvalidArgument)
    }

    /// Binds argument `index`.
    ///
    /// `size` is the size of the argument as declared by the caller. For
    /// local memory pointers it is the number of bytes to reserve.
    ///
    /// **errors**
    /// - InvalidArgument if `index` is out of range or `value` does not fit
    ///   the argument kind.
    /// - OutOfHostMemory if a bindless slot cannot be allocated.
    pub fn set_argument_value(&mut self, index: u32, size: usize, value: ArgValue) -> Result<()> {
        let index = index as usize;
        match self.explicit_arg(index)? {
            ArgDescriptor::Pointer(_) => {
                let address = match value {
                    ArgValue::Null => None,
                    ArgValue::Bytes(bytes) => Some(read_pointer(bytes)?),
                    _ => return Err(ZeError::InvalidArgument),
                };
                self.set_arg_buffer(index, size, address)
            }
            ArgDescriptor::Value(_) => match value {
                ArgValue::Null => self.set_arg_immediate(index, size, None),
                ArgValue::Bytes(bytes) => self.set_arg_immediate(index, size, Some(bytes)),
                _ => Err(ZeError::InvalidArgument),
            },
            ArgDescriptor::Image(_) => match value {
                ArgValue::Null => {
                    self.residency[index] = None;
                    Ok(())
                }
                ArgValue::Image(image) => self.set_arg_image(index, image),
                _ => Err(ZeError::InvalidArgument),
            },
            ArgDescriptor::Sampler(_) => match value {
                ArgValue::Sampler(sampler) => self.set_arg_sampler(index, sampler),
                _ => Err(ZeError::InvalidArgument),
            },
            ArgDescriptor::Unknown => Ok(()),
        }
    }

    /// Copies the elements of a value argument into cross-thread data.
    /// `None` writes zeros.
    pub fn set_arg_immediate(&mut self, index: usize, size: usize, value: Option<&[u8]>) -> Result<()> {
        let arg = self.explicit_arg(index)?;
        let ArgDescValue { elements } = arg.as_value().ok_or(ZeError::InvalidArgument)?;
        if value.map_or(false, |bytes| bytes.len() < size) {
            return Err(ZeError::InvalidArgument);
        }
        for element in elements {
            let source_offset = usize::from(element.source_offset);
            if source_offset >= size {
                return Err(ZeError::InvalidArgument);
            }
            let len = usize::from(element.size).min(size - source_offset);
            let zeros;
            let src = match value {
                Some(bytes) => &bytes[source_offset..source_offset + len],
                None => {
                    zeros = vec![0; len];
                    &zeros[..]
                }
            };
            if !is_valid_offset(element.offset) || !patch_bytes(&mut self.cross_thread_data, usize::from(element.offset), src) {
                return Err(ZeError::InvalidArgument);
            }
        }
        Ok(())
    }

    /// Binds a pointer argument to `address`, or unbinds it with `None`.
    ///
    /// Local memory arguments take `size` bytes of SLM and move the offsets
    /// of the local arguments after them.
    pub fn set_arg_buffer(&mut self, index: usize, size: usize, address: Option<u64>) -> Result<()> {
        let arg = self.explicit_arg(index)?;
        let pointer = *arg.as_pointer().ok_or(ZeError::InvalidArgument)?;
        if pointer.address_qualifier == AddressQualifier::Local {
            return self.set_slm_arg(index, size as u32, &pointer);
        }
        let Some(address) = address else {
            self.residency[index] = None;
            self.arg_bindings[index] = None;
            patch_pointer(&mut self.cross_thread_data, &pointer, 0);
            return Ok(());
        };
        match self.device.memory_manager().find_svm(address) {
            Some(allocation) => {
                let binding = ArgBinding {
                    allocation_id: allocation.id(),
                    generation: allocation.generation(),
                    value: address,
                };
                if self.arg_bindings[index] == Some(binding) {
                    self.skip_counters.set_arg_buffer += 1;
                    return Ok(());
                }
                self.set_arg_buffer_with_alloc(index, address, &allocation)?;
                self.arg_bindings[index] = Some(binding);
                Ok(())
            }
            None if self.device.settings().disallow_system_pointers => {
                tracing::warn!(kernel = self.kernel_name(), index, address, "system pointer argument rejected");
                Err(ZeError::InvalidArgument)
            }
            None => {
                patch_pointer(&mut self.cross_thread_data, &pointer, address);
                self.residency[index] = None;
                self.arg_bindings[index] = None;
                Ok(())
            }
        }
    }

    fn set_slm_arg(&mut self, index: usize, size: u32, pointer: &ArgDescPointer) -> Result<()> {
        if !is_valid_offset(pointer.slm_offset) {
            return Err(ZeError::InvalidArgument);
        }
        self.slm_arg_sizes[index] = size;
        let mut slm_offset = read_u32(&self.cross_thread_data, usize::from(pointer.slm_offset)).unwrap_or(0) + size;
        let args = self.descriptor().payload_mappings.explicit_args.clone();
        for (next_index, next) in args.iter().enumerate().skip(index + 1) {
            let Some(next) = next.as_pointer().filter(|next| next.address_qualifier == AddressQualifier::Local) else {
                continue;
            };
            slm_offset = align_up(slm_offset, u32::from(next.required_slm_alignment.max(1)));
            patch_non_pointer(&mut self.cross_thread_data, next.slm_offset, slm_offset);
            slm_offset += self.slm_arg_sizes[next_index];
        }
        self.slm_args_total_size = align_up(slm_offset, KB as u32);
        Ok(())
    }

    /// Points argument `index` at `address` inside `allocation`.
    pub fn set_arg_buffer_with_alloc(
        &mut self,
        index: usize,
        address: u64,
        allocation: &Arc<GraphicsAllocation>,
    ) -> Result<()> {
        let arg = self.explicit_arg(index)?;
        let pointer = *arg.as_pointer().ok_or(ZeError::InvalidArgument)?;
        if !allocation.contains(address) {
            return Err(ZeError::InvalidArgument);
        }
        self.arg_bindings[index] = None;
        patch_pointer(&mut self.cross_thread_data, &pointer, address);
        let offset_in_allocation = address - allocation.gpu_address();
        patch_non_pointer(&mut self.cross_thread_data, pointer.buffer_offset, offset_in_allocation as u32);
        let remaining = allocation.size() - offset_in_allocation;
        let state = RenderSurfaceState::buffer(address, remaining);
        if is_valid_offset(pointer.bindful) {
            write_state(&mut self.surface_state_heap, usize::from(pointer.bindful), bytemuck::bytes_of(&state));
        } else if is_valid_offset(pointer.bindless) {
            if let Some(slot) = self.descriptor().bindless_offset_to_surface_state.get(&pointer.bindless).copied() {
                let offset = slot as usize * self.family.surface_state_size as usize;
                write_state(&mut self.surface_state_heap, offset, bytemuck::bytes_of(&state));
            }
        }
        self.residency[index] = Some(allocation.clone());
        Ok(())
    }

    /// Binds an image. Bindless images use their own slot in the device
    /// heap.
    pub fn set_arg_image(&mut self, index: usize, image: &Image) -> Result<()> {
        self.bind_image(index, image, false)
    }

    /// Binds an image as single channel 32 bit texels.
    pub fn set_arg_redescribed_image(&mut self, index: usize, image: &Image) -> Result<()> {
        self.bind_image(index, image, true)
    }

    fn bind_image(&mut self, index: usize, image: &Image, redescribed: bool) -> Result<()> {
        let arg = self.explicit_arg(index)?;
        let ArgDescImage {
            bindful,
            bindless,
            metadata_payload,
        } = *arg.as_image().ok_or(ZeError::InvalidArgument)?;
        if is_valid_offset(bindless) {
            let slot = image.allocate_bindless_slot().map_err(|error| {
                tracing::warn!(kernel = self.kernel_name(), index, "no bindless slot for image");
                error
            })?;
            let state_offset = if redescribed {
                u64::from(self.family.surface_state_size)
            } else {
                0
            };
            self.family
                .bindless_handle(slot.surface_state_offset + state_offset, slot.gpu_address + state_offset)
                .patch(&mut self.cross_thread_data, bindless);
            self.bindless_offset_set[index] = true;
        } else if is_valid_offset(bindful) {
            let state = image.surface_state(redescribed);
            write_state(&mut self.surface_state_heap, usize::from(bindful), bytemuck::bytes_of(&state));
        }
        self.residency[index] = Some(image.allocation().clone());
        if redescribed {
            return Ok(());
        }

        let metadata = image.metadata();
        let ctd = &mut self.cross_thread_data;
        let payload = &metadata_payload;
        patch_non_pointer(ctd, payload.img_width, u64::from(metadata.width));
        patch_non_pointer(ctd, payload.img_height, u64::from(metadata.height));
        patch_non_pointer(ctd, payload.img_depth, u64::from(metadata.depth));
        patch_non_pointer(ctd, payload.num_samples, metadata.num_samples);
        patch_non_pointer(ctd, payload.array_size, u64::from(metadata.array_size));
        patch_non_pointer(ctd, payload.channel_data_type, metadata.channel_data_type);
        patch_non_pointer(ctd, payload.channel_order, metadata.channel_order);
        patch_non_pointer(ctd, payload.num_mip_levels, metadata.num_mip_levels);
        patch_non_pointer(ctd, payload.flat_base_offset, metadata.flat_base_offset);
        patch_non_pointer(ctd, payload.flat_width, u64::from(metadata.flat_width));
        patch_non_pointer(ctd, payload.flat_height, u64::from(metadata.flat_height));
        patch_non_pointer(ctd, payload.flat_pitch, u64::from(metadata.flat_pitch));
        Ok(())
    }

    /// Writes the sampler state into the dynamic state heap and patches its
    /// metadata.
    pub fn set_arg_sampler(&mut self, index: usize, sampler: &Sampler) -> Result<()> {
        let arg = self.explicit_arg(index)?;
        let ArgDescSampler {
            bindful,
            index: sampler_index,
            metadata_payload,
            ..
        } = *arg.as_sampler().ok_or(ZeError::InvalidArgument)?;
        let state = sampler.sampler_state();
        let dsh_offset = if is_valid_offset(bindful) {
            usize::from(bindful)
        } else {
            let table = self.descriptor().payload_mappings.sampler_table;
            usize::from(table.table_offset) + usize::from(sampler_index) * self.family.sampler_state_size as usize
        };
        write_state(&mut self.dynamic_state_heap, dsh_offset, bytemuck::bytes_of(&state));

        let snap_wa = if sampler.snap_wa() != 0 { u32::MAX } else { 0 };
        let normalized = if sampler.desc().normalized_coordinates {
            SAMPLER_NORMALIZED_COORDS_TRUE
        } else {
            SAMPLER_NORMALIZED_COORDS_FALSE
        };
        let ctd = &mut self.cross_thread_data;
        patch_non_pointer(ctd, metadata_payload.sampler_snap_wa, snap_wa);
        patch_non_pointer(ctd, metadata_payload.sampler_addressing_mode, sampler.desc().addressing_mode.code());
        patch_non_pointer(ctd, metadata_payload.sampler_normalized_coords, normalized);
        Ok(())
    }

    /// Patches bindless handles of surfaces whose states were copied from
    /// the kernel heap to `base`.
    ///
    /// Arguments that carry their own slot, like bindless images, are left
    /// untouched.
    pub fn patch_bindless_offsets_in_cross_thread_data(&mut self, base: &SurfaceStateSlot) {
        let desc = self.immutable.descriptor().clone();
        let state_size = u64::from(self.family.surface_state_size);
        let explicit = desc
            .payload_mappings
            .explicit_args
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.bindless_offset_set[*index])
            .filter_map(|(_, arg)| match arg {
                ArgDescriptor::Pointer(_) | ArgDescriptor::Image(_) => arg.bindless_offset(),
                _ => None,
            });
        let implicit = desc
            .payload_mappings
            .implicit_args
            .surfaces()
            .into_iter()
            .map(|surface| surface.bindless)
            .filter(|offset| is_valid_offset(*offset));
        for bindless in explicit.chain(implicit).collect::<Vec<_>>() {
            let Some(slot) = desc.bindless_offset_to_surface_state.get(&bindless) else {
                continue;
            };
            let offset = u64::from(*slot) * state_size;
            self.family
                .bindless_handle(base.surface_state_offset + offset, base.gpu_address + offset)
                .patch(&mut self.cross_thread_data, bindless);
        }
    }

    /// Patches bindless sampler handles relative to the sampler states at
    /// `base`.
    pub fn patch_sampler_bindless_offsets_in_cross_thread_data(&mut self, base: &SurfaceStateSlot) {
        let desc = self.immutable.descriptor().clone();
        let state_size = u64::from(self.family.sampler_state_size);
        for arg in desc.payload_mappings.explicit_args.iter().filter_map(ArgDescriptor::as_sampler) {
            if !is_valid_offset(arg.bindless) {
                continue;
            }
            let offset = u64::from(arg.index) * state_size;
            self.family
                .bindless_handle(base.surface_state_offset + offset, base.gpu_address + offset)
                .patch(&mut self.cross_thread_data, arg.bindless);
        }
    }

    /// Whether a surface state of the kernel heap must be copied to a
    /// bindless heap before dispatch.
    pub fn uses_bindless_surface_states(&self) -> bool {
        !self.descriptor().bindless_offset_to_surface_state.is_empty()
    }
}

fn read_pointer(bytes: &[u8]) -> Result<u64> {
    match bytes.len() {
        4 => Ok(u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))),
        8 => {
            let mut pointer = [0; 8];
            pointer.copy_from_slice(bytes);
            Ok(u64::from_le_bytes(pointer))
        }
        _ => Err(ZeError::InvalidArgument),
    }
}

/// Copies a state into a heap, growing it if the state lies past its end.
fn write_state(heap: &mut Vec<u8>, offset: usize, state: &[u8]) {
    if heap.len() < offset + state.len() {
        heap.resize(offset + state.len(), 0);
    }
    heap[offset..offset + state.len()].copy_from_slice(state);
}
