//! Kernel launches into a command list.

use super::{encode_signal_with, CommandList, CommandToPatch, StreamProperties};
use crate::{
    config::tri_state,
    encoder::{
        dispatch::{encode_dispatch_kernel, DispatchArgs},
        implicit_scaling::PartitionSettings,
        store::PipeControlArgs,
        sw_tags::{self, SwTag},
    },
    error::ZeError,
    event::Event,
    family::GfxFamily,
    kernel::Kernel,
    memory::{AllocationType, GraphicsAllocation},
    result::Result,
    stream::CommandContainer,
};
use neo_dispatch_core::{
    descriptor::ThreadArbitrationPolicy,
    hw::cmds::PostSync,
    mem::{align_up, CACHE_LINE_SIZE},
};
use std::sync::Arc;

/// Options of one launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaunchParams {
    /// All groups run concurrently and may synchronize through the sync
    /// buffer.
    pub is_cooperative: bool,
    /// Address of three dwords holding the group counts, read when the
    /// dispatch executes.
    pub indirect_group_count_address: Option<u64>,
    /// Groups per region for kernels using region group barriers.
    pub local_region_size: u32,
    /// Encode the dispatch into a separate container returned in
    /// [`LaunchOutcome::command_view`] instead of the list.
    pub make_kernel_command_view: bool,
    /// Skip the dispatch unless the predicate register is set.
    pub is_predicated: bool,
    /// Do not signal the event with a separate command when the walker
    /// cannot carry the post sync.
    pub skip_in_order_non_walker_signaling: bool,
}

impl LaunchParams {
    pub fn is_indirect(&self) -> bool {
        self.indirect_group_count_address.is_some()
    }
}

/// Walker and payload of a launch encoded outside the list.
#[derive(Debug)]
pub struct KernelCommandView {
    container: CommandContainer,
    walker_offset: usize,
}

impl KernelCommandView {
    pub fn container(&self) -> &CommandContainer {
        &self.container
    }
    pub fn walker_offset(&self) -> usize {
        self.walker_offset
    }
}

/// What a launch left in the list.
#[derive(Debug)]
pub struct LaunchOutcome {
    /// Index in [`CommandList::commands_to_patch`] of the record zeroing
    /// the sync buffer range.
    pub sync_buffer_patch_index: Option<usize>,
    /// Index of the record zeroing the region barrier range.
    pub region_barrier_patch_index: Option<usize>,
    pub partition_count: u32,
    /// Command stream offset of the walker, in the view when one was made.
    pub walker_offset: Option<usize>,
    pub command_view: Option<KernelCommandView>,
}

/// Sync buffer bytes for `group_count` groups: one byte per group, at
/// least 12, rounded to a qword.
pub fn sync_buffer_size(group_count: u64) -> u64 {
    align_up(group_count.max(12), 8)
}

/// Region barrier bytes: two dword counters per group of each region plus
/// one per region, rounded to a cache line.
pub fn region_barrier_size(group_count: u64, local_region_size: u32) -> u64 {
    let local_region_size = u64::from(local_region_size);
    align_up(
        (group_count / local_region_size) * (local_region_size + 1) * 2 * 4,
        CACHE_LINE_SIZE as u64,
    )
}

/// List state a failed launch is rolled back to.
struct Checkpoint {
    stream_used: usize,
    patches: usize,
    total_noop_space: usize,
    partition_count: u32,
    call_id: u32,
    state_base_address_programmed: bool,
    required_stream_properties: StreamProperties,
    final_stream_properties: StreamProperties,
}

impl<F: GfxFamily> CommandList<F> {
    /// Appends a dispatch of `kernel` with `group_count` groups.
    ///
    /// `event` is signaled when the dispatch completes.
    ///
    /// **errors**
    /// - InvalidArgument if the list is closed, the kernel is invalid or
    ///   belongs to another device, cooperative and regular kernels are
    ///   mixed, a region barrier kernel has no region size, or a
    ///   cooperative or sync buffer kernel launches more groups than can be
    ///   resident.
    /// - OutOfDeviceMemory if buffers for the dispatch cannot be allocated.
    pub fn append_launch_kernel(
        &mut self,
        kernel: &mut Kernel,
        group_count: [u32; 3],
        event: Option<&Event>,
        params: &LaunchParams,
    ) -> Result<LaunchOutcome> {
        self.ensure_open()?;
        let settings = self.device.settings().clone();
        let flags = *kernel.descriptor().flags();
        if flags.is_invalid {
            tracing::warn!(kernel = kernel.kernel_name(), "invalid kernel");
            return Err(ZeError::InvalidArgument);
        }
        if kernel.device() != &self.device {
            return Err(ZeError::InvalidArgument);
        }
        let contains_cooperative_kernels =
            if !self.contains_any_kernel || settings.allow_mixing_regular_and_cooperative_kernels {
                self.contains_cooperative_kernels || params.is_cooperative
            } else if self.contains_cooperative_kernels != params.is_cooperative {
                tracing::warn!(
                    kernel = kernel.kernel_name(),
                    cooperative = params.is_cooperative,
                    "cooperative and regular kernels mixed in one list"
                );
                return Err(ZeError::InvalidArgument);
            } else {
                self.contains_cooperative_kernels
            };
        if flags.uses_region_group_barrier && params.local_region_size == 0 {
            return Err(ZeError::InvalidArgument);
        }
        let total_groups: u64 = group_count.iter().map(|count| u64::from(*count)).product();
        if (params.is_cooperative || flags.uses_sync_buffer)
            && total_groups > u64::from(kernel.suggest_max_cooperative_group_count())
        {
            tracing::warn!(
                kernel = kernel.kernel_name(),
                total_groups,
                max = kernel.suggest_max_cooperative_group_count(),
                "too many groups for a cooperative dispatch"
            );
            return Err(ZeError::InvalidArgument);
        }

        let mut outcome = LaunchOutcome {
            sync_buffer_patch_index: None,
            region_barrier_patch_index: None,
            partition_count: 1,
            walker_offset: None,
            command_view: None,
        };

        if !params.is_indirect() && total_groups == 0 {
            tracing::debug!(kernel = kernel.kernel_name(), "empty dispatch skipped");
            if let Some(event) = event {
                self.encode_signal(event);
            }
            self.flush_immediate()?;
            return Ok(outcome);
        }

        // Allocations that can fail come before anything is recorded.
        let private_allocation = self.private_allocation_for(kernel)?;
        let view_container = if params.make_kernel_command_view {
            Some(CommandContainer::new(self.device.memory_manager())?)
        } else {
            None
        };

        let checkpoint = self.checkpoint();
        let recorded = (|| -> Result<()> {
            if flags.uses_sync_buffer {
                let size = sync_buffer_size(total_groups);
                let (allocation, offset) = self.device.sync_buffer_handler().obtain_allocation_and_offset(size)?;
                kernel.patch_sync_buffer(allocation.clone(), offset);
                outcome.sync_buffer_patch_index = self.zero_before_use(allocation, offset, size as usize)?;
            }
            if flags.uses_region_group_barrier {
                let size = region_barrier_size(total_groups, params.local_region_size);
                let (allocation, offset) = self.device.sync_buffer_handler().obtain_allocation_and_offset(size)?;
                kernel.patch_region_barrier(allocation.clone(), offset);
                outcome.region_barrier_patch_index = self.zero_before_use(allocation, offset, size as usize)?;
            }

            if let Some(allocation) = private_allocation.as_ref() {
                kernel.patch_private_memory(allocation);
            }

            kernel.set_group_count(group_count[0], group_count[1], group_count[2]);

            let call_id = settings.enable_sw_tags.then(|| {
                self.call_id += 1;
                self.call_id
            });
            if let Some(id) = call_id {
                let stream = self.container.command_stream_mut();
                sw_tags::encode(stream, SwTag::CallBegin { id });
                sw_tags::encode(stream, SwTag::kernel_name(kernel.kernel_name()));
            }

            self.update_thread_arbitration(kernel.thread_arbitration_policy(), &settings);
            if !F::INFO.heapless && !self.state_base_address_programmed && !params.make_kernel_command_view {
                F::encode_state_base_address(&mut self.container);
                self.state_base_address_programmed = true;
            }

            let tile_count = self.device.hardware_info().tile_count();
            let implicit_scaling = F::INFO.supports_implicit_scaling
                && tile_count > 1
                && tri_state(settings.enable_implicit_scaling, true);
            let partition = implicit_scaling.then(|| {
                PartitionSettings::new(
                    group_count,
                    tile_count,
                    params.is_cooperative && !F::INFO.supports_cooperative_implicit_scaling,
                )
            });

            let mut view_container = view_container;
            let container = match view_container.as_mut() {
                Some(container) => container,
                None => &mut self.container,
            };
            if let Some(allocation) = private_allocation.as_ref() {
                container.add_to_residency(allocation);
            }
            let dispatch = DispatchArgs {
                kernel: &*kernel,
                group_count,
                indirect_group_count_address: params.indirect_group_count_address,
                is_predicated: params.is_predicated,
                post_sync: event.map(Event::post_sync).unwrap_or(PostSync::None),
                partition,
                settings: &settings,
            };
            let output = encode_dispatch_kernel::<F>(container, &dispatch)?;
            if let Some(event) = event {
                if !output.post_sync_in_walker && !params.skip_in_order_non_walker_signaling {
                    let args = PipeControlArgs {
                        cs_stall: true,
                        dc_flush: true,
                        ..PipeControlArgs::default()
                    };
                    encode_signal_with(container.command_stream_mut(), event, &args);
                }
                container.add_to_residency(event.allocation());
            }

            outcome.partition_count = output.partition_count;
            outcome.walker_offset = Some(output.walker_offset);
            match view_container {
                Some(container) => {
                    outcome.command_view = Some(KernelCommandView {
                        container,
                        walker_offset: output.walker_offset,
                    });
                }
                None => {
                    self.commands_to_patch.extend(output.scratch_patches);
                    if output.partition_count > 1 {
                        self.partition_count = self.partition_count.max(output.partition_count);
                        if !self.is_immediate() {
                            self.append_cross_tile_sync()?;
                        }
                    }
                }
            }

            if let (Some(event), Some(buffer)) = (event, kernel.printf_buffer()) {
                if kernel.uses_printf() {
                    event.register_printf_kernel(kernel.kernel_name(), buffer.clone());
                }
            }
            let scratch = kernel.descriptor().kernel_attributes.per_thread_scratch_size;
            for (tracked, required) in self.per_thread_scratch_size.iter_mut().zip(scratch) {
                *tracked = (*tracked).max(required);
            }
            self.contains_any_kernel = true;
            self.contains_cooperative_kernels = contains_cooperative_kernels;

            if let Some(id) = call_id {
                sw_tags::encode(self.container.command_stream_mut(), SwTag::CallEnd { id });
            }
            Ok(())
        })();
        if let Err(err) = recorded {
            tracing::warn!(kernel = kernel.kernel_name(), %err, "launch discarded");
            self.restore(checkpoint);
            return Err(err);
        }
        tracing::debug!(
            kernel = kernel.kernel_name(),
            ?group_count,
            cooperative = params.is_cooperative,
            indirect = params.is_indirect(),
            partition_count = outcome.partition_count,
            "kernel appended"
        );
        self.flush_immediate()?;
        Ok(outcome)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            stream_used: self.container.command_stream().used(),
            patches: self.commands_to_patch.len(),
            total_noop_space: self.total_noop_space,
            partition_count: self.partition_count,
            call_id: self.call_id,
            state_base_address_programmed: self.state_base_address_programmed,
            required_stream_properties: self.required_stream_properties,
            final_stream_properties: self.final_stream_properties,
        }
    }

    /// Drops what a failed launch recorded after `checkpoint`.
    fn restore(&mut self, checkpoint: Checkpoint) {
        self.container.command_stream_mut().truncate(checkpoint.stream_used);
        self.commands_to_patch.truncate(checkpoint.patches);
        self.total_noop_space = checkpoint.total_noop_space;
        self.partition_count = checkpoint.partition_count;
        self.call_id = checkpoint.call_id;
        self.state_base_address_programmed = checkpoint.state_base_address_programmed;
        self.required_stream_properties = checkpoint.required_stream_properties;
        self.final_stream_properties = checkpoint.final_stream_properties;
    }

    /// Makes `size` bytes at `offset` of `allocation` zero before the list
    /// executes. Regular lists defer this to submission and return the
    /// index of the record, immediate lists zero right away.
    fn zero_before_use(
        &mut self,
        allocation: Arc<GraphicsAllocation>,
        offset: u64,
        size: usize,
    ) -> Result<Option<usize>> {
        if self.is_immediate() {
            allocation.zero(offset, size)?;
            self.container.add_to_residency(&allocation);
            return Ok(None);
        }
        self.container.add_to_residency(&allocation);
        self.commands_to_patch.push(CommandToPatch::NoopSpace {
            gpu_address: allocation.gpu_address() + offset,
            allocation,
            offset,
            patch_size: size,
        });
        self.total_noop_space += size;
        Ok(Some(self.commands_to_patch.len() - 1))
    }

    /// Private memory allocated by the list for modules too large to give
    /// every kernel its own. Kernels of the same size share it.
    fn private_allocation_for(&mut self, kernel: &Kernel) -> Result<Option<Arc<GraphicsAllocation>>> {
        if !kernel.module().should_allocate_private_memory_per_dispatch() {
            return Ok(None);
        }
        let compute_units = self.device.hardware_info().compute_units_used_for_scratch();
        let size = kernel.immutable_data().private_surface_size(compute_units);
        if size == 0 {
            return Ok(None);
        }
        if let Some(allocation) = self.private_allocations.get(&size) {
            return Ok(Some(allocation.clone()));
        }
        let allocation = self
            .device
            .memory_manager()
            .allocate(size, AllocationType::PrivateSurface)
            .map_err(|_| {
                self.device
                    .debug_message(format_args!("Failed to allocate private surface of size {size}"));
                ZeError::OutOfDeviceMemory
            })?;
        tracing::debug!(size, "per dispatch private memory");
        self.private_allocations.insert(size, allocation.clone());
        Ok(Some(allocation))
    }

    /// Tracks the arbitration policy of a kernel. The first known policy is
    /// what the list requires; later changes are programmed inline.
    fn update_thread_arbitration(&mut self, policy: ThreadArbitrationPolicy, settings: &crate::config::DebugSettings) {
        let policy = match policy {
            ThreadArbitrationPolicy::NotPresent if settings.force_default_thread_arbitration_policy_if_not_specified => {
                F::INFO.default_thread_arbitration_policy
            }
            policy => policy,
        };
        if policy == ThreadArbitrationPolicy::NotPresent {
            return;
        }
        if !self.required_stream_properties.thread_arbitration_policy.is_set() {
            self.required_stream_properties.set_thread_arbitration_policy(policy);
            self.final_stream_properties.set_thread_arbitration_policy(policy);
            return;
        }
        if self.final_stream_properties.thread_arbitration_policy() != policy {
            F::encode_thread_arbitration(self.container.command_stream_mut(), policy);
            self.final_stream_properties.set_thread_arbitration_policy(policy);
        }
    }
}
