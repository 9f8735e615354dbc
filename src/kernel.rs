/*!

Kernel instances.

A [`Kernel`] is the mutable, per handle state of a kernel: its cross-thread
data, heap copies, group size and count, argument bindings and the
allocations a dispatch needs resident. Kernels are created with
[`Module::create_kernel`](crate::module::Module::create_kernel) and encoded
by a [`CommandList`](crate::cmdlist::CommandList).

```
# use neo_dispatch::{device::Device, kernel::ArgValue, module::Module};
# use neo_dispatch::neo_dispatch_core::descriptor::*;
# fn main() -> neo_dispatch::result::Result<()> {
let device = Device::builder().build()?;
let mut info = KernelInfo::default();
info.descriptor.kernel_metadata.kernel_name = "scale".into();
info.descriptor.kernel_attributes.cross_thread_data_size = 16;
info.descriptor.payload_mappings.explicit_args.push(ArgDescriptor::Value(ArgDescValue {
    elements: vec![ArgDescValueElement { offset: 0, size: 4, source_offset: 0 }],
}));
let module = Module::new(&device, ProgramInfo { kernel_infos: vec![info], ..Default::default() })?;
let mut kernel = module.create_kernel("scale")?;
kernel.set_argument_value(0, 4, ArgValue::Bytes(&7u32.to_le_bytes()))?;
assert_eq!(&kernel.cross_thread_data()[..4], &[7, 0, 0, 0]);
# Ok(())
# }
```
*/

use crate::{
    device::Device,
    error::ZeError,
    family::FamilyInfo,
    memory::{AllocationType, GraphicsAllocation},
    module::{KernelImmutableData, Module},
    result::Result,
};
use neo_dispatch_core::{
    descriptor::{
        patch_non_pointer, patch_pointer, patch_vec_non_pointer, KernelDescriptor, ThreadArbitrationPolicy,
    },
    hw::cmds::HwLocalIdGeneration,
    implicit_args::ImplicitArgs,
    local_id::{self, LocalIdGeneration},
    mem::{max_n_bit_value, MB},
};
use std::{fmt, sync::Arc};

mod args;

pub use args::ArgValue;
use args::ArgBinding;

/// Which kinds of allocations a kernel may reach through pointers it was
/// not given as arguments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndirectAccessFlags {
    pub device: bool,
    pub host: bool,
    pub shared: bool,
}

/// Indirect access granted to a kernel.
pub type UnifiedMemoryControls = IndirectAccessFlags;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelProperties {
    pub num_kernel_args: u32,
    pub required_group_size: [u32; 3],
    pub required_subgroup_size: u32,
    pub max_subgroup_size: u32,
    pub max_num_subgroups: u32,
    pub local_mem_size: u32,
    pub private_mem_size: u32,
    pub spill_mem_size: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SkipCounters {
    pub(crate) set_group_size: u32,
    pub(crate) set_arg_buffer: u32,
}

/// A kernel instance.
///
/// **errors** from creation
/// - InvalidNativeBinary if the kernel needs more scratch per thread than
///   the generation supports.
/// - OutOfDeviceMemory if its private memory does not fit in device memory
///   or cannot be allocated.
/// - OutOfHostMemory if ray tracing buffers cannot be allocated.
pub struct Kernel {
    module: Module,
    immutable: Arc<KernelImmutableData>,
    device: Device,
    family: FamilyInfo,
    cross_thread_data: Vec<u8>,
    surface_state_heap: Vec<u8>,
    dynamic_state_heap: Vec<u8>,
    group_size: [u32; 3],
    group_count: [u32; 3],
    global_offset: [u32; 3],
    num_threads_per_thread_group: u32,
    thread_execution_mask: u32,
    local_id_generation: LocalIdGeneration,
    per_thread_data_size: u32,
    per_thread_data: Vec<u8>,
    implicit_args: Option<Box<ImplicitArgs>>,
    /// First entries belong to the explicit arguments, by index.
    residency: Vec<Option<Arc<GraphicsAllocation>>>,
    printf_buffer: Option<Arc<GraphicsAllocation>>,
    private_memory: Option<Arc<GraphicsAllocation>>,
    sync_buffer_index: Option<usize>,
    region_barrier_index: Option<usize>,
    arg_bindings: Vec<Option<ArgBinding>>,
    /// Arguments whose bindless handle was patched from their own slot.
    bindless_offset_set: Vec<bool>,
    slm_arg_sizes: Vec<u32>,
    slm_args_total_size: u32,
    has_indirect_access: bool,
    unified_memory_controls: UnifiedMemoryControls,
    scheduling_hint: ThreadArbitrationPolicy,
    skip_counters: SkipCounters,
}

impl Kernel {
    pub const PRINTF_SURFACE_SIZE: u64 = MB;

    pub(crate) fn new(module: Module, immutable: Arc<KernelImmutableData>) -> Result<Self> {
        let device = module.device().clone();
        let family = *device.family();
        let desc = immutable.descriptor().clone();
        let attributes = &desc.kernel_attributes;
        let num_args = desc.payload_mappings.explicit_args.len();
        let has_indirect_access = match device.settings().disable_indirect_access {
            1 => false,
            _ => attributes.flags.has_indirect_stateless_access || attributes.flags.uses_stack_calls,
        };
        let mut kernel = Self {
            module,
            device,
            family,
            cross_thread_data: immutable.cross_thread_data_template().to_vec(),
            surface_state_heap: immutable.surface_state_heap_template().to_vec(),
            dynamic_state_heap: immutable.dynamic_state_heap_template().to_vec(),
            group_size: [0; 3],
            group_count: [0; 3],
            global_offset: [0; 3],
            num_threads_per_thread_group: 1,
            thread_execution_mask: 0,
            local_id_generation: LocalIdGeneration {
                runtime_required: false,
                walk_order: 0,
            },
            per_thread_data_size: 0,
            per_thread_data: Vec::new(),
            implicit_args: None,
            residency: vec![None; num_args],
            printf_buffer: None,
            private_memory: None,
            sync_buffer_index: None,
            region_barrier_index: None,
            arg_bindings: vec![None; num_args],
            bindless_offset_set: vec![false; num_args],
            slm_arg_sizes: vec![0; num_args],
            slm_args_total_size: 0,
            has_indirect_access,
            unified_memory_controls: UnifiedMemoryControls::default(),
            scheduling_hint: ThreadArbitrationPolicy::NotPresent,
            skip_counters: SkipCounters::default(),
            immutable,
        };
        kernel.initialize()?;
        Ok(kernel)
    }

    fn initialize(&mut self) -> Result<()> {
        let desc = self.immutable.descriptor().clone();
        let attributes = &desc.kernel_attributes;
        let implicit = &desc.payload_mappings.implicit_args;

        if attributes.flags.requires_implicit_args {
            let mut args = ImplicitArgs::new(self.family.implicit_args_version);
            args.set_simd_width(desc.simd_size());
            self.implicit_args = Some(Box::new(args));
        }

        for (slot, (required, max)) in attributes
            .per_thread_scratch_size
            .iter()
            .zip(self.family.max_per_thread_scratch_size)
            .enumerate()
        {
            if *required > max {
                tracing::warn!(kernel = desc.name(), slot, required, max, "scratch size exceeds the maximum");
                return Err(ZeError::InvalidNativeBinary);
            }
        }

        let [x, y, z] = attributes
            .required_workgroup_size()
            .unwrap_or([desc.simd_size().max(1), 1, 1]);
        self.set_group_size_internal([x, y, z]);

        if attributes.flags.uses_printf || attributes.flags.use_stack_calls_printf {
            let printf = self
                .device
                .memory_manager()
                .allocate(Self::PRINTF_SURFACE_SIZE, AllocationType::PrintfSurface)?;
            patch_pointer(&mut self.cross_thread_data, &implicit.printf_surface_address, printf.gpu_address());
            if let Some(args) = self.implicit_args.as_deref_mut() {
                args.set_printf_buffer(printf.gpu_address());
            }
            self.residency.push(Some(printf.clone()));
            self.printf_buffer = Some(printf);
        }

        for allocation in self.immutable.residency() {
            match allocation.allocation_type() {
                AllocationType::GlobalConstants => patch_pointer(
                    &mut self.cross_thread_data,
                    &implicit.global_constants_surface_address,
                    allocation.gpu_address(),
                ),
                AllocationType::GlobalVariables => patch_pointer(
                    &mut self.cross_thread_data,
                    &implicit.global_variables_surface_address,
                    allocation.gpu_address(),
                ),
                _ => (),
            }
            self.residency.push(Some(allocation.clone()));
        }

        if attributes.per_hw_thread_private_memory_size > 0 {
            let compute_units = self.device.hardware_info().compute_units_used_for_scratch();
            let size = self.immutable.private_surface_size(compute_units);
            let global_memory_size = self.device.hardware_info().global_memory_size();
            if size > global_memory_size {
                self.device.debug_message(format_args!(
                    "Private memory size {size} exceeds global memory size {global_memory_size}"
                ));
                return Err(ZeError::OutOfDeviceMemory);
            }
            if !self.module.should_allocate_private_memory_per_dispatch() {
                let private = self
                    .device
                    .memory_manager()
                    .allocate(size, AllocationType::PrivateSurface)
                    .map_err(|_| {
                        self.device
                            .debug_message(format_args!("Failed to allocate private surface of size {size}"));
                        ZeError::OutOfDeviceMemory
                    })?;
                self.patch_private_memory(&private);
                self.residency.push(Some(private.clone()));
                self.private_memory = Some(private);
            }
        }

        if attributes.flags.has_rt_calls {
            let rt = self.device.ensure_rt_dispatch_globals()?;
            patch_pointer(&mut self.cross_thread_data, &implicit.rt_dispatch_globals, rt.gpu_address());
            if let Some(args) = self.implicit_args.as_deref_mut() {
                args.set_rt_global_buffer(rt.gpu_address());
            }
            self.residency.push(Some(rt));
        }

        patch_non_pointer(&mut self.cross_thread_data, implicit.simd_size, desc.simd_size());
        tracing::trace!(kernel = desc.name(), "kernel initialized");
        Ok(())
    }

    pub(crate) fn patch_private_memory(&mut self, allocation: &GraphicsAllocation) {
        let desc = self.immutable.descriptor().clone();
        patch_pointer(
            &mut self.cross_thread_data,
            &desc.payload_mappings.implicit_args.private_memory_address,
            allocation.gpu_address(),
        );
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
    pub fn device(&self) -> &Device {
        &self.device
    }
    pub fn descriptor(&self) -> &KernelDescriptor {
        self.immutable.descriptor()
    }
    pub fn immutable_data(&self) -> &Arc<KernelImmutableData> {
        &self.immutable
    }
    pub fn kernel_name(&self) -> &str {
        self.descriptor().name()
    }
    pub fn isa_allocation(&self) -> &Arc<GraphicsAllocation> {
        self.immutable.isa_allocation()
    }
    pub fn cross_thread_data(&self) -> &[u8] {
        &self.cross_thread_data
    }
    pub(crate) fn cross_thread_data_mut(&mut self) -> &mut [u8] {
        &mut self.cross_thread_data
    }
    pub fn surface_state_heap(&self) -> &[u8] {
        &self.surface_state_heap
    }
    pub fn dynamic_state_heap(&self) -> &[u8] {
        &self.dynamic_state_heap
    }
    pub fn implicit_args(&self) -> Option<&ImplicitArgs> {
        self.implicit_args.as_deref()
    }
    pub(crate) fn implicit_args_mut(&mut self) -> Option<&mut ImplicitArgs> {
        self.implicit_args.as_deref_mut()
    }
    pub fn printf_buffer(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.printf_buffer.as_ref()
    }
    pub fn private_memory(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.private_memory.as_ref()
    }
    /// Allocations bound to the kernel, unbound argument slots skipped.
    pub fn residency(&self) -> impl Iterator<Item = &Arc<GraphicsAllocation>> {
        self.residency.iter().flatten()
    }
    pub fn uses_printf(&self) -> bool {
        let flags = self.descriptor().flags();
        flags.uses_printf || flags.use_stack_calls_printf
    }

    /// Sets the work group size.
    ///
    /// **errors**
    /// - InvalidArgument if a dimension is zero.
    /// - InvalidGroupSizeDimension if the kernel requires another size or
    ///   the group is larger than the device allows.
    pub fn set_group_size(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if x == 0 || y == 0 || z == 0 {
            return Err(ZeError::InvalidArgument);
        }
        let attributes = &self.descriptor().kernel_attributes;
        if let Some(required) = attributes.required_workgroup_size() {
            if required != [x, y, z] {
                return Err(ZeError::InvalidGroupSizeDimension);
            }
        }
        let items = u64::from(x) * u64::from(y) * u64::from(z);
        if items > u64::from(self.device.hardware_info().max_work_group_size()) {
            return Err(ZeError::InvalidGroupSizeDimension);
        }
        if self.group_size == [x, y, z] {
            self.skip_counters.set_group_size += 1;
            return Ok(());
        }
        self.set_group_size_internal([x, y, z]);
        Ok(())
    }

    fn set_group_size_internal(&mut self, group_size: [u32; 3]) {
        let desc = self.immutable.descriptor().clone();
        let attributes = &desc.kernel_attributes;
        let traits = &desc.payload_mappings.dispatch_traits;
        self.group_size = group_size;
        patch_vec_non_pointer(&mut self.cross_thread_data, traits.local_work_size, group_size);
        patch_vec_non_pointer(&mut self.cross_thread_data, traits.local_work_size2, group_size);
        patch_vec_non_pointer(&mut self.cross_thread_data, traits.enqueued_local_work_size, group_size);
        if let Some(args) = self.implicit_args.as_deref_mut() {
            args.set_local_size(group_size);
            args.set_enqueued_local_size(group_size);
        }

        let simd = desc.simd_size();
        let items: u32 = group_size.iter().product();
        self.num_threads_per_thread_group = local_id::threads_per_work_group(simd, items);
        let remainder = if simd > 1 { items & (simd - 1) } else { 0 };
        self.thread_execution_mask = match max_n_bit_value(remainder) as u32 {
            0 => max_n_bit_value(if simd == 1 { 32 } else { simd }) as u32,
            mask => mask,
        };

        let num_channels = u32::from(attributes.num_local_id_channels);
        self.local_id_generation = local_id::local_id_generation(
            num_channels,
            group_size,
            attributes.workgroup_walk_order,
            attributes.flags.requires_workgroup_order,
            simd,
            self.family.supports_hw_local_id_generation,
        );

        if self.local_id_generation.runtime_required && num_channels > 0 {
            let grf_size = self.family.grf_size;
            self.per_thread_data_size = local_id::per_thread_size_local_ids(simd, grf_size, num_channels);
            let total = local_id::per_thread_data_size_total(simd, grf_size, num_channels, items) as usize;
            self.per_thread_data.clear();
            self.per_thread_data.resize(total, 0);
            local_id::generate_local_ids(
                &mut self.per_thread_data,
                simd,
                group_size,
                attributes.workgroup_dimensions_order,
                grf_size,
                num_channels,
            );
        } else {
            self.per_thread_data_size = 0;
            self.per_thread_data.clear();
        }
    }

    pub fn group_size(&self) -> [u32; 3] {
        self.group_size
    }
    pub fn num_threads_per_thread_group(&self) -> u32 {
        self.num_threads_per_thread_group
    }
    /// Lanes enabled in the last thread of a group.
    pub fn thread_execution_mask(&self) -> u32 {
        self.thread_execution_mask
    }
    /// Local IDs of every thread of a group when the runtime writes them.
    pub fn per_thread_data_for_whole_group(&self) -> &[u8] {
        &self.per_thread_data
    }
    pub fn per_thread_data_size(&self) -> u32 {
        self.per_thread_data_size
    }
    /// Whether the runtime writes local IDs instead of the walker.
    pub fn requires_runtime_local_ids(&self) -> bool {
        self.local_id_generation.runtime_required
    }
    /// Walk order code used when the walker generates local IDs.
    pub fn walk_order(&self) -> u32 {
        self.local_id_generation.walk_order
    }
    /// Walker local ID generation, `None` when the runtime writes IDs or
    /// the kernel reads none.
    pub fn hw_local_id_generation(&self) -> Option<HwLocalIdGeneration> {
        let num_channels = u32::from(self.descriptor().kernel_attributes.num_local_id_channels);
        (!self.local_id_generation.runtime_required && num_channels > 0).then(|| HwLocalIdGeneration {
            walk_order: self.local_id_generation.walk_order,
            emit_local_id: local_id::emit_local_id_mask(num_channels),
            local_size: self.group_size,
        })
    }

    /// Sets the group count of the next dispatch and the values derived
    /// from it.
    pub fn set_group_count(&mut self, x: u32, y: u32, z: u32) {
        let desc = self.immutable.descriptor().clone();
        let traits = &desc.payload_mappings.dispatch_traits;
        let group_count = [x, y, z];
        self.group_count = group_count;
        let global_size = [
            x.wrapping_mul(self.group_size[0]),
            y.wrapping_mul(self.group_size[1]),
            z.wrapping_mul(self.group_size[2]),
        ];
        let work_dim = if global_size[2] > 1 {
            3
        } else if global_size[1] > 1 {
            2
        } else {
            1
        };
        patch_vec_non_pointer(&mut self.cross_thread_data, traits.num_work_groups, group_count);
        patch_vec_non_pointer(&mut self.cross_thread_data, traits.global_work_size, global_size);
        patch_non_pointer(&mut self.cross_thread_data, traits.work_dim, work_dim);
        if let Some(args) = self.implicit_args.as_deref_mut() {
            args.set_group_count(group_count);
            args.set_global_size(global_size.map(u64::from));
            args.set_num_work_dim(work_dim as u8);
        }
    }
    pub fn group_count(&self) -> [u32; 3] {
        self.group_count
    }
    /// Sets the global offset, patched by [`patch_global_offset`](Self::patch_global_offset).
    pub fn set_global_offset_exp(&mut self, x: u32, y: u32, z: u32) {
        self.global_offset = [x, y, z];
    }
    pub fn global_offset(&self) -> [u32; 3] {
        self.global_offset
    }
    pub fn patch_global_offset(&mut self) {
        let offsets = self.descriptor().payload_mappings.dispatch_traits.global_work_offset;
        patch_vec_non_pointer(&mut self.cross_thread_data, offsets, self.global_offset);
        let global_offset = self.global_offset.map(u64::from);
        if let Some(args) = self.implicit_args.as_deref_mut() {
            args.set_global_offset(global_offset);
        }
    }

    /// Grants indirect access. Ignored unless the kernel performs indirect
    /// accesses.
    pub fn set_indirect_access(&mut self, flags: IndirectAccessFlags) {
        if self.device.settings().disable_indirect_access == 1 || !self.has_indirect_access {
            return;
        }
        self.unified_memory_controls.device |= flags.device;
        self.unified_memory_controls.host |= flags.host;
        self.unified_memory_controls.shared |= flags.shared;
    }
    pub fn indirect_access(&self) -> IndirectAccessFlags {
        self.unified_memory_controls
    }
    pub fn unified_memory_controls(&self) -> UnifiedMemoryControls {
        self.unified_memory_controls
    }
    pub fn has_indirect_allocations_allowed(&self) -> bool {
        let controls = self.unified_memory_controls;
        controls.device || controls.host || controls.shared
    }
    pub fn has_indirect_access(&self) -> bool {
        self.has_indirect_access
    }

    pub fn set_kernel_scheduling_hint(&mut self, policy: ThreadArbitrationPolicy) {
        self.scheduling_hint = policy;
    }
    /// The scheduling hint, else the compiled policy.
    pub fn thread_arbitration_policy(&self) -> ThreadArbitrationPolicy {
        match self.scheduling_hint {
            ThreadArbitrationPolicy::NotPresent => self.descriptor().kernel_attributes.thread_arbitration_policy,
            hint => hint,
        }
    }

    /// Inline SLM plus the SLM arguments.
    pub fn slm_total_size(&self) -> u32 {
        self.descriptor().kernel_attributes.slm_inline_size + self.slm_args_total_size
    }

    pub fn properties(&self) -> KernelProperties {
        let desc = self.descriptor();
        let attributes = &desc.kernel_attributes;
        let simd = desc.simd_size().max(1);
        let mut max_num_subgroups = self.device.hardware_info().max_work_group_size() / simd;
        if attributes.uses_large_grf() && simd < 32 {
            max_num_subgroups /= 2;
        }
        let stateless = self.family.stateless_private_surface;
        KernelProperties {
            num_kernel_args: desc.payload_mappings.explicit_args.len() as u32,
            required_group_size: attributes.required_workgroup_size().unwrap_or_default(),
            required_subgroup_size: u32::from(desc.kernel_metadata.required_sub_group_size),
            max_subgroup_size: simd,
            max_num_subgroups,
            local_mem_size: self.slm_total_size(),
            private_mem_size: if stateless { attributes.per_hw_thread_private_memory_size } else { 0 },
            spill_mem_size: if stateless { attributes.spill_fill_buffer_size } else { 0 },
        }
    }

    /// A group size dividing `global` that fits in a work group.
    pub fn suggest_group_size(&self, global: [u32; 3]) -> Result<[u32; 3]> {
        if global.contains(&0) {
            return Err(ZeError::InvalidArgument);
        }
        if let Some(required) = self.descriptor().kernel_attributes.required_workgroup_size() {
            return Ok(required);
        }
        let mut remaining = self.device.hardware_info().max_work_group_size().max(1);
        let mut suggested = [1; 3];
        for (size, global) in suggested.iter_mut().zip(global) {
            *size = (1..=remaining.min(global))
                .rev()
                .find(|candidate| global % candidate == 0)
                .unwrap_or(1);
            remaining /= *size;
        }
        Ok(suggested)
    }

    /// Most groups of the current size that can be resident at once, as
    /// cooperative dispatches require.
    pub fn suggest_max_cooperative_group_count(&self) -> u32 {
        let hw = self.device.hardware_info();
        let attributes = &self.descriptor().kernel_attributes;
        let threads_per_group = self.num_threads_per_thread_group.max(1);
        let mut count = hw.max_threads() / threads_per_group;
        if attributes.barrier_count > 0 || attributes.flags.uses_barriers {
            count = count.min(hw.dss_count() * crate::device::HardwareInfo::BARRIERS_PER_DSS);
        }
        let slm = self.slm_total_size();
        if slm > 0 {
            count = count.min(hw.dss_count() * (hw.local_memory_size() / slm));
        }
        count.max(1)
    }

    /// Points the sync buffer argument at `offset` in `allocation`. The
    /// allocation takes the same residency slot on every dispatch.
    pub(crate) fn patch_sync_buffer(&mut self, allocation: Arc<GraphicsAllocation>, offset: u64) -> usize {
        let address = allocation.gpu_address() + offset;
        let arg = self.descriptor().payload_mappings.implicit_args.sync_buffer_address;
        patch_pointer(&mut self.cross_thread_data, &arg, address);
        if let Some(args) = self.implicit_args.as_deref_mut() {
            args.set_sync_buffer(address);
        }
        Self::stable_residency_slot(&mut self.residency, &mut self.sync_buffer_index, allocation)
    }
    pub(crate) fn patch_region_barrier(&mut self, allocation: Arc<GraphicsAllocation>, offset: u64) -> usize {
        let address = allocation.gpu_address() + offset;
        let arg = self.descriptor().payload_mappings.implicit_args.region_group_barrier_buffer;
        patch_pointer(&mut self.cross_thread_data, &arg, address);
        if let Some(args) = self.implicit_args.as_deref_mut() {
            args.set_region_group_barrier(address);
        }
        Self::stable_residency_slot(&mut self.residency, &mut self.region_barrier_index, allocation)
    }
    fn stable_residency_slot(
        residency: &mut Vec<Option<Arc<GraphicsAllocation>>>,
        index: &mut Option<usize>,
        allocation: Arc<GraphicsAllocation>,
    ) -> usize {
        match *index {
            Some(index) => {
                residency[index] = Some(allocation);
                index
            }
            None => {
                residency.push(Some(allocation));
                *index = Some(residency.len() - 1);
                residency.len() - 1
            }
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.kernel_name())
            .field("group_size", &self.group_size)
            .field("group_count", &self.group_count)
            .finish()
    }
}

/// Internal state of a [`Kernel`] for tests.
#[cfg(any(test, feature = "test-support"))]
pub trait KernelTestAccess {
    /// Identical [`Kernel::set_group_size`] calls that were skipped.
    fn set_group_size_skip_count(&self) -> u32;
    /// Argument rebinds elided because nothing changed.
    fn set_arg_buffer_skip_count(&self) -> u32;
    fn residency_slots(&self) -> &[Option<Arc<GraphicsAllocation>>];
    fn sync_buffer_index(&self) -> Option<usize>;
    fn region_barrier_index(&self) -> Option<usize>;
    fn bindless_offset_set(&self, index: usize) -> bool;
    fn slm_args_total_size(&self) -> u32;
}

#[cfg(any(test, feature = "test-support"))]
impl KernelTestAccess for Kernel {
    fn set_group_size_skip_count(&self) -> u32 {
        self.skip_counters.set_group_size
    }
    fn set_arg_buffer_skip_count(&self) -> u32 {
        self.skip_counters.set_arg_buffer
    }
    fn residency_slots(&self) -> &[Option<Arc<GraphicsAllocation>>] {
        &self.residency
    }
    fn sync_buffer_index(&self) -> Option<usize> {
        self.sync_buffer_index
    }
    fn region_barrier_index(&self) -> Option<usize> {
        self.region_barrier_index
    }
    fn bindless_offset_set(&self, index: usize) -> bool {
        self.bindless_offset_set.get(index).copied().unwrap_or(false)
    }
    fn slm_args_total_size(&self) -> u32 {
        self.slm_args_total_size
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_util {
    use super::*;
    use neo_dispatch_core::descriptor::{KernelInfo, ProgramInfo};

    /// Creates a kernel named `test` from a default descriptor edited by
    /// `f`.
    pub fn kernel_with(device: &Device, f: impl FnOnce(&mut KernelDescriptor)) -> Kernel {
        let mut info = KernelInfo::default();
        info.descriptor.kernel_metadata.kernel_name = "test".into();
        f(&mut info.descriptor);
        let module = Module::new(
            device,
            ProgramInfo {
                kernel_infos: vec![info],
                ..ProgramInfo::default()
            },
        )
        .unwrap();
        module.create_kernel("test").unwrap()
    }

    /// Like [`kernel_with`], returning the creation result.
    pub fn try_kernel_with(device: &Device, f: impl FnOnce(&mut KernelDescriptor)) -> Result<Kernel> {
        let mut info = KernelInfo::default();
        info.descriptor.kernel_metadata.kernel_name = "test".into();
        f(&mut info.descriptor);
        let module = Module::new(
            device,
            ProgramInfo {
                kernel_infos: vec![info],
                ..ProgramInfo::default()
            },
        )?;
        module.create_kernel("test")
    }
}
