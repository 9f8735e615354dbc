//! Kernel dispatch: the payload in the indirect object heap, heap state and
//! the walker command.
//!
//! The indirect object heap receives, in order, the implicit args block
//! (local ID table and struct), the cross-thread data not carried inline
//! by the walker and the per-thread data of the whole group.

use super::{
    implicit_scaling::PartitionSettings,
    indirect::{self, IndirectTargets},
};
use crate::{
    cmdlist::CommandToPatch,
    config::{tri_state, DebugSettings},
    error::ZeError,
    family::GfxFamily,
    kernel::Kernel,
    result::Result,
    stream::{CommandContainer, HeapType},
};
use neo_dispatch_core::{
    descriptor::{is_valid_offset, patch_non_pointer},
    hw::{
        cmds::{InterfaceDescriptorData, MediaInterfaceDescriptorLoad, PostSync, WalkerCommand},
        Command,
    },
    implicit_args::{self, HwGenerationParams, ImplicitArgsEnv},
    mem::{divide_and_round_up, CACHE_LINE_SIZE},
};

/// A kernel dispatch to encode.
#[derive(Clone, Copy, Debug)]
pub struct DispatchArgs<'a> {
    pub kernel: &'a Kernel,
    pub group_count: [u32; 3],
    /// Address of three dwords holding the group counts, for dispatches
    /// sized at execution time.
    pub indirect_group_count_address: Option<u64>,
    pub is_predicated: bool,
    pub post_sync: PostSync,
    pub partition: Option<PartitionSettings>,
    pub settings: &'a DebugSettings,
}

/// Where a dispatch landed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutput {
    /// Offset of the walker in the command stream.
    pub walker_offset: usize,
    /// Indirect object heap offset of the payload the walker points at.
    pub payload_offset: usize,
    pub payload_gpu_address: u64,
    pub implicit_args_heap_offset: Option<usize>,
    pub implicit_args_gpu_address: Option<u64>,
    pub inline_data_used: bool,
    /// False when the walker cannot carry the requested post sync and the
    /// caller has to signal with a separate command.
    pub post_sync_in_walker: bool,
    pub partition_count: u32,
    /// Scratch addresses resolved at submission.
    pub scratch_patches: Vec<CommandToPatch>,
}

/// `SHARED_LOCAL_MEMORY_SIZE` encoding: 0 for none, then powers of two from
/// 1 KB.
pub fn slm_size_code(slm_size: u32) -> u32 {
    if slm_size == 0 {
        return 0;
    }
    divide_and_round_up(slm_size, 1024).next_power_of_two().trailing_zeros() + 1
}

/// Whether the first bytes of cross-thread data travel in the walker.
pub fn inline_data_enabled<F: GfxFamily>(kernel: &Kernel, settings: &DebugSettings, indirect: bool) -> bool {
    if !F::INFO.supports_inline_data() || <F::Walker as WalkerCommand>::INLINE_DATA_SIZE == 0 {
        return false;
    }
    if !kernel.descriptor().flags().pass_inline_data || !tri_state(settings.enable_pass_inline_data, true) {
        return false;
    }
    let traits = &kernel.descriptor().payload_mappings.dispatch_traits;
    !(indirect && indirect::traits_overlap_inline_data(traits, <F::Walker as WalkerCommand>::INLINE_DATA_SIZE))
}

fn kernel_needs_scratch(kernel: &Kernel) -> bool {
    kernel
        .descriptor()
        .kernel_attributes
        .per_thread_scratch_size
        .iter()
        .any(|size| *size > 0)
}

/// Encodes the payload and walker of `args.kernel` into `container`.
///
/// The kernel's group size and count must already be set.
pub fn encode_dispatch_kernel<F: GfxFamily>(container: &mut CommandContainer, args: &DispatchArgs) -> Result<DispatchOutput> {
    let kernel = args.kernel;
    let desc = kernel.descriptor();
    let attributes = &desc.kernel_attributes;
    let implicit = &desc.payload_mappings.implicit_args;
    let is_indirect = args.indirect_group_count_address.is_some();
    let runtime_local_ids = kernel.requires_runtime_local_ids();

    container.add_to_residency(kernel.isa_allocation());
    for allocation in kernel.residency() {
        container.add_to_residency(allocation);
    }

    let mut walker = F::Walker::init();
    let mut output = DispatchOutput {
        partition_count: 1,
        ..DispatchOutput::default()
    };

    let mut cross_thread_data = kernel.cross_thread_data().to_vec();
    let mut implicit_args_address = None;
    if let Some(implicit_args) = kernel.implicit_args() {
        let env = ImplicitArgsEnv {
            grf_size: F::INFO.grf_size,
        };
        let hw_params = HwGenerationParams {
            hw_generates_local_ids: !runtime_local_ids,
            walk_order: kernel.walk_order(),
        };
        let size = implicit_args::size_for_implicit_args_patching(Some(implicit_args), desc, runtime_local_ids, &env);
        let ioh = container.heap_mut(HeapType::IndirectObject);
        ioh.align(CACHE_LINE_SIZE);
        let block_offset = ioh.used();
        let block_address = ioh.current_gpu_address();
        let mut args_copy = *implicit_args;
        if runtime_local_ids {
            args_copy.set_local_id_table_ptr(block_address);
        }
        let space = ioh.get_space(size);
        let struct_offset = implicit_args::patch_implicit_args(space, &args_copy, desc, Some(hw_params), &env)
            .ok_or(ZeError::InvalidArgument)?;
        let address = block_address + struct_offset as u64;
        patch_non_pointer(&mut cross_thread_data, implicit.implicit_args_buffer, address);
        output.implicit_args_heap_offset = Some(block_offset + struct_offset);
        output.implicit_args_gpu_address = Some(address);
        implicit_args_address = Some(address);
    }

    let inline_size = if inline_data_enabled::<F>(kernel, args.settings, is_indirect) {
        <F::Walker as WalkerCommand>::INLINE_DATA_SIZE.min(cross_thread_data.len())
    } else {
        0
    };
    if inline_size > 0 {
        walker.inline_data_mut()[..inline_size].copy_from_slice(&cross_thread_data[..inline_size]);
        walker.set_emit_inline_data(true);
        output.inline_data_used = true;
    }

    let per_thread_data = kernel.per_thread_data_for_whole_group();
    let ioh = container.heap_mut(HeapType::IndirectObject);
    ioh.align(CACHE_LINE_SIZE);
    let payload_offset = ioh.put_bytes(&cross_thread_data[inline_size..]);
    // Local IDs start on a register boundary.
    if !per_thread_data.is_empty() {
        ioh.align(F::INFO.grf_size as usize);
    }
    ioh.put_bytes(per_thread_data);
    let payload_length = (ioh.used() - payload_offset) as u32;
    let ioh_gpu_base = ioh.gpu_base();
    output.payload_offset = payload_offset;
    output.payload_gpu_address = ioh_gpu_base + payload_offset as u64;
    F::program_indirect_data(&mut walker, ioh_gpu_base, payload_offset as u64, payload_length);

    let mut idd = InterfaceDescriptorData::default();
    idd.set_kernel_start_address(kernel.isa_allocation().gpu_address())
        .set_number_of_threads_in_gpgpu_thread_group(kernel.num_threads_per_thread_group())
        .set_shared_local_memory_size(slm_size_code(kernel.slm_total_size()))
        .set_barrier_enable(u32::from(attributes.barrier_count > 0 || attributes.flags.uses_barriers))
        .set_cross_thread_constant_data_read_length(divide_and_round_up(
            (cross_thread_data.len() - inline_size) as u32,
            F::INFO.grf_size,
        ));

    let binding_table = desc.payload_mappings.binding_table;
    if !F::INFO.heapless && binding_table.num_entries > 0 && is_valid_offset(binding_table.table_offset) {
        let ssh = container.heap_mut(HeapType::SurfaceState);
        ssh.align(CACHE_LINE_SIZE);
        let base = ssh.put_bytes(kernel.surface_state_heap());
        let table = base + usize::from(binding_table.table_offset);
        for entry in 0..usize::from(binding_table.num_entries) {
            let at = table + 4 * entry;
            if let Some(bytes) = ssh.bytes_mut().get_mut(at..at + 4) {
                let relative = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                bytes.copy_from_slice(&(relative + base as u32).to_le_bytes());
            }
        }
        idd.set_binding_table_pointer((table as u32) >> 5)
            .set_binding_table_entry_count(u32::from(binding_table.num_entries).min(31));
    }

    let sampler_table = desc.payload_mappings.sampler_table;
    if sampler_table.num_samplers > 0 && is_valid_offset(sampler_table.table_offset) {
        let dsh = container.heap_mut(HeapType::DynamicState);
        dsh.align(CACHE_LINE_SIZE);
        let base = dsh.put_bytes(kernel.dynamic_state_heap());
        let pointer = base + usize::from(sampler_table.table_offset);
        idd.set_sampler_state_pointer((pointer as u32) >> 5)
            .set_sampler_count(((u32::from(sampler_table.num_samplers) + 3) / 4).min(4));
    }

    if let Some(group_count_address) = args.indirect_group_count_address {
        let stream = container.command_stream_mut();
        indirect::load_group_counts(stream, group_count_address);
        let targets = IndirectTargets {
            cross_thread_data: output.payload_gpu_address - inline_size as u64,
            implicit_args: implicit_args_address,
        };
        indirect::encode_indirect_params(stream, &desc.payload_mappings.dispatch_traits, kernel.group_size(), &targets);
        if args.is_predicated {
            indirect::encode_dispatch_predicate(stream);
        }
        walker.set_indirect_parameter(true);
        walker.set_predicate(args.is_predicated);
    }

    walker.set_thread_group_dimensions(args.group_count);
    walker.set_simd(desc.simd_size());
    walker.set_execution_mask(kernel.thread_execution_mask());
    walker.set_hw_local_id_generation(kernel.hw_local_id_generation());
    F::program_walker_extras(&mut walker, args.settings);
    walker.set_post_sync(args.post_sync);
    output.post_sync_in_walker = walker.post_sync() == args.post_sync;

    if let Some(partition) = args.partition {
        if <F::Walker as WalkerCommand>::SUPPORTS_PARTITIONING && partition.partition_count > 1 && !is_indirect {
            walker.set_partition(partition.partition_type, partition.partition_size);
            output.partition_count = partition.partition_count;
        }
    }

    F::program_interface_descriptor(container, &mut walker, &idd)?;
    output.walker_offset = container.command_stream_mut().put(&walker);

    if F::INFO.heapless && kernel_needs_scratch(kernel) {
        let scratch = &implicit.scratch_pointer_address;
        if is_valid_offset(scratch.stateless) && usize::from(scratch.stateless) < inline_size {
            output.scratch_patches.push(CommandToPatch::ComputeWalkerInlineDataScratch {
                walker_offset: output.walker_offset,
                offset: usize::from(scratch.stateless),
                patch_size: usize::from(scratch.pointer_size),
                base_address: 0,
                scratch_address_after_patch: 0,
            });
        }
        let scratch_ptr_offset = kernel.implicit_args().and_then(|args| args.scratch_ptr_offset());
        if let (Some(heap_offset), Some(offset)) = (output.implicit_args_heap_offset, scratch_ptr_offset) {
            output.scratch_patches.push(CommandToPatch::ComputeWalkerImplicitArgsScratch {
                heap_offset,
                offset,
                patch_size: 8,
                base_address: 0,
                scratch_address_after_patch: 0,
            });
        }
    }

    tracing::trace!(
        kernel = kernel.kernel_name(),
        family = F::INFO.name,
        walker_offset = output.walker_offset,
        payload_length,
        inline = output.inline_data_used,
        indirect = is_indirect,
        "dispatch encoded"
    );
    Ok(output)
}

/// Upper bound of the command stream bytes written by
/// [`encode_dispatch_kernel`] for `kernel`.
pub fn estimate_dispatch_kernel_size<F: GfxFamily>(kernel: &Kernel, indirect: bool, is_predicated: bool) -> usize {
    let mut size = <F::Walker as Command>::size() + MediaInterfaceDescriptorLoad::size();
    if indirect {
        // Every target address may be misaligned; the bound assumes so.
        let targets = IndirectTargets {
            cross_thread_data: 1,
            implicit_args: kernel.implicit_args().map(|_| 1),
        };
        size += indirect::load_group_counts_size()
            + indirect::encode_indirect_params_size(&kernel.descriptor().payload_mappings.dispatch_traits, kernel.group_size(), &targets);
        if is_predicated {
            size += indirect::dispatch_predicate_size();
        }
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::Device,
        encoder::sim::Simulator,
        family::{Gen12Lp, Xe3pCore, XeHpcCore},
        kernel::test_util::kernel_with,
        memory::MemoryManager,
    };
    use neo_dispatch_core::{
        descriptor::{DispatchTraits, KernelDescriptor},
        hw::{
            cmds::{ComputeWalker, ComputeWalker2, GpgpuWalker},
            parse::find_first,
        },
        mem::{align_up, read_u32},
    };

    fn container() -> CommandContainer {
        CommandContainer::new(&MemoryManager::new()).unwrap()
    }

    fn args<'a>(kernel: &'a Kernel, settings: &'a DebugSettings) -> DispatchArgs<'a> {
        DispatchArgs {
            kernel,
            group_count: kernel.group_count(),
            indirect_group_count_address: None,
            is_predicated: false,
            post_sync: PostSync::None,
            partition: None,
            settings,
        }
    }

    fn traits() -> DispatchTraits {
        DispatchTraits {
            num_work_groups: [64, 68, 72],
            global_work_size: [76, 80, 84],
            work_dim: 88,
            ..DispatchTraits::default()
        }
    }

    fn payload_kernel(device: &Device, inline: bool) -> Kernel {
        let mut kernel = kernel_with(device, |desc: &mut KernelDescriptor| {
            desc.kernel_attributes.cross_thread_data_size = 96;
            desc.kernel_attributes.simd_size = 16;
            desc.kernel_attributes.flags.pass_inline_data = inline;
            desc.payload_mappings.dispatch_traits = traits();
        });
        kernel.set_group_size(32, 1, 1).unwrap();
        kernel.set_group_count(4, 2, 1);
        kernel
    }

    #[test]
    fn slm_sizes_round_to_powers_of_two() {
        assert_eq!(slm_size_code(0), 0);
        assert_eq!(slm_size_code(1), 1);
        assert_eq!(slm_size_code(1024), 1);
        assert_eq!(slm_size_code(1025), 2);
        assert_eq!(slm_size_code(4096), 3);
        assert_eq!(slm_size_code(64 * 1024), 7);
        assert_eq!(slm_size_code(128 * 1024), 8);
    }

    #[test]
    fn inline_data_splits_cross_thread_data() {
        let device = Device::builder().family::<XeHpcCore>().build().unwrap();
        let kernel = payload_kernel(&device, true);
        let settings = DebugSettings::default();
        let mut container = container();
        let output = encode_dispatch_kernel::<XeHpcCore>(&mut container, &args(&kernel, &settings)).unwrap();
        assert!(output.inline_data_used);
        assert!(output.post_sync_in_walker);
        let walker = container
            .command_stream()
            .read::<ComputeWalker>(output.walker_offset)
            .unwrap();
        assert_eq!(walker.inline_data(), &kernel.cross_thread_data()[..32]);
        assert!(walker.emits_inline_data());
        assert_eq!(walker.indirect_data_length(), 96 - 32);
        assert_eq!(walker.thread_group_dimensions(), [4, 2, 1]);
        assert_eq!(walker.execution_mask(), 0xFFFF);
        let ioh = container.heap(HeapType::IndirectObject);
        assert_eq!(
            &ioh.bytes()[output.payload_offset..output.payload_offset + 64],
            &kernel.cross_thread_data()[32..]
        );
        let idd = walker.interface_descriptor().unwrap();
        assert_eq!(idd.kernel_start_address(), kernel.isa_allocation().gpu_address());
        assert_eq!(idd.number_of_threads_in_gpgpu_thread_group(), 2);
        assert!(container.residency().contains(kernel.isa_allocation()));
    }

    #[test]
    fn inline_data_follows_settings() {
        let device = Device::builder().family::<XeHpcCore>().build().unwrap();
        let kernel = payload_kernel(&device, true);
        let settings = DebugSettings {
            enable_pass_inline_data: 0,
            ..DebugSettings::default()
        };
        let mut container = container();
        let output = encode_dispatch_kernel::<XeHpcCore>(&mut container, &args(&kernel, &settings)).unwrap();
        assert!(!output.inline_data_used);
        let walker = container
            .command_stream()
            .read::<ComputeWalker>(output.walker_offset)
            .unwrap();
        assert_eq!(walker.indirect_data_length(), 96);
    }

    #[test]
    fn gen12_loads_descriptor_from_dynamic_state() {
        let device = Device::builder().family::<Gen12Lp>().build().unwrap();
        let mut kernel = kernel_with(&device, |desc| {
            desc.kernel_attributes.slm_inline_size = 2048;
            desc.kernel_attributes.barrier_count = 1;
        });
        kernel.set_group_count(1, 1, 1);
        let settings = DebugSettings::default();
        let mut container = container();
        let output = encode_dispatch_kernel::<Gen12Lp>(&mut container, &args(&kernel, &settings)).unwrap();
        let (load_offset, load) = find_first::<MediaInterfaceDescriptorLoad>(container.command_stream().bytes()).unwrap();
        assert!(load_offset < output.walker_offset);
        assert!(container.command_stream().read::<GpgpuWalker>(output.walker_offset).is_some());
        let start = load.interface_descriptor_data_start_address() as usize;
        let dsh = container.heap(HeapType::DynamicState);
        let idd: InterfaceDescriptorData =
            bytemuck::pod_read_unaligned(&dsh.bytes()[start..start + InterfaceDescriptorData::SIZE]);
        assert_eq!(idd.kernel_start_address(), kernel.isa_allocation().gpu_address());
        assert_eq!(idd.shared_local_memory_size(), 2);
        assert_eq!(idd.barrier_enable(), 1);
    }

    #[test]
    fn gen12_cannot_carry_post_sync() {
        let device = Device::builder().family::<Gen12Lp>().build().unwrap();
        let kernel = kernel_with(&device, |_| ());
        let settings = DebugSettings::default();
        let mut dispatch = args(&kernel, &settings);
        dispatch.post_sync = PostSync::ImmediateData {
            address: 0x1000,
            data: 0,
        };
        let output = encode_dispatch_kernel::<Gen12Lp>(&mut container(), &dispatch).unwrap();
        assert!(!output.post_sync_in_walker);
    }

    #[test]
    fn binding_table_entries_are_rebased() {
        let device = Device::builder().family::<XeHpcCore>().build().unwrap();
        let mut info = neo_dispatch_core::descriptor::KernelInfo::default();
        info.descriptor.kernel_metadata.kernel_name = "bt".into();
        info.descriptor.payload_mappings.binding_table.table_offset = 128;
        info.descriptor.payload_mappings.binding_table.num_entries = 2;
        let mut ssh = vec![0u8; 136];
        ssh[128..132].copy_from_slice(&0u32.to_le_bytes());
        ssh[132..136].copy_from_slice(&64u32.to_le_bytes());
        info.surface_state_heap = ssh;
        let module = crate::module::Module::new(
            &device,
            neo_dispatch_core::descriptor::ProgramInfo {
                kernel_infos: vec![info],
                ..Default::default()
            },
        )
        .unwrap();
        let kernel = module.create_kernel("bt").unwrap();
        let settings = DebugSettings::default();
        let mut container = container();
        container.heap_mut(HeapType::SurfaceState).put_bytes(&[0; 8]);
        let output = encode_dispatch_kernel::<XeHpcCore>(&mut container, &args(&kernel, &settings)).unwrap();
        let ssh = container.heap(HeapType::SurfaceState);
        assert_eq!(read_u32(ssh.bytes(), 64 + 128), Some(64));
        assert_eq!(read_u32(ssh.bytes(), 64 + 132), Some(128));
        let walker = container
            .command_stream()
            .read::<ComputeWalker>(output.walker_offset)
            .unwrap();
        let idd = walker.interface_descriptor().unwrap();
        assert_eq!(idd.binding_table_pointer(), (64 + 128) >> 5);
        assert_eq!(idd.binding_table_entry_count(), 2);
    }

    #[test]
    fn indirect_dispatch_fills_payload_on_the_gpu() {
        let device = Device::builder().family::<XeHpcCore>().build().unwrap();
        let kernel = payload_kernel(&device, true);
        let settings = DebugSettings::default();
        let mut container = container();
        let mut dispatch = args(&kernel, &settings);
        dispatch.indirect_group_count_address = Some(0x8000);
        dispatch.is_predicated = true;
        let output = encode_dispatch_kernel::<XeHpcCore>(&mut container, &dispatch).unwrap();
        assert!(output.inline_data_used);
        let walker = container
            .command_stream()
            .read::<ComputeWalker>(output.walker_offset)
            .unwrap();
        assert!(walker.indirect_parameter());
        assert!(walker.predicate());

        let mut sim = Simulator::default();
        for (i, count) in [3u32, 5, 1].into_iter().enumerate() {
            sim.write_memory(0x8000 + 4 * i as u64, count);
        }
        sim.run(container.command_stream().bytes());
        let ctd = output.payload_gpu_address - 32;
        assert_eq!(sim.read_memory(ctd + 64), 3);
        assert_eq!(sim.read_memory(ctd + 68), 5);
        assert_eq!(sim.read_memory(ctd + 76), 96);
        assert_eq!(sim.read_memory(ctd + 80), 5);
        assert_eq!(sim.read_memory(ctd + 88) & 0xFF, 2);
        assert!(
            container.command_stream().used()
                <= estimate_dispatch_kernel_size::<XeHpcCore>(&kernel, true, true)
        );
    }

    #[test]
    fn indirect_dispatch_keeps_traits_out_of_inline_data() {
        let device = Device::builder().family::<XeHpcCore>().build().unwrap();
        let mut kernel = kernel_with(&device, |desc| {
            desc.kernel_attributes.cross_thread_data_size = 64;
            desc.kernel_attributes.flags.pass_inline_data = true;
            desc.payload_mappings.dispatch_traits.num_work_groups = [0, 4, 8];
        });
        kernel.set_group_count(1, 1, 1);
        let settings = DebugSettings::default();
        let mut dispatch = args(&kernel, &settings);
        assert!(encode_dispatch_kernel::<XeHpcCore>(&mut container(), &dispatch).unwrap().inline_data_used);
        dispatch.indirect_group_count_address = Some(0x8000);
        assert!(!encode_dispatch_kernel::<XeHpcCore>(&mut container(), &dispatch).unwrap().inline_data_used);
    }

    #[test]
    fn partitioned_walker() {
        let device = Device::builder().family::<XeHpcCore>().build().unwrap();
        let mut kernel = kernel_with(&device, |_| ());
        kernel.set_group_count(16, 1, 1);
        let settings = DebugSettings::default();
        let mut dispatch = args(&kernel, &settings);
        dispatch.partition = Some(PartitionSettings::new([16, 1, 1], 2, false));
        let mut container = container();
        let output = encode_dispatch_kernel::<XeHpcCore>(&mut container, &dispatch).unwrap();
        assert_eq!(output.partition_count, 2);
        let walker = container
            .command_stream()
            .read::<ComputeWalker>(output.walker_offset)
            .unwrap();
        assert_eq!(walker.partition(), (true, 1, 8));

        let gen12 = Device::builder().family::<Gen12Lp>().build().unwrap();
        let kernel = kernel_with(&gen12, |_| ());
        let mut dispatch = args(&kernel, &settings);
        dispatch.partition = Some(PartitionSettings::new([16, 1, 1], 2, false));
        assert_eq!(
            encode_dispatch_kernel::<Gen12Lp>(&mut container, &dispatch).unwrap().partition_count,
            1
        );
    }

    #[test]
    fn heapless_scratch_is_recorded_for_patching() {
        let device = Device::builder().family::<Xe3pCore>().build().unwrap();
        let mut kernel = kernel_with(&device, |desc| {
            desc.kernel_attributes.cross_thread_data_size = 64;
            desc.kernel_attributes.per_thread_scratch_size = [1024, 0];
            desc.kernel_attributes.flags.pass_inline_data = true;
            desc.kernel_attributes.flags.requires_implicit_args = true;
            desc.payload_mappings.implicit_args.scratch_pointer_address.stateless = 8;
            desc.payload_mappings.implicit_args.implicit_args_buffer = 0;
        });
        kernel.set_group_count(1, 1, 1);
        let settings = DebugSettings::default();
        let mut container = container();
        let output = encode_dispatch_kernel::<Xe3pCore>(&mut container, &args(&kernel, &settings)).unwrap();
        assert_eq!(output.scratch_patches.len(), 2);
        assert_eq!(
            output.scratch_patches[0],
            CommandToPatch::ComputeWalkerInlineDataScratch {
                walker_offset: output.walker_offset,
                offset: 8,
                patch_size: 8,
                base_address: 0,
                scratch_address_after_patch: 0,
            }
        );
        let walker = container
            .command_stream()
            .read::<ComputeWalker2>(output.walker_offset)
            .unwrap();
        assert_eq!(
            neo_dispatch_core::mem::read_u64(walker.inline_data(), 0),
            output.implicit_args_gpu_address
        );
        assert_eq!(walker.indirect_data_pointer(), output.payload_gpu_address);
        match &output.scratch_patches[1] {
            CommandToPatch::ComputeWalkerImplicitArgsScratch { heap_offset, offset, .. } => {
                assert_eq!(Some(*heap_offset), output.implicit_args_heap_offset);
                assert_eq!(*offset, 120);
            }
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn runtime_local_ids_follow_cross_thread_data() {
        let device = Device::builder().family::<Gen12Lp>().build().unwrap();
        let mut kernel = kernel_with(&device, |desc| {
            desc.kernel_attributes.cross_thread_data_size = 32;
            desc.kernel_attributes.num_local_id_channels = 3;
        });
        kernel.set_group_size(8, 2, 1).unwrap();
        kernel.set_group_count(1, 1, 1);
        let settings = DebugSettings::default();
        let mut container = container();
        let output = encode_dispatch_kernel::<Gen12Lp>(&mut container, &args(&kernel, &settings)).unwrap();
        let ptd = kernel.per_thread_data_for_whole_group();
        assert!(!ptd.is_empty());
        let ioh = container.heap(HeapType::IndirectObject);
        let start = output.payload_offset + 32;
        assert_eq!(&ioh.bytes()[start..start + ptd.len()], ptd);
        let walker = container
            .command_stream()
            .read::<GpgpuWalker>(output.walker_offset)
            .unwrap();
        assert_eq!(walker.indirect_data_length() as usize, 32 + ptd.len());
    }

    #[test]
    fn runtime_local_ids_start_on_a_register() {
        let device = Device::builder().family::<Gen12Lp>().build().unwrap();
        let mut kernel = kernel_with(&device, |desc| {
            desc.kernel_attributes.cross_thread_data_size = 40;
            desc.kernel_attributes.num_local_id_channels = 3;
        });
        kernel.set_group_size(8, 2, 1).unwrap();
        kernel.set_group_count(1, 1, 1);
        let settings = DebugSettings::default();
        let mut container = container();
        let output = encode_dispatch_kernel::<Gen12Lp>(&mut container, &args(&kernel, &settings)).unwrap();
        let grf = Gen12Lp::INFO.grf_size as usize;
        let ptd = kernel.per_thread_data_for_whole_group();
        let start = output.payload_offset + align_up(40, grf);
        assert_eq!(start % grf, 0);
        let ioh = container.heap(HeapType::IndirectObject);
        assert!(ioh.bytes()[output.payload_offset + 40..start].iter().all(|&b| b == 0));
        assert_eq!(&ioh.bytes()[start..start + ptd.len()], ptd);
        let walker = container
            .command_stream()
            .read::<GpgpuWalker>(output.walker_offset)
            .unwrap();
        assert_eq!(walker.indirect_data_length() as usize, start - output.payload_offset + ptd.len());
    }
}
