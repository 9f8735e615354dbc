/*!

Command queues.

A [`CommandQueue`] assembles closed command lists into a submission in its
own command stream: state the lists depend on, the resolution of their
patch records, a jump into each list and a completion write. What the GPU
would execute is the queue stream of [`last_submission`](CommandQueue::last_submission)
followed into every list it jumps to.
*/

use crate::{
    cmdlist::{CommandList, CommandToPatch, StreamProperties},
    config::tri_state,
    device::Device,
    encoder::{
        implicit_scaling::{self, ControlSection},
        store::{self, PipeControlArgs},
    },
    error::ZeError,
    family::GfxFamily,
    memory::{AllocationType, GraphicsAllocation, ResidencyContainer},
    result::Result,
    stream::{CommandContainer, HeapType, LinearStream},
};
use neo_dispatch_core::{
    descriptor::ThreadArbitrationPolicy,
    hw::{
        cmds::{MiBatchBufferEnd, MiBatchBufferStart, MiLoadRegisterReg, MiStoreDataImm, PipeControl, WalkerCommand},
        regs, Command,
    },
    mem::{align_up, divide_and_round_up, PAGE_SIZE, PAGE_SIZE_64K},
};
use std::{fmt, marker::PhantomData, ops::Range, sync::Arc};

/// What a submission has to encode, for sizing the queue stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecuteContext {
    pub num_command_lists: usize,
    /// The submission ends by jumping to the next one instead of
    /// `MI_BATCH_BUFFER_END`.
    pub direct_submission: bool,
    pub relaxed_ordering: bool,
    pub cache_flush_required: bool,
    /// A completion value is written to the tag allocation.
    pub task_count_post_sync_required: bool,
    /// The queue's initial state runs before the first list.
    pub global_init_required: bool,
    pub front_end_required: bool,
    /// Stores zeroing noop space in the queue stream.
    pub patching_preamble_stores: usize,
    /// Lists whose preamble stores are followed by a wait.
    pub patching_preamble_waits: usize,
    /// Stores writing the scratch address into implicit args.
    pub scratch_patch_stores: usize,
    /// Lists that may need the thread arbitration policy switched.
    pub state_changes: usize,
    /// Immediate lists followed by a cross-tile barrier.
    pub cross_tile_barriers: usize,
}

/// Completion of a submission.
#[derive(Debug)]
pub struct Fence {
    tag: Arc<GraphicsAllocation>,
    task_count: u32,
}

impl Fence {
    /// Task count of the submission the fence was last passed to, 0 if
    /// none.
    pub fn task_count(&self) -> u32 {
        self.task_count
    }
    /// Whether the submission completed.
    pub fn query_status(&self) -> Result<bool> {
        if self.task_count == 0 {
            return Ok(false);
        }
        let bytes = self.tag.read(0, 4)?;
        let completed = neo_dispatch_core::mem::read_u32(&bytes, 0).unwrap_or(0);
        Ok(completed >= self.task_count)
    }
    pub fn reset(&mut self) {
        self.task_count = 0;
    }
}

/// Submits command lists of one generation.
pub struct CommandQueue<F: GfxFamily> {
    device: Device,
    stream: LinearStream,
    init_section: LinearStream,
    tag: Arc<GraphicsAllocation>,
    task_count: u32,
    residency: ResidencyContainer,
    scratch: Option<Arc<GraphicsAllocation>>,
    per_thread_scratch_size: u32,
    stream_properties: StreamProperties,
    patching_preamble: bool,
    save_wait_for_preamble: bool,
    instruction_cache_flush_required: bool,
    global_init_done: bool,
    cross_tile_control: Option<Arc<GraphicsAllocation>>,
    last_submission: Range<usize>,
    _family: PhantomData<F>,
}

impl<F: GfxFamily> CommandQueue<F> {
    /// **errors**
    /// - InvalidArgument if `device` is not of generation `F`.
    /// - OutOfDeviceMemory if the queue buffers cannot be allocated.
    pub fn new(device: &Device) -> Result<Self> {
        if device.family() != &F::INFO {
            return Err(ZeError::InvalidArgument);
        }
        let memory_manager = device.memory_manager();
        let stream = LinearStream::with_allocation(
            memory_manager.allocate(CommandContainer::COMMAND_BUFFER_SIZE, AllocationType::CommandBuffer)?,
        );
        let mut init_section = LinearStream::with_allocation(memory_manager.allocate(PAGE_SIZE, AllocationType::CommandBuffer)?);
        let tag = memory_manager.allocate(PAGE_SIZE, AllocationType::TagBuffer)?;

        let settings = device.settings();
        let policy = match ThreadArbitrationPolicy::from_i32(settings.override_thread_arbitration_policy) {
            ThreadArbitrationPolicy::NotPresent => F::INFO.default_thread_arbitration_policy,
            policy => policy,
        };
        F::encode_thread_arbitration(&mut init_section, policy);
        F::encode_front_end(&mut init_section, 0, 0, device.hardware_info().max_threads());
        store::batch_buffer_end(&mut init_section);
        let mut stream_properties = StreamProperties::default();
        stream_properties.set_thread_arbitration_policy(policy);
        stream_properties.clear_dirty();

        Ok(Self {
            device: device.clone(),
            stream,
            init_section,
            tag,
            task_count: 0,
            residency: ResidencyContainer::default(),
            scratch: None,
            per_thread_scratch_size: 0,
            stream_properties,
            patching_preamble: tri_state(settings.enable_patching_preamble, false),
            save_wait_for_preamble: false,
            instruction_cache_flush_required: false,
            global_init_done: false,
            cross_tile_control: None,
            last_submission: 0..0,
            _family: PhantomData,
        })
    }
    pub fn device(&self) -> &Device {
        &self.device
    }
    pub fn command_stream(&self) -> &LinearStream {
        &self.stream
    }
    /// Queue stream bytes of the last submission.
    pub fn last_submission(&self) -> &[u8] {
        &self.stream.bytes()[self.last_submission.clone()]
    }
    /// Commands run once before the first submission.
    pub fn init_section(&self) -> &LinearStream {
        &self.init_section
    }
    pub fn task_count(&self) -> u32 {
        self.task_count
    }
    pub fn tag_allocation(&self) -> &Arc<GraphicsAllocation> {
        &self.tag
    }
    /// Allocations resident during the last submission.
    pub fn residency(&self) -> &ResidencyContainer {
        &self.residency
    }
    pub fn scratch_allocation(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.scratch.as_ref()
    }
    /// State the queue leaves behind after its last submission.
    pub fn stream_properties(&self) -> &StreamProperties {
        &self.stream_properties
    }
    pub fn create_fence(&self) -> Fence {
        Fence {
            tag: self.tag.clone(),
            task_count: 0,
        }
    }
    /// Invalidates the instruction cache at the next submission, after
    /// kernel code changed.
    pub fn register_instruction_cache_flush(&mut self) {
        self.instruction_cache_flush_required = true;
    }
    /// Zero noop space with stores in the queue stream instead of on the
    /// host. With `save_wait` the stores of each list are followed by a
    /// flush so the list observes them.
    pub fn set_patching_preamble(&mut self, enabled: bool, save_wait: bool) {
        self.patching_preamble = enabled;
        self.save_wait_for_preamble = save_wait;
    }
    pub fn patching_preamble(&self) -> bool {
        self.patching_preamble
    }

    fn required_per_thread_scratch(lists: &[&mut CommandList<F>]) -> u32 {
        lists
            .iter()
            .map(|list| list.per_thread_scratch_size().iter().sum::<u32>())
            .max()
            .unwrap_or(0)
    }

    /// What submitting `lists` would encode.
    pub fn execute_context(&self, lists: &[&mut CommandList<F>], fence_required: bool) -> ExecuteContext {
        let settings = self.device.settings();
        let scratch_required = Self::required_per_thread_scratch(lists);
        let mut ctx = ExecuteContext {
            num_command_lists: lists.len(),
            direct_submission: settings.enable_direct_submission,
            relaxed_ordering: settings.enable_direct_submission && settings.enable_relaxed_ordering,
            cache_flush_required: self.instruction_cache_flush_required,
            task_count_post_sync_required: fence_required,
            global_init_required: !self.global_init_done,
            front_end_required: !F::INFO.heapless && scratch_required > self.per_thread_scratch_size,
            ..ExecuteContext::default()
        };
        for list in lists {
            let mut noop_stores = 0;
            for patch in list.commands_to_patch() {
                match patch {
                    CommandToPatch::NoopSpace { patch_size, .. } => noop_stores += divide_and_round_up(*patch_size, 8),
                    CommandToPatch::ComputeWalkerImplicitArgsScratch { .. } => ctx.scratch_patch_stores += 1,
                    CommandToPatch::ComputeWalkerInlineDataScratch { .. } => (),
                }
            }
            if self.patching_preamble {
                ctx.patching_preamble_stores += noop_stores;
                if self.save_wait_for_preamble && noop_stores > 0 {
                    ctx.patching_preamble_waits += 1;
                }
            }
            if list.required_stream_properties().thread_arbitration_policy.is_set() {
                ctx.state_changes += 1;
            }
            if list.is_immediate() && list.partition_count() > 1 {
                ctx.cross_tile_barriers += 1;
            }
        }
        ctx
    }

    /// Upper bound of the queue stream bytes a submission described by
    /// `ctx` writes.
    pub fn estimate_stream_size_for_execute_command_lists_regular_heapless(ctx: &ExecuteContext) -> usize {
        let mut size = if ctx.direct_submission {
            let mut end = MiBatchBufferStart::size();
            if ctx.relaxed_ordering {
                end += 2 * MiLoadRegisterReg::size();
            }
            end
        } else {
            MiBatchBufferEnd::size()
        };
        if ctx.cache_flush_required {
            size += PipeControl::size();
        }
        if ctx.task_count_post_sync_required {
            size += PipeControl::size();
        }
        if ctx.global_init_required {
            size += MiBatchBufferStart::size();
        }
        if ctx.front_end_required {
            size += F::front_end_size();
        }
        size += ctx.num_command_lists * MiBatchBufferStart::size();
        size += (ctx.patching_preamble_stores + ctx.scratch_patch_stores) * MiStoreDataImm::size();
        size += ctx.patching_preamble_waits * PipeControl::size();
        size += ctx.state_changes * F::thread_arbitration_size();
        size += ctx.cross_tile_barriers * implicit_scaling::cross_tile_barrier_size();
        size
    }

    fn validate(&self, lists: &[&mut CommandList<F>]) -> Result<()> {
        for list in lists {
            if list.device() != &self.device || (!list.is_immediate() && !list.state().is_closed()) {
                tracing::warn!(?list, "command list cannot be executed");
                return Err(ZeError::InvalidArgument);
            }
        }
        if !self.device.settings().allow_mixing_regular_and_cooperative_kernels {
            let with_kernels = || lists.iter().filter(|list| list.contains_any_kernel());
            let cooperative = with_kernels().any(|list| list.contains_cooperative_kernels());
            let regular = with_kernels().any(|list| !list.contains_cooperative_kernels());
            if cooperative && regular {
                tracing::warn!("cooperative and regular command lists mixed in one submission");
                return Err(ZeError::InvalidArgument);
            }
        }
        Ok(())
    }

    /// Returns the scratch surface for `per_thread` bytes per thread and
    /// whether it was just allocated.
    fn ensure_scratch(&mut self, per_thread: u32) -> Result<Option<(u64, bool)>> {
        if per_thread == 0 {
            return Ok(self.scratch.as_ref().map(|scratch| (scratch.gpu_address(), false)));
        }
        if let Some(scratch) = self.scratch.as_ref() {
            if per_thread <= self.per_thread_scratch_size {
                return Ok(Some((scratch.gpu_address(), false)));
            }
        }
        let hw = self.device.hardware_info();
        let size = align_up(
            u64::from(per_thread) * u64::from(hw.compute_units_used_for_scratch()) * u64::from(hw.tile_count()),
            PAGE_SIZE_64K,
        );
        let scratch = self
            .device
            .memory_manager()
            .allocate(size, AllocationType::ScratchSurface)?;
        tracing::debug!(per_thread, size, "scratch surface allocated");
        let address = scratch.gpu_address();
        self.scratch = Some(scratch);
        self.per_thread_scratch_size = per_thread;
        Ok(Some((address, true)))
    }

    /// Submits `lists` in order. `fence` is signaled when all of them
    /// completed.
    ///
    /// **errors**
    /// - InvalidArgument if a regular list is not closed, a list belongs
    ///   to another device, or cooperative and regular lists are mixed.
    /// - OutOfDeviceMemory if the scratch surface cannot be allocated.
    pub fn execute_command_lists(&mut self, lists: &mut [&mut CommandList<F>], fence: Option<&mut Fence>) -> Result<()> {
        self.validate(lists)?;
        let ctx = self.execute_context(lists, fence.is_some());
        let estimate = Self::estimate_stream_size_for_execute_command_lists_regular_heapless(&ctx);
        let start = self.stream.used();
        self.residency.clear();
        for allocation in [&self.stream, &self.init_section]
            .into_iter()
            .filter_map(|stream| stream.allocation())
        {
            self.residency.add(allocation);
        }
        self.residency.add(&self.tag);

        if ctx.global_init_required {
            store::batch_buffer_start(&mut self.stream, self.init_section.gpu_base(), true);
            self.global_init_done = true;
        }
        if ctx.cache_flush_required {
            let args = PipeControlArgs {
                cs_stall: true,
                instruction_cache_invalidate: true,
                state_cache_invalidate: true,
                ..PipeControlArgs::default()
            };
            store::pipe_control(&mut self.stream, &args);
            self.instruction_cache_flush_required = false;
        }

        let scratch = self.ensure_scratch(Self::required_per_thread_scratch(lists))?;
        if let Some((address, changed)) = scratch {
            if changed && !F::INFO.heapless {
                F::encode_front_end(
                    &mut self.stream,
                    address,
                    self.per_thread_scratch_size,
                    self.device.hardware_info().max_threads(),
                );
            }
            if let Some(allocation) = self.scratch.clone() {
                self.residency.add(&allocation);
            }
        }

        for list in lists.iter_mut() {
            let list: &mut CommandList<F> = list;
            let required = list.required_stream_properties().thread_arbitration_policy();
            if required != ThreadArbitrationPolicy::NotPresent && required != self.stream_properties.thread_arbitration_policy() {
                F::encode_thread_arbitration(&mut self.stream, required);
            }
            self.stream_properties
                .set_thread_arbitration_policy(list.final_stream_properties().thread_arbitration_policy());

            if let (Some((address, _)), true) = (scratch, F::INFO.heapless) {
                let patch_new = list.scratch_address_after_patch() != Some(address);
                self.patch_commands(list, address, patch_new);
            }
            self.resolve_noop_space(list)?;

            for allocation in list.residency() {
                self.residency.add(allocation);
            }
            if list.dispatches_as_primary() {
                store::batch_buffer_start(&mut self.stream, list.batch_start_address(), false);
                list.set_return_address(self.stream.current_gpu_address());
            } else {
                store::batch_buffer_start(&mut self.stream, list.batch_start_address(), true);
            }
            if list.is_immediate() && list.partition_count() > 1 {
                let control = self.cross_tile_control()?;
                implicit_scaling::encode_cross_tile_barrier(&mut self.stream, &control, list.partition_count());
            }
        }

        self.task_count += 1;
        if ctx.task_count_post_sync_required {
            let args = PipeControlArgs {
                cs_stall: true,
                dc_flush: true,
                ..PipeControlArgs::default()
            };
            store::pipe_control_write_immediate(&mut self.stream, &args, self.tag.gpu_address(), u64::from(self.task_count));
        }
        if let Some(fence) = fence {
            fence.task_count = self.task_count;
        }
        if ctx.direct_submission {
            if ctx.relaxed_ordering {
                for (source, destination) in [
                    (regs::cs_gpr(4), regs::cs_gpr(0)),
                    (regs::cs_gpr_high(4), regs::cs_gpr_high(0)),
                ] {
                    let mut lrr = MiLoadRegisterReg::init();
                    lrr.set_source_register_address(source)
                        .set_destination_register_address(destination);
                    self.stream.put(&lrr);
                }
            }
            let next = self.stream.current_gpu_address() + MiBatchBufferStart::size() as u64;
            store::batch_buffer_start(&mut self.stream, next, false);
        } else {
            store::batch_buffer_end(&mut self.stream);
        }

        let written = self.stream.used() - start;
        debug_assert!(written <= estimate, "{written} > {estimate}");
        self.last_submission = start..self.stream.used();
        tracing::debug!(
            lists = lists.len(),
            task_count = self.task_count,
            written,
            estimate,
            "command lists executed"
        );
        Ok(())
    }

    fn cross_tile_control(&mut self) -> Result<ControlSection> {
        let allocation = match self.cross_tile_control.as_ref() {
            Some(allocation) => allocation.clone(),
            None => {
                let allocation = self
                    .device
                    .memory_manager()
                    .allocate(ControlSection::SIZE as u64, AllocationType::TagBuffer)?;
                self.cross_tile_control = Some(allocation.clone());
                allocation
            }
        };
        self.residency.add(&allocation);
        Ok(ControlSection {
            gpu_address: allocation.gpu_address(),
        })
    }

    /// Zeroes the noop space of `list`, with stores in the queue stream
    /// when the patching preamble is enabled and on the host otherwise.
    fn resolve_noop_space(&mut self, list: &CommandList<F>) -> Result<()> {
        let mut stores = 0;
        for patch in list.commands_to_patch() {
            if let CommandToPatch::NoopSpace {
                allocation,
                offset,
                gpu_address,
                patch_size,
            } = patch
            {
                if self.patching_preamble {
                    for i in 0..divide_and_round_up(*patch_size, 8) {
                        store::store_data_imm_qword(&mut self.stream, gpu_address + 8 * i as u64, 0);
                        stores += 1;
                    }
                } else {
                    allocation.zero(*offset, *patch_size)?;
                }
            }
        }
        if stores > 0 && self.save_wait_for_preamble {
            store::pipe_control(&mut self.stream, &PipeControlArgs::barrier());
        }
        Ok(())
    }

    /// Writes `scratch_address` into the scratch pointers recorded by
    /// `list`. Nothing is rewritten unless `patch_new_scratch_address`.
    ///
    /// Inline data pointers are patched in the list's command stream,
    /// pointers in the indirect object heap with stores in the queue
    /// stream.
    pub fn patch_commands(&mut self, list: &mut CommandList<F>, scratch_address: u64, patch_new_scratch_address: bool) {
        if !patch_new_scratch_address {
            return;
        }
        let (patches, container) = list.patches_and_container_mut();
        let ioh_base = container.heap(HeapType::IndirectObject).gpu_base();
        for patch in patches.iter_mut() {
            match patch {
                CommandToPatch::ComputeWalkerInlineDataScratch {
                    walker_offset,
                    offset,
                    patch_size,
                    base_address,
                    scratch_address_after_patch,
                } => {
                    let value = *base_address + scratch_address;
                    let stream = container.command_stream_mut();
                    let Some(mut walker) = stream.read::<F::Walker>(*walker_offset) else {
                        continue;
                    };
                    let bytes = value.to_le_bytes();
                    let size = (*patch_size).min(bytes.len());
                    if let Some(dst) = walker.inline_data_mut().get_mut(*offset..*offset + size) {
                        dst.copy_from_slice(&bytes[..size]);
                        stream.write_at(*walker_offset, &walker);
                        *scratch_address_after_patch = value;
                    }
                }
                CommandToPatch::ComputeWalkerImplicitArgsScratch {
                    heap_offset,
                    offset,
                    base_address,
                    scratch_address_after_patch,
                    ..
                } => {
                    let value = *base_address + scratch_address;
                    let address = ioh_base + (*heap_offset + *offset) as u64;
                    store::store_data_imm_qword(&mut self.stream, address, value);
                    *scratch_address_after_patch = value;
                }
                CommandToPatch::NoopSpace { .. } => (),
            }
        }
        list.set_scratch_address_after_patch(scratch_address);
        tracing::trace!(scratch_address, "scratch patched");
    }
}

impl<F: GfxFamily> fmt::Debug for CommandQueue<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("family", &F::INFO.name)
            .field("task_count", &self.task_count)
            .field("used", &self.stream.used())
            .field("patching_preamble", &self.patching_preamble)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cmdlist::LaunchParams,
        config::DebugSettings,
        device::HardwareInfo,
        family::{Gen12Lp, Xe3pCore, XeHpcCore},
        kernel::test_util::kernel_with,
    };
    use neo_dispatch_core::hw::{
        cmds::{CfeState, ComputeWalker2, MediaVfeState, StateComputeMode},
        parse::{find_all, find_first},
    };

    fn sync_kernel_list<F: GfxFamily>(device: &Device, launches: u32) -> CommandList<F> {
        let mut kernel = kernel_with(device, |desc| desc.kernel_attributes.flags.uses_sync_buffer = true);
        let mut list = CommandList::<F>::new(device).unwrap();
        for _ in 0..launches {
            list.append_launch_kernel(&mut kernel, [4, 1, 1], None, &LaunchParams::default())
                .unwrap();
        }
        list.close().unwrap();
        list
    }

    fn scratch_kernel_list(device: &Device) -> CommandList<Xe3pCore> {
        let mut kernel = kernel_with(device, |desc| {
            desc.kernel_attributes.cross_thread_data_size = 64;
            desc.kernel_attributes.per_thread_scratch_size = [1024, 0];
            desc.kernel_attributes.flags.pass_inline_data = true;
            desc.kernel_attributes.flags.requires_implicit_args = true;
            desc.payload_mappings.implicit_args.scratch_pointer_address.stateless = 8;
            desc.payload_mappings.implicit_args.scratch_pointer_address.pointer_size = 8;
            desc.payload_mappings.implicit_args.implicit_args_buffer = 0;
        });
        let mut list = CommandList::<Xe3pCore>::new(device).unwrap();
        list.append_launch_kernel(&mut kernel, [1, 1, 1], None, &LaunchParams::default()).unwrap();
        list.close().unwrap();
        list
    }

    fn single_tile<F: GfxFamily>(settings: DebugSettings) -> Device {
        Device::builder()
            .family::<F>()
            .hardware_info(HardwareInfo::new().with_tile_count(1))
            .settings(settings)
            .build()
            .unwrap()
    }

    #[test]
    fn estimate_bounds_every_submission() {
        for bits in 0..64u32 {
            let bit = |n: u32| bits & (1 << n) != 0;
            let settings = DebugSettings {
                enable_direct_submission: bit(0),
                enable_relaxed_ordering: bit(1),
                dispatch_cmdlist_batch_buffer_as_primary: i32::from(bit(2)),
                ..DebugSettings::default()
            };
            let device = single_tile::<Xe3pCore>(settings);
            let mut queue = CommandQueue::<Xe3pCore>::new(&device).unwrap();
            queue.set_patching_preamble(bit(3), bit(4));
            if bit(5) {
                queue.register_instruction_cache_flush();
            }
            let mut synced = sync_kernel_list::<Xe3pCore>(&device, 2);
            let mut scratch = scratch_kernel_list(&device);
            for round in 0..2 {
                let mut fence = queue.create_fence();
                let mut lists = [&mut synced, &mut scratch];
                let with_fence = round == 0;
                let ctx = queue.execute_context(&lists, with_fence);
                let estimate = CommandQueue::<Xe3pCore>::estimate_stream_size_for_execute_command_lists_regular_heapless(&ctx);
                queue
                    .execute_command_lists(&mut lists, with_fence.then_some(&mut fence))
                    .unwrap();
                assert!(
                    queue.last_submission().len() <= estimate,
                    "bits {bits:#b} round {round}: {} > {estimate}",
                    queue.last_submission().len()
                );
            }
        }
    }

    #[test]
    fn estimate_is_additive() {
        type Queue = CommandQueue<XeHpcCore>;
        let base = ExecuteContext::default();
        let size = |ctx: ExecuteContext| Queue::estimate_stream_size_for_execute_command_lists_regular_heapless(&ctx);
        assert_eq!(size(base), MiBatchBufferEnd::size());
        let direct = ExecuteContext {
            direct_submission: true,
            ..base
        };
        assert_eq!(size(direct), MiBatchBufferStart::size());
        let relaxed = ExecuteContext {
            relaxed_ordering: true,
            ..direct
        };
        assert_eq!(size(relaxed), MiBatchBufferStart::size() + 2 * MiLoadRegisterReg::size());
        let full = ExecuteContext {
            cache_flush_required: true,
            task_count_post_sync_required: true,
            global_init_required: true,
            num_command_lists: 3,
            ..base
        };
        assert_eq!(
            size(full),
            MiBatchBufferEnd::size() + 2 * PipeControl::size() + 4 * MiBatchBufferStart::size()
        );
    }

    #[test]
    fn patching_preamble_zeroes_noop_space_with_stores() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        queue.set_patching_preamble(true, false);
        let mut list = sync_kernel_list::<XeHpcCore>(&device, 3);
        queue.execute_command_lists(&mut [&mut list], None).unwrap();

        let expected: Vec<u64> = list
            .commands_to_patch()
            .iter()
            .filter_map(|patch| match patch {
                CommandToPatch::NoopSpace {
                    gpu_address,
                    patch_size,
                    ..
                } => Some((0..patch_size / 8).map(move |i| gpu_address + 8 * i as u64)),
                _ => None,
            })
            .flatten()
            .collect();
        let stores = find_all::<MiStoreDataImm>(queue.last_submission());
        assert_eq!(stores.len(), list.total_noop_space() / 8);
        let addresses: Vec<u64> = stores.iter().map(|(_, sdi)| sdi.address()).collect();
        assert_eq!(addresses, expected);
        for (_, sdi) in stores {
            assert_eq!(sdi.store_qword(), 1);
            assert_eq!(sdi.data_qword(), 0);
        }
        assert!(find_all::<PipeControl>(queue.last_submission()).is_empty());

        queue.set_patching_preamble(true, true);
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert_eq!(find_all::<PipeControl>(queue.last_submission()).len(), 1);
    }

    #[test]
    fn noop_space_is_zeroed_on_the_host_without_preamble() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        assert!(!queue.patching_preamble());
        let mut list = sync_kernel_list::<XeHpcCore>(&device, 1);
        let (allocation, offset, size) = match &list.commands_to_patch()[0] {
            CommandToPatch::NoopSpace {
                allocation,
                offset,
                patch_size,
                ..
            } => (allocation.clone(), *offset, *patch_size),
            other => panic!("unexpected patch {other:?}"),
        };
        allocation.write(offset, &vec![0xAB; size]).unwrap();
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert_eq!(allocation.read(offset, size).unwrap(), vec![0; size]);
        assert!(find_all::<MiStoreDataImm>(queue.last_submission()).is_empty());
    }

    #[test]
    fn scratch_is_patched_only_for_a_new_address() {
        let device = single_tile::<Xe3pCore>(DebugSettings::default());
        let mut queue = CommandQueue::<Xe3pCore>::new(&device).unwrap();
        let mut list = scratch_kernel_list(&device);
        let walker_offset = match list.commands_to_patch()[0] {
            CommandToPatch::ComputeWalkerInlineDataScratch { walker_offset, .. } => walker_offset,
            ref other => panic!("unexpected patch {other:?}"),
        };
        let inline_scratch = |list: &CommandList<Xe3pCore>| {
            let walker = list.command_stream().read::<ComputeWalker2>(walker_offset).unwrap();
            neo_dispatch_core::mem::read_u64(walker.inline_data(), 8)
        };

        let before = queue.command_stream().used();
        queue.patch_commands(&mut list, 0x4_0000, false);
        assert_eq!(queue.command_stream().used(), before);
        assert_eq!(inline_scratch(&list), Some(0));

        queue.patch_commands(&mut list, 0x4_0000, true);
        assert_eq!(inline_scratch(&list), Some(0x4_0000));
        let (_, sdi) = find_first::<MiStoreDataImm>(&queue.command_stream().bytes()[before..]).unwrap();
        assert_eq!(sdi.data_qword(), 0x4_0000);
        match list.commands_to_patch()[1] {
            CommandToPatch::ComputeWalkerImplicitArgsScratch {
                heap_offset,
                offset,
                scratch_address_after_patch,
                ..
            } => {
                let ioh = list.container().heap(HeapType::IndirectObject).gpu_base();
                assert_eq!(sdi.address(), ioh + (heap_offset + offset) as u64);
                assert_eq!(scratch_address_after_patch, 0x4_0000);
            }
            ref other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn submission_patches_scratch_once() {
        let device = single_tile::<Xe3pCore>(DebugSettings::default());
        let mut queue = CommandQueue::<Xe3pCore>::new(&device).unwrap();
        let mut list = scratch_kernel_list(&device);
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        let scratch = queue.scratch_allocation().unwrap().gpu_address();
        assert_eq!(find_all::<MiStoreDataImm>(queue.last_submission()).len(), 1);
        assert!(find_all::<CfeState>(queue.last_submission()).is_empty());
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert!(find_all::<MiStoreDataImm>(queue.last_submission()).is_empty());
        assert_eq!(queue.scratch_allocation().unwrap().gpu_address(), scratch);
    }

    #[test]
    fn growing_scratch_reprograms_the_front_end() {
        let device = Device::builder().family::<Gen12Lp>().build().unwrap();
        let mut queue = CommandQueue::<Gen12Lp>::new(&device).unwrap();
        let mut kernel = kernel_with(&device, |desc| desc.kernel_attributes.per_thread_scratch_size = [2048, 0]);
        let mut list = CommandList::<Gen12Lp>::new(&device).unwrap();
        list.append_launch_kernel(&mut kernel, [1, 1, 1], None, &LaunchParams::default()).unwrap();
        list.close().unwrap();
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert_eq!(find_all::<MediaVfeState>(queue.last_submission()).len(), 1);
        assert!(queue.residency().contains(queue.scratch_allocation().unwrap()));
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert!(find_all::<MediaVfeState>(queue.last_submission()).is_empty());
    }

    #[test]
    fn thread_arbitration_follows_the_lists() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        assert_eq!(
            queue.stream_properties().thread_arbitration_policy(),
            XeHpcCore::INFO.default_thread_arbitration_policy
        );
        let mut kernel = kernel_with(&device, |_| ());
        kernel.set_kernel_scheduling_hint(ThreadArbitrationPolicy::RoundRobin);
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.append_launch_kernel(&mut kernel, [1, 1, 1], None, &LaunchParams::default()).unwrap();
        list.close().unwrap();

        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        let modes = find_all::<StateComputeMode>(queue.last_submission());
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].1.eu_thread_scheduling_mode_override(), 2);
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert!(find_all::<StateComputeMode>(queue.last_submission()).is_empty());
        assert_eq!(
            queue.stream_properties().thread_arbitration_policy(),
            ThreadArbitrationPolicy::RoundRobin
        );
    }

    #[test]
    fn override_sets_initial_policy() {
        let settings = DebugSettings {
            override_thread_arbitration_policy: ThreadArbitrationPolicy::RoundRobin.as_i32(),
            ..DebugSettings::default()
        };
        let device = single_tile::<XeHpcCore>(settings);
        let queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let (_, scm) = find_first::<StateComputeMode>(queue.init_section().bytes()).unwrap();
        assert_eq!(scm.eu_thread_scheduling_mode_override(), 2);
    }

    #[test]
    fn open_lists_and_mixed_cooperation_are_rejected() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let mut open = CommandList::<XeHpcCore>::new(&device).unwrap();
        assert_eq!(
            queue.execute_command_lists(&mut [&mut open], None),
            Err(ZeError::InvalidArgument)
        );

        let mut kernel = kernel_with(&device, |_| ());
        let mut regular = CommandList::<XeHpcCore>::new(&device).unwrap();
        regular
            .append_launch_kernel(&mut kernel, [1, 1, 1], None, &LaunchParams::default())
            .unwrap();
        regular.close().unwrap();
        let mut cooperative = CommandList::<XeHpcCore>::new(&device).unwrap();
        let params = LaunchParams {
            is_cooperative: true,
            ..LaunchParams::default()
        };
        cooperative.append_launch_kernel(&mut kernel, [1, 1, 1], None, &params).unwrap();
        cooperative.close().unwrap();
        assert_eq!(
            queue.execute_command_lists(&mut [&mut regular, &mut cooperative], None),
            Err(ZeError::InvalidArgument)
        );
        assert_eq!(queue.task_count(), 0);
        queue.execute_command_lists(&mut [&mut cooperative], None).unwrap();
    }

    #[test]
    fn primary_lists_jump_back_to_the_queue() {
        let settings = DebugSettings {
            dispatch_cmdlist_batch_buffer_as_primary: 1,
            ..DebugSettings::default()
        };
        let device = single_tile::<XeHpcCore>(settings);
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.close().unwrap();
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        let starts = find_all::<MiBatchBufferStart>(queue.command_stream().bytes());
        let (jump_offset, jump) = starts
            .iter()
            .find(|(_, start)| start.batch_buffer_start_address() == list.batch_start_address())
            .unwrap();
        assert!(!jump.is_second_level());
        let back = list.command_stream().read::<MiBatchBufferStart>(0).unwrap();
        assert_eq!(
            back.batch_buffer_start_address(),
            queue.command_stream().gpu_base() + (*jump_offset + MiBatchBufferStart::size()) as u64
        );
    }

    #[test]
    fn fence_waits_for_the_tag() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let mut fence = queue.create_fence();
        assert!(!fence.query_status().unwrap());
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.close().unwrap();
        queue.execute_command_lists(&mut [&mut list], Some(&mut fence)).unwrap();
        assert_eq!(fence.task_count(), 1);
        let (_, pc) = find_first::<PipeControl>(queue.last_submission()).unwrap();
        assert_eq!(pc.address(), queue.tag_allocation().gpu_address());
        assert_eq!(pc.immediate_data(), 1);
        assert!(!fence.query_status().unwrap());
        queue.tag_allocation().write(0, &1u32.to_le_bytes()).unwrap();
        assert!(fence.query_status().unwrap());
    }

    #[test]
    fn first_submission_runs_the_init_section() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.close().unwrap();
        let init = queue.init_section().gpu_base();
        let targets = |queue: &CommandQueue<XeHpcCore>| -> Vec<u64> {
            find_all::<MiBatchBufferStart>(queue.last_submission())
                .into_iter()
                .map(|(_, start)| start.batch_buffer_start_address())
                .collect()
        };
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert_eq!(targets(&queue), [init, list.batch_start_address()]);
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert_eq!(targets(&queue), [list.batch_start_address()]);
        assert!(find_first::<CfeState>(queue.init_section().bytes()).is_some());
    }

    #[test]
    fn direct_submission_chains_to_the_next_submission() {
        let settings = DebugSettings {
            enable_direct_submission: true,
            enable_relaxed_ordering: true,
            ..DebugSettings::default()
        };
        let device = single_tile::<XeHpcCore>(settings);
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.close().unwrap();
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert!(find_first::<MiBatchBufferEnd>(queue.last_submission()).is_none());
        assert_eq!(find_all::<MiLoadRegisterReg>(queue.last_submission()).len(), 2);
        let (_, last) = find_all::<MiBatchBufferStart>(queue.last_submission()).pop().unwrap();
        assert_eq!(last.batch_buffer_start_address(), queue.command_stream().current_gpu_address());
    }

    #[test]
    fn cache_flush_is_requested_once() {
        let device = single_tile::<XeHpcCore>(DebugSettings::default());
        let mut queue = CommandQueue::<XeHpcCore>::new(&device).unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.close().unwrap();
        queue.register_instruction_cache_flush();
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        let (_, pc) = find_first::<PipeControl>(queue.last_submission()).unwrap();
        assert_eq!(pc.instruction_cache_invalidate_enable(), 1);
        assert_eq!(pc.state_cache_invalidation_enable(), 1);
        queue.execute_command_lists(&mut [&mut list], None).unwrap();
        assert!(find_first::<PipeControl>(queue.last_submission()).is_none());
    }
}
