/*!

Command lists.

A regular [`CommandList`] records commands until [`close`](CommandList::close)
and is then submitted any number of times through a
[`CommandQueue`](crate::cmdqueue::CommandQueue). Values that are only known at
submission, like zeroed synchronization buffers or the scratch address, are
kept as [`CommandToPatch`] records.

An immediate list submits every append to its own queue right away.
*/

use crate::{
    cmdqueue::CommandQueue,
    config::tri_state,
    device::Device,
    encoder::{
        implicit_scaling::SyncSections,
        store::{self, PipeControlArgs},
    },
    error::ZeError,
    event::Event,
    family::GfxFamily,
    memory::{AllocationType, GraphicsAllocation},
    result::Result,
    stream::{CommandContainer, LinearStream},
};
use neo_dispatch_core::hw::{
    cmds::MiNoop,
    Command,
};
use std::{collections::BTreeMap, fmt, marker::PhantomData, sync::Arc};

mod launch;
mod patch;
mod stream_properties;

pub use launch::{KernelCommandView, LaunchOutcome, LaunchParams};
pub use patch::CommandToPatch;
pub use stream_properties::{StreamProperties, StreamProperty};

#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::IsVariant)]
pub enum CommandListType {
    Regular,
    Immediate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::IsVariant)]
pub enum CommandListState {
    Open,
    Closed,
}

/// Commands recorded for one hardware generation.
pub struct CommandList<F: GfxFamily> {
    device: Device,
    list_type: CommandListType,
    state: CommandListState,
    container: CommandContainer,
    sync_sections: Option<SyncSections>,
    dispatch_as_primary: bool,
    batch_end_offset: Option<usize>,
    submitted_offset: usize,
    commands_to_patch: Vec<CommandToPatch>,
    partition_count: u32,
    contains_any_kernel: bool,
    contains_cooperative_kernels: bool,
    per_thread_scratch_size: [u32; 2],
    private_allocations: BTreeMap<u64, Arc<GraphicsAllocation>>,
    total_noop_space: usize,
    required_stream_properties: StreamProperties,
    final_stream_properties: StreamProperties,
    state_base_address_programmed: bool,
    call_id: u32,
    scratch_address_after_patch: Option<u64>,
    queue: Option<Box<CommandQueue<F>>>,
    _family: PhantomData<F>,
}

impl<F: GfxFamily> CommandList<F> {
    /// Creates a regular command list.
    ///
    /// **errors**
    /// - InvalidArgument if `device` is not of generation `F`.
    /// - OutOfDeviceMemory if the command buffer or heaps cannot be
    ///   allocated.
    pub fn new(device: &Device) -> Result<Self> {
        Self::with_type(device, CommandListType::Regular)
    }
    /// Creates an immediate command list with its own queue.
    pub fn new_immediate(device: &Device) -> Result<Self> {
        Self::with_type(device, CommandListType::Immediate)
    }
    fn with_type(device: &Device, list_type: CommandListType) -> Result<Self> {
        if device.family() != &F::INFO {
            tracing::warn!(device = device.family().name, list = F::INFO.name, "generation mismatch");
            return Err(ZeError::InvalidArgument);
        }
        let container = CommandContainer::new(device.memory_manager())?;
        let queue = match list_type {
            CommandListType::Regular => None,
            CommandListType::Immediate => Some(Box::new(CommandQueue::new(device)?)),
        };
        let dispatch_as_primary =
            list_type.is_regular() && tri_state(device.settings().dispatch_cmdlist_batch_buffer_as_primary, false);
        tracing::debug!(family = F::INFO.name, ?list_type, dispatch_as_primary, "command list created");
        Ok(Self {
            device: device.clone(),
            list_type,
            state: CommandListState::Open,
            container,
            sync_sections: None,
            dispatch_as_primary,
            batch_end_offset: None,
            submitted_offset: 0,
            commands_to_patch: Vec::new(),
            partition_count: 1,
            contains_any_kernel: false,
            contains_cooperative_kernels: false,
            per_thread_scratch_size: [0; 2],
            private_allocations: BTreeMap::new(),
            total_noop_space: 0,
            required_stream_properties: StreamProperties::default(),
            final_stream_properties: StreamProperties::default(),
            state_base_address_programmed: false,
            call_id: 0,
            scratch_address_after_patch: None,
            queue,
            _family: PhantomData,
        })
    }
    pub fn device(&self) -> &Device {
        &self.device
    }
    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }
    pub fn is_immediate(&self) -> bool {
        self.list_type.is_immediate()
    }
    pub fn state(&self) -> CommandListState {
        self.state
    }
    pub fn container(&self) -> &CommandContainer {
        &self.container
    }
    pub fn command_stream(&self) -> &LinearStream {
        self.container.command_stream()
    }
    /// The queue of an immediate list.
    pub fn immediate_queue(&self) -> Option<&CommandQueue<F>> {
        self.queue.as_deref()
    }
    /// Whether the queue jumps to this list with a first level batch
    /// buffer start and the list jumps back.
    pub fn dispatches_as_primary(&self) -> bool {
        self.dispatch_as_primary
    }
    pub fn commands_to_patch(&self) -> &[CommandToPatch] {
        &self.commands_to_patch
    }
    /// The patch records with the container they refer to.
    pub(crate) fn patches_and_container_mut(&mut self) -> (&mut [CommandToPatch], &mut CommandContainer) {
        (&mut self.commands_to_patch, &mut self.container)
    }
    /// Highest partition count of the recorded walkers.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }
    pub fn contains_any_kernel(&self) -> bool {
        self.contains_any_kernel
    }
    pub fn contains_cooperative_kernels(&self) -> bool {
        self.contains_cooperative_kernels
    }
    /// Largest per thread scratch size of each slot.
    pub fn per_thread_scratch_size(&self) -> [u32; 2] {
        self.per_thread_scratch_size
    }
    /// Private memory allocations owned by the list, one per size.
    pub fn private_allocations(&self) -> impl Iterator<Item = &Arc<GraphicsAllocation>> {
        self.private_allocations.values()
    }
    /// Bytes zeroed through noop space records.
    pub fn total_noop_space(&self) -> usize {
        self.total_noop_space
    }
    /// State the list expects when it starts.
    pub fn required_stream_properties(&self) -> &StreamProperties {
        &self.required_stream_properties
    }
    /// State the list leaves behind.
    pub fn final_stream_properties(&self) -> &StreamProperties {
        &self.final_stream_properties
    }
    /// Allocations that must be resident while the list executes.
    pub fn residency(&self) -> impl Iterator<Item = &Arc<GraphicsAllocation>> {
        self.container
            .residency()
            .iter()
            .chain(self.private_allocations.values())
            .chain(
                self.sync_sections
                    .as_ref()
                    .and_then(|sections| sections.stream().allocation()),
            )
    }
    /// Address the queue jumps to, skipping what an immediate list already
    /// submitted.
    pub fn batch_start_address(&self) -> u64 {
        self.command_stream().gpu_base() + self.submitted_offset as u64
    }
    /// Offset of the slot holding the jump back to the queue, for lists
    /// dispatched as primary batch buffers.
    pub fn batch_end_offset(&self) -> Option<usize> {
        self.batch_end_offset
    }
    pub(crate) fn scratch_address_after_patch(&self) -> Option<u64> {
        self.scratch_address_after_patch
    }
    pub(crate) fn set_scratch_address_after_patch(&mut self, address: u64) {
        self.scratch_address_after_patch = Some(address);
    }
    /// Points the end slot of a primary list back at `return_address`.
    pub(crate) fn set_return_address(&mut self, return_address: u64) -> bool {
        let Some(offset) = self.batch_end_offset else {
            return false;
        };
        let jump = store::batch_buffer_start_cmd(return_address, false);
        self.container.command_stream_mut().write_at(offset, &jump)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            tracing::warn!("append to a closed command list");
            return Err(ZeError::InvalidArgument);
        }
        Ok(())
    }

    /// Ends the recorded batch. With primary dispatch the end is a slot the
    /// queue overwrites with a jump back.
    fn terminate_batch(&mut self) {
        let stream = self.container.command_stream_mut();
        let offset = store::batch_buffer_end(stream);
        if self.dispatch_as_primary {
            stream.put(&MiNoop::init());
            stream.put(&MiNoop::init());
            self.batch_end_offset = Some(offset);
        }
    }

    /// Finishes recording.
    ///
    /// Closing an immediate list does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.is_immediate() || self.state.is_closed() {
            return Ok(());
        }
        self.terminate_batch();
        self.state = CommandListState::Closed;
        tracing::debug!(
            used = self.command_stream().used(),
            patches = self.commands_to_patch.len(),
            "command list closed"
        );
        Ok(())
    }

    /// Discards everything recorded and reopens the list.
    pub fn reset(&mut self) -> Result<()> {
        self.container.reset();
        if let Some(sections) = self.sync_sections.as_mut() {
            sections.clear();
        }
        self.state = CommandListState::Open;
        self.batch_end_offset = None;
        self.submitted_offset = 0;
        self.commands_to_patch.clear();
        self.partition_count = 1;
        self.contains_any_kernel = false;
        self.contains_cooperative_kernels = false;
        self.per_thread_scratch_size = [0; 2];
        self.private_allocations.clear();
        self.total_noop_space = 0;
        self.required_stream_properties = StreamProperties::default();
        self.final_stream_properties = StreamProperties::default();
        self.state_base_address_programmed = false;
        self.scratch_address_after_patch = None;
        Ok(())
    }

    /// Waits for prior work, then signals `event`.
    pub fn append_barrier(&mut self, event: Option<&Event>) -> Result<()> {
        self.ensure_open()?;
        store::pipe_control(self.container.command_stream_mut(), &PipeControlArgs::barrier());
        if self.partition_count > 1 && !self.is_immediate() {
            self.append_cross_tile_sync()?;
        }
        if let Some(event) = event {
            self.encode_signal(event);
        }
        self.flush_immediate()
    }

    /// Signals `event` once prior work completes.
    pub fn append_signal_event(&mut self, event: &Event) -> Result<()> {
        self.ensure_open()?;
        self.encode_signal(event);
        self.flush_immediate()
    }

    fn encode_signal(&mut self, event: &Event) {
        let args = PipeControlArgs {
            cs_stall: true,
            dc_flush: true,
            ..PipeControlArgs::default()
        };
        encode_signal_with(self.container.command_stream_mut(), event, &args);
        self.container.add_to_residency(event.allocation());
    }

    /// Jumps to a new cross-tile barrier after the last partitioned walker.
    fn append_cross_tile_sync(&mut self) -> Result<()> {
        if self.sync_sections.is_none() {
            let allocation = self
                .device
                .memory_manager()
                .allocate(CommandContainer::COMMAND_BUFFER_SIZE, AllocationType::CommandBuffer)?;
            self.sync_sections = Some(SyncSections::new(LinearStream::with_allocation(allocation)));
        }
        if let Some(sections) = self.sync_sections.as_mut() {
            sections.append(
                self.container.command_stream_mut(),
                self.partition_count,
                self.dispatch_as_primary,
            );
        }
        Ok(())
    }

    /// Submits what an immediate list recorded since its last submission.
    fn flush_immediate(&mut self) -> Result<()> {
        let Some(mut queue) = self.queue.take() else {
            return Ok(());
        };
        self.terminate_batch();
        let result = queue.execute_command_lists(&mut [&mut *self], None);
        self.queue = Some(queue);
        self.submitted_offset = self.command_stream().used();
        result
    }
}

/// `PIPE_CONTROL` signaling `event` through its post sync.
pub(crate) fn encode_signal_with(stream: &mut LinearStream, event: &Event, args: &PipeControlArgs) {
    if event.is_timestamp() {
        store::pipe_control_write_timestamp(stream, args, event.completion_address());
    } else {
        store::pipe_control_write_immediate(stream, args, event.completion_address(), Event::STATE_SIGNALED);
    }
}

impl<F: GfxFamily> fmt::Debug for CommandList<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("family", &F::INFO.name)
            .field("list_type", &self.list_type)
            .field("state", &self.state)
            .field("used", &self.command_stream().used())
            .field("commands_to_patch", &self.commands_to_patch.len())
            .field("partition_count", &self.partition_count)
            .finish()
    }
}

/// Internal state of a [`CommandList`] for tests.
#[cfg(any(test, feature = "test-support"))]
pub trait CommandListTestAccess {
    /// Bytes of the secondary cross-tile sync sections.
    fn sync_section_bytes(&self) -> &[u8];
    /// Command stream bytes already submitted by an immediate list.
    fn submitted_offset(&self) -> usize;
    fn state_base_address_programmed(&self) -> bool;
}

#[cfg(any(test, feature = "test-support"))]
impl<F: GfxFamily> CommandListTestAccess for CommandList<F> {
    fn sync_section_bytes(&self) -> &[u8] {
        self.sync_sections
            .as_ref()
            .map(|sections| sections.stream().bytes())
            .unwrap_or_default()
    }
    fn submitted_offset(&self) -> usize {
        self.submitted_offset
    }
    fn state_base_address_programmed(&self) -> bool {
        self.state_base_address_programmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DebugSettings,
        family::{Gen12Lp, XeHpcCore},
    };
    use neo_dispatch_core::hw::{
        cmds::{MiBatchBufferEnd, MiBatchBufferStart, PipeControl},
        parse::{find_all, parse},
    };

    /// Bytes a closed list ends with.
    fn batch_end_size(primary: bool) -> usize {
        if primary {
            MiBatchBufferEnd::size() + 2 * MiNoop::size()
        } else {
            MiBatchBufferEnd::size()
        }
    }

    #[test]
    fn close_ends_the_batch() {
        let device = Device::builder().build().unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        assert!(list.state().is_open());
        list.close().unwrap();
        assert!(list.state().is_closed());
        let cmds = parse(list.command_stream().bytes());
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].is::<MiBatchBufferEnd>());
        assert_eq!(list.batch_end_offset(), None);
        list.close().unwrap();
        assert_eq!(list.command_stream().used(), batch_end_size(false));
    }

    #[test]
    fn primary_lists_leave_a_jump_slot() {
        let settings = DebugSettings {
            dispatch_cmdlist_batch_buffer_as_primary: 1,
            ..DebugSettings::default()
        };
        let device = Device::builder().settings(settings).build().unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        assert!(list.dispatches_as_primary());
        list.close().unwrap();
        assert_eq!(list.batch_end_offset(), Some(0));
        assert_eq!(list.command_stream().used(), MiBatchBufferStart::size());
    }

    #[test]
    fn closed_lists_reject_appends_until_reset() {
        let device = Device::builder().build().unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.close().unwrap();
        assert_eq!(list.append_barrier(None), Err(ZeError::InvalidArgument));
        list.reset().unwrap();
        assert!(list.state().is_open());
        assert_eq!(list.command_stream().used(), 0);
        list.append_barrier(None).unwrap();
    }

    #[test]
    fn generation_must_match_device() {
        let device = Device::builder().family::<Gen12Lp>().build().unwrap();
        assert_eq!(
            CommandList::<XeHpcCore>::new(&device).unwrap_err(),
            ZeError::InvalidArgument
        );
    }

    #[test]
    fn signal_event_writes_post_sync() {
        let device = Device::builder().build().unwrap();
        let event = Event::new(&device).unwrap();
        let mut list = CommandList::<XeHpcCore>::new(&device).unwrap();
        list.append_signal_event(&event).unwrap();
        let (_, pc) = find_all::<PipeControl>(list.command_stream().bytes())[0];
        assert_eq!(pc.post_sync_operation(), PipeControl::POST_SYNC_WRITE_IMMEDIATE_DATA);
        assert_eq!(pc.address(), event.gpu_address());
        assert_eq!(pc.immediate_data(), Event::STATE_SIGNALED);
        assert!(list.container().residency().contains(event.allocation()));
    }

    #[test]
    fn immediate_lists_submit_each_append() {
        let device = Device::builder().build().unwrap();
        let mut list = CommandList::<XeHpcCore>::new_immediate(&device).unwrap();
        list.append_barrier(None).unwrap();
        let first = list.submitted_offset();
        assert_eq!(first, list.command_stream().used());
        list.append_barrier(None).unwrap();
        assert!(list.submitted_offset() > first);
        let queue = list.immediate_queue().unwrap();
        assert_eq!(queue.task_count(), 2);
        let starts = find_all::<MiBatchBufferStart>(queue.command_stream().bytes());
        let targets: Vec<_> = starts.iter().map(|(_, start)| start.batch_buffer_start_address()).collect();
        let base = list.command_stream().gpu_base();
        assert!(targets.contains(&base));
        assert!(targets.contains(&(base + first as u64)));
        list.close().unwrap();
        assert!(list.state().is_open());
    }
}
