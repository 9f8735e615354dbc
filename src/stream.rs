//! Command streams and indirect heaps.

use crate::{
    memory::{AllocationType, GraphicsAllocation, MemoryManager, ResidencyContainer},
    result::Result,
};
use neo_dispatch_core::{hw::Command, mem::align_up};
use std::sync::Arc;

/// Linear buffer of commands or heap data at a fixed GPU base address.
#[derive(Clone, Debug)]
pub struct LinearStream {
    buffer: Vec<u8>,
    gpu_base: u64,
    allocation: Option<Arc<GraphicsAllocation>>,
}

impl LinearStream {
    /// Stream without a backing allocation, for encoding into scratch
    /// buffers.
    pub fn new(gpu_base: u64) -> Self {
        Self {
            buffer: Vec::new(),
            gpu_base,
            allocation: None,
        }
    }
    pub fn with_allocation(allocation: Arc<GraphicsAllocation>) -> Self {
        Self {
            buffer: Vec::new(),
            gpu_base: allocation.gpu_address(),
            allocation: Some(allocation),
        }
    }
    pub fn allocation(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.allocation.as_ref()
    }
    pub fn gpu_base(&self) -> u64 {
        self.gpu_base
    }
    pub fn used(&self) -> usize {
        self.buffer.len()
    }
    /// Drops everything written past `len`.
    pub fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
    }
    pub fn current_gpu_address(&self) -> u64 {
        self.gpu_base + self.buffer.len() as u64
    }
    /// Reserves `size` zeroed bytes and returns them.
    pub fn get_space(&mut self, size: usize) -> &mut [u8] {
        let start = self.buffer.len();
        self.buffer.resize(start + size, 0);
        &mut self.buffer[start..]
    }
    /// Appends `command`, returning its offset.
    pub fn put<C: Command>(&mut self, command: &C) -> usize {
        let offset = self.used();
        self.buffer.extend_from_slice(command.as_bytes());
        offset
    }
    pub fn put_dwords(&mut self, dwords: &[u32]) -> usize {
        let offset = self.used();
        self.buffer.extend_from_slice(bytemuck::cast_slice(dwords));
        offset
    }
    pub fn put_bytes(&mut self, bytes: &[u8]) -> usize {
        let offset = self.used();
        self.buffer.extend_from_slice(bytes);
        offset
    }
    /// Pads with zeroes up to `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let aligned = align_up(self.used(), alignment);
        self.buffer.resize(aligned, 0);
    }
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
    pub fn read<C: Command>(&self, offset: usize) -> Option<C> {
        C::from_bytes(self.buffer.get(offset..)?)
    }
    /// Overwrites the command at `offset`. Returns false when out of range.
    pub fn write_at<C: Command>(&mut self, offset: usize, command: &C) -> bool {
        neo_dispatch_core::mem::patch_bytes(&mut self.buffer, offset, command.as_bytes())
    }
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Heap addressed through a base address register. Offsets handed to
/// commands are relative to [`gpu_base`](LinearStream::gpu_base).
pub type IndirectHeap = LinearStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapType {
    IndirectObject,
    SurfaceState,
    DynamicState,
}

/// Command stream with the heaps it references.
#[derive(Debug)]
pub struct CommandContainer {
    command_stream: LinearStream,
    ioh: IndirectHeap,
    ssh: IndirectHeap,
    dsh: IndirectHeap,
    residency: ResidencyContainer,
}

impl CommandContainer {
    pub const COMMAND_BUFFER_SIZE: u64 = 1 << 20;
    pub const HEAP_SIZE: u64 = 1 << 20;

    pub fn new(memory_manager: &MemoryManager) -> Result<Self> {
        let stream = |size, ty| -> Result<LinearStream> {
            Ok(LinearStream::with_allocation(memory_manager.allocate(size, ty)?))
        };
        let mut container = Self {
            command_stream: stream(Self::COMMAND_BUFFER_SIZE, AllocationType::CommandBuffer)?,
            ioh: stream(Self::HEAP_SIZE, AllocationType::IndirectObjectHeap)?,
            ssh: stream(Self::HEAP_SIZE, AllocationType::SurfaceStateHeap)?,
            dsh: stream(Self::HEAP_SIZE, AllocationType::DynamicStateHeap)?,
            residency: ResidencyContainer::default(),
        };
        container.add_stream_allocations();
        Ok(container)
    }
    fn add_stream_allocations(&mut self) {
        let allocations: Vec<_> = [&self.command_stream, &self.ioh, &self.ssh, &self.dsh]
            .into_iter()
            .filter_map(|stream| stream.allocation().cloned())
            .collect();
        for allocation in allocations.iter() {
            self.residency.add(allocation);
        }
    }
    pub fn command_stream(&self) -> &LinearStream {
        &self.command_stream
    }
    pub fn command_stream_mut(&mut self) -> &mut LinearStream {
        &mut self.command_stream
    }
    pub fn heap(&self, ty: HeapType) -> &IndirectHeap {
        match ty {
            HeapType::IndirectObject => &self.ioh,
            HeapType::SurfaceState => &self.ssh,
            HeapType::DynamicState => &self.dsh,
        }
    }
    pub fn heap_mut(&mut self, ty: HeapType) -> &mut IndirectHeap {
        match ty {
            HeapType::IndirectObject => &mut self.ioh,
            HeapType::SurfaceState => &mut self.ssh,
            HeapType::DynamicState => &mut self.dsh,
        }
    }
    /// The command stream and the indirect object heap at once.
    pub fn stream_and_ioh_mut(&mut self) -> (&mut LinearStream, &mut IndirectHeap) {
        (&mut self.command_stream, &mut self.ioh)
    }
    pub fn residency(&self) -> &ResidencyContainer {
        &self.residency
    }
    pub fn add_to_residency(&mut self, allocation: &Arc<GraphicsAllocation>) {
        self.residency.add(allocation);
    }
    /// Discards all recorded bytes and residency, keeping the allocations.
    pub fn reset(&mut self) {
        self.command_stream.clear();
        self.ioh.clear();
        self.ssh.clear();
        self.dsh.clear();
        self.residency.clear();
        self.add_stream_allocations();
    }
}
