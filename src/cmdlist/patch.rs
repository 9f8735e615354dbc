use crate::memory::GraphicsAllocation;
use std::sync::Arc;

/// A value a recorded command list only knows at submission.
#[derive(Clone, Debug, PartialEq, Eq, derive_more::IsVariant)]
pub enum CommandToPatch {
    /// `patch_size` bytes at `gpu_address` zeroed before the list runs.
    NoopSpace {
        allocation: Arc<GraphicsAllocation>,
        /// Offset of `gpu_address` in `allocation`.
        offset: u64,
        gpu_address: u64,
        patch_size: usize,
    },
    /// Scratch pointer carried in the inline data of a walker.
    ComputeWalkerInlineDataScratch {
        /// Command stream offset of the walker.
        walker_offset: usize,
        /// Offset in the inline data.
        offset: usize,
        patch_size: usize,
        base_address: u64,
        scratch_address_after_patch: u64,
    },
    /// Scratch pointer in an implicit args struct in the indirect object
    /// heap.
    ComputeWalkerImplicitArgsScratch {
        /// Indirect object heap offset of the struct.
        heap_offset: usize,
        /// Offset in the struct.
        offset: usize,
        patch_size: usize,
        base_address: u64,
        scratch_address_after_patch: u64,
    },
}

impl CommandToPatch {
    /// Bytes zeroed by a noop space record, 0 for other records.
    pub fn noop_size(&self) -> usize {
        match self {
            Self::NoopSpace { patch_size, .. } => *patch_size,
            _ => 0,
        }
    }
}
