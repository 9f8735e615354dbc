/*!

GPU visible allocations.

The [`MemoryManager`] hands out [`GraphicsAllocation`]s from a flat virtual
address range. Every allocation carries host storage so the runtime can
initialize it and tests can inspect what the GPU would read.
*/

use crate::{error::ZeError, result::Result};
use neo_dispatch_core::mem::{align_up, PAGE_SIZE_64K};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AllocationType {
    Buffer,
    SvmGpu,
    SvmCpu,
    SharedBuffer,
    CommandBuffer,
    IndirectObjectHeap,
    SurfaceStateHeap,
    DynamicStateHeap,
    KernelIsa,
    PrivateSurface,
    PrintfSurface,
    SyncBuffer,
    RegionBarrier,
    ScratchSurface,
    RtDispatchGlobals,
    GlobalConstants,
    GlobalVariables,
    Image,
    TagBuffer,
}

impl AllocationType {
    /// Allocations the host cannot see directly.
    pub fn is_device_only(self) -> bool {
        matches!(self, Self::SvmGpu | Self::PrivateSurface | Self::ScratchSurface)
    }
}

/// A range of GPU virtual memory with host backing.
pub struct GraphicsAllocation {
    id: u64,
    gpu_address: u64,
    size: u64,
    ty: AllocationType,
    /// Bumped whenever the allocation is rebound, invalidating cached
    /// argument bindings.
    generation: AtomicU32,
    storage: Mutex<Vec<u8>>,
}

impl GraphicsAllocation {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn allocation_type(&self) -> AllocationType {
        self.ty
    }
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
    pub fn contains(&self, address: u64) -> bool {
        address >= self.gpu_address && address < self.gpu_address + self.size
    }
    /// Copies `data` into the backing storage at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut storage = self.storage.lock();
        let offset = usize::try_from(offset).map_err(|_| ZeError::InvalidSize)?;
        let dst = storage
            .get_mut(offset..offset + data.len())
            .ok_or(ZeError::InvalidSize)?;
        dst.copy_from_slice(data);
        Ok(())
    }
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let storage = self.storage.lock();
        let offset = usize::try_from(offset).map_err(|_| ZeError::InvalidSize)?;
        storage
            .get(offset..offset + len)
            .map(<[u8]>::to_vec)
            .ok_or(ZeError::InvalidSize)
    }
    pub fn zero(&self, offset: u64, len: usize) -> Result<()> {
        self.write(offset, &vec![0; len])
    }
}

impl Debug for GraphicsAllocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GraphicsAllocation")
            .field("id", &self.id)
            .field("ty", &self.ty)
            .field("gpu_address", &format_args!("{:#x}", self.gpu_address))
            .field("size", &self.size)
            .finish()
    }
}

impl PartialEq for GraphicsAllocation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GraphicsAllocation {}

/// Allocates GPU memory and tracks unified shared memory ranges.
pub struct MemoryManager {
    next_id: AtomicU64,
    next_address: Mutex<u64>,
    svm: Mutex<BTreeMap<u64, Arc<GraphicsAllocation>>>,
    fail_types: Mutex<HashSet<AllocationType>>,
    allocation_count: AtomicU64,
}

impl MemoryManager {
    pub const GPU_VA_BASE: u64 = 0x1_0000_0000;

    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            next_address: Mutex::new(Self::GPU_VA_BASE),
            svm: Mutex::default(),
            fail_types: Mutex::default(),
            allocation_count: AtomicU64::new(0),
        }
    }
    /// Allocates `size` bytes, zero initialized.
    ///
    /// **errors**
    /// - OutOfDeviceMemory if allocations of `ty` are failing.
    pub fn allocate(&self, size: u64, ty: AllocationType) -> Result<Arc<GraphicsAllocation>> {
        if self.fail_types.lock().contains(&ty) {
            tracing::debug!(%ty, size, "allocation failure injected");
            return Err(ZeError::OutOfDeviceMemory);
        }
        let host_size = usize::try_from(size).map_err(|_| ZeError::OutOfHostMemory)?;
        let gpu_address = {
            let mut next = self.next_address.lock();
            let address = *next;
            *next += align_up(size.max(1), PAGE_SIZE_64K);
            address
        };
        let allocation = Arc::new(GraphicsAllocation {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            gpu_address,
            size,
            ty,
            generation: AtomicU32::new(0),
            storage: Mutex::new(vec![0; host_size]),
        });
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(?allocation, "allocated");
        Ok(allocation)
    }
    /// Allocates unified memory that can be passed to kernels by address.
    pub fn allocate_svm(&self, size: u64, ty: AllocationType) -> Result<Arc<GraphicsAllocation>> {
        let allocation = self.allocate(size, ty)?;
        self.svm.lock().insert(allocation.gpu_address(), allocation.clone());
        Ok(allocation)
    }
    pub fn free_svm(&self, address: u64) -> Option<Arc<GraphicsAllocation>> {
        self.svm.lock().remove(&address)
    }
    /// The tracked allocation containing `address`.
    pub fn find_svm(&self, address: u64) -> Option<Arc<GraphicsAllocation>> {
        let svm = self.svm.lock();
        let (_, allocation) = svm.range(..=address).next_back()?;
        allocation.contains(address).then(|| allocation.clone())
    }
    /// Makes every later allocation of `ty` fail until cleared.
    pub fn inject_failure(&self, ty: AllocationType) {
        self.fail_types.lock().insert(ty);
    }
    pub fn clear_failures(&self) {
        self.fail_types.lock().clear();
    }
    /// Number of successful allocations so far.
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.load(Ordering::Relaxed)
    }
}

impl Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("allocation_count", &self.allocation_count())
            .finish()
    }
}

/// Ordered allocations that must be resident for a dispatch.
///
/// Entries are looked up by allocation id, so adding an allocation twice
/// keeps a single entry.
#[derive(Clone, Debug, Default)]
pub struct ResidencyContainer {
    allocations: Vec<Arc<GraphicsAllocation>>,
}

impl ResidencyContainer {
    pub fn add(&mut self, allocation: &Arc<GraphicsAllocation>) -> usize {
        match self.position(allocation) {
            Some(index) => index,
            None => {
                self.allocations.push(allocation.clone());
                self.allocations.len() - 1
            }
        }
    }
    pub fn position(&self, allocation: &GraphicsAllocation) -> Option<usize> {
        self.allocations.iter().position(|a| a.id() == allocation.id())
    }
    pub fn contains(&self, allocation: &GraphicsAllocation) -> bool {
        self.position(allocation).is_some()
    }
    pub fn len(&self) -> usize {
        self.allocations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<GraphicsAllocation>> {
        self.allocations.iter()
    }
    pub fn clear(&mut self) {
        self.allocations.clear();
    }
}
