/*!

A [`Device`] holds everything dispatch encoding shares across command
lists: the generation, hardware limits, settings, the memory manager and
the device wide heaps.

Devices can be cloned, which is equivalent to [`Arc::clone()`], and compare
equal only to their clones.

```
# use neo_dispatch::{device::Device, family::Gen12Lp};
let a = Device::builder().family::<Gen12Lp>().build()?;
let b = Device::builder().family::<Gen12Lp>().build()?;
assert_ne!(a, b);
assert_eq!(a, a.clone());
assert_eq!(a.family().name, "gen12lp");
# Ok::<(), neo_dispatch::error::ZeError>(())
```
*/

use crate::{
    config::DebugSettings,
    error::ZeError,
    family::{FamilyInfo, GfxFamily, XeHpcCore},
    memory::{AllocationType, GraphicsAllocation, MemoryManager},
    result::Result,
};
use neo_dispatch_core::mem::{align_up, KB, PAGE_SIZE_64K};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

/// Limits of the hardware a device exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareInfo {
    eu_count: u32,
    threads_per_eu: u32,
    dss_count: u32,
    tile_count: u32,
    global_memory_size: u64,
    max_work_group_size: u32,
    local_memory_size: u32,
}

impl HardwareInfo {
    /// Barriers each dual subslice can track.
    pub const BARRIERS_PER_DSS: u32 = 32;

    pub const fn new() -> Self {
        Self {
            eu_count: 96,
            threads_per_eu: 7,
            dss_count: 6,
            tile_count: 1,
            global_memory_size: 4 * 1024 * 1024 * 1024,
            max_work_group_size: 512,
            local_memory_size: 64 * 1024,
        }
    }
    pub const fn eu_count(&self) -> u32 {
        self.eu_count
    }
    pub const fn with_eu_count(mut self, eu_count: u32) -> Self {
        self.eu_count = eu_count;
        self
    }
    pub const fn threads_per_eu(&self) -> u32 {
        self.threads_per_eu
    }
    pub const fn with_threads_per_eu(mut self, threads_per_eu: u32) -> Self {
        self.threads_per_eu = threads_per_eu;
        self
    }
    pub const fn dss_count(&self) -> u32 {
        self.dss_count
    }
    pub const fn with_dss_count(mut self, dss_count: u32) -> Self {
        self.dss_count = dss_count;
        self
    }
    pub const fn tile_count(&self) -> u32 {
        self.tile_count
    }
    pub const fn with_tile_count(mut self, tile_count: u32) -> Self {
        self.tile_count = tile_count;
        self
    }
    pub const fn global_memory_size(&self) -> u64 {
        self.global_memory_size
    }
    pub const fn with_global_memory_size(mut self, global_memory_size: u64) -> Self {
        self.global_memory_size = global_memory_size;
        self
    }
    pub const fn max_work_group_size(&self) -> u32 {
        self.max_work_group_size
    }
    pub const fn with_max_work_group_size(mut self, max_work_group_size: u32) -> Self {
        self.max_work_group_size = max_work_group_size;
        self
    }
    /// Shared local memory available to one work group.
    pub const fn local_memory_size(&self) -> u32 {
        self.local_memory_size
    }
    pub const fn with_local_memory_size(mut self, local_memory_size: u32) -> Self {
        self.local_memory_size = local_memory_size;
        self
    }
    /// Hardware threads of one tile.
    pub const fn max_threads(&self) -> u32 {
        self.eu_count * self.threads_per_eu
    }
    /// Threads that may hold scratch or private memory at once.
    pub const fn compute_units_used_for_scratch(&self) -> u32 {
        self.max_threads()
    }
}

impl Default for HardwareInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Bindless heap a surface or sampler state lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindlessHeapType {
    GlobalSsh,
    GlobalDsh,
}

/// A state slot in a bindless heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceStateSlot {
    pub heap: BindlessHeapType,
    /// Offset relative to the heap base.
    pub surface_state_offset: u64,
    pub gpu_address: u64,
    pub size: u32,
}

#[derive(Debug)]
struct BindlessHeap {
    allocation: Arc<GraphicsAllocation>,
    used: u64,
}

impl BindlessHeap {
    fn allocate(&mut self, size: u32) -> Option<u64> {
        let offset = align_up(self.used, u64::from(size));
        let end = offset + u64::from(size);
        (end <= self.allocation.size()).then(|| {
            self.used = end;
            offset
        })
    }
}

/// Device wide heaps that bindless surface and sampler states are
/// allocated from.
#[derive(Debug)]
pub struct BindlessHeapsHelper {
    heaps: Mutex<[BindlessHeap; 2]>,
}

impl BindlessHeapsHelper {
    fn new(memory_manager: &MemoryManager, heap_size: u64) -> Result<Self> {
        let ssh = memory_manager.allocate(heap_size, AllocationType::SurfaceStateHeap)?;
        let dsh = memory_manager.allocate(heap_size, AllocationType::DynamicStateHeap)?;
        Ok(Self {
            heaps: Mutex::new([
                BindlessHeap {
                    allocation: ssh,
                    used: 0,
                },
                BindlessHeap {
                    allocation: dsh,
                    used: 0,
                },
            ]),
        })
    }
    fn index(heap: BindlessHeapType) -> usize {
        match heap {
            BindlessHeapType::GlobalSsh => 0,
            BindlessHeapType::GlobalDsh => 1,
        }
    }
    /// Reserves a state of `size` bytes.
    ///
    /// **errors**
    /// - OutOfHostMemory when the heap is exhausted.
    pub fn allocate_ss_in_heap(&self, size: u32, heap: BindlessHeapType) -> Result<SurfaceStateSlot> {
        let mut heaps = self.heaps.lock();
        let bindless_heap = &mut heaps[Self::index(heap)];
        let offset = bindless_heap.allocate(size).ok_or_else(|| {
            tracing::warn!(?heap, size, "bindless heap exhausted");
            ZeError::OutOfHostMemory
        })?;
        Ok(SurfaceStateSlot {
            heap,
            surface_state_offset: offset,
            gpu_address: bindless_heap.allocation.gpu_address() + offset,
            size,
        })
    }
    pub fn heap_allocation(&self, heap: BindlessHeapType) -> Arc<GraphicsAllocation> {
        self.heaps.lock()[Self::index(heap)].allocation.clone()
    }
    pub fn base_address(&self, heap: BindlessHeapType) -> u64 {
        self.heaps.lock()[Self::index(heap)].allocation.gpu_address()
    }
    /// Copies state bytes into the slot.
    pub fn write_state(&self, slot: &SurfaceStateSlot, state: &[u8]) -> Result<()> {
        let len = state.len().min(slot.size as usize);
        self.heap_allocation(slot.heap)
            .write(slot.surface_state_offset, &state[..len])
    }
}

/// Hands out ranges of a device wide buffer for kernels that synchronize
/// across work groups.
#[derive(Debug)]
pub struct SyncBufferHandler {
    memory_manager: Arc<MemoryManager>,
    state: Mutex<Option<(Arc<GraphicsAllocation>, u64)>>,
}

impl SyncBufferHandler {
    pub const DEFAULT_SIZE: u64 = PAGE_SIZE_64K;

    fn new(memory_manager: Arc<MemoryManager>) -> Self {
        Self {
            memory_manager,
            state: Mutex::default(),
        }
    }
    /// Returns the allocation and offset of `size` fresh bytes. A new
    /// allocation is made when the current one is full.
    pub fn obtain_allocation_and_offset(&self, size: u64) -> Result<(Arc<GraphicsAllocation>, u64)> {
        let mut state = self.state.lock();
        if let Some((allocation, used)) = state.as_mut() {
            if *used + size <= allocation.size() {
                let offset = *used;
                *used += size;
                return Ok((allocation.clone(), offset));
            }
        }
        let allocation_size = align_up(size.max(Self::DEFAULT_SIZE), PAGE_SIZE_64K);
        let allocation = self
            .memory_manager
            .allocate(allocation_size, AllocationType::SyncBuffer)?;
        tracing::debug!(size = allocation_size, "new sync buffer");
        *state = Some((allocation.clone(), size));
        Ok((allocation, 0))
    }
}

struct DeviceInner {
    family: FamilyInfo,
    hardware_info: HardwareInfo,
    settings: Arc<DebugSettings>,
    memory_manager: Arc<MemoryManager>,
    bindless_heaps_helper: BindlessHeapsHelper,
    sync_buffer_handler: SyncBufferHandler,
    rt_dispatch_globals: OnceCell<Arc<GraphicsAllocation>>,
}

/// A GPU device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Size of the ray tracing dispatch globals.
    pub const RT_DISPATCH_GLOBALS_SIZE: u64 = 4 * KB;

    /// A builder for creating a device.
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder {
            family: XeHpcCore::INFO,
            hardware_info: None,
            settings: None,
        }
    }
    pub fn family(&self) -> &FamilyInfo {
        &self.inner.family
    }
    pub fn hardware_info(&self) -> &HardwareInfo {
        &self.inner.hardware_info
    }
    pub fn settings(&self) -> &Arc<DebugSettings> {
        &self.inner.settings
    }
    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.inner.memory_manager
    }
    pub fn bindless_heaps_helper(&self) -> &BindlessHeapsHelper {
        &self.inner.bindless_heaps_helper
    }
    pub fn sync_buffer_handler(&self) -> &SyncBufferHandler {
        &self.inner.sync_buffer_handler
    }
    /// Allocates the ray tracing buffers on first use.
    ///
    /// **errors**
    /// - OutOfHostMemory if the allocation fails. A later call retries.
    pub fn ensure_rt_dispatch_globals(&self) -> Result<Arc<GraphicsAllocation>> {
        self.inner
            .rt_dispatch_globals
            .get_or_try_init(|| {
                self.memory_manager()
                    .allocate(Self::RT_DISPATCH_GLOBALS_SIZE, AllocationType::RtDispatchGlobals)
                    .map_err(|_| ZeError::OutOfHostMemory)
            })
            .cloned()
    }
    pub fn rt_dispatch_globals(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.inner.rt_dispatch_globals.get()
    }
    pub(crate) fn debug_message(&self, message: fmt::Arguments) {
        self.inner.settings.debug_message(message);
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Device {}

impl Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("family", &self.inner.family.name)
            .field("hardware_info", &self.inner.hardware_info)
            .finish()
    }
}

/// Builder for creating a [`Device`].
pub struct DeviceBuilder {
    family: FamilyInfo,
    hardware_info: Option<HardwareInfo>,
    settings: Option<Arc<DebugSettings>>,
}

impl DeviceBuilder {
    /// The generation, defaults to [`XeHpcCore`].
    pub fn family<F: GfxFamily>(mut self) -> Self {
        self.family = F::INFO;
        self
    }
    /// Hardware limits, defaults to a typical part of the generation.
    pub fn hardware_info(mut self, hardware_info: HardwareInfo) -> Self {
        self.hardware_info = Some(hardware_info);
        self
    }
    /// Settings, defaults to [`DebugSettings::default()`].
    pub fn settings(mut self, settings: impl Into<Arc<DebugSettings>>) -> Self {
        self.settings = Some(settings.into());
        self
    }
    /// Creates a device.
    ///
    /// **errors**
    /// - The device heaps could not be allocated.
    pub fn build(self) -> Result<Device> {
        let family = self.family;
        let hardware_info = self.hardware_info.unwrap_or_else(|| default_hardware_info(&family));
        let settings = self.settings.unwrap_or_default();
        let memory_manager = Arc::new(MemoryManager::new());
        let bindless_heaps_helper = BindlessHeapsHelper::new(&memory_manager, settings.bindless_heap_size)?;
        let sync_buffer_handler = SyncBufferHandler::new(memory_manager.clone());
        tracing::debug!(family = family.name, ?hardware_info, "device created");
        Ok(Device {
            inner: Arc::new(DeviceInner {
                family,
                hardware_info,
                settings,
                memory_manager,
                bindless_heaps_helper,
                sync_buffer_handler,
                rt_dispatch_globals: OnceCell::new(),
            }),
        })
    }
}

fn default_hardware_info(family: &FamilyInfo) -> HardwareInfo {
    if family.supports_implicit_scaling {
        HardwareInfo::new()
            .with_eu_count(512)
            .with_threads_per_eu(8)
            .with_dss_count(64)
            .with_tile_count(2)
            .with_global_memory_size(64 * 1024 * 1024 * 1024)
            .with_max_work_group_size(1024)
            .with_local_memory_size(128 * 1024)
    } else {
        HardwareInfo::new()
    }
}
