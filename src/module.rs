/*!

Modules hold the immutable part of every kernel compiled together.

```
# use neo_dispatch::{device::Device, module::Module};
# use neo_dispatch::neo_dispatch_core::descriptor::{KernelInfo, ProgramInfo};
let device = Device::builder().build()?;
let mut info = KernelInfo::default();
info.descriptor.kernel_metadata.kernel_name = "fill".into();
let program = ProgramInfo {
    kernel_infos: vec![info],
    ..ProgramInfo::default()
};
let module = Module::from_bincode(&device, &program.to_bincode()?)?;
assert_eq!(module.kernel_names().collect::<Vec<_>>(), ["fill"]);
assert!(module.create_kernel("missing").is_err());
# Ok::<(), anyhow::Error>(())
```
*/

use crate::{
    device::Device,
    error::ZeError,
    kernel::Kernel,
    memory::{AllocationType, GraphicsAllocation},
    result::Result,
};
use anyhow::Context;
use neo_dispatch_core::descriptor::{KernelDescriptor, KernelInfo, ProgramInfo};
use std::{fmt, sync::Arc};

/// Per kernel data shared by every [`Kernel`] created from a module.
#[derive(Debug)]
pub struct KernelImmutableData {
    descriptor: Arc<KernelDescriptor>,
    isa_allocation: Arc<GraphicsAllocation>,
    cross_thread_data_template: Vec<u8>,
    surface_state_heap_template: Vec<u8>,
    dynamic_state_heap_template: Vec<u8>,
    residency: Vec<Arc<GraphicsAllocation>>,
}

impl KernelImmutableData {
    fn new(
        device: &Device,
        info: KernelInfo,
        globals: &[Arc<GraphicsAllocation>],
    ) -> Result<Self> {
        let isa_allocation = device
            .memory_manager()
            .allocate(info.isa.len().max(64) as u64, AllocationType::KernelIsa)?;
        isa_allocation.write(0, &info.isa)?;
        let ctd_size = usize::from(info.descriptor.kernel_attributes.cross_thread_data_size);
        let mut cross_thread_data_template = info.cross_thread_data.unwrap_or_default();
        cross_thread_data_template.resize(ctd_size, 0);
        let mut residency = vec![isa_allocation.clone()];
        residency.extend(globals.iter().cloned());
        Ok(Self {
            descriptor: Arc::new(info.descriptor),
            isa_allocation,
            cross_thread_data_template,
            surface_state_heap_template: info.surface_state_heap,
            dynamic_state_heap_template: info.dynamic_state_heap,
            residency,
        })
    }
    pub fn descriptor(&self) -> &Arc<KernelDescriptor> {
        &self.descriptor
    }
    pub fn isa_allocation(&self) -> &Arc<GraphicsAllocation> {
        &self.isa_allocation
    }
    pub fn cross_thread_data_template(&self) -> &[u8] {
        &self.cross_thread_data_template
    }
    pub fn surface_state_heap_template(&self) -> &[u8] {
        &self.surface_state_heap_template
    }
    pub fn dynamic_state_heap_template(&self) -> &[u8] {
        &self.dynamic_state_heap_template
    }
    /// Allocations every kernel of this kind needs resident.
    pub fn residency(&self) -> &[Arc<GraphicsAllocation>] {
        &self.residency
    }
    /// Private memory of one dispatch, `0` if the kernel needs none.
    pub fn private_surface_size(&self, compute_units: u32) -> u64 {
        u64::from(self.descriptor.kernel_attributes.per_hw_thread_private_memory_size) * u64::from(compute_units)
    }
}

struct ModuleInner {
    device: Device,
    kernels: Vec<Arc<KernelImmutableData>>,
    global_constants: Option<Arc<GraphicsAllocation>>,
    global_variables: Option<Arc<GraphicsAllocation>>,
    allocate_private_memory_per_dispatch: bool,
}

/// A set of kernels created from one program.
#[derive(Clone)]
pub struct Module {
    inner: Arc<ModuleInner>,
}

impl Module {
    pub fn new(device: &Device, program: ProgramInfo) -> Result<Self> {
        let global_constants = Self::allocate_globals(device, &program.global_constants, AllocationType::GlobalConstants)?;
        let global_variables = Self::allocate_globals(device, &program.global_variables, AllocationType::GlobalVariables)?;
        let globals: Vec<_> = global_constants.iter().chain(global_variables.iter()).cloned().collect();
        let kernels = program
            .kernel_infos
            .into_iter()
            .map(|info| KernelImmutableData::new(device, info, &globals).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let allocate_private_memory_per_dispatch = private_memory_per_dispatch_needed(device, &kernels);
        tracing::debug!(
            kernels = kernels.len(),
            allocate_private_memory_per_dispatch,
            "module created"
        );
        Ok(Self {
            inner: Arc::new(ModuleInner {
                device: device.clone(),
                kernels,
                global_constants,
                global_variables,
                allocate_private_memory_per_dispatch,
            }),
        })
    }
    /// Decodes a bincode serialized [`ProgramInfo`].
    pub fn from_bincode(device: &Device, bytes: &[u8]) -> anyhow::Result<Self> {
        let program = ProgramInfo::from_bincode(bytes).context("malformed program")?;
        Ok(Self::new(device, program)?)
    }
    fn allocate_globals(device: &Device, data: &[u8], ty: AllocationType) -> Result<Option<Arc<GraphicsAllocation>>> {
        if data.is_empty() {
            return Ok(None);
        }
        let allocation = device.memory_manager().allocate(data.len() as u64, ty)?;
        allocation.write(0, data)?;
        Ok(Some(allocation))
    }
    pub fn device(&self) -> &Device {
        &self.inner.device
    }
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.inner.kernels.iter().map(|data| data.descriptor.name())
    }
    pub fn kernel_immutable_data(&self, name: &str) -> Option<&Arc<KernelImmutableData>> {
        self.inner.kernels.iter().find(|data| data.descriptor.name() == name)
    }
    pub fn global_constants(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.inner.global_constants.as_ref()
    }
    pub fn global_variables(&self) -> Option<&Arc<GraphicsAllocation>> {
        self.inner.global_variables.as_ref()
    }
    /// Whether private memory is allocated by command lists at dispatch
    /// instead of once per kernel.
    pub fn should_allocate_private_memory_per_dispatch(&self) -> bool {
        self.inner.allocate_private_memory_per_dispatch
    }
    /// Creates a kernel instance.
    ///
    /// **errors**
    /// - InvalidArgument if no kernel is named `name`.
    /// - See [`Kernel`] for initialization failures.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let data = self.kernel_immutable_data(name).ok_or_else(|| {
            tracing::warn!(name, "kernel not found");
            ZeError::InvalidArgument
        })?;
        Kernel::new(self.clone(), data.clone())
    }
}

/// Kernels of a module keep their private memory for their whole lifetime
/// unless all of it together would not fit in device memory.
fn private_memory_per_dispatch_needed(device: &Device, kernels: &[Arc<KernelImmutableData>]) -> bool {
    let compute_units = device.hardware_info().compute_units_used_for_scratch();
    let total: u64 = kernels
        .iter()
        .map(|data| data.private_surface_size(compute_units))
        .sum();
    total > 0 && total > device.hardware_info().global_memory_size()
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("kernels", &self.kernel_names().collect::<Vec<_>>())
            .field(
                "allocate_private_memory_per_dispatch",
                &self.inner.allocate_private_memory_per_dispatch,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HardwareInfo;
    use neo_dispatch_core::mem::KB;

    fn program(private_sizes: &[u32]) -> ProgramInfo {
        let kernel_infos = private_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let mut info = KernelInfo::default();
                info.descriptor.kernel_metadata.kernel_name = format!("k{i}");
                info.descriptor.kernel_attributes.per_hw_thread_private_memory_size = *size;
                info
            })
            .collect();
        ProgramInfo {
            kernel_infos,
            ..ProgramInfo::default()
        }
    }

    fn device() -> Device {
        let hw = HardwareInfo::new()
            .with_eu_count(1)
            .with_threads_per_eu(1)
            .with_global_memory_size(256 * KB);
        Device::builder().hardware_info(hw).build().unwrap()
    }

    #[test]
    fn private_memory_over_threshold_is_per_dispatch() {
        let device = device();
        let size = (128 * KB + KB) as u32;
        let module = Module::new(&device, program(&[size, size])).unwrap();
        assert!(module.should_allocate_private_memory_per_dispatch());
        let kernel = module.create_kernel("k0").unwrap();
        assert!(kernel.private_memory().is_none());
    }

    #[test]
    fn private_memory_under_threshold_is_per_kernel() {
        let device = device();
        let size = (128 * KB) as u32;
        let module = Module::new(&device, program(&[size, size])).unwrap();
        assert!(!module.should_allocate_private_memory_per_dispatch());
        let kernel = module.create_kernel("k1").unwrap();
        assert!(kernel.private_memory().is_some());
    }

    #[test]
    fn globals_are_resident() {
        let device = Device::builder().build().unwrap();
        let mut program = program(&[0]);
        program.global_constants = vec![1, 2, 3, 4];
        let module = Module::new(&device, program).unwrap();
        let constants = module.global_constants().unwrap();
        assert_eq!(constants.read(0, 4).unwrap(), vec![1, 2, 3, 4]);
        let data = module.kernel_immutable_data("k0").unwrap();
        assert!(data.residency().contains(constants));
        assert!(module.global_variables().is_none());
    }
}
