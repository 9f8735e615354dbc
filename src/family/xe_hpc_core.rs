use super::{FamilyInfo, GfxFamily};
use crate::{
    result::Result,
    stream::{CommandContainer, HeapType, LinearStream},
};
use neo_dispatch_core::{descriptor::ThreadArbitrationPolicy, hw::prelude::*};

/// Ponte Vecchio class data center GPUs, up to two tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XeHpcCore;

/// `EU_THREAD_SCHEDULING_MODE_OVERRIDE` value for `policy`, shared by the
/// generations programming arbitration through STATE_COMPUTE_MODE.
pub(crate) fn eu_thread_scheduling_mode(policy: ThreadArbitrationPolicy) -> u32 {
    match policy {
        ThreadArbitrationPolicy::NotPresent => 0,
        ThreadArbitrationPolicy::AgeBased => 1,
        ThreadArbitrationPolicy::RoundRobin => 2,
        ThreadArbitrationPolicy::RoundRobinAfterDependency => 3,
    }
}

pub(crate) fn encode_state_compute_mode(stream: &mut LinearStream, policy: ThreadArbitrationPolicy) {
    let mut scm = StateComputeMode::init();
    scm.set_eu_thread_scheduling_mode_override(eu_thread_scheduling_mode(policy))
        .set_mask_bits(StateComputeMode::MASK_EU_THREAD_SCHEDULING_MODE);
    stream.put(&scm);
}

pub(crate) fn encode_cfe_state(stream: &mut LinearStream, scratch_address: u64, max_threads: u32) {
    let mut cfe = CfeState::init();
    cfe.set_scratch_space_buffer((scratch_address as u32) >> 6)
        .set_maximum_number_of_threads(max_threads.saturating_sub(1));
    stream.put(&cfe);
}

impl GfxFamily for XeHpcCore {
    const INFO: FamilyInfo = FamilyInfo {
        name: "xe_hpc_core",
        implicit_args_version: 0,
        grf_size: 64,
        supports_hw_local_id_generation: true,
        inline_data_size: 32,
        heapless: false,
        bindless_64bit: false,
        surface_state_size: 64,
        sampler_state_size: 16,
        max_per_thread_scratch_size: [256 * 1024, 256 * 1024],
        stateless_private_surface: true,
        default_thread_arbitration_policy: ThreadArbitrationPolicy::AgeBased,
        supports_implicit_scaling: true,
        supports_cooperative_implicit_scaling: true,
    };
    type Walker = ComputeWalker;

    fn thread_arbitration_size() -> usize {
        StateComputeMode::size()
    }
    fn encode_thread_arbitration(stream: &mut LinearStream, policy: ThreadArbitrationPolicy) {
        encode_state_compute_mode(stream, policy);
    }
    fn front_end_size() -> usize {
        CfeState::size()
    }
    fn encode_front_end(stream: &mut LinearStream, scratch_address: u64, _per_thread_scratch: u32, max_threads: u32) {
        encode_cfe_state(stream, scratch_address, max_threads);
    }
    fn program_interface_descriptor(
        _container: &mut CommandContainer,
        walker: &mut ComputeWalker,
        idd: &InterfaceDescriptorData,
    ) -> Result<()> {
        walker.set_interface_descriptor(idd);
        Ok(())
    }
    fn encode_state_base_address(container: &mut CommandContainer) {
        let mut sba = StateBaseAddress::init();
        sba.set_surface_state_base_address(container.heap(HeapType::SurfaceState).gpu_base())
            .set_dynamic_state_base_address(container.heap(HeapType::DynamicState).gpu_base())
            .set_indirect_object_base_address(container.heap(HeapType::IndirectObject).gpu_base());
        container.command_stream_mut().put(&sba);
    }
    fn state_base_address_size() -> usize {
        StateBaseAddress::size()
    }
}
