use super::{
    xe_hpc_core::{encode_cfe_state, encode_state_compute_mode},
    FamilyInfo, GfxFamily,
};
use crate::{
    config::DebugSettings,
    result::Result,
    stream::{CommandContainer, LinearStream},
};
use neo_dispatch_core::{descriptor::ThreadArbitrationPolicy, hw::prelude::*};

/// Heapless generation: walkers address their payload with 64 bit pointers
/// and bindless handles are surface state addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Xe3pCore;

impl GfxFamily for Xe3pCore {
    const INFO: FamilyInfo = FamilyInfo {
        name: "xe3p_core",
        implicit_args_version: 1,
        grf_size: 64,
        supports_hw_local_id_generation: true,
        inline_data_size: 64,
        heapless: true,
        bindless_64bit: true,
        surface_state_size: 64,
        sampler_state_size: 16,
        max_per_thread_scratch_size: [256 * 1024, 256 * 1024],
        stateless_private_surface: true,
        default_thread_arbitration_policy: ThreadArbitrationPolicy::AgeBased,
        supports_implicit_scaling: true,
        supports_cooperative_implicit_scaling: false,
    };
    type Walker = ComputeWalker2;

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
        walker: &mut ComputeWalker2,
        idd: &InterfaceDescriptorData,
    ) -> Result<()> {
        walker.set_interface_descriptor(idd);
        Ok(())
    }
    fn program_indirect_data(walker: &mut ComputeWalker2, ioh_gpu_base: u64, offset: u64, length: u32) {
        walker.set_indirect_data_pointer(ioh_gpu_base + offset);
        walker.set_indirect_data_length(length);
    }
    fn program_walker_extras(walker: &mut ComputeWalker2, settings: &DebugSettings) {
        let control = match settings.over_dispatch_control {
            -1 => ComputeWalker2::OVER_DISPATCH_CONTROL_NORMAL,
            value => value.clamp(0, 3) as u32,
        };
        walker.set_over_dispatch_control(control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_data_is_a_pointer() {
        let mut walker = ComputeWalker2::init();
        Xe3pCore::program_indirect_data(&mut walker, 0x2_0000_0000, 0x40, 96);
        assert_eq!(walker.indirect_data_pointer(), 0x2_0000_0040);
        assert_eq!(walker.indirect_data_length(), 96);
        assert_eq!(walker.indirect_data_start_address(), 0);
    }

    #[test]
    fn over_dispatch_control_follows_settings() {
        let mut walker = ComputeWalker2::init();
        Xe3pCore::program_walker_extras(&mut walker, &DebugSettings::default());
        assert_eq!(walker.over_dispatch_control(), ComputeWalker2::OVER_DISPATCH_CONTROL_NORMAL);
        let settings = DebugSettings {
            over_dispatch_control: 0,
            ..DebugSettings::default()
        };
        Xe3pCore::program_walker_extras(&mut walker, &settings);
        assert_eq!(walker.over_dispatch_control(), 0);
    }
}
