use super::{FamilyInfo, GfxFamily};
use crate::{
    result::Result,
    stream::{CommandContainer, HeapType, LinearStream},
};
use neo_dispatch_core::{
    descriptor::ThreadArbitrationPolicy,
    hw::{prelude::*, regs::THREAD_ARBITRATION_REGISTER},
};

/// Tiger Lake class integrated graphics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Gen12Lp;

impl Gen12Lp {
    /// Value of the arbitration register for `policy`.
    pub fn thread_arbitration_register_value(policy: ThreadArbitrationPolicy) -> u32 {
        match policy {
            ThreadArbitrationPolicy::RoundRobin => 0x100,
            _ => 0x0,
        }
    }
}

impl GfxFamily for Gen12Lp {
    const INFO: FamilyInfo = FamilyInfo {
        name: "gen12lp",
        implicit_args_version: 0,
        grf_size: 32,
        supports_hw_local_id_generation: false,
        inline_data_size: 0,
        heapless: false,
        bindless_64bit: false,
        surface_state_size: 64,
        sampler_state_size: 16,
        max_per_thread_scratch_size: [2 * 1024 * 1024, 0],
        stateless_private_surface: true,
        default_thread_arbitration_policy: ThreadArbitrationPolicy::RoundRobin,
        supports_implicit_scaling: false,
        supports_cooperative_implicit_scaling: false,
    };
    type Walker = GpgpuWalker;

    fn thread_arbitration_size() -> usize {
        PipeControl::size() + MiLoadRegisterImm::size()
    }
    fn encode_thread_arbitration(stream: &mut LinearStream, policy: ThreadArbitrationPolicy) {
        let mut pc = PipeControl::init();
        pc.set_command_streamer_stall_enable(1);
        stream.put(&pc);
        let mut lri = MiLoadRegisterImm::init();
        lri.set_register_offset(THREAD_ARBITRATION_REGISTER)
            .set_data_dword(Self::thread_arbitration_register_value(policy));
        stream.put(&lri);
    }
    fn front_end_size() -> usize {
        MediaVfeState::size()
    }
    fn encode_front_end(stream: &mut LinearStream, scratch_address: u64, per_thread_scratch: u32, max_threads: u32) {
        let mut vfe = MediaVfeState::init();
        // Scratch space per thread is encoded as log2(size / 1KB).
        let encoded = if per_thread_scratch > 1024 {
            31 - (per_thread_scratch / 1024).leading_zeros()
        } else {
            0
        };
        vfe.set_per_thread_scratch_space(encoded)
            .set_scratch_space_base_pointer((scratch_address as u32) >> 10)
            .set_scratch_space_base_pointer_high(scratch_address)
            .set_maximum_number_of_threads(max_threads.saturating_sub(1))
            .set_number_of_urb_entries(1);
        stream.put(&vfe);
    }
    fn program_interface_descriptor(
        container: &mut CommandContainer,
        walker: &mut GpgpuWalker,
        idd: &InterfaceDescriptorData,
    ) -> Result<()> {
        let dsh = container.heap_mut(HeapType::DynamicState);
        dsh.align(64);
        let offset = dsh.put_bytes(bytemuck::bytes_of(idd));
        let mut load = MediaInterfaceDescriptorLoad::init();
        load.set_interface_descriptor_total_length(InterfaceDescriptorData::SIZE as u32)
            .set_interface_descriptor_data_start_address(offset as u32);
        container.command_stream_mut().put(&load);
        walker.set_interface_descriptor_offset(0);
        Ok(())
    }
    fn encode_state_base_address(container: &mut CommandContainer) {
        let mut sba = StateBaseAddress::init();
        sba.set_surface_state_base_address(container.heap(HeapType::SurfaceState).gpu_base())
            .set_dynamic_state_base_address(container.heap(HeapType::DynamicState).gpu_base())
            .set_indirect_object_base_address(container.heap(HeapType::IndirectObject).gpu_base())
            .set_general_state_base_address_modify_enable(1);
        container.command_stream_mut().put(&sba);
    }
    fn state_base_address_size() -> usize {
        StateBaseAddress::size()
    }
}
