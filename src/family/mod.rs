/*!

Hardware generations.

Each generation is a zero sized type implementing [`GfxFamily`]. Command
lists and queues are generic over the family, so walker layouts and state
programming are resolved statically. Facts needed by non generic code, like
the kernel, are collected in a [`FamilyInfo`] stored in the device.
*/

use crate::{
    config::DebugSettings,
    result::Result,
    stream::{CommandContainer, LinearStream},
};
use neo_dispatch_core::{
    descriptor::ThreadArbitrationPolicy,
    hw::cmds::{InterfaceDescriptorData, WalkerCommand},
};
use std::fmt::Debug;

mod gen12lp;
mod xe3p_core;
mod xe_hpc_core;

pub use gen12lp::Gen12Lp;
pub use xe3p_core::Xe3pCore;
pub use xe_hpc_core::XeHpcCore;

/// Static properties of a generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FamilyInfo {
    pub name: &'static str,
    pub implicit_args_version: u8,
    /// Bytes per general register.
    pub grf_size: u32,
    pub supports_hw_local_id_generation: bool,
    /// Bytes of cross-thread data the walker can carry inline, 0 if none.
    pub inline_data_size: u32,
    /// Whether the indirect data of a walker is addressed by a 64 bit
    /// pointer instead of heap base address registers.
    pub heapless: bool,
    /// Bindless handles are 64 bit surface state addresses instead of 32
    /// bit heap offsets.
    pub bindless_64bit: bool,
    pub surface_state_size: u32,
    pub sampler_state_size: u32,
    /// Per thread scratch limit for each scratch slot.
    pub max_per_thread_scratch_size: [u32; 2],
    pub stateless_private_surface: bool,
    pub default_thread_arbitration_policy: ThreadArbitrationPolicy,
    pub supports_implicit_scaling: bool,
    pub supports_cooperative_implicit_scaling: bool,
}

impl FamilyInfo {
    pub fn of<F: GfxFamily>() -> Self {
        F::INFO
    }
    /// Handle written into cross-thread data for a bindless surface.
    ///
    /// `heap_offset` is relative to the bindless heap, `gpu_address` is the
    /// absolute address of the surface state.
    pub fn bindless_handle(&self, heap_offset: u64, gpu_address: u64) -> BindlessHandle {
        if self.bindless_64bit {
            BindlessHandle::Qword(gpu_address)
        } else {
            BindlessHandle::Dword((heap_offset as u32) << 6)
        }
    }
    pub fn supports_inline_data(&self) -> bool {
        self.inline_data_size > 0
    }
}

/// Encoded bindless surface handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindlessHandle {
    Dword(u32),
    Qword(u64),
}

impl BindlessHandle {
    pub fn patch(self, dst: &mut [u8], offset: u16) {
        use neo_dispatch_core::descriptor::patch_non_pointer;
        match self {
            Self::Dword(value) => patch_non_pointer(dst, offset, value),
            Self::Qword(value) => patch_non_pointer(dst, offset, value),
        }
    }
    pub fn value(self) -> u64 {
        match self {
            Self::Dword(value) => u64::from(value),
            Self::Qword(value) => value,
        }
    }
}

/// A hardware generation.
pub trait GfxFamily: Copy + Debug + Default + Send + Sync + 'static {
    const INFO: FamilyInfo;
    type Walker: WalkerCommand;

    /// Bytes written by [`encode_thread_arbitration`](Self::encode_thread_arbitration).
    fn thread_arbitration_size() -> usize;
    fn encode_thread_arbitration(stream: &mut LinearStream, policy: ThreadArbitrationPolicy);
    /// Bytes written by [`encode_front_end`](Self::encode_front_end).
    fn front_end_size() -> usize;
    /// Programs scratch and thread limits of the compute front end.
    fn encode_front_end(stream: &mut LinearStream, scratch_address: u64, per_thread_scratch: u32, max_threads: u32);
    /// Points the walker at its interface descriptor, placing the
    /// descriptor in the dynamic state heap if the generation needs it
    /// there.
    fn program_interface_descriptor(
        container: &mut CommandContainer,
        walker: &mut Self::Walker,
        idd: &InterfaceDescriptorData,
    ) -> Result<()>;
    /// Points the walker at its payload in the indirect object heap.
    fn program_indirect_data(walker: &mut Self::Walker, ioh_gpu_base: u64, offset: u64, length: u32) {
        let _ = ioh_gpu_base;
        walker.set_indirect_data(offset, length);
    }
    /// Generation specific walker fields driven by settings.
    fn program_walker_extras(walker: &mut Self::Walker, settings: &DebugSettings) {
        let _ = (walker, settings);
    }
    /// Heap base addresses, emitted once per command list on generations
    /// that address heaps through base registers.
    fn encode_state_base_address(container: &mut CommandContainer) {
        let _ = container;
    }
    fn state_base_address_size() -> usize {
        0
    }
}
