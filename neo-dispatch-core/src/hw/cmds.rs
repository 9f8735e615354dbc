use super::{bitfields, gpu_command, qword, set_qword, Command};

gpu_command! {
    MiNoop[1] = 0x0000_0000, mask 0xFF80_0000 {
        identification_number: 0 [0; 22],
        identification_number_register_write_enable: 0 [22; 1],
    }
}

gpu_command! {
    MiBatchBufferEnd[1] = 0x0500_0000, mask 0xFF80_0000 {}
}

gpu_command! {
    MiBatchBufferStart[3] = 0x1880_0001, mask 0xFF80_0000 {
        address_space_indicator: 0 [8; 1],
        predication_enable: 0 [15; 1],
        second_level_batch_buffer: 0 [22; 1],
    }
}

impl MiBatchBufferStart {
    pub const ADDRESS_SPACE_PPGTT: u32 = 1;

    pub fn set_batch_buffer_start_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 1, address & !0x3);
        self
    }
    pub fn batch_buffer_start_address(&self) -> u64 {
        qword(&self.dw, 1)
    }
    pub fn is_second_level(&self) -> bool {
        self.second_level_batch_buffer() == 1
    }
}

gpu_command! {
    MiLoadRegisterImm[3] = 0x1100_0001, mask 0xFF80_0000 {
        mmio_remap_enable: 0 [17; 1],
        register_offset: 1 [0; 23],
        data_dword: 2 [0; 32],
    }
}

gpu_command! {
    MiLoadRegisterMem[4] = 0x1480_0002, mask 0xFF80_0000 {
        async_mode_enable: 0 [21; 1],
        use_global_gtt: 0 [22; 1],
        register_address: 1 [0; 23],
    }
}

impl MiLoadRegisterMem {
    pub fn set_memory_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 2, address & !0x3);
        self
    }
    pub fn memory_address(&self) -> u64 {
        qword(&self.dw, 2)
    }
}

gpu_command! {
    MiLoadRegisterReg[3] = 0x1500_0001, mask 0xFF80_0000 {
        source_register_address: 1 [0; 23],
        destination_register_address: 2 [0; 23],
    }
}

gpu_command! {
    MiStoreRegisterMem[4] = 0x1200_0002, mask 0xFF80_0000 {
        predicate_enable: 0 [21; 1],
        use_global_gtt: 0 [22; 1],
        register_address: 1 [0; 23],
    }
}

impl MiStoreRegisterMem {
    pub fn set_memory_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 2, address & !0x3);
        self
    }
    pub fn memory_address(&self) -> u64 {
        qword(&self.dw, 2)
    }
}

gpu_command! {
    MiStoreDataImm[5] = 0x1000_0003, mask 0xFF80_0000 {
        store_qword: 0 [21; 1],
        use_global_gtt: 0 [22; 1],
        data_dword0: 3 [0; 32],
        data_dword1: 4 [0; 32],
    }
}

impl MiStoreDataImm {
    pub fn set_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 1, address & !0x3);
        self
    }
    pub fn address(&self) -> u64 {
        qword(&self.dw, 1)
    }
    pub fn set_data_qword(&mut self, data: u64) -> &mut Self {
        set_qword(&mut self.dw, 3, data);
        self
    }
    pub fn data_qword(&self) -> u64 {
        qword(&self.dw, 3)
    }
}

gpu_command! {
    /// Header of an ALU program. The instructions follow as raw dwords and
    /// `dword_length` is their count minus one.
    MiMath[1] = 0x0D00_0000, mask 0xFF80_0000 {
        dword_length: 0 [0; 8],
    }
}

gpu_command! {
    MiSemaphoreWait[5] = 0x0E00_0003, mask 0xFF80_0000 {
        compare_operation: 0 [12; 3],
        wait_mode: 0 [15; 1],
        register_poll_mode: 0 [16; 1],
        semaphore_data_dword: 1 [0; 32],
    }
}

impl MiSemaphoreWait {
    pub const COMPARE_SAD_GREATER_THAN_SDD: u32 = 0;
    pub const COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD: u32 = 1;
    pub const COMPARE_SAD_LESS_THAN_SDD: u32 = 2;
    pub const COMPARE_SAD_LESS_THAN_OR_EQUAL_SDD: u32 = 3;
    pub const COMPARE_SAD_EQUAL_SDD: u32 = 4;
    pub const COMPARE_SAD_NOT_EQUAL_SDD: u32 = 5;
    pub const WAIT_MODE_POLLING: u32 = 1;

    pub fn set_semaphore_graphics_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 2, address & !0x3);
        self
    }
    pub fn semaphore_graphics_address(&self) -> u64 {
        qword(&self.dw, 2)
    }
}

gpu_command! {
    MiAtomic[3] = 0x1780_0001, mask 0xFF80_0000 {
        atomic_opcode: 0 [8; 8],
        return_data_control: 0 [16; 1],
        cs_stall: 0 [17; 1],
        data_size: 0 [19; 2],
        post_sync_operation: 0 [21; 1],
    }
}

impl MiAtomic {
    pub const ATOMIC_4B_INCREMENT: u32 = 0x05;
    pub const ATOMIC_4B_DECREMENT: u32 = 0x06;
    pub const ATOMIC_8B_INCREMENT: u32 = 0x25;
    pub const ATOMIC_8B_DECREMENT: u32 = 0x26;

    pub fn set_memory_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 1, address & !0x3);
        self
    }
    pub fn memory_address(&self) -> u64 {
        qword(&self.dw, 1)
    }
}

gpu_command! {
    PipeControl[6] = 0x7A00_0004, mask 0xFFFF_0000 {
        hdc_pipeline_flush: 0 [9; 1],
        state_cache_invalidation_enable: 1 [2; 1],
        constant_cache_invalidation_enable: 1 [3; 1],
        dc_flush_enable: 1 [5; 1],
        texture_cache_invalidation_enable: 1 [10; 1],
        instruction_cache_invalidate_enable: 1 [11; 1],
        post_sync_operation: 1 [14; 2],
        tlb_invalidate: 1 [18; 1],
        command_streamer_stall_enable: 1 [20; 1],
    }
}

impl PipeControl {
    pub const POST_SYNC_NO_WRITE: u32 = 0;
    pub const POST_SYNC_WRITE_IMMEDIATE_DATA: u32 = 1;
    pub const POST_SYNC_WRITE_TIMESTAMP: u32 = 3;

    pub fn set_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 2, address & !0x7);
        self
    }
    pub fn address(&self) -> u64 {
        qword(&self.dw, 2)
    }
    pub fn set_immediate_data(&mut self, data: u64) -> &mut Self {
        set_qword(&mut self.dw, 4, data);
        self
    }
    pub fn immediate_data(&self) -> u64 {
        qword(&self.dw, 4)
    }
}

gpu_command! {
    StateComputeMode[2] = 0x6105_0000, mask 0xFFFF_0000 {
        force_non_coherent: 1 [3; 2],
        eu_thread_scheduling_mode_override: 1 [13; 2],
        large_grf_mode: 1 [15; 1],
        mask_bits: 1 [16; 16],
    }
}

impl StateComputeMode {
    pub const MASK_FORCE_NON_COHERENT: u32 = 0x18;
    pub const MASK_EU_THREAD_SCHEDULING_MODE: u32 = 0x6000;
    pub const MASK_LARGE_GRF_MODE: u32 = 0x8000;
}

gpu_command! {
    StateBaseAddress[22] = 0x6101_0014, mask 0xFFFF_0000 {
        general_state_base_address_modify_enable: 1 [0; 1],
        surface_state_base_address_modify_enable: 4 [0; 1],
        dynamic_state_base_address_modify_enable: 6 [0; 1],
        indirect_object_base_address_modify_enable: 8 [0; 1],
        instruction_base_address_modify_enable: 10 [0; 1],
        bindless_surface_state_base_address_modify_enable: 16 [0; 1],
        bindless_surface_state_size: 18 [12; 20],
    }
}

impl StateBaseAddress {
    fn set_base(&mut self, index: usize, address: u64) -> &mut Self {
        let modify = self.dw[index] & 1;
        set_qword(&mut self.dw, index, (address & !0xFFF) | u64::from(modify));
        self
    }
    fn base(&self, index: usize) -> u64 {
        qword(&self.dw, index) & !0xFFF
    }
    pub fn set_surface_state_base_address(&mut self, address: u64) -> &mut Self {
        self.set_surface_state_base_address_modify_enable(1);
        self.set_base(4, address)
    }
    pub fn surface_state_base_address(&self) -> u64 {
        self.base(4)
    }
    pub fn set_dynamic_state_base_address(&mut self, address: u64) -> &mut Self {
        self.set_dynamic_state_base_address_modify_enable(1);
        self.set_base(6, address)
    }
    pub fn dynamic_state_base_address(&self) -> u64 {
        self.base(6)
    }
    pub fn set_indirect_object_base_address(&mut self, address: u64) -> &mut Self {
        self.set_indirect_object_base_address_modify_enable(1);
        self.set_base(8, address)
    }
    pub fn indirect_object_base_address(&self) -> u64 {
        self.base(8)
    }
    pub fn set_instruction_base_address(&mut self, address: u64) -> &mut Self {
        self.set_instruction_base_address_modify_enable(1);
        self.set_base(10, address)
    }
    pub fn instruction_base_address(&self) -> u64 {
        self.base(10)
    }
    pub fn set_bindless_surface_state_base_address(&mut self, address: u64) -> &mut Self {
        self.set_bindless_surface_state_base_address_modify_enable(1);
        self.set_base(16, address)
    }
    pub fn bindless_surface_state_base_address(&self) -> u64 {
        self.base(16)
    }
}

gpu_command! {
    /// Front end state of compute engines on Xe-HP and later.
    CfeState[6] = 0x7200_0004, mask 0xFFFF_0000 {
        scratch_space_buffer: 1 [10; 22],
        compute_overdispatch_disable: 3 [3; 1],
        single_slice_dispatch_ccs_mode: 3 [4; 1],
        maximum_number_of_threads: 3 [16; 16],
        compute_dispatch_all_walker_enable: 4 [5; 1],
    }
}

gpu_command! {
    /// Front end state of Gen12LP compute.
    MediaVfeState[9] = 0x7000_0007, mask 0xFFFF_0000 {
        per_thread_scratch_space: 1 [0; 4],
        scratch_space_base_pointer: 1 [10; 22],
        number_of_urb_entries: 3 [8; 8],
        maximum_number_of_threads: 3 [16; 16],
        curbe_allocation_size: 5 [0; 16],
        urb_entry_allocation_size: 5 [16; 16],
    }
}

impl MediaVfeState {
    pub fn set_scratch_space_base_pointer_high(&mut self, address: u64) -> &mut Self {
        self.dw[2] = (address >> 32) as u32;
        self
    }
}

gpu_command! {
    MediaInterfaceDescriptorLoad[4] = 0x7002_0002, mask 0xFFFF_0000 {
        interface_descriptor_total_length: 2 [0; 17],
        interface_descriptor_data_start_address: 3 [0; 32],
    }
}

bitfields! {
    /// Interface descriptor. Lives in the dynamic state heap on Gen12LP and
    /// inside the walker on later generations.
    InterfaceDescriptorData[8] {
        kernel_start_pointer: 0 [6; 26],
        kernel_start_pointer_high: 1 [0; 16],
        denorm_mode: 2 [19; 1],
        sampler_count: 3 [2; 3],
        sampler_state_pointer: 3 [5; 27],
        binding_table_entry_count: 4 [0; 5],
        binding_table_pointer: 4 [5; 16],
        number_of_threads_in_gpgpu_thread_group: 5 [0; 10],
        shared_local_memory_size: 5 [16; 5],
        barrier_enable: 5 [21; 1],
        rounding_mode: 5 [22; 2],
        thread_group_dispatch_size: 5 [27; 2],
        cross_thread_constant_data_read_length: 6 [0; 8],
        preferred_slm_allocation_size: 7 [0; 4],
    }
}

impl Default for InterfaceDescriptorData {
    fn default() -> Self {
        Self { dw: [0; 8] }
    }
}

impl InterfaceDescriptorData {
    pub const SIZE: usize = 32;

    pub fn set_kernel_start_address(&mut self, address: u64) -> &mut Self {
        self.set_kernel_start_pointer((address as u32) >> 6);
        self.set_kernel_start_pointer_high((address >> 32) as u32)
    }
    pub fn kernel_start_address(&self) -> u64 {
        (u64::from(self.kernel_start_pointer()) << 6)
            | (u64::from(self.kernel_start_pointer_high()) << 32)
    }
}

bitfields! {
    /// Surface state of a buffer or image, 64 bytes.
    RenderSurfaceState[16] {
        surface_format: 0 [18; 9],
        surface_type: 0 [29; 3],
        surface_q_pitch: 1 [0; 15],
        width: 2 [0; 14],
        height: 2 [16; 14],
        surface_pitch: 3 [0; 18],
        depth: 3 [21; 11],
        minimum_array_element: 4 [18; 11],
        number_of_multisamples: 4 [3; 3],
        mip_count_lod: 5 [0; 4],
    }
}

impl Default for RenderSurfaceState {
    fn default() -> Self {
        Self { dw: [0; 16] }
    }
}

impl RenderSurfaceState {
    pub const SIZE: usize = 64;
    pub const SURFACE_TYPE_1D: u32 = 0;
    pub const SURFACE_TYPE_2D: u32 = 1;
    pub const SURFACE_TYPE_3D: u32 = 2;
    pub const SURFACE_TYPE_BUFFER: u32 = 4;
    pub const SURFACE_FORMAT_R32_UINT: u32 = 0x0D7;
    pub const SURFACE_FORMAT_RAW: u32 = 0x1FF;

    /// Raw buffer state. The size minus one is split across width, height
    /// and depth.
    pub fn buffer(address: u64, size: u64) -> Self {
        let encoded = size.saturating_sub(1) as u32;
        let mut state = Self::default();
        state
            .set_surface_type(Self::SURFACE_TYPE_BUFFER)
            .set_surface_format(Self::SURFACE_FORMAT_RAW)
            .set_width(encoded & 0x7F)
            .set_height((encoded >> 7) & 0x3FFF)
            .set_depth((encoded >> 21) & 0x7FF)
            .set_surface_base_address(address);
        state
    }
    /// Inverse of the size encoding of [`buffer`](Self::buffer).
    pub fn buffer_size(&self) -> u64 {
        let encoded = self.width() | (self.height() << 7) | (self.depth() << 21);
        u64::from(encoded) + 1
    }

    pub fn set_surface_base_address(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 8, address);
        self
    }
    pub fn surface_base_address(&self) -> u64 {
        qword(&self.dw, 8)
    }
}

bitfields! {
    /// Sampler state, 16 bytes.
    SamplerState[4] {
        lod_preclamp_mode: 0 [27; 2],
        min_mode_filter: 0 [14; 3],
        mag_mode_filter: 0 [17; 3],
        tcz_address_control_mode: 3 [0; 3],
        tcy_address_control_mode: 3 [3; 3],
        tcx_address_control_mode: 3 [6; 3],
        non_normalized_coordinate_enable: 3 [10; 1],
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self { dw: [0; 4] }
    }
}

impl SamplerState {
    pub const SIZE: usize = 16;
}

gpu_command! {
    GpgpuWalker[15] = 0x7105_000D, mask 0xFFFF_0000 {
        predicate_enable: 0 [8; 1],
        indirect_parameter_enable: 0 [10; 1],
        interface_descriptor_offset: 1 [0; 6],
        indirect_data_length: 2 [0; 17],
        indirect_data_start_address: 3 [0; 32],
        thread_width_counter_maximum: 4 [0; 6],
        thread_height_counter_maximum: 4 [8; 6],
        thread_depth_counter_maximum: 4 [16; 6],
        simd_size: 4 [30; 2],
        thread_group_id_starting_x: 5 [0; 32],
        thread_group_id_x_dimension: 7 [0; 32],
        thread_group_id_starting_y: 8 [0; 32],
        thread_group_id_y_dimension: 10 [0; 32],
        thread_group_id_starting_resume_z: 11 [0; 32],
        thread_group_id_z_dimension: 12 [0; 32],
        right_execution_mask: 13 [0; 32],
        bottom_execution_mask: 14 [0; 32],
    }
}

gpu_command! {
    /// Xe-HP and later walker with 32 bytes of inline data.
    ComputeWalker[39] = 0x7202_0025, mask 0xFFFF_0000 {
        predicate_enable: 0 [0; 1],
        workload_partition_enable: 0 [1; 1],
        indirect_parameter_enable: 0 [10; 1],
        indirect_data_length: 2 [0; 17],
        l3_prefetch_disable: 2 [17; 1],
        partition_type: 2 [30; 2],
        indirect_data_start_address: 3 [0; 32],
        message_simd: 4 [17; 2],
        walk_order: 4 [21; 3],
        emit_inline_parameter: 4 [25; 1],
        emit_local_id: 4 [26; 3],
        generate_local_id: 4 [29; 1],
        simd_size: 4 [30; 2],
        execution_mask: 5 [0; 32],
        local_x_maximum: 6 [0; 10],
        local_y_maximum: 6 [10; 10],
        local_z_maximum: 6 [20; 10],
        thread_group_id_x_dimension: 7 [0; 32],
        thread_group_id_y_dimension: 8 [0; 32],
        thread_group_id_z_dimension: 9 [0; 32],
        thread_group_id_starting_x: 10 [0; 32],
        thread_group_id_starting_y: 11 [0; 32],
        thread_group_id_starting_z: 12 [0; 32],
        partition_id: 13 [0; 16],
        partition_size: 14 [0; 16],
        postsync_operation: 25 [0; 2],
        postsync_dataport_pipeline_flush: 25 [4; 1],
    }
}

gpu_command! {
    /// Heapless walker with 64 bytes of inline data and a 64 bit indirect
    /// data pointer.
    ComputeWalker2[51] = 0x7203_0031, mask 0xFFFF_0000 {
        predicate_enable: 0 [0; 1],
        workload_partition_enable: 0 [1; 1],
        indirect_parameter_enable: 0 [10; 1],
        indirect_data_length: 2 [0; 17],
        l3_prefetch_disable: 2 [17; 1],
        over_dispatch_control: 2 [26; 2],
        partition_type: 2 [30; 2],
        indirect_data_start_address: 3 [0; 32],
        message_simd: 4 [17; 2],
        walk_order: 4 [21; 3],
        emit_inline_parameter: 4 [25; 1],
        emit_local_id: 4 [26; 3],
        generate_local_id: 4 [29; 1],
        simd_size: 4 [30; 2],
        execution_mask: 5 [0; 32],
        local_x_maximum: 6 [0; 10],
        local_y_maximum: 6 [10; 10],
        local_z_maximum: 6 [20; 10],
        thread_group_id_x_dimension: 7 [0; 32],
        thread_group_id_y_dimension: 8 [0; 32],
        thread_group_id_z_dimension: 9 [0; 32],
        thread_group_id_starting_x: 10 [0; 32],
        thread_group_id_starting_y: 11 [0; 32],
        thread_group_id_starting_z: 12 [0; 32],
        partition_id: 13 [0; 16],
        partition_size: 14 [0; 16],
        postsync_operation: 25 [0; 2],
        postsync_dataport_pipeline_flush: 25 [4; 1],
    }
}

impl ComputeWalker2 {
    pub const OVER_DISPATCH_CONTROL_NONE: u32 = 0;
    pub const OVER_DISPATCH_CONTROL_LOW: u32 = 1;
    pub const OVER_DISPATCH_CONTROL_NORMAL: u32 = 2;
    pub const OVER_DISPATCH_CONTROL_HIGH: u32 = 3;

    pub fn set_indirect_data_pointer(&mut self, address: u64) -> &mut Self {
        set_qword(&mut self.dw, 31, address);
        self
    }
    pub fn indirect_data_pointer(&self) -> u64 {
        qword(&self.dw, 31)
    }
}

/// Post sync operation attached to a walker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PostSync {
    #[default]
    None,
    ImmediateData {
        address: u64,
        data: u64,
    },
    Timestamp {
        address: u64,
    },
}

impl PostSync {
    pub const OPERATION_NO_WRITE: u32 = 0;
    pub const OPERATION_WRITE_IMMEDIATE_DATA: u32 = 1;
    pub const OPERATION_WRITE_TIMESTAMP: u32 = 3;

    pub fn operation(&self) -> u32 {
        match self {
            Self::None => Self::OPERATION_NO_WRITE,
            Self::ImmediateData { .. } => Self::OPERATION_WRITE_IMMEDIATE_DATA,
            Self::Timestamp { .. } => Self::OPERATION_WRITE_TIMESTAMP,
        }
    }
}

/// Hardware local ID generation parameters of a walker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwLocalIdGeneration {
    pub walk_order: u32,
    /// Bit per channel.
    pub emit_local_id: u32,
    pub local_size: [u32; 3],
}

/// Generation independent view of a walker command.
pub trait WalkerCommand: Command {
    const INLINE_DATA_SIZE: usize;
    const SUPPORTS_PARTITIONING: bool;
    fn set_thread_group_dimensions(&mut self, dims: [u32; 3]);
    fn thread_group_dimensions(&self) -> [u32; 3];
    fn set_indirect_data(&mut self, start: u64, length: u32);
    fn indirect_data_start(&self) -> u64;
    fn indirect_data_length(&self) -> u32;
    /// Encodes `simd` (1, 8, 16 or 32) into the walker's SIMD fields.
    fn set_simd(&mut self, simd: u32);
    fn set_execution_mask(&mut self, mask: u32);
    fn execution_mask(&self) -> u32;
    fn set_predicate(&mut self, enable: bool);
    fn predicate(&self) -> bool;
    fn set_indirect_parameter(&mut self, enable: bool);
    fn indirect_parameter(&self) -> bool;
    fn set_partition(&mut self, partition_type: u32, partition_size: u32);
    /// `(enabled, type, size)`.
    fn partition(&self) -> (bool, u32, u32);
    fn set_hw_local_id_generation(&mut self, generation: Option<HwLocalIdGeneration>);
    fn hw_local_id_generation(&self) -> Option<HwLocalIdGeneration>;
    fn set_interface_descriptor(&mut self, idd: &InterfaceDescriptorData);
    fn interface_descriptor(&self) -> Option<InterfaceDescriptorData>;
    fn set_post_sync(&mut self, post_sync: PostSync);
    fn post_sync(&self) -> PostSync;
    fn inline_data(&self) -> &[u8];
    fn inline_data_mut(&mut self) -> &mut [u8];
    /// Whether the first bytes of the payload travel inside the command.
    fn set_emit_inline_data(&mut self, enable: bool);
    fn emits_inline_data(&self) -> bool;
}

/// SIMD code shared by the walkers: SIMD1 executes as SIMD32.
pub fn simd_size_code(simd: u32) -> u32 {
    match simd {
        8 => 0,
        16 => 1,
        _ => 2,
    }
}

macro_rules! impl_compute_walker {
    ($walker:ident, inline_dw = $inline:literal, postsync_dw = $ps:literal) => {
        impl WalkerCommand for $walker {
            const INLINE_DATA_SIZE: usize = (<$walker as Command>::DWORDS - $inline) * 4;
            const SUPPORTS_PARTITIONING: bool = true;
            fn set_thread_group_dimensions(&mut self, dims: [u32; 3]) {
                self.set_thread_group_id_x_dimension(dims[0]);
                self.set_thread_group_id_y_dimension(dims[1]);
                self.set_thread_group_id_z_dimension(dims[2]);
            }
            fn thread_group_dimensions(&self) -> [u32; 3] {
                [
                    self.thread_group_id_x_dimension(),
                    self.thread_group_id_y_dimension(),
                    self.thread_group_id_z_dimension(),
                ]
            }
            fn set_indirect_data(&mut self, start: u64, length: u32) {
                self.set_indirect_data_start_address(start as u32);
                self.set_indirect_data_length(length);
            }
            fn indirect_data_start(&self) -> u64 {
                u64::from(self.indirect_data_start_address())
            }
            fn indirect_data_length(&self) -> u32 {
                $walker::indirect_data_length(self)
            }
            fn set_simd(&mut self, simd: u32) {
                let code = simd_size_code(simd);
                self.set_simd_size(code);
                self.set_message_simd(code);
            }
            fn set_execution_mask(&mut self, mask: u32) {
                $walker::set_execution_mask(self, mask);
            }
            fn execution_mask(&self) -> u32 {
                $walker::execution_mask(self)
            }
            fn set_predicate(&mut self, enable: bool) {
                self.set_predicate_enable(u32::from(enable));
            }
            fn predicate(&self) -> bool {
                self.predicate_enable() == 1
            }
            fn set_indirect_parameter(&mut self, enable: bool) {
                self.set_indirect_parameter_enable(u32::from(enable));
            }
            fn indirect_parameter(&self) -> bool {
                self.indirect_parameter_enable() == 1
            }
            fn set_partition(&mut self, partition_type: u32, partition_size: u32) {
                self.set_workload_partition_enable(u32::from(partition_type != 0));
                self.set_partition_type(partition_type);
                self.set_partition_size(partition_size);
            }
            fn partition(&self) -> (bool, u32, u32) {
                (
                    self.workload_partition_enable() == 1,
                    self.partition_type(),
                    self.partition_size(),
                )
            }
            fn set_hw_local_id_generation(&mut self, generation: Option<HwLocalIdGeneration>) {
                match generation {
                    Some(generation) => {
                        self.set_generate_local_id(1);
                        self.set_emit_local_id(generation.emit_local_id);
                        self.set_walk_order(generation.walk_order);
                        self.set_local_x_maximum(generation.local_size[0].saturating_sub(1));
                        self.set_local_y_maximum(generation.local_size[1].saturating_sub(1));
                        self.set_local_z_maximum(generation.local_size[2].saturating_sub(1));
                    }
                    None => {
                        self.set_generate_local_id(0);
                        self.set_emit_local_id(0);
                    }
                }
            }
            fn hw_local_id_generation(&self) -> Option<HwLocalIdGeneration> {
                (self.generate_local_id() == 1).then(|| HwLocalIdGeneration {
                    walk_order: self.walk_order(),
                    emit_local_id: self.emit_local_id(),
                    local_size: [
                        self.local_x_maximum() + 1,
                        self.local_y_maximum() + 1,
                        self.local_z_maximum() + 1,
                    ],
                })
            }
            fn set_interface_descriptor(&mut self, idd: &InterfaceDescriptorData) {
                self.dw[17..25].copy_from_slice(&idd.dw);
            }
            fn interface_descriptor(&self) -> Option<InterfaceDescriptorData> {
                let mut idd = InterfaceDescriptorData::default();
                idd.dw.copy_from_slice(&self.dw[17..25]);
                Some(idd)
            }
            fn set_post_sync(&mut self, post_sync: PostSync) {
                self.set_postsync_operation(post_sync.operation());
                match post_sync {
                    PostSync::None => {
                        set_qword(&mut self.dw, $ps + 1, 0);
                        set_qword(&mut self.dw, $ps + 3, 0);
                    }
                    PostSync::ImmediateData { address, data } => {
                        self.set_postsync_dataport_pipeline_flush(1);
                        set_qword(&mut self.dw, $ps + 1, address);
                        set_qword(&mut self.dw, $ps + 3, data);
                    }
                    PostSync::Timestamp { address } => {
                        self.set_postsync_dataport_pipeline_flush(1);
                        set_qword(&mut self.dw, $ps + 1, address);
                    }
                }
            }
            fn post_sync(&self) -> PostSync {
                let address = qword(&self.dw, $ps + 1);
                match self.postsync_operation() {
                    PostSync::OPERATION_WRITE_IMMEDIATE_DATA => PostSync::ImmediateData {
                        address,
                        data: qword(&self.dw, $ps + 3),
                    },
                    PostSync::OPERATION_WRITE_TIMESTAMP => PostSync::Timestamp { address },
                    _ => PostSync::None,
                }
            }
            fn inline_data(&self) -> &[u8] {
                bytemuck::cast_slice(&self.dw[$inline..])
            }
            fn inline_data_mut(&mut self) -> &mut [u8] {
                bytemuck::cast_slice_mut(&mut self.dw[$inline..])
            }
            fn set_emit_inline_data(&mut self, enable: bool) {
                self.set_emit_inline_parameter(u32::from(enable));
            }
            fn emits_inline_data(&self) -> bool {
                self.emit_inline_parameter() == 1
            }
        }
    };
}

impl_compute_walker!(ComputeWalker, inline_dw = 31, postsync_dw = 25);
impl_compute_walker!(ComputeWalker2, inline_dw = 35, postsync_dw = 25);

impl WalkerCommand for GpgpuWalker {
    const INLINE_DATA_SIZE: usize = 0;
    const SUPPORTS_PARTITIONING: bool = false;
    fn set_thread_group_dimensions(&mut self, dims: [u32; 3]) {
        self.set_thread_group_id_x_dimension(dims[0]);
        self.set_thread_group_id_y_dimension(dims[1]);
        self.set_thread_group_id_z_dimension(dims[2]);
    }
    fn thread_group_dimensions(&self) -> [u32; 3] {
        [
            self.thread_group_id_x_dimension(),
            self.thread_group_id_y_dimension(),
            self.thread_group_id_z_dimension(),
        ]
    }
    fn set_indirect_data(&mut self, start: u64, length: u32) {
        self.set_indirect_data_start_address(start as u32);
        self.set_indirect_data_length(length);
    }
    fn indirect_data_start(&self) -> u64 {
        u64::from(self.indirect_data_start_address())
    }
    fn indirect_data_length(&self) -> u32 {
        GpgpuWalker::indirect_data_length(self)
    }
    fn set_simd(&mut self, simd: u32) {
        self.set_simd_size(simd_size_code(simd));
    }
    fn set_execution_mask(&mut self, mask: u32) {
        self.set_right_execution_mask(mask);
        self.set_bottom_execution_mask(0xFFFF_FFFF);
    }
    fn execution_mask(&self) -> u32 {
        self.right_execution_mask()
    }
    fn set_predicate(&mut self, enable: bool) {
        self.set_predicate_enable(u32::from(enable));
    }
    fn predicate(&self) -> bool {
        self.predicate_enable() == 1
    }
    fn set_indirect_parameter(&mut self, enable: bool) {
        self.set_indirect_parameter_enable(u32::from(enable));
    }
    fn indirect_parameter(&self) -> bool {
        self.indirect_parameter_enable() == 1
    }
    fn set_partition(&mut self, _partition_type: u32, _partition_size: u32) {}
    fn partition(&self) -> (bool, u32, u32) {
        (false, 0, 0)
    }
    fn set_hw_local_id_generation(&mut self, _generation: Option<HwLocalIdGeneration>) {}
    fn hw_local_id_generation(&self) -> Option<HwLocalIdGeneration> {
        None
    }
    fn set_interface_descriptor(&mut self, _idd: &InterfaceDescriptorData) {}
    fn interface_descriptor(&self) -> Option<InterfaceDescriptorData> {
        None
    }
    fn set_post_sync(&mut self, _post_sync: PostSync) {}
    fn post_sync(&self) -> PostSync {
        PostSync::None
    }
    fn inline_data(&self) -> &[u8] {
        &[]
    }
    fn inline_data_mut(&mut self) -> &mut [u8] {
        &mut []
    }
    fn set_emit_inline_data(&mut self, _enable: bool) {}
    fn emits_inline_data(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_encode_length() {
        assert_eq!(MiNoop::init().dw[0], 0);
        assert_eq!(MiBatchBufferStart::size(), 12);
        assert_eq!(MiStoreDataImm::size(), 20);
        assert_eq!(PipeControl::size(), 24);
        assert_eq!(ComputeWalker::size(), 156);
        assert_eq!(ComputeWalker::INLINE_DATA_SIZE, 32);
        assert_eq!(ComputeWalker2::INLINE_DATA_SIZE, 64);
        assert_eq!(GpgpuWalker::size(), 60);
        assert_eq!((ComputeWalker::HEADER & 0xFF) as usize + 2, ComputeWalker::DWORDS);
        assert_eq!((ComputeWalker2::HEADER & 0xFF) as usize + 2, ComputeWalker2::DWORDS);
        assert_eq!((GpgpuWalker::HEADER & 0xFF) as usize + 2, GpgpuWalker::DWORDS);
        assert_eq!((StateBaseAddress::HEADER & 0xFF) as usize + 2, StateBaseAddress::DWORDS);
    }

    #[test]
    fn noop_marker_fields() {
        let mut noop = MiNoop::init();
        noop.set_identification_number(1 << 21)
            .set_identification_number_register_write_enable(0);
        assert_eq!(noop.dw[0], 1 << 21);
        noop.set_identification_number_register_write_enable(1);
        assert_eq!(noop.identification_number(), 1 << 21);
        assert!(MiNoop::matches(noop.dw[0]));
    }

    #[test]
    fn walker_inline_data_and_post_sync() {
        let mut walker = ComputeWalker::init();
        walker.inline_data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(walker.dw[31], 0x0403_0201);
        walker.set_post_sync(PostSync::ImmediateData {
            address: 0x1_0000_0040,
            data: 0,
        });
        assert_eq!(
            walker.post_sync(),
            PostSync::ImmediateData {
                address: 0x1_0000_0040,
                data: 0
            }
        );
        walker.set_partition(1, 16);
        assert_eq!(walker.partition(), (true, 1, 16));
        assert_eq!(walker.dw[0] & 0xFFFF_0000, ComputeWalker::HEADER & 0xFFFF_0000);
    }

    #[test]
    fn interface_descriptor_round_trips_through_walker() {
        let mut idd = InterfaceDescriptorData::default();
        idd.set_kernel_start_address(0x1234_0000_0040)
            .set_number_of_threads_in_gpgpu_thread_group(4);
        let mut walker = ComputeWalker2::init();
        walker.set_interface_descriptor(&idd);
        let read = walker.interface_descriptor().unwrap();
        assert_eq!(read.kernel_start_address(), 0x1234_0000_0040);
        assert_eq!(read.number_of_threads_in_gpgpu_thread_group(), 4);
    }

    #[test]
    fn state_base_address_keeps_modify_bits() {
        let mut sba = StateBaseAddress::init();
        sba.set_surface_state_base_address(0xFFFF_1000);
        assert_eq!(sba.surface_state_base_address(), 0xFFFF_1000);
        assert_eq!(sba.surface_state_base_address_modify_enable(), 1);
    }
}
