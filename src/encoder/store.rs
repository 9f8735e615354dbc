//! Memory stores, register moves and synchronization commands.

use crate::stream::LinearStream;
use neo_dispatch_core::hw::{cmds::*, Command};

pub fn store_data_imm(stream: &mut LinearStream, address: u64, data: u32) -> usize {
    let mut sdi = MiStoreDataImm::init();
    sdi.set_address(address).set_data_dword0(data);
    stream.put(&sdi)
}

pub fn store_data_imm_qword(stream: &mut LinearStream, address: u64, data: u64) -> usize {
    let mut sdi = MiStoreDataImm::init();
    sdi.set_store_qword(1).set_address(address).set_data_qword(data);
    stream.put(&sdi)
}

pub fn store_register_mem(stream: &mut LinearStream, register: u32, address: u64, predicate: bool) -> usize {
    let mut srm = MiStoreRegisterMem::init();
    srm.set_register_address(register)
        .set_memory_address(address)
        .set_predicate_enable(u32::from(predicate));
    stream.put(&srm)
}

pub fn load_register_mem(stream: &mut LinearStream, register: u32, address: u64) -> usize {
    let mut lrm = MiLoadRegisterMem::init();
    lrm.set_register_address(register).set_memory_address(address);
    stream.put(&lrm)
}

/// Flags of a `PIPE_CONTROL`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeControlArgs {
    pub cs_stall: bool,
    pub dc_flush: bool,
    pub hdc_pipeline_flush: bool,
    pub instruction_cache_invalidate: bool,
    pub state_cache_invalidate: bool,
    pub constant_cache_invalidate: bool,
    pub texture_cache_invalidate: bool,
    pub tlb_invalidate: bool,
}

impl PipeControlArgs {
    pub fn barrier() -> Self {
        Self {
            cs_stall: true,
            dc_flush: true,
            hdc_pipeline_flush: true,
            ..Self::default()
        }
    }
}

fn pipe_control_with(args: &PipeControlArgs) -> PipeControl {
    let mut pc = PipeControl::init();
    pc.set_command_streamer_stall_enable(u32::from(args.cs_stall))
        .set_dc_flush_enable(u32::from(args.dc_flush))
        .set_hdc_pipeline_flush(u32::from(args.hdc_pipeline_flush))
        .set_instruction_cache_invalidate_enable(u32::from(args.instruction_cache_invalidate))
        .set_state_cache_invalidation_enable(u32::from(args.state_cache_invalidate))
        .set_constant_cache_invalidation_enable(u32::from(args.constant_cache_invalidate))
        .set_texture_cache_invalidation_enable(u32::from(args.texture_cache_invalidate))
        .set_tlb_invalidate(u32::from(args.tlb_invalidate));
    pc
}

pub fn pipe_control(stream: &mut LinearStream, args: &PipeControlArgs) -> usize {
    stream.put(&pipe_control_with(args))
}

/// `PIPE_CONTROL` writing `data` to `address` once prior work completes.
pub fn pipe_control_write_immediate(stream: &mut LinearStream, args: &PipeControlArgs, address: u64, data: u64) -> usize {
    let mut pc = pipe_control_with(args);
    pc.set_post_sync_operation(PipeControl::POST_SYNC_WRITE_IMMEDIATE_DATA)
        .set_address(address)
        .set_immediate_data(data);
    stream.put(&pc)
}

pub fn pipe_control_write_timestamp(stream: &mut LinearStream, args: &PipeControlArgs, address: u64) -> usize {
    let mut pc = pipe_control_with(args);
    pc.set_post_sync_operation(PipeControl::POST_SYNC_WRITE_TIMESTAMP)
        .set_address(address);
    stream.put(&pc)
}

pub fn batch_buffer_start(stream: &mut LinearStream, address: u64, second_level: bool) -> usize {
    stream.put(&batch_buffer_start_cmd(address, second_level))
}

pub fn batch_buffer_start_cmd(address: u64, second_level: bool) -> MiBatchBufferStart {
    let mut bb_start = MiBatchBufferStart::init();
    bb_start
        .set_address_space_indicator(MiBatchBufferStart::ADDRESS_SPACE_PPGTT)
        .set_second_level_batch_buffer(u32::from(second_level))
        .set_batch_buffer_start_address(address);
    bb_start
}

pub fn batch_buffer_end(stream: &mut LinearStream) -> usize {
    stream.put(&MiBatchBufferEnd::init())
}

/// Polls `address` until it holds a value of at least `value`.
pub fn semaphore_wait_greater_equal(stream: &mut LinearStream, address: u64, value: u32) -> usize {
    semaphore_wait(stream, address, value, MiSemaphoreWait::COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD)
}

pub fn semaphore_wait(stream: &mut LinearStream, address: u64, value: u32, compare: u32) -> usize {
    let mut wait = MiSemaphoreWait::init();
    wait.set_compare_operation(compare)
        .set_wait_mode(MiSemaphoreWait::WAIT_MODE_POLLING)
        .set_semaphore_data_dword(value)
        .set_semaphore_graphics_address(address);
    stream.put(&wait)
}

pub fn atomic_increment(stream: &mut LinearStream, address: u64) -> usize {
    let mut atomic = MiAtomic::init();
    atomic
        .set_atomic_opcode(MiAtomic::ATOMIC_4B_INCREMENT)
        .set_cs_stall(1)
        .set_memory_address(address);
    stream.put(&atomic)
}

/// Pads a stream with `MI_NOOP`s up to `alignment`.
pub fn noop_to_alignment(stream: &mut LinearStream, alignment: usize) {
    while stream.used() % alignment != 0 {
        stream.put(&MiNoop::init());
    }
}
