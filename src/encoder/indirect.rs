//! Indirect dispatch: group counts read from memory at execution time.
//!
//! The group counts are loaded into the `GPGPU_DISPATCHDIM` registers and
//! copied from there into the payload, so cross-thread data and implicit
//! args see the same values the walker dispatches.

use super::{
    math::{self, AluProgram},
    store,
};
use crate::stream::LinearStream;
use neo_dispatch_core::{
    descriptor::{is_valid_offset, DispatchTraits},
    hw::{
        alu::{AluOpcode, AluRegister},
        cmds::{MiLoadRegisterImm, MiLoadRegisterMem, MiLoadRegisterReg, MiStoreRegisterMem},
        regs::{cs_gpr, cs_gpr_high, CS_PREDICATE_RESULT_2, GPUGPU_DISPATCHDIM},
        Command,
    },
    implicit_args::{GLOBAL_SIZE_OFFSET, GROUP_COUNT_OFFSET, NUM_WORK_DIM_OFFSET},
};

/// GPU addresses of the payload blocks patched by an indirect dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndirectTargets {
    /// Address at which cross-thread data offset 0 resolves.
    pub cross_thread_data: u64,
    pub implicit_args: Option<u64>,
}

/// Loads the three group counts at `group_count_address` into the dispatch
/// dimension registers.
pub fn load_group_counts(stream: &mut LinearStream, group_count_address: u64) {
    for (i, register) in GPUGPU_DISPATCHDIM.iter().enumerate() {
        store::load_register_mem(stream, *register, group_count_address + 4 * i as u64);
    }
}

pub fn load_group_counts_size() -> usize {
    3 * MiLoadRegisterMem::size()
}

/// Writes group counts, global sizes and the work dimension into the
/// payload from the dispatch dimension registers.
pub fn encode_indirect_params(
    stream: &mut LinearStream,
    traits: &DispatchTraits,
    group_size: [u32; 3],
    targets: &IndirectTargets,
) {
    set_group_count_indirect(stream, traits, targets);
    set_global_work_size_indirect(stream, traits, group_size, targets);
    if is_valid_offset(traits.work_dim) {
        set_work_dim_indirect(stream, targets.cross_thread_data + u64::from(traits.work_dim), group_size);
    }
    if let Some(implicit_args) = targets.implicit_args {
        set_work_dim_indirect(stream, implicit_args + NUM_WORK_DIM_OFFSET as u64, group_size);
    }
}

/// Upper bound of the bytes written by [`encode_indirect_params`].
pub fn encode_indirect_params_size(traits: &DispatchTraits, group_size: [u32; 3], targets: &IndirectTargets) -> usize {
    let srm = MiStoreRegisterMem::size();
    let implicit = targets.implicit_args.is_some();
    let mut size = 0;
    for i in 0..3 {
        size += srm * (usize::from(is_valid_offset(traits.num_work_groups[i])) + usize::from(implicit));
        let stores = usize::from(is_valid_offset(traits.global_work_size[i])) + 2 * usize::from(implicit);
        if stores > 0 {
            size += math::multiply_register_by_value_size(group_size[i]) + stores * srm;
        }
    }
    if is_valid_offset(traits.work_dim) {
        let address = targets.cross_thread_data + u64::from(traits.work_dim);
        size += cmds_size_for_set_work_dim_indirect(group_size, address % 4 != 0);
    }
    if let Some(implicit_args) = targets.implicit_args {
        let address = implicit_args + NUM_WORK_DIM_OFFSET as u64;
        size += cmds_size_for_set_work_dim_indirect(group_size, address % 4 != 0);
    }
    size
}

fn set_group_count_indirect(stream: &mut LinearStream, traits: &DispatchTraits, targets: &IndirectTargets) {
    for (i, register) in GPUGPU_DISPATCHDIM.iter().enumerate() {
        let offset = traits.num_work_groups[i];
        if is_valid_offset(offset) {
            store::store_register_mem(stream, *register, targets.cross_thread_data + u64::from(offset), false);
        }
        if let Some(implicit_args) = targets.implicit_args {
            let address = implicit_args + (GROUP_COUNT_OFFSET + 4 * i) as u64;
            store::store_register_mem(stream, *register, address, false);
        }
    }
}

fn set_global_work_size_indirect(
    stream: &mut LinearStream,
    traits: &DispatchTraits,
    group_size: [u32; 3],
    targets: &IndirectTargets,
) {
    for (i, register) in GPUGPU_DISPATCHDIM.iter().enumerate() {
        let offset = traits.global_work_size[i];
        if !is_valid_offset(offset) && targets.implicit_args.is_none() {
            continue;
        }
        math::multiply_register_by_value(stream, *register, group_size[i]);
        if is_valid_offset(offset) {
            store::store_register_mem(stream, cs_gpr(1), targets.cross_thread_data + u64::from(offset), false);
        }
        if let Some(implicit_args) = targets.implicit_args {
            let address = implicit_args + (GLOBAL_SIZE_OFFSET + 8 * i) as u64;
            store::store_register_mem(stream, cs_gpr(1), address, false);
            store::store_register_mem(stream, cs_gpr_high(1), address + 4, false);
        }
    }
}

/// Computes the work dimension from the group counts and `group_size` and
/// stores it as a byte at `address`, preserving the other bytes of the
/// enclosing dword.
///
/// The dimension is 3 when the Z extent exceeds 1, else 2 when the Y extent
/// does, else 1.
pub fn set_work_dim_indirect(stream: &mut LinearStream, address: u64, group_size: [u32; 3]) {
    use AluRegister::*;
    let byte = (address & 3) as u32;
    let misaligned = byte != 0;
    let dword_address = address & !3;
    let shift = 8 * byte;
    // 2^shift - 1: added to 0/1 flags and masked with 2^shift to move them
    // into the target byte.
    let offset = (1u32 << shift).wrapping_sub(1);
    let memory_mask = u32::MAX - ((1u64 << (shift + 8)) - 1) as u32 + offset;

    clear_high_dwords(stream, &[R0, R1, R3, R4, R5, R6, R7, R8]);
    if misaligned {
        store::load_register_mem(stream, cs_gpr(7), dword_address);
        math::load_register_imm(stream, cs_gpr(8), memory_mask);
        math::bitwise_and(stream, R8, R7, R7);
        math::load_register_imm(stream, cs_gpr(8), offset);
    }
    if group_size[2] > 1 {
        math::load_register_imm(stream, cs_gpr(0), 3 << shift);
    } else {
        math::load_register_imm(stream, cs_gpr(5), 1);
        math::load_register_imm(stream, cs_gpr(6), 2);
        math::load_register_reg(stream, GPUGPU_DISPATCHDIM[2], cs_gpr(1));
        math::greater_than(stream, R1, R5, R3);
        math::bitwise_and(stream, R3, R5, R3);
        math::load_register_imm(stream, cs_gpr(0), group_size[1]);
        math::load_register_reg(stream, GPUGPU_DISPATCHDIM[1], cs_gpr(1));
        math::addition(stream, R0, R1, R0);
        math::addition(stream, R0, R3, R0);
        math::greater_than(stream, R0, R6, R4);
        math::bitwise_and(stream, R4, R5, R4);
        if misaligned {
            math::addition(stream, R5, R8, R5);
            math::addition(stream, R3, R8, R3);
            math::bitwise_and(stream, R3, R5, R3);
            math::addition(stream, R4, R8, R4);
            math::bitwise_and(stream, R4, R5, R4);
        }
        math::load_register_reg(stream, cs_gpr(5), cs_gpr(0));
        math::addition(stream, R0, R4, R0);
        math::addition(stream, R0, R3, R0);
    }
    if misaligned {
        math::addition(stream, R0, R7, R0);
    }
    store::store_register_mem(stream, cs_gpr(0), dword_address, false);
}

/// Bytes written by [`set_work_dim_indirect`] for a destination at a byte
/// offset within its dword when `misaligned`.
pub fn cmds_size_for_set_work_dim_indirect(group_size: [u32; 3], misaligned: bool) -> usize {
    let lri = MiLoadRegisterImm::size();
    let lrr = MiLoadRegisterReg::size();
    let op = math::binary_op_size();
    let mut size = clear_high_dwords_size(8) + MiStoreRegisterMem::size();
    if misaligned {
        size += MiLoadRegisterMem::size() + 2 * lri + op + op;
    }
    if group_size[2] > 1 {
        size += lri;
    } else {
        size += 3 * lri + 3 * lrr + 8 * op;
        if misaligned {
            size += 5 * op;
        }
    }
    size
}

fn clear_high_dwords(stream: &mut LinearStream, registers: &[AluRegister]) {
    for register in registers {
        math::load_register_imm(stream, cs_gpr_high(*register as u32), 0);
    }
}

fn clear_high_dwords_size(count: usize) -> usize {
    count * MiLoadRegisterImm::size()
}

/// Sets the predicate consumed by a predicated walker: true when every
/// group count register is non zero.
pub fn encode_dispatch_predicate(stream: &mut LinearStream) {
    use AluRegister::*;
    for (i, register) in GPUGPU_DISPATCHDIM.iter().enumerate() {
        math::load_register_reg(stream, *register, cs_gpr(i as u32));
    }
    clear_high_dwords(stream, &[R0, R1, R2]);
    let mut program = AluProgram::new();
    for (src, flag) in [(R0, R3), (R1, R4), (R2, R5)] {
        program
            .load(SrcA, src)
            .push(AluOpcode::Load0, SrcB, R0)
            .op(AluOpcode::Sub)
            .store(flag, Zf);
    }
    program
        .binary(AluOpcode::Or, R3, R4, R3)
        .binary(AluOpcode::Or, R3, R5, R3)
        .load(SrcA, R3)
        .push(AluOpcode::Load0, SrcB, R0)
        .op(AluOpcode::Sub)
        .store(R3, Zf);
    program.encode(stream);
    math::load_register_reg(stream, cs_gpr(3), CS_PREDICATE_RESULT_2);
}

pub fn dispatch_predicate_size() -> usize {
    4 * MiLoadRegisterReg::size() + clear_high_dwords_size(3) + math::size_for_instructions(24)
}

/// Whether any trait patched by [`encode_indirect_params`] lives in the
/// first `inline_size` bytes of cross-thread data.
pub fn traits_overlap_inline_data(traits: &DispatchTraits, inline_size: usize) -> bool {
    traits
        .num_work_groups
        .iter()
        .chain(traits.global_work_size.iter())
        .chain(std::iter::once(&traits.work_dim))
        .any(|offset| is_valid_offset(*offset) && usize::from(*offset) < inline_size)
}
