//! `MI_MATH` programs.

use crate::stream::LinearStream;
use neo_dispatch_core::hw::{
    alu::{AluInstruction, AluOpcode, AluRegister},
    cmds::{MiLoadRegisterImm, MiLoadRegisterReg, MiMath},
    regs::{cs_gpr, cs_gpr_high},
    Command,
};

/// A sequence of ALU instructions emitted behind one `MI_MATH` header.
#[derive(Clone, Debug, Default)]
pub struct AluProgram {
    instructions: Vec<AluInstruction>,
}

impl AluProgram {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, opcode: AluOpcode, operand1: AluRegister, operand2: AluRegister) -> &mut Self {
        self.instructions.push(AluInstruction::new(opcode, operand1, operand2));
        self
    }
    pub fn load(&mut self, src: AluRegister, reg: AluRegister) -> &mut Self {
        self.push(AluOpcode::Load, src, reg)
    }
    pub fn op(&mut self, opcode: AluOpcode) -> &mut Self {
        self.instructions.push(AluInstruction::op(opcode));
        self
    }
    pub fn store(&mut self, dst: AluRegister, src: AluRegister) -> &mut Self {
        self.push(AluOpcode::Store, dst, src)
    }
    /// `dst = a <opcode> b`.
    pub fn binary(&mut self, opcode: AluOpcode, a: AluRegister, b: AluRegister, dst: AluRegister) -> &mut Self {
        self.load(AluRegister::SrcA, a)
            .load(AluRegister::SrcB, b)
            .op(opcode)
            .store(dst, AluRegister::Accu)
    }
    pub fn len(&self) -> usize {
        self.instructions.len()
    }
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
    /// Bytes of the header and instructions.
    pub fn size(&self) -> usize {
        size_for_instructions(self.instructions.len())
    }
    pub fn encode(&self, stream: &mut LinearStream) -> usize {
        let mut header = MiMath::init();
        header.set_dword_length(self.instructions.len().saturating_sub(1) as u32);
        let offset = stream.put(&header);
        let dwords: Vec<u32> = self.instructions.iter().map(AluInstruction::dword).collect();
        stream.put_dwords(&dwords);
        offset
    }
}

pub fn size_for_instructions(count: usize) -> usize {
    MiMath::size() + count * 4
}

/// Instructions of one binary operation.
pub const BINARY_OP_INSTRUCTIONS: usize = 4;

pub fn addition(stream: &mut LinearStream, a: AluRegister, b: AluRegister, dst: AluRegister) {
    AluProgram::new().binary(AluOpcode::Add, a, b, dst).encode(stream);
}

pub fn bitwise_and(stream: &mut LinearStream, a: AluRegister, b: AluRegister, dst: AluRegister) {
    AluProgram::new().binary(AluOpcode::And, a, b, dst).encode(stream);
}

/// Stores the carry of `b - a` in `dst`: set when `a > b`.
pub fn greater_than(stream: &mut LinearStream, a: AluRegister, b: AluRegister, dst: AluRegister) {
    AluProgram::new()
        .load(AluRegister::SrcA, b)
        .load(AluRegister::SrcB, a)
        .op(AluOpcode::Sub)
        .store(dst, AluRegister::Cf)
        .encode(stream);
}

pub fn binary_op_size() -> usize {
    size_for_instructions(BINARY_OP_INSTRUCTIONS)
}

pub fn load_register_imm(stream: &mut LinearStream, register: u32, value: u32) {
    let mut lri = MiLoadRegisterImm::init();
    lri.set_register_offset(register).set_data_dword(value);
    stream.put(&lri);
}

pub fn load_register_reg(stream: &mut LinearStream, src: u32, dst: u32) {
    let mut lrr = MiLoadRegisterReg::init();
    lrr.set_source_register_address(src)
        .set_destination_register_address(dst);
    stream.put(&lrr);
}

/// Multiplies the register at `src` by `value` with shifts and adds,
/// leaving the product in GPR1. GPR0 and GPR2 are clobbered.
pub fn multiply_register_by_value(stream: &mut LinearStream, src: u32, value: u32) {
    let bits = u32::BITS - value.leading_zeros();
    load_register_reg(stream, src, cs_gpr(0));
    load_register_imm(stream, cs_gpr_high(0), 0);
    load_register_imm(stream, cs_gpr(1), 0);
    load_register_imm(stream, cs_gpr_high(1), 0);
    for bit in 0..bits {
        if value & (1 << bit) != 0 {
            addition(stream, AluRegister::R1, AluRegister::R0, AluRegister::R2);
            load_register_reg(stream, cs_gpr(2), cs_gpr(1));
            load_register_reg(stream, cs_gpr_high(2), cs_gpr_high(1));
        }
        addition(stream, AluRegister::R0, AluRegister::R0, AluRegister::R2);
        load_register_reg(stream, cs_gpr(2), cs_gpr(0));
        load_register_reg(stream, cs_gpr_high(2), cs_gpr_high(0));
    }
}

/// Bytes written by [`multiply_register_by_value`].
pub fn multiply_register_by_value_size(value: u32) -> usize {
    let bits = (u32::BITS - value.leading_zeros()) as usize;
    let ones = value.count_ones() as usize;
    let step = binary_op_size() + 2 * MiLoadRegisterReg::size();
    MiLoadRegisterReg::size() + 3 * MiLoadRegisterImm::size() + (bits + ones) * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::sim::Simulator;
    use neo_dispatch_core::hw::parse::parse;

    #[test]
    fn program_header_counts_instructions() {
        let mut stream = LinearStream::new(0);
        addition(&mut stream, AluRegister::R0, AluRegister::R1, AluRegister::R2);
        assert_eq!(stream.used(), binary_op_size());
        let cmds = parse(stream.bytes());
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].header & 0xFF, 3);
    }

    #[test]
    fn multiplication_by_shift_and_add() {
        for value in [1u32, 2, 3, 7, 16, 255] {
            let mut stream = LinearStream::new(0);
            load_register_imm(&mut stream, 0x2500, 13);
            let start = stream.used();
            multiply_register_by_value(&mut stream, 0x2500, value);
            assert_eq!(stream.used() - start, multiply_register_by_value_size(value));
            let mut sim = Simulator::default();
            sim.run(stream.bytes());
            assert_eq!(sim.gprs[1], 13 * u64::from(value), "value {value}");
        }
    }

    #[test]
    fn greater_than_sets_carry() {
        let mut stream = LinearStream::new(0);
        greater_than(&mut stream, AluRegister::R0, AluRegister::R1, AluRegister::R2);
        let mut sim = Simulator::default();
        sim.gprs[0] = 5;
        sim.gprs[1] = 1;
        sim.run(stream.bytes());
        assert_eq!(sim.gprs[2], 1);
        sim.gprs[0] = 1;
        sim.run(stream.bytes());
        assert_eq!(sim.gprs[2], 0);
    }
}

