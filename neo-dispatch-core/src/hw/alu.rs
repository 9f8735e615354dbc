//! Instructions executed by `MI_MATH`.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AluOpcode {
    Load = 0x080,
    LoadInv = 0x480,
    Load0 = 0x081,
    Load1 = 0x481,
    Add = 0x100,
    Sub = 0x101,
    And = 0x102,
    Or = 0x103,
    Xor = 0x104,
    Shl = 0x105,
    Shr = 0x106,
    Store = 0x180,
    StoreInv = 0x580,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AluRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    SrcA = 0x20,
    SrcB = 0x21,
    Accu = 0x31,
    Zf = 0x32,
    Cf = 0x33,
}

impl AluRegister {
    /// General purpose register `n`, `n < 16`.
    pub fn gpr(n: u32) -> Option<Self> {
        use AluRegister::*;
        [R0, R1, R2, R3, R4, R5, R6, R7, R8, R9, R10, R11, R12, R13, R14, R15]
            .get(n as usize)
            .copied()
    }
    /// Register offset of the backing general purpose register, if any.
    pub fn mmio_offset(self) -> Option<u32> {
        let n = self as u32;
        (n < 16).then(|| super::regs::cs_gpr(n))
    }
}

/// A single ALU instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AluInstruction {
    pub opcode: AluOpcode,
    pub operand1: AluRegister,
    pub operand2: AluRegister,
}

impl AluInstruction {
    pub fn new(opcode: AluOpcode, operand1: AluRegister, operand2: AluRegister) -> Self {
        Self {
            opcode,
            operand1,
            operand2,
        }
    }
    /// Instruction without operands, like `ADD`. Both operand fields are zero.
    pub fn op(opcode: AluOpcode) -> Self {
        Self::new(opcode, AluRegister::R0, AluRegister::R0)
    }
    pub fn dword(&self) -> u32 {
        ((self.opcode as u32) << 20) | ((self.operand1 as u32) << 10) | self.operand2 as u32
    }
    pub fn from_dword(dword: u32) -> (u32, u32, u32) {
        (dword >> 20, (dword >> 10) & 0x3FF, dword & 0x3FF)
    }
}
