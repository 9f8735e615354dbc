//! Host model of the command streamer's registers and memory writes.

use neo_dispatch_core::hw::{
    alu::AluInstruction,
    cmds::{MiLoadRegisterImm, MiLoadRegisterMem, MiLoadRegisterReg, MiMath, MiStoreDataImm, MiStoreRegisterMem},
    parse::CommandIter,
    regs::CS_GPR_R0,
    Command,
};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Simulator {
    pub gprs: [u64; 16],
    pub registers: HashMap<u32, u32>,
    /// Dword granular memory.
    pub memory: HashMap<u64, u32>,
}

impl Simulator {
    pub fn read_register(&self, reg: u32) -> u32 {
        match gpr_slot(reg) {
            Some((n, false)) => self.gprs[n] as u32,
            Some((n, true)) => (self.gprs[n] >> 32) as u32,
            None => self.registers.get(&reg).copied().unwrap_or(0),
        }
    }
    pub fn write_register(&mut self, reg: u32, value: u32) {
        match gpr_slot(reg) {
            Some((n, false)) => self.gprs[n] = (self.gprs[n] & !0xFFFF_FFFF) | u64::from(value),
            Some((n, true)) => self.gprs[n] = (self.gprs[n] & 0xFFFF_FFFF) | (u64::from(value) << 32),
            None => {
                self.registers.insert(reg, value);
            }
        }
    }
    pub fn read_memory(&self, address: u64) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }
    pub fn write_memory(&mut self, address: u64, value: u32) {
        self.memory.insert(address, value);
    }
    pub fn run(&mut self, bytes: &[u8]) {
        for cmd in CommandIter::new(bytes) {
            if let Some(lri) = cmd.decode::<MiLoadRegisterImm>() {
                self.write_register(lri.register_offset(), lri.data_dword());
            } else if let Some(lrr) = cmd.decode::<MiLoadRegisterReg>() {
                let value = self.read_register(lrr.source_register_address());
                self.write_register(lrr.destination_register_address(), value);
            } else if let Some(lrm) = cmd.decode::<MiLoadRegisterMem>() {
                let value = self.read_memory(lrm.memory_address());
                self.write_register(lrm.register_address(), value);
            } else if let Some(srm) = cmd.decode::<MiStoreRegisterMem>() {
                let value = self.read_register(srm.register_address());
                self.write_memory(srm.memory_address(), value);
            } else if let Some(sdi) = cmd.decode::<MiStoreDataImm>() {
                self.write_memory(sdi.address(), sdi.data_dword0());
                if sdi.store_qword() == 1 {
                    self.write_memory(sdi.address() + 4, sdi.data_dword1());
                }
            } else if MiMath::matches(cmd.header) {
                self.run_alu(bytemuck::cast_slice(&cmd.bytes[4..]));
            }
        }
    }
    fn run_alu(&mut self, instructions: &[u32]) {
        let (mut a, mut b, mut accu) = (0u64, 0u64, 0u64);
        let (mut zf, mut cf) = (0u64, 0u64);
        for dword in instructions {
            let (opcode, op1, op2) = AluInstruction::from_dword(*dword);
            let gpr = |n: u32| self.gprs.get(n as usize).copied().unwrap_or(0);
            match opcode {
                0x080 | 0x480 | 0x081 | 0x481 => {
                    let value = match opcode {
                        0x080 => gpr(op2),
                        0x480 => !gpr(op2),
                        0x081 => 0,
                        _ => u64::MAX,
                    };
                    if op1 == 0x20 {
                        a = value;
                    } else {
                        b = value;
                    }
                }
                0x100..=0x106 => {
                    accu = match opcode {
                        0x100 => a.wrapping_add(b),
                        0x101 => a.wrapping_sub(b),
                        0x102 => a & b,
                        0x103 => a | b,
                        0x104 => a ^ b,
                        0x105 => a << (b & 63),
                        _ => a >> (b & 63),
                    };
                    cf = u64::from(opcode == 0x101 && a < b);
                    zf = u64::from(accu == 0);
                }
                0x180 | 0x580 => {
                    let stored = match op2 {
                        0x31 => accu,
                        0x32 => zf,
                        0x33 => cf,
                        _ => 0,
                    };
                    if let Some(slot) = self.gprs.get_mut(op1 as usize) {
                        *slot = if opcode == 0x580 { !stored } else { stored };
                    }
                }
                _ => {}
            }
        }
    }
}

fn gpr_slot(reg: u32) -> Option<(usize, bool)> {
    let end = CS_GPR_R0 + 16 * 8;
    (CS_GPR_R0..end)
        .contains(&reg)
        .then(|| (((reg - CS_GPR_R0) / 8) as usize, (reg - CS_GPR_R0) % 8 != 0))
}
