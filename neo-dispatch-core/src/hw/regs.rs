//! MMIO register offsets used by the dispatch encoders.

pub const GPUGPU_DISPATCHDIMX: u32 = 0x2500;
pub const GPUGPU_DISPATCHDIMY: u32 = 0x2504;
pub const GPUGPU_DISPATCHDIMZ: u32 = 0x2508;
pub const GPUGPU_DISPATCHDIM: [u32; 3] = [GPUGPU_DISPATCHDIMX, GPUGPU_DISPATCHDIMY, GPUGPU_DISPATCHDIMZ];

pub const CS_GPR_R0: u32 = 0x2600;
pub const CS_PREDICATE_RESULT_2: u32 = 0x23BC;
pub const THREAD_ARBITRATION_REGISTER: u32 = 0xE404;

/// Low dword of general purpose register `n`.
pub const fn cs_gpr(n: u32) -> u32 {
    CS_GPR_R0 + 8 * n
}

/// High dword of general purpose register `n`.
pub const fn cs_gpr_high(n: u32) -> u32 {
    cs_gpr(n) + 4
}
