//! Bit-exact MIPS32 instruction encoders for the fixed processor-access
//! stubs, plus the core register frame layout those stubs transfer.
//!
//! The encoders are range-checked `const fn`s so the stubs can live in
//! `static` arrays and be unit-tested as plain words. MIPS32 executes the
//! instruction following a branch (the delay slot); the stub arrays rely on
//! that, so their instruction order and branch offsets are load-bearing.

/* Opcode and function fields. */
const OP_BEQ: u32 = 0x04;
const OP_BNE: u32 = 0x05;
const OP_ADDI: u32 = 0x08;
const OP_COP0: u32 = 0x10;
const OP_LUI: u32 = 0x0F;
const OP_LW: u32 = 0x23;
const OP_LBU: u32 = 0x24;
const OP_LHU: u32 = 0x25;
const OP_SB: u32 = 0x28;
const OP_SH: u32 = 0x29;
const OP_SW: u32 = 0x2B;
const OP_ORI: u32 = 0x0D;
const FUNCT_JR: u32 = 0x08;
const FUNCT_MFHI: u32 = 0x10;
const FUNCT_MTHI: u32 = 0x11;
const FUNCT_MFLO: u32 = 0x12;
const FUNCT_MTLO: u32 = 0x13;
const COP0_MF: u32 = 0x00;
const COP0_MT: u32 = 0x04;

/// Return from debug mode.
pub const DRET: u32 = 0x4200_001F;
/// Software debug breakpoint.
pub const SDBBP: u32 = 0x7000_003F;

/// Number of words in the core register frame.
pub const NUM_CORE_REGS: usize = 38;

/* Offsets of the non-GPR slots in the register frame. */
pub const REG_STATUS: usize = 32;
pub const REG_LO: usize = 33;
pub const REG_HI: usize = 34;
pub const REG_BADVADDR: usize = 35;
pub const REG_CAUSE: usize = 36;
pub const REG_DEPC: usize = 37;

const fn check_reg(r: u32) -> u32 {
    assert!(r < 32);
    r
}

/// R-format: opcode, rs, rt, rd, shamt, funct.
pub const fn r_inst(opcode: u32, rs: u32, rt: u32, rd: u32, shamt: u32, funct: u32) -> u32 {
    assert!(opcode < 64 && shamt < 32 && funct < 64);
    (opcode << 26)
        | (check_reg(rs) << 21)
        | (check_reg(rt) << 16)
        | (check_reg(rd) << 11)
        | (shamt << 6)
        | funct
}

/// I-format: opcode, rs, rt, 16-bit immediate.
pub const fn i_inst(opcode: u32, rs: u32, rt: u32, imm: u16) -> u32 {
    assert!(opcode < 64);
    (opcode << 26) | (check_reg(rs) << 21) | (check_reg(rt) << 16) | imm as u32
}

/// J-format: opcode, 26-bit target field.
pub const fn j_inst(opcode: u32, addr: u32) -> u32 {
    assert!(opcode < 64 && addr < (1 << 26));
    (opcode << 26) | addr
}

pub const fn upper16(v: u32) -> u16 {
    (v >> 16) as u16
}

pub const fn lower16(v: u32) -> u16 {
    v as u16
}

/// Negated 16-bit offset for downward-addressing loads and stores.
pub const fn neg16(v: u32) -> i16 {
    assert!(v <= 0x8000);
    -(v as i32) as i16
}

pub const NOP: u32 = 0;

pub const fn addi(tar: u32, src: u32, imm: i16) -> u32 {
    i_inst(OP_ADDI, src, tar, imm as u16)
}

pub const fn b(off: i16) -> u32 {
    beq(0, 0, off)
}

pub const fn beq(src: u32, tar: u32, off: i16) -> u32 {
    i_inst(OP_BEQ, src, tar, off as u16)
}

pub const fn bne(src: u32, tar: u32, off: i16) -> u32 {
    i_inst(OP_BNE, src, tar, off as u16)
}

pub const fn jr(reg: u32) -> u32 {
    r_inst(0, reg, 0, 0, 0, FUNCT_JR)
}

pub const fn mfc0(gpr: u32, cpr: u32, sel: u32) -> u32 {
    r_inst(OP_COP0, COP0_MF, gpr, cpr, 0, sel)
}

pub const fn mtc0(gpr: u32, cpr: u32, sel: u32) -> u32 {
    r_inst(OP_COP0, COP0_MT, gpr, cpr, 0, sel)
}

pub const fn lbu(reg: u32, off: i16, base: u32) -> u32 {
    i_inst(OP_LBU, base, reg, off as u16)
}

pub const fn lhu(reg: u32, off: i16, base: u32) -> u32 {
    i_inst(OP_LHU, base, reg, off as u16)
}

pub const fn lui(reg: u32, val: u16) -> u32 {
    i_inst(OP_LUI, 0, reg, val)
}

pub const fn lw(reg: u32, off: i16, base: u32) -> u32 {
    i_inst(OP_LW, base, reg, off as u16)
}

pub const fn mflo(reg: u32) -> u32 {
    r_inst(0, 0, 0, reg, 0, FUNCT_MFLO)
}

pub const fn mfhi(reg: u32) -> u32 {
    r_inst(0, 0, 0, reg, 0, FUNCT_MFHI)
}

pub const fn mtlo(reg: u32) -> u32 {
    r_inst(0, reg, 0, 0, 0, FUNCT_MTLO)
}

pub const fn mthi(reg: u32) -> u32 {
    r_inst(0, reg, 0, 0, 0, FUNCT_MTHI)
}

pub const fn ori(tar: u32, src: u32, val: u16) -> u32 {
    i_inst(OP_ORI, src, tar, val)
}

pub const fn sb(reg: u32, off: i16, base: u32) -> u32 {
    i_inst(OP_SB, base, reg, off as u16)
}

pub const fn sh(reg: u32, off: i16, base: u32) -> u32 {
    i_inst(OP_SH, base, reg, off as u16)
}

pub const fn sw(reg: u32, off: i16, base: u32) -> u32 {
    i_inst(OP_SW, base, reg, off as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cop0_moves() {
        // mtc0 $15, DeSave
        assert_eq!(mtc0(15, 31, 0), 0x408F_F800);
        // mfc0 $15, DeSave
        assert_eq!(mfc0(15, 31, 0), 0x400F_F800);
        // mtc0 $2, DEPC
        assert_eq!(mtc0(2, 24, 0), 0x4082_C000);
    }

    #[test]
    fn test_loads_and_stores() {
        assert_eq!(lw(9, 0, 8), 0x8D09_0000);
        assert_eq!(sw(9, 0, 19), 0xAE69_0000);
        assert_eq!(lhu(8, 0, 9), 0x9528_0000);
        assert_eq!(sb(11, 0, 9), 0xA12B_0000);
        assert_eq!(lw(8, -4, 15), 0x8DE8_FFFC);
    }

    #[test]
    fn test_immediates() {
        assert_eq!(lui(19, 0xFF20), 0x3C13_FF20);
        assert_eq!(ori(15, 15, 0x4000), 0x35EF_4000);
        assert_eq!(addi(10, 10, -1), 0x214A_FFFF);
    }

    #[test]
    fn test_branches() {
        assert_eq!(beq(0, 10, 8), 0x100A_0008);
        assert_eq!(b(-8), 0x1000_FFF8);
        assert_eq!(bne(10, 9, -3), 0x1549_FFFD);
        assert_eq!(jr(15), 0x01E0_0008);
    }

    #[test]
    fn test_hi_lo_moves() {
        assert_eq!(mflo(2), 0x0000_1012);
        assert_eq!(mfhi(2), 0x0000_1010);
        assert_eq!(mtlo(2), 0x0040_0013);
        assert_eq!(mthi(2), 0x0040_0011);
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(upper16(0xFF20_4000), 0xFF20);
        assert_eq!(lower16(0xFF20_4000), 0x4000);
        assert_eq!(neg16(0x3000), -0x3000);
    }
}
