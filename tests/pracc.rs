//! Integration tests for the processor-access executor and the FASTDATA
//! engine, driven against a scripted EJTAG link which emulates a halted
//! MIPS32 core: instruction fetches and loads/stores out of the debug
//! segment are posted as pending accesses, everything else executes against
//! a byte-addressed RAM model, branch delay slots included.

use std::collections::HashMap;

use mipsblast::ejtag::{
    ctrl, EjtagInst, EjtagLink, Result as EjtagResult, PRACC_FASTDATA_AREA, PRACC_TEXT,
};
use mipsblast::fastdata::{Error as FastdataError, FastData, WorkArea};
use mipsblast::mips32::{self, NUM_CORE_REGS};
use mipsblast::pracc::{self, Error as PraccError};

const DMSEG_START: u32 = 0xFF20_0000;
const DMSEG_END: u32 = 0xFF30_0000;

fn in_dmseg(addr: u32) -> bool {
    (DMSEG_START..DMSEG_END).contains(&addr)
}

/// A bus access the emulated core is blocked on.
enum Access {
    Fetch(u32),
    Load { addr: u32, reg: usize },
    Store { addr: u32, value: u32 },
}

/// Emulated halted MIPS32 core behind an EJTAG TAP.
struct MockCore {
    regs: [u32; 32],
    lo: u32,
    hi: u32,
    desave: u32,
    status: u32,
    badvaddr: u32,
    cause: u32,
    depc: u32,
    pc: u32,
    next_pc: u32,
    in_debug: bool,
    ram: HashMap<u32, u8>,
    pending: Option<Access>,
    cur_instr: EjtagInst,
    data_latch: u32,
    /// Every DR scan performed, for no-wire-traffic assertions.
    scans: usize,
}

impl MockCore {
    /// A core halted at the debug vector, waiting for its first fetch.
    fn halted() -> MockCore {
        MockCore {
            regs: [0; 32],
            lo: 0,
            hi: 0,
            desave: 0,
            status: 0,
            badvaddr: 0,
            cause: 0,
            depc: 0,
            pc: PRACC_TEXT,
            next_pc: PRACC_TEXT.wrapping_add(4),
            in_debug: true,
            ram: HashMap::new(),
            pending: Some(Access::Fetch(PRACC_TEXT)),
            cur_instr: EjtagInst::Bypass,
            data_latch: 0,
            scans: 0,
        }
    }

    /// A core running free; it will never post a processor access.
    fn running() -> MockCore {
        let mut core = MockCore::halted();
        core.in_debug = false;
        core.pending = None;
        core
    }

    fn ram_read8(&self, addr: u32) -> u8 {
        *self.ram.get(&addr).unwrap_or(&0)
    }

    fn ram_read16(&self, addr: u32) -> u16 {
        u16::from_le_bytes([self.ram_read8(addr), self.ram_read8(addr + 1)])
    }

    fn ram_read32(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.ram_read8(addr),
            self.ram_read8(addr + 1),
            self.ram_read8(addr + 2),
            self.ram_read8(addr + 3),
        ])
    }

    fn ram_write8(&mut self, addr: u32, value: u8) {
        self.ram.insert(addr, value);
    }

    fn ram_write16(&mut self, addr: u32, value: u16) {
        for (i, byte) in value.to_le_bytes().iter().enumerate() {
            self.ram_write8(addr + i as u32, *byte);
        }
    }

    fn ram_write32(&mut self, addr: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().iter().enumerate() {
            self.ram_write8(addr + i as u32, *byte);
        }
    }

    fn set_reg(&mut self, reg: usize, value: u32) {
        if reg != 0 {
            self.regs[reg] = value;
        }
    }

    fn cop0_read(&self, reg: usize) -> u32 {
        match reg {
            8 => self.badvaddr,
            12 => self.status,
            13 => self.cause,
            24 => self.depc,
            31 => self.desave,
            _ => panic!("unmodeled cop0 register {}", reg),
        }
    }

    fn cop0_write(&mut self, reg: usize, value: u32) {
        match reg {
            8 => self.badvaddr = value,
            12 => self.status = value,
            13 => self.cause = value,
            24 => self.depc = value,
            31 => self.desave = value,
            _ => panic!("unmodeled cop0 register {}", reg),
        }
    }

    /// Run the core forward until it blocks on a debug segment access.
    fn run(&mut self) {
        while self.in_debug && self.pending.is_none() {
            if in_dmseg(self.pc) {
                self.pending = Some(Access::Fetch(self.pc));
                return;
            }
            let instr = self.ram_read32(self.pc);
            self.advance_and_execute(instr);
        }
    }

    /// Consume the instruction at `pc`, moving `pc` into the delay slot.
    fn advance_and_execute(&mut self, instr: u32) {
        let at = self.pc;
        self.pc = self.next_pc;
        self.next_pc = self.pc.wrapping_add(4);
        self.execute(instr, at);
    }

    fn branch_to(&mut self, at: u32, off: i32) {
        self.next_pc = at.wrapping_add(4).wrapping_add((off << 2) as u32);
    }

    fn execute(&mut self, instr: u32, at: u32) {
        if instr == mips32::DRET {
            self.in_debug = false;
            self.pc = self.depc;
            self.next_pc = self.depc.wrapping_add(4);
            return;
        }

        let opcode = instr >> 26;
        let rs = ((instr >> 21) & 31) as usize;
        let rt = ((instr >> 16) & 31) as usize;
        let imm = (instr & 0xFFFF) as u16;
        let simm = imm as i16 as i32;

        match opcode {
            0x00 => {
                let rd = ((instr >> 11) & 31) as usize;
                match instr & 0x3F {
                    0x00 => (), // sll $0,$0,0 is the canonical nop
                    0x08 => self.next_pc = self.regs[rs], // jr
                    0x10 => self.set_reg(rd, self.hi),    // mfhi
                    0x11 => self.hi = self.regs[rs],      // mthi
                    0x12 => self.set_reg(rd, self.lo),    // mflo
                    0x13 => self.lo = self.regs[rs],      // mtlo
                    funct => panic!("unmodeled funct {:#04x} at {:#010x}", funct, at),
                }
            }
            0x04 => {
                // beq
                if self.regs[rs] == self.regs[rt] {
                    self.branch_to(at, simm);
                }
            }
            0x05 => {
                // bne
                if self.regs[rs] != self.regs[rt] {
                    self.branch_to(at, simm);
                }
            }
            0x08 => self.set_reg(rt, self.regs[rs].wrapping_add(simm as u32)), // addi
            0x0D => self.set_reg(rt, self.regs[rs] | imm as u32),              // ori
            0x0F => self.set_reg(rt, (imm as u32) << 16),                      // lui
            0x10 => {
                // cop0 moves
                let cpr = ((instr >> 11) & 31) as usize;
                match rs {
                    0x00 => {
                        let value = self.cop0_read(cpr);
                        self.set_reg(rt, value);
                    }
                    0x04 => self.cop0_write(cpr, self.regs[rt]),
                    _ => panic!("unmodeled cop0 op {:#04x} at {:#010x}", rs, at),
                }
            }
            0x23 | 0x24 | 0x25 => {
                // lw, lbu, lhu
                let addr = self.regs[rs].wrapping_add(simm as u32);
                if in_dmseg(addr) {
                    self.pending = Some(Access::Load { addr, reg: rt });
                } else {
                    let value = match opcode {
                        0x23 => self.ram_read32(addr),
                        0x24 => self.ram_read8(addr) as u32,
                        _ => self.ram_read16(addr) as u32,
                    };
                    self.set_reg(rt, value);
                }
            }
            0x28 | 0x29 | 0x2B => {
                // sb, sh, sw
                let addr = self.regs[rs].wrapping_add(simm as u32);
                if in_dmseg(addr) {
                    self.pending = Some(Access::Store { addr, value: self.regs[rt] });
                } else {
                    match opcode {
                        0x28 => self.ram_write8(addr, self.regs[rt] as u8),
                        0x29 => self.ram_write16(addr, self.regs[rt] as u16),
                        _ => self.ram_write32(addr, self.regs[rt]),
                    }
                }
            }
            _ => panic!("unmodeled opcode {:#04x} at {:#010x}", opcode, at),
        }
    }

    /// Host wrote the Control register: a cleared PRACC completes the access.
    fn control_write(&mut self, value: u32) {
        if value & ctrl::PRACC != 0 {
            return;
        }
        match self.pending.take() {
            Some(Access::Fetch(_)) => {
                let instr = self.data_latch;
                self.advance_and_execute(instr);
                self.run();
            }
            Some(Access::Load { reg, .. }) => {
                let value = self.data_latch;
                self.set_reg(reg, value);
                self.run();
            }
            Some(Access::Store { .. }) => self.run(),
            None => (),
        }
    }
}

impl EjtagLink for MockCore {
    fn set_instr(&mut self, inst: EjtagInst) -> EjtagResult<()> {
        self.cur_instr = inst;
        Ok(())
    }

    fn drscan32(&mut self, out: u32) -> EjtagResult<u32> {
        self.scans += 1;
        match self.cur_instr {
            EjtagInst::Control => {
                let mut value = ctrl::PROBEN | ctrl::PROBTRAP;
                if self.in_debug {
                    value |= ctrl::DM;
                }
                match &self.pending {
                    Some(Access::Store { .. }) => value |= ctrl::PRACC | ctrl::PRNW,
                    Some(_) => value |= ctrl::PRACC,
                    None => (),
                }
                self.control_write(out);
                Ok(value)
            }
            EjtagInst::Address => Ok(match &self.pending {
                Some(Access::Fetch(addr)) => *addr,
                Some(Access::Load { addr, .. }) => *addr,
                Some(Access::Store { addr, .. }) => *addr,
                None => 0,
            }),
            EjtagInst::Data => {
                let value = match &self.pending {
                    Some(Access::Store { value, .. }) => *value,
                    _ => 0,
                };
                self.data_latch = out;
                Ok(value)
            }
            _ => Ok(0),
        }
    }

    fn drscan32_out(&mut self, out: u32) -> EjtagResult<()> {
        self.drscan32(out).map(|_| ())
    }

    fn fastdata_scan(&mut self, _write: bool, word: &mut u32) -> EjtagResult<()> {
        self.scans += 1;
        match self.pending.take() {
            Some(Access::Load { reg, addr }) if addr == PRACC_FASTDATA_AREA => {
                self.set_reg(reg, *word);
                self.run();
            }
            Some(Access::Store { value, addr }) if addr == PRACC_FASTDATA_AREA => {
                *word = value;
                self.run();
            }
            other => {
                // No access pending at the fastdata area: SPrAcc stays clear
                // and nothing completes.
                self.pending = other;
            }
        }
        Ok(())
    }

    fn control_base(&self) -> u32 {
        ctrl::PRACC | ctrl::PROBEN | ctrl::PROBTRAP
    }

    fn flush(&mut self) -> EjtagResult<()> {
        Ok(())
    }
}

#[test]
fn test_u32_write_then_read_roundtrip() {
    let mut core = MockCore::halted();
    pracc::write_u32(&mut core, 0xA000_0040, 0xDEAD_BEEF).unwrap();
    assert_eq!(core.ram_read32(0xA000_0040), 0xDEAD_BEEF);
    let word = pracc::read_u32(&mut core, 0xA000_0040).unwrap();
    assert_eq!(word, 0xDEAD_BEEF);
}

#[test]
fn test_mem32_roundtrip_chunks_at_0x400_words() {
    let mut core = MockCore::halted();
    let base = 0xA000_2000u32;
    let data: Vec<u32> = (0..0x500u32).map(|i| i.wrapping_mul(0x0101_0101) ^ 0x5A5A).collect();

    pracc::write_mem32(&mut core, base, &data).unwrap();
    for (i, word) in data.iter().enumerate() {
        assert_eq!(core.ram_read32(base + 4 * i as u32), *word, "word {}", i);
    }

    let mut back = vec![0u32; data.len()];
    pracc::read_mem32(&mut core, base, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_mem16_roundtrip() {
    let mut core = MockCore::halted();
    let base = 0xA000_0100u32;
    let data: Vec<u16> = (0..96u16).map(|i| i.wrapping_mul(0x0503) ^ 0xC3).collect();

    pracc::write_mem16(&mut core, base, &data).unwrap();
    for (i, half) in data.iter().enumerate() {
        assert_eq!(core.ram_read16(base + 2 * i as u32), *half);
    }

    let mut back = vec![0u16; data.len()];
    pracc::read_mem16(&mut core, base, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_mem8_roundtrip() {
    let mut core = MockCore::halted();
    let base = 0xA000_0300u32;
    let data: Vec<u8> = (0..61u8).map(|i| i.wrapping_mul(7) ^ 0x5A).collect();

    pracc::write_mem8(&mut core, base, &data).unwrap();
    for (i, byte) in data.iter().enumerate() {
        assert_eq!(core.ram_read8(base + i as u32), *byte);
    }

    let mut back = vec![0u8; data.len()];
    pracc::read_mem8(&mut core, base, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_regs_roundtrip() {
    let mut core = MockCore::halted();

    let mut frame = [0u32; NUM_CORE_REGS];
    for (i, slot) in frame.iter_mut().enumerate().skip(1) {
        *slot = 0x1000_0000 + (i as u32) * 0x0101;
    }
    frame[mips32::REG_STATUS] = 0x0040_0084;
    frame[mips32::REG_LO] = 0x1234_5678;
    frame[mips32::REG_HI] = 0x9ABC_DEF0;
    frame[mips32::REG_BADVADDR] = 0x8000_0180;
    frame[mips32::REG_CAUSE] = 0x0000_0024;
    frame[mips32::REG_DEPC] = 0x8000_1000;

    pracc::write_regs(&mut core, &frame).unwrap();
    let back = pracc::read_regs(&mut core).unwrap();

    // GPR0 reads as zero by architecture; everything else round-trips.
    assert_eq!(back[0], 0);
    assert_eq!(&back[1..], &frame[1..]);
}

#[test]
fn test_exit_debug_serves_one_dret() {
    let mut core = MockCore::halted();
    core.depc = 0xBFC0_0000;
    pracc::exit_debug(&mut core).unwrap();
    assert!(!core.in_debug);
    assert_eq!(core.pc, 0xBFC0_0000);
}

#[test]
fn test_pracc_timeout_on_silent_core() {
    let mut core = MockCore::running();
    let err = pracc::read_u32(&mut core, 0xA000_0000).unwrap_err();
    assert!(matches!(err, PraccError::PraccTimeout));
}

#[test]
fn test_unexpected_address_aborts() {
    let mut core = MockCore::halted();
    core.regs[9] = 0xFF20_8000; // dmseg, but no arena lives there
    let code = [mips32::lw(8, 0, 9)];
    let err = pracc::execute(&mut core, &code, &mut [], &mut [], true).unwrap_err();
    assert!(matches!(err, PraccError::UnexpectedAddress(0xFF20_8000)));
}

#[test]
fn test_fastdata_write_then_read_identity() {
    let mut core = MockCore::halted();
    let area = WorkArea { address: 0xA000_1000, size: 0x80 };
    let base = 0xA000_4000u32;
    let data: Vec<u32> = (0..192u32).map(|i| 0xF00D_0000 | (i * 3)).collect();

    let mut engine = FastData::new();
    let mut outbound = data.clone();
    engine
        .transfer(&mut core, &area, true, base, &mut outbound)
        .unwrap();
    for (i, word) in data.iter().enumerate() {
        assert_eq!(core.ram_read32(base + 4 * i as u32), *word, "word {}", i);
    }

    let mut inbound = vec![0u32; data.len()];
    engine
        .transfer(&mut core, &area, false, base, &mut inbound)
        .unwrap();
    assert_eq!(inbound, data);
}

#[test]
fn test_fastdata_direction_cache_skips_reupload() {
    let mut core = MockCore::halted();
    let area = WorkArea { address: 0xA000_1000, size: 0x80 };
    let mut engine = FastData::new();

    let mut buf = vec![0x11u32; 8];
    engine.transfer(&mut core, &area, true, 0xA000_5000, &mut buf).unwrap();
    let uploaded = core.ram_read32(area.address);

    // Replace the first handler word with a nop; a second transfer in the
    // same direction must not repair it, because the upload is skipped.
    core.ram_write32(area.address, mips32::NOP);
    let mut buf = vec![0x22u32; 8];
    engine.transfer(&mut core, &area, true, 0xA000_6000, &mut buf).unwrap();
    assert_eq!(core.ram_read32(area.address), mips32::NOP);

    // Flipping the direction re-uploads the handler.
    let mut buf = vec![0u32; 8];
    engine.transfer(&mut core, &area, false, 0xA000_6000, &mut buf).unwrap();
    assert_eq!(core.ram_read32(area.address), uploaded);
}

#[test]
fn test_fastdata_small_work_area_rejected_without_traffic() {
    let mut core = MockCore::halted();
    let area = WorkArea { address: 0xA000_1000, size: 0x40 };
    let mut engine = FastData::new();
    let mut buf = vec![0u32; 1024];
    let err = engine
        .transfer(&mut core, &area, true, 0xA000_4000, &mut buf)
        .unwrap_err();
    assert!(matches!(err, FastdataError::WorkAreaTooSmall { .. }));
    assert_eq!(core.scans, 0);
}
