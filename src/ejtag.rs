//! This module implements the MIPS EJTAG TAP dialog on top of the TAP
//! driver: selecting EJTAG instructions, shifting the 32-bit Address, Data
//! and Control registers, and the 33-bit FASTDATA register. The `EjtagLink`
//! trait is the seam the processor-access executor drives, so targets can be
//! real hardware or a scripted double.

use crate::tap::{self, Register, Tap, TapState};
use num_enum::IntoPrimitive;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("TAP error")]
    Tap(#[from] tap::Error),
    #[error("target did not enter debug mode.")]
    NotInDebugMode,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// EJTAG TAP instructions, 5-bit IR.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum EjtagInst {
    IdCode = 0x01,
    ImpCode = 0x03,
    Address = 0x08,
    Data = 0x09,
    Control = 0x0A,
    All = 0x0B,
    EjtagBoot = 0x0C,
    NormalBoot = 0x0D,
    FastData = 0x0E,
    Bypass = 0x1F,
}

const EJTAG_IR_BITS: usize = 5;

/// EJTAG Control register bits.
#[allow(dead_code)]
pub mod ctrl {
    /// Reset occurred
    pub const ROCC: u32 = 1 << 31;
    /// Size of pending access
    pub const PSZ_MASK: u32 = 3 << 29;
    /// Processor in low-power mode
    pub const DOZE: u32 = 1 << 22;
    /// System bus clock stopped
    pub const HALT: u32 = 1 << 21;
    /// Peripheral reset applied
    pub const PERRST: u32 = 1 << 20;
    /// Pending access is a write (processor storing to the probe)
    pub const PRNW: u32 = 1 << 19;
    /// Pending processor access
    pub const PRACC: u32 = 1 << 18;
    /// Processor reset applied
    pub const PRRST: u32 = 1 << 16;
    /// Probe will service processor accesses
    pub const PROBEN: u32 = 1 << 15;
    /// Debug vector relocated to dmseg
    pub const PROBTRAP: u32 = 1 << 14;
    /// Debug interrupt exception request
    pub const EJTAGBRK: u32 = 1 << 12;
    /// Processor is in debug mode
    pub const DM: u32 = 1 << 3;
}

/* Debug memory segment map served by the probe. */
pub const PRACC_FASTDATA_AREA: u32 = 0xFF20_0000;
pub const PRACC_TEXT: u32 = 0xFF20_0200;
pub const PRACC_PARAM_IN: u32 = 0xFF20_1000;
pub const PRACC_PARAM_OUT: u32 = 0xFF20_2000;
pub const PRACC_STACK: u32 = 0xFF20_4000;
/// Bytes of target RAM the resident FASTDATA handler occupies.
pub const FASTDATA_HANDLER_SIZE: u32 = 0x80;

/// The scan operations the processor-access executor needs from an EJTAG
/// TAP. Implemented by [`Ejtag`] for real probes and by test doubles.
pub trait EjtagLink {
    /// Select an EJTAG instruction in the TAP's IR.
    fn set_instr(&mut self, inst: EjtagInst) -> Result<()>;
    /// Shift the selected 32-bit DR, returning the captured value.
    fn drscan32(&mut self, out: u32) -> Result<u32>;
    /// Shift the selected 32-bit DR without reading back.
    fn drscan32_out(&mut self, out: u32) -> Result<()>;
    /// One 33-bit FASTDATA scan: SPrAcc handshake bit plus a data word.
    ///
    /// On a write transfer the word goes to the target; on a read transfer
    /// `word` receives the target's data.
    fn fastdata_scan(&mut self, write: bool, word: &mut u32) -> Result<()>;
    /// The control word used while polling, with PRACC set.
    fn control_base(&self) -> u32;
    /// Deliver any queued scans to the probe.
    fn flush(&mut self) -> Result<()>;
}

/// EJTAG session over a TAP driver.
pub struct Ejtag {
    tap: Tap,
    control: u32,
    cur_instr: Option<EjtagInst>,
    idcode: u32,
    impcode: u32,
}

impl Ejtag {
    /// Attach to the EJTAG TAP and read its identification registers.
    pub fn new(tap: Tap) -> Result<Ejtag> {
        let mut ejtag = Ejtag {
            tap,
            control: ctrl::PRACC | ctrl::PROBEN | ctrl::PROBTRAP,
            cur_instr: None,
            idcode: 0,
            impcode: 0,
        };
        ejtag.set_instr(EjtagInst::IdCode)?;
        ejtag.idcode = ejtag.drscan32(0)?;
        ejtag.set_instr(EjtagInst::ImpCode)?;
        ejtag.impcode = ejtag.drscan32(0)?;
        log::debug!(
            "EJTAG idcode {:#010x}, impcode {:#010x}",
            ejtag.idcode,
            ejtag.impcode
        );
        Ok(ejtag)
    }

    pub fn idcode(&self) -> u32 {
        self.idcode
    }

    pub fn impcode(&self) -> u32 {
        self.impcode
    }

    pub fn tap_mut(&mut self) -> &mut Tap {
        &mut self.tap
    }

    /// Request a debug interrupt and confirm the core entered debug mode.
    pub fn enter_debug(&mut self) -> Result<()> {
        log::debug!("requesting debug break");
        self.set_instr(EjtagInst::Control)?;
        self.drscan32_out(self.control | ctrl::EJTAGBRK)?;
        let status = self.drscan32(self.control)?;
        if status & ctrl::DM == 0 {
            return Err(Error::NotInDebugMode);
        }
        Ok(())
    }
}

impl EjtagLink for Ejtag {
    fn set_instr(&mut self, inst: EjtagInst) -> Result<()> {
        if self.cur_instr == Some(inst) {
            return Ok(());
        }
        log::trace!("IR <- {:?}", inst);
        let ir: u8 = inst.into();
        self.tap
            .scan_out(Register::Instruction, &[ir], EJTAG_IR_BITS, TapState::Idle)?;
        self.cur_instr = Some(inst);
        Ok(())
    }

    fn drscan32(&mut self, out: u32) -> Result<u32> {
        let mut buf = out.to_le_bytes();
        self.tap
            .scan_io(Register::Data, &mut buf, 32, TapState::Idle)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn drscan32_out(&mut self, out: u32) -> Result<()> {
        self.tap
            .scan_out(Register::Data, &out.to_le_bytes(), 32, TapState::Idle)?;
        Ok(())
    }

    fn fastdata_scan(&mut self, _write: bool, word: &mut u32) -> Result<()> {
        // Bit 0 is SPrAcc, clocked out low to complete the pending access;
        // bits 1..=32 carry the data word both directions.
        let val = (*word as u64) << 1;
        let mut buf = [0u8; 5];
        buf.copy_from_slice(&val.to_le_bytes()[..5]);
        self.tap
            .scan_io(Register::Data, &mut buf, 33, TapState::Idle)?;
        let mut val = [0u8; 8];
        val[..5].copy_from_slice(&buf);
        *word = (u64::from_le_bytes(val) >> 1) as u32;
        Ok(())
    }

    fn control_base(&self) -> u32 {
        self.control
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.tap.flush()?)
    }
}
