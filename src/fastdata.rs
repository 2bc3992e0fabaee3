//! FASTDATA bulk transfer engine. Instead of one full PrAcc dialog per
//! word, a compact handler is deposited in a caller-provided target RAM
//! work area; the core then runs it and each word moves through a single
//! 33-bit FASTDATA scan.

use crate::ejtag::{
    self, EjtagInst, EjtagLink, FASTDATA_HANDLER_SIZE, PRACC_FASTDATA_AREA, PRACC_TEXT,
};
use crate::mips32::{
    addi, bne, jr, lower16, lui, lw, mfc0, mtc0, ori, sw, upper16, NOP,
};
use crate::pracc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("processor access error")]
    Pracc(#[from] pracc::Error),
    #[error("EJTAG error")]
    Ejtag(#[from] ejtag::Error),
    #[error("work area of {size} bytes cannot hold the {required}-byte handler.")]
    WorkAreaTooSmall { size: u32, required: u32 },
    #[error("target fetched {found:#010x} instead of the fastdata area.")]
    HandshakeMismatch { found: u32 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Caller-owned region of target RAM housing the resident handler.
#[derive(Clone, Copy, Debug)]
pub struct WorkArea {
    pub address: u32,
    pub size: u32,
}

/// FASTDATA engine state.
///
/// Caches the direction of the last transfer so the handler is only
/// re-uploaded when the direction flips. The cache lives as long as the
/// debug session; invalidate it by creating a fresh engine if the work area
/// contents are clobbered.
#[derive(Default)]
pub struct FastData {
    last_write: Option<bool>,
}

impl FastData {
    pub fn new() -> FastData {
        FastData { last_write: None }
    }

    /// Stream `buf` between the probe and target memory at `addr`.
    ///
    /// `write` moves host data into target RAM; otherwise target RAM is read
    /// back into `buf`. The fetch order served to the handler is the start
    /// address, the end address, then one word per scan.
    pub fn transfer<L: EjtagLink>(
        &mut self,
        link: &mut L,
        area: &WorkArea,
        write: bool,
        addr: u32,
        buf: &mut [u32],
    ) -> Result<()> {
        if area.size < FASTDATA_HANDLER_SIZE {
            return Err(Error::WorkAreaTooSmall {
                size: area.size,
                required: FASTDATA_HANDLER_SIZE,
            });
        }
        if buf.is_empty() {
            return Ok(());
        }

        // $15 points at the handler itself on entry; the tail of the work
        // area doubles as its register spill slots. Slots 8 and 9 are
        // patched below to set the copy direction.
        let size = FASTDATA_HANDLER_SIZE as i16;
        let mut handler = [
            sw(8, size - 4, 15),
            sw(9, size - 8, 15),
            sw(10, size - 12, 15),
            sw(11, size - 16, 15),
            lui(8, upper16(PRACC_FASTDATA_AREA)),   // start of fastdata area in $8
            ori(8, 8, lower16(PRACC_FASTDATA_AREA)),
            lw(9, 0, 8),                            // start addr in $9
            lw(10, 0, 8),                           // end addr in $10
            /* loop: */
            lw(11, 0, 0),                           // patched direction slot
            sw(11, 0, 0),                           // patched direction slot
            bne(10, 9, -3),                         // bne $10, $9, loop
            addi(9, 9, 4),                          // addi $9, $9, 4
            lw(8, size - 4, 15),
            lw(9, size - 8, 15),
            lw(10, size - 12, 15),
            lw(11, size - 16, 15),
            lui(15, upper16(PRACC_TEXT)),
            ori(15, 15, lower16(PRACC_TEXT)),
            jr(15),                                 // jr start
            mfc0(15, 31, 0),                        // move COP0 DeSave to $15
        ];
        if write {
            handler[8] = lw(11, 0, 8); // load from the probe at the fastdata area
            handler[9] = sw(11, 0, 9); // store to RAM @ $9
        } else {
            handler[8] = lw(11, 0, 9); // load from RAM @ $9
            handler[9] = sw(11, 0, 8); // store to the probe at the fastdata area
        }

        if self.last_write != Some(write) {
            pracc::write_mem32(link, area.address, &handler)?;
            // Remember the direction to spare consecutive transfers the
            // upload.
            self.last_write = Some(write);
        }

        log::debug!("using {:#010x} for the fastdata handler", area.address);

        // Serve the core a stub that points $15 at the work area and jumps
        // there, one word per processor access.
        let jmp_code = [
            mtc0(15, 31, 0), // move $15 to COP0 DeSave
            lui(15, upper16(area.address)),
            ori(15, 15, lower16(area.address)),
            jr(15),          // jump to the ram program
            NOP,
        ];
        for &word in &jmp_code {
            pracc::wait_pracc(link)?;
            pracc::finish_read(link, word)?;
        }

        // The next fetch out of dmseg must be the handler reading the
        // fastdata area.
        pracc::wait_pracc(link)?;
        link.set_instr(EjtagInst::Address)?;
        let address = link.drscan32(0)?;
        if address != PRACC_FASTDATA_AREA {
            return Err(Error::HandshakeMismatch { found: address });
        }

        pracc::wait_pracc(link)?;
        link.set_instr(EjtagInst::FastData)?;

        // Start and end addresses always travel outbound.
        let mut val = addr;
        link.fastdata_scan(true, &mut val)?;
        let mut val = addr.wrapping_add(4 * (buf.len() as u32 - 1));
        link.fastdata_scan(true, &mut val)?;

        for word in buf.iter_mut() {
            link.fastdata_scan(write, word)?;
        }

        if let Err(e) = link.flush() {
            log::error!("fastdata load failed");
            return Err(e.into());
        }

        pracc::wait_pracc(link)?;
        link.set_instr(EjtagInst::Address)?;
        let address = link.drscan32(0)?;
        if address != PRACC_TEXT {
            log::warn!(
                "fastdata handler did not return to the debug vector (at {:#010x})",
                address
            );
        }
        Ok(())
    }
}
