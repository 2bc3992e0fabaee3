//! The blaster module implements the USB-Blaster's two-mode wire protocol,
//! batching bit-bang and byte-shift events into 64-byte USB packets which are
//! exchanged with the transport, and decoding returned TDO bytes.
//!
//! In bit-bang mode each output byte drives the JTAG lines directly for one
//! half-clock; a single data bit therefore costs two bytes, TCK low then TCK
//! high. In byte-shift mode a header byte announces up to 63 following bytes
//! which the probe clocks out on TDI by itself, optionally capturing TDO.

use crate::transport::{self, ProbeInfo, Transport};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error")]
    Transport(#[from] transport::Error),
    #[error("probe returned no data while TDO bytes were expected.")]
    ShortRead,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Size of the USB endpoint max packet, ie. 64 bytes.
const BUF_LEN: usize = 64;

/// Most payload bytes one byte-shift header can announce.
const MAX_SHIFT: usize = 63;

/* Bit-bang mode output byte layout. */
const TCK: u8 = 1 << 0;
const TMS: u8 = 1 << 1;
const NCE: u8 = 1 << 2;
const NCS: u8 = 1 << 3;
const TDI: u8 = 1 << 4;
const LED: u8 = 1 << 5;
const READ: u8 = 1 << 6;
const SHMODE: u8 = 1 << 7;
/* TDO position in a bit-bang readback byte. */
const READ_TDO: u8 = 1 << 0;

/// The two spare CPLD outputs, available to the host for TRST/SRST wiring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpioPin {
    Pin6,
    Pin8,
}

/// Capability flags advertised to the hosting debugger.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    pub tms_sequence: bool,
    pub jtag_only: bool,
}

/// An open USB-Blaster session.
///
/// Owns the transport and the 64-byte write-side accumulator. Writes are
/// batched until the buffer fills or a readback forces a flush; every public
/// operation leaves TCK driven low. The session is not thread-safe and is
/// owned exclusively by one caller.
pub struct Blaster {
    drv: Box<dyn Transport>,
    buf: [u8; BUF_LEN],
    bufidx: usize,
    pin6: bool,
    pin8: bool,
    tms: bool,
    tdi: bool,
}

impl Blaster {
    /// Open the probe and drain its input FIFO.
    ///
    /// `name` selects a transport back-end; with `None` all registered
    /// back-ends are tried in order. After opening, 128 zero bytes (two full
    /// packets) flush any stale bytes out of the probe's FIFO.
    pub fn open(name: Option<&str>, info: &ProbeInfo) -> Result<Blaster> {
        let drv = transport::open(name, info)?;
        let mut blaster = Blaster {
            drv,
            buf: [0; BUF_LEN],
            bufidx: 0,
            pin6: false,
            pin8: false,
            tms: false,
            tdi: false,
        };
        let zeros = [0u8; BUF_LEN];
        for _ in 0..2 {
            blaster.buf_write(&zeros)?;
        }
        Ok(blaster)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities { tms_sequence: true, jtag_only: true }
    }

    /// Pass the requested TCK frequency through to the transport.
    pub fn set_speed(&mut self, khz: u32) -> Result<()> {
        Ok(self.drv.set_speed(khz)?)
    }

    /// Drive one of the spare output pins, effective immediately.
    pub fn set_pin(&mut self, pin: GpioPin, level: bool) -> Result<()> {
        log::debug!("setting {:?} to {}", pin, level as u8);
        match pin {
            GpioPin::Pin6 => self.pin6 = level,
            GpioPin::Pin8 => self.pin8 = level,
        }
        let out = self.build_out(false);
        self.queue_byte(out)?;
        self.flush()
    }

    /// Write a whole block to the transport, retrying the unwritten suffix.
    fn buf_write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < bytes.len() {
            done += self.drv.write(&bytes[done..])?;
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes from the transport.
    fn buf_read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let got = self.drv.read(&mut buf[done..])?;
            if got == 0 {
                return Err(Error::ShortRead);
            }
            done += got;
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        BUF_LEN - self.bufidx
    }

    /// Push the accumulated packet out to the probe.
    pub fn flush(&mut self) -> Result<()> {
        if self.bufidx == 0 {
            return Ok(());
        }
        let nb = self.bufidx;
        let buf = self.buf;
        self.bufidx = 0;
        self.buf_write(&buf[..nb])
    }

    /// Queue one bit-bang mode byte, flushing around a full buffer.
    fn queue_byte(&mut self, byte: u8) -> Result<()> {
        if self.remaining() < 1 {
            self.flush()?;
        }
        self.buf[self.bufidx] = byte;
        self.bufidx += 1;
        if self.remaining() == 0 {
            self.flush()?;
        }
        log::trace!(
            "queue byte {:#04x} (TDI={} TMS={} TCK={} READ={})",
            byte,
            (byte & TDI != 0) as u8,
            (byte & TMS != 0) as u8,
            (byte & TCK != 0) as u8,
            (byte & READ != 0) as u8,
        );
        Ok(())
    }

    /// Queue a block of bytes, `None` meaning zeros.
    ///
    /// Callers must check `remaining()` first; asking for more than fits is
    /// an API misuse which aborts rather than corrupting the packet stream.
    fn queue_bytes(&mut self, bytes: Option<&[u8]>, nb_bytes: usize) -> Result<()> {
        if self.bufidx + nb_bytes > BUF_LEN {
            panic!("attempted to queue {} bytes with {} free", nb_bytes, self.remaining());
        }
        match bytes {
            Some(bytes) => self.buf[self.bufidx..self.bufidx + nb_bytes]
                .copy_from_slice(&bytes[..nb_bytes]),
            None => self.buf[self.bufidx..self.bufidx + nb_bytes].fill(0),
        }
        self.bufidx += nb_bytes;
        if self.remaining() == 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Compose a bit-bang output byte from the current pin levels.
    fn build_out(&self, read_tdo: bool) -> u8 {
        let mut byte = LED;
        if self.tms {
            byte |= TMS;
        }
        if self.pin6 {
            byte |= NCE;
        }
        if self.pin8 {
            byte |= NCS;
        }
        if self.tdi {
            byte |= TDI;
        }
        if read_tdo {
            byte |= READ;
        }
        byte
    }

    /// Clock one TMS transition (one TAP state move).
    pub(crate) fn clock_tms(&mut self, tms: bool) -> Result<()> {
        self.tms = tms;
        self.tdi = false;
        let out = self.build_out(false);
        self.queue_byte(out)?;
        self.queue_byte(out | TCK)
    }

    /// Put TCK back to its low level after the final clock of an operation.
    pub(crate) fn idle_clock(&mut self) -> Result<()> {
        let out = self.build_out(false);
        self.queue_byte(out)
    }

    /// Clock one TDI bit out in bit-bang mode.
    fn clock_tdi(&mut self, tdi: bool, read_tdo: bool) -> Result<()> {
        self.tdi = tdi;
        let out = self.build_out(false);
        self.queue_byte(out)?;
        let out = self.build_out(read_tdo);
        self.queue_byte(out | TCK)
    }

    /// Clock one TDI bit while also flipping TMS.
    ///
    /// Used for the last bit of a shift so the TAP leaves ShiftIR/ShiftDR for
    /// Exit1 as the bit is captured.
    fn clock_tdi_flip_tms(&mut self, tdi: bool, read_tdo: bool) -> Result<()> {
        self.tdi = tdi;
        self.tms = !self.tms;
        let out = self.build_out(false);
        self.queue_byte(out)?;
        let out = self.build_out(read_tdo);
        self.queue_byte(out | TCK)?;
        let out = self.build_out(false);
        self.queue_byte(out)
    }

    /// Collect TDO bytes produced by a byte-shift burst, eight bits per byte.
    ///
    /// The probe stores TDO LSB-first per byte, which is the caller's layout,
    /// so the bytes are taken verbatim.
    fn read_byteshifted_tdos(&mut self, buf: &mut [u8]) -> Result<()> {
        log::trace!("reading {} byteshifted TDO bytes", buf.len());
        self.flush()?;
        self.buf_read(buf)
    }

    /// Collect TDO bits produced by bit-bang reads, one bit per byte.
    ///
    /// Bit 0 of each returned byte is the captured TDO; the bits are packed
    /// into `buf` LSB-first.
    fn read_bitbang_tdos(&mut self, buf: &mut [u8], nb_bits: usize) -> Result<()> {
        log::trace!("reading {} bitbang TDO bits", nb_bits);
        self.flush()?;
        let mut tmp = [0u8; 8];
        self.buf_read(&mut tmp[..nb_bits])?;
        for (i, byte) in tmp[..nb_bits].iter().enumerate() {
            if byte & READ_TDO != 0 {
                buf[i / 8] |= 1 << (i % 8);
            } else {
                buf[i / 8] &= !(1 << (i % 8));
            }
        }
        Ok(())
    }

    /// Shift a series of TDI bits, reading TDO back in place when requested.
    ///
    /// Whole bytes go out in byte-shift mode, the trailing bits in bit-bang
    /// mode. When `exit` is set and bits were supplied, the final bit is sent
    /// with TMS flipped so the TAP moves to Exit1; to guarantee that bit is
    /// available to bit-bang mode, a multiple-of-eight length borrows one
    /// byte back from the byte-shift run.
    ///
    /// TCK must be low on entry: the probe inverts its shift and capture
    /// edges otherwise. Every operation here ends with an idle clock, which
    /// maintains that invariant.
    pub(crate) fn queue_tdi(
        &mut self,
        mut bits: Option<&mut [u8]>,
        nb_bits: usize,
        read_tdo: bool,
        exit: bool,
    ) -> Result<()> {
        let mut nb8 = nb_bits / 8;
        let mut nb1 = nb_bits % 8;
        if exit && nb8 > 0 && nb1 == 0 {
            nb8 -= 1;
            nb1 = 8;
        }

        let mut tdos = vec![0u8; nb_bits / 8 + 1];
        let mut i = 0;
        while i < nb8 {
            // Keep the header and its payload inside one packet, and never
            // encode a zero-length burst.
            if self.remaining() < 2 {
                self.flush()?;
            }
            let trans = (self.remaining() - 1).min(nb8 - i).min(MAX_SHIFT);
            let header = if read_tdo { SHMODE | READ } else { SHMODE };
            self.queue_byte(header | trans as u8)?;
            self.queue_bytes(bits.as_deref().map(|b| &b[i..i + trans]), trans)?;
            if read_tdo {
                self.read_byteshifted_tdos(&mut tdos[i..i + trans])?;
            }
            i += trans;
        }

        for i in 0..nb1 {
            let tdi = bits
                .as_deref()
                .map_or(false, |b| b[nb8 + i / 8] & (1 << i) != 0);
            if exit && bits.is_some() && i == nb1 - 1 {
                self.clock_tdi_flip_tms(tdi, read_tdo)?;
            } else {
                self.clock_tdi(tdi, read_tdo)?;
            }
        }
        if nb1 > 0 && read_tdo {
            self.read_bitbang_tdos(&mut tdos[nb8..], nb1)?;
        }

        if read_tdo {
            if let Some(bits) = bits.as_deref_mut() {
                let nb_bytes = (nb_bits + 7) / 8;
                bits[..nb_bytes].copy_from_slice(&tdos[..nb_bytes]);
            }
        }

        // Ensure clock ends in its lower state.
        self.idle_clock()
    }
}

impl std::ops::Drop for Blaster {
    fn drop(&mut self) {
        // A single zero byte releases all drive lines before closing.
        log::debug!("blaster dropped, releasing drive lines");
        let _ = self.flush();
        let _ = self.drv.write(&[0]);
        let _ = self.drv.close();
    }
}
