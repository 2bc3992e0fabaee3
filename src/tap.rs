//! The TAP driver keeps track of the IEEE 1149.1 state machine and issues
//! state moves, TMS sequences, scans and run-test clocking through the
//! blaster session, which it owns. The transition oracle is provided here as
//! pure functions over the 16-state graph.

use crate::blaster::{Blaster, Capabilities, GpioPin};
use crate::blaster::Error as BlasterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("blaster error")]
    Blaster(#[from] BlasterError),
    #[error("no TMS transition leads from {from:?} to {to:?}.")]
    InvalidPath { from: TapState, to: TapState },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which register path a scan shifts through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    Data,
    Instruction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapState {
    Reset,
    Idle,
    SelectDR,
    CaptureDR,
    ShiftDR,
    Exit1DR,
    PauseDR,
    Exit2DR,
    UpdateDR,
    SelectIR,
    CaptureIR,
    ShiftIR,
    Exit1IR,
    PauseIR,
    Exit2IR,
    UpdateIR,
}

impl TapState {
    /// The state reached by one TCK with the given TMS level.
    pub fn transition(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (Reset, false) => Idle,
            (Reset, true) => Reset,
            (Idle, false) => Idle,
            (Idle, true) => SelectDR,
            (SelectDR, false) => CaptureDR,
            (SelectDR, true) => SelectIR,
            (CaptureDR, false) => ShiftDR,
            (CaptureDR, true) => Exit1DR,
            (ShiftDR, false) => ShiftDR,
            (ShiftDR, true) => Exit1DR,
            (Exit1DR, false) => PauseDR,
            (Exit1DR, true) => UpdateDR,
            (PauseDR, false) => PauseDR,
            (PauseDR, true) => Exit2DR,
            (Exit2DR, false) => ShiftDR,
            (Exit2DR, true) => UpdateDR,
            (UpdateDR, false) => Idle,
            (UpdateDR, true) => SelectDR,
            (SelectIR, false) => CaptureIR,
            (SelectIR, true) => Reset,
            (CaptureIR, false) => ShiftIR,
            (CaptureIR, true) => Exit1IR,
            (ShiftIR, false) => ShiftIR,
            (ShiftIR, true) => Exit1IR,
            (Exit1IR, false) => PauseIR,
            (Exit1IR, true) => UpdateIR,
            (PauseIR, false) => PauseIR,
            (PauseIR, true) => Exit2IR,
            (Exit2IR, false) => ShiftIR,
            (Exit2IR, true) => UpdateIR,
            (UpdateIR, false) => Idle,
            (UpdateIR, true) => SelectIR,
        }
    }
}

/// TMS word moving the TAP from `from` to `to`, LSB clocked first.
///
/// Computed as the shortest path through the state graph, except that any
/// move to Reset uses the five TMS=1 clocks which reach Test-Logic-Reset
/// from every state.
pub fn tms_path(from: TapState, to: TapState) -> (u8, usize) {
    if to == TapState::Reset {
        return (0x1F, 5);
    }
    if from == to {
        return (0, 0);
    }
    // Breadth-first over at most 16 states; paths never exceed 7 bits.
    let mut frontier = vec![(from, 0u8, 0usize)];
    let mut seen = vec![from];
    loop {
        let mut next = Vec::new();
        for (state, bits, len) in frontier {
            for &tms in &[false, true] {
                let succ = state.transition(tms);
                let bits = bits | ((tms as u8) << len);
                if succ == to {
                    return (bits, len + 1);
                }
                if !seen.contains(&succ) {
                    seen.push(succ);
                    next.push((succ, bits, len + 1));
                }
            }
        }
        frontier = next;
    }
}

/// TAP driver owning the blaster session and the recorded state.
///
/// After any operation returns, the recorded state matches the physical TAP
/// state, with the single contractual exception of a scan asked to stop in
/// the shift state.
pub struct Tap {
    blaster: Blaster,
    state: TapState,
    trst_pin: Option<GpioPin>,
    srst_pin: Option<GpioPin>,
}

impl Tap {
    /// Take over a blaster session and force the TAP to Test-Logic-Reset.
    pub fn new(blaster: Blaster) -> Result<Tap> {
        let mut tap = Tap {
            blaster,
            state: TapState::Reset,
            trst_pin: None,
            srst_pin: None,
        };
        tap.tms_sequence(&[0x1F], 5)?;
        tap.state = TapState::Reset;
        Ok(tap)
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn capabilities(&self) -> Capabilities {
        self.blaster.capabilities()
    }

    pub fn set_speed(&mut self, khz: u32) -> Result<()> {
        Ok(self.blaster.set_speed(khz)?)
    }

    pub fn set_pin(&mut self, pin: GpioPin, level: bool) -> Result<()> {
        Ok(self.blaster.set_pin(pin, level)?)
    }

    /// Declare which spare pin drives the target's TRST line.
    pub fn bind_trst(&mut self, pin: GpioPin) {
        self.trst_pin = Some(pin);
    }

    /// Declare which spare pin drives the target's SRST line.
    pub fn bind_srst(&mut self, pin: GpioPin) {
        self.srst_pin = Some(pin);
    }

    /// Deliver all queued events to the probe.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.blaster.flush()?)
    }

    /// Clock a raw TMS bit sequence, LSB of `bits[0]` first.
    pub fn tms_sequence(&mut self, bits: &[u8], nb_bits: usize) -> Result<()> {
        log::trace!("tms sequence of {} bits", nb_bits);
        for i in 0..nb_bits {
            let bit = bits[i / 8] & (1 << (i % 8)) != 0;
            self.blaster.clock_tms(bit)?;
            self.state = self.state.transition(bit);
        }
        Ok(self.blaster.idle_clock()?)
    }

    /// Walk an explicit list of adjacent states.
    pub fn path_move(&mut self, path: &[TapState]) -> Result<()> {
        log::trace!("path move through {} states to {:?}", path.len(), path.last());
        for &next in path {
            if self.state.transition(false) == next {
                self.blaster.clock_tms(false)?;
            } else if self.state.transition(true) == next {
                self.blaster.clock_tms(true)?;
            } else {
                return Err(Error::InvalidPath { from: self.state, to: next });
            }
            self.state = next;
        }
        Ok(self.blaster.idle_clock()?)
    }

    /// Move to `target` along the oracle's TMS path.
    pub fn state_move(&mut self, target: TapState) -> Result<()> {
        log::debug!("state move {:?} -> {:?}", self.state, target);
        let (bits, len) = tms_path(self.state, target);
        self.tms_sequence(&[bits], len)?;
        self.state = target;
        Ok(())
    }

    /// Shift `nb_bits` through a register, capturing TDO in place.
    ///
    /// The buffer is owned by the call for its duration and is overwritten
    /// with the captured bits.
    pub fn scan_io(
        &mut self,
        reg: Register,
        buf: &mut [u8],
        nb_bits: usize,
        end: TapState,
    ) -> Result<()> {
        self.scan(reg, Some(buf), nb_bits, true, end)
    }

    /// Shift `nb_bits` out of `data` without reading TDO.
    pub fn scan_out(
        &mut self,
        reg: Register,
        data: &[u8],
        nb_bits: usize,
        end: TapState,
    ) -> Result<()> {
        let mut tmp = data.to_vec();
        self.scan(reg, Some(&mut tmp), nb_bits, false, end)
    }

    /// Clock zeros while capturing `nb_bits` of TDO into `buf`.
    pub fn scan_in(
        &mut self,
        reg: Register,
        buf: &mut [u8],
        nb_bits: usize,
        end: TapState,
    ) -> Result<()> {
        for byte in buf.iter_mut() {
            *byte = 0;
        }
        self.scan(reg, Some(buf), nb_bits, true, end)
    }

    fn scan(
        &mut self,
        reg: Register,
        bits: Option<&mut [u8]>,
        nb_bits: usize,
        read_tdo: bool,
        end: TapState,
    ) -> Result<()> {
        if nb_bits == 0 {
            return Ok(());
        }
        let shift = match reg {
            Register::Instruction => TapState::ShiftIR,
            Register::Data => TapState::ShiftDR,
        };
        self.state_move(shift)?;
        log::debug!(
            "{:?} scan of {} bits, end {:?}",
            reg,
            nb_bits,
            end,
        );

        // A scan asked to end in ShiftDR stays in the shift state; anything
        // else exits on the last bit.
        let stay = end == TapState::ShiftDR;
        self.blaster.queue_tdi(bits, nb_bits, read_tdo, !stay)?;
        if !stay {
            // The TAP sits in the unstable Exit1 state; one TMS=0 moves it
            // forward to the stable Pause state before the final move.
            self.blaster.clock_tms(false)?;
            self.state = match reg {
                Register::Instruction => TapState::PauseIR,
                Register::Data => TapState::PauseDR,
            };
            self.state_move(end)?;
        }
        Ok(())
    }

    /// Spend `cycles` TCKs in Run-Test/Idle, then move to `end`.
    pub fn runtest(&mut self, cycles: usize, end: TapState) -> Result<()> {
        log::debug!("runtest {} cycles, end {:?}", cycles, end);
        self.state_move(TapState::Idle)?;
        self.blaster.queue_tdi(None, cycles, false, true)?;
        self.state_move(end)
    }

    /// Clock `cycles` TCKs with TMS held at its current level.
    pub fn stable_clocks(&mut self, cycles: usize) -> Result<()> {
        log::debug!("{} stable clocks in {:?}", cycles, self.state);
        Ok(self.blaster.queue_tdi(None, cycles, false, true)?)
    }

    /// Assert or release the target reset lines.
    ///
    /// Levels reach the wire only through pins the host has bound. An
    /// unbound TRST assertion falls back to Test-Logic-Reset via TMS; an
    /// unbound SRST assertion is ignored with a warning.
    pub fn reset(&mut self, trst: bool, srst: bool) -> Result<()> {
        log::debug!("reset(trst={}, srst={})", trst as u8, srst as u8);
        match self.srst_pin {
            Some(pin) => self.blaster.set_pin(pin, srst)?,
            None if srst => log::warn!("SRST requested but no pin is bound to it"),
            None => (),
        }
        match self.trst_pin {
            Some(pin) => {
                self.blaster.set_pin(pin, trst)?;
                if trst {
                    // Hardware TRST resets the TAP without TMS traffic.
                    self.state = TapState::Reset;
                }
            }
            None if trst => self.state_move(TapState::Reset)?,
            None => (),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blaster::tests::{test_blaster, written_since, MockLog};
    use std::cell::RefCell;
    use std::rc::Rc;

    const TCK: u8 = 1 << 0;
    const TMS: u8 = 1 << 1;
    const SHMODE: u8 = 1 << 7;

    fn test_tap() -> (Tap, Rc<RefCell<MockLog>>) {
        let (blaster, log) = test_blaster();
        let tap = Tap::new(blaster).unwrap();
        (tap, log)
    }

    #[test]
    fn test_transition_graph() {
        use TapState::*;
        assert_eq!(Reset.transition(false), Idle);
        assert_eq!(Idle.transition(true), SelectDR);
        assert_eq!(ShiftDR.transition(false), ShiftDR);
        assert_eq!(ShiftDR.transition(true), Exit1DR);
        assert_eq!(Exit1IR.transition(true), UpdateIR);
        assert_eq!(SelectIR.transition(true), Reset);
        // Five ones reach Reset from anywhere; ShiftDR is the deepest.
        let mut state = ShiftDR;
        for _ in 0..5 {
            state = state.transition(true);
        }
        assert_eq!(state, Reset);
    }

    #[test]
    fn test_tms_path_lengths() {
        use TapState::*;
        assert_eq!(tms_path(Idle, ShiftDR), (0b001, 3));
        assert_eq!(tms_path(Idle, ShiftIR), (0b0011, 4));
        assert_eq!(tms_path(ShiftDR, PauseDR), (0b01, 2));
        assert_eq!(tms_path(PauseDR, ShiftDR), (0b01, 2));
        assert_eq!(tms_path(Idle, Idle), (0, 0));
        // Every move to Reset is the blanket five-ones sequence.
        assert_eq!(tms_path(Idle, Reset), (0x1F, 5));
        assert_eq!(tms_path(ShiftIR, Reset), (0x1F, 5));
    }

    #[test]
    fn test_tms_path_walks_the_graph() {
        use TapState::*;
        for &(from, to) in &[
            (Idle, ShiftDR),
            (Idle, PauseIR),
            (PauseDR, ShiftIR),
            (ShiftIR, Idle),
            (Reset, PauseDR),
        ] {
            let (bits, len) = tms_path(from, to);
            let mut state = from;
            for i in 0..len {
                state = state.transition(bits & (1 << i) != 0);
            }
            assert_eq!(state, to, "path {:?} -> {:?}", from, to);
        }
    }

    #[test]
    fn test_state_move_reset_is_five_pulses() {
        let (mut tap, log) = test_tap();
        tap.state_move(TapState::Idle).unwrap();
        tap.flush().unwrap();
        let mark = log.borrow().written.len();

        tap.state_move(TapState::Reset).unwrap();
        tap.flush().unwrap();
        let written = written_since(&log, mark);
        // Five TMS=1 pulses, two bytes each, then one idle byte.
        assert_eq!(written.len(), 11);
        for pair in written[..10].chunks(2) {
            assert_eq!(pair[0] & TMS, TMS);
            assert_eq!(pair[0] & TCK, 0);
            assert_eq!(pair[1] & TMS, TMS);
            assert_eq!(pair[1] & TCK, TCK);
        }
        assert_eq!(written[10] & TCK, 0);
        assert_eq!(tap.state(), TapState::Reset);
    }

    #[test]
    fn test_ir_scan_to_pause_uses_bitbang_only() {
        let (mut tap, log) = test_tap();
        tap.flush().unwrap();
        {
            let mut l = log.borrow_mut();
            for _ in 0..4 {
                l.to_read.push_back(0);
            }
        }
        let mark = log.borrow().written.len();

        let mut ir = [0b1011u8];
        tap.scan_io(Register::Instruction, &mut ir, 4, TapState::PauseIR)
            .unwrap();
        tap.flush().unwrap();

        let written = written_since(&log, mark);
        // No byte-shift header anywhere in a 4-bit scan.
        assert!(written.iter().all(|b| b & SHMODE == 0));
        // The last TCK-high event carries the TMS flip out of ShiftIR.
        let highs: Vec<u8> = written.iter().copied().filter(|b| b & TCK != 0).collect();
        let shift_highs = &highs[5..]; // skip the Reset->ShiftIR state move
        assert_eq!(shift_highs.len(), 4 + 1); // 4 data bits + 1 exit-to-pause
        assert_eq!(shift_highs[3] & TMS, TMS);
        assert_eq!(shift_highs[4] & TMS, 0); // Exit1IR -> PauseIR
        assert_eq!(tap.state(), TapState::PauseIR);
        assert_eq!(written.last().unwrap() & TCK, 0);
    }

    #[test]
    fn test_dr_scan_stop_in_shift() {
        let (mut tap, log) = test_tap();
        tap.flush().unwrap();
        let mut data = [0xFFu8; 2];
        {
            let mut l = log.borrow_mut();
            l.to_read.push_back(0x00);
            l.to_read.push_back(0x00);
        }
        tap.scan_io(Register::Data, &mut data, 16, TapState::ShiftDR)
            .unwrap();
        assert_eq!(tap.state(), TapState::ShiftDR);
    }

    #[test]
    fn test_runtest_returns_to_end_state() {
        let (mut tap, log) = test_tap();
        tap.flush().unwrap();
        let mark = log.borrow().written.len();
        tap.runtest(12, TapState::Idle).unwrap();
        tap.flush().unwrap();
        assert_eq!(tap.state(), TapState::Idle);
        let written = written_since(&log, mark);
        assert_eq!(written.last().unwrap() & TCK, 0);
    }

    #[test]
    fn test_unbound_trst_falls_back_to_tlr() {
        let (mut tap, _log) = test_tap();
        tap.state_move(TapState::Idle).unwrap();
        tap.reset(true, false).unwrap();
        assert_eq!(tap.state(), TapState::Reset);
    }

    #[test]
    fn test_bound_trst_drives_pin() {
        let (mut tap, log) = test_tap();
        tap.state_move(TapState::Idle).unwrap();
        tap.flush().unwrap();
        tap.bind_trst(GpioPin::Pin6);
        let mark = log.borrow().written.len();
        tap.reset(true, false).unwrap();
        let written = written_since(&log, mark);
        // Pin update goes straight out, no TMS traffic.
        assert_eq!(written.len(), 1);
        const NCE: u8 = 1 << 2;
        assert_eq!(written[0] & NCE, NCE);
        assert_eq!(tap.state(), TapState::Reset);
    }

    #[test]
    fn test_path_move_rejects_non_neighbors() {
        let (mut tap, _log) = test_tap();
        tap.state_move(TapState::Idle).unwrap();
        let err = tap.path_move(&[TapState::ShiftDR]).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }
}
