//! This provides a higher-level interface than the `Cable` trait.  Specifically, it keeps track of
//! the state of the JTAG state machine, and allows setting the state to any desired state.
//! `JtagSM` will get to that state by the most efficient path, based on the current state.
use crate::cable::{pack_bits, unpack_bits, Cable};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    Data,
    Instruction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JtagState {
    Reset = 0,
    Idle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

impl JtagState {
    pub const ALL: [JtagState; 16] = [
        JtagState::Reset,
        JtagState::Idle,
        JtagState::SelectDR,
        JtagState::CaptureDR,
        JtagState::ShiftDR,
        JtagState::Exit1DR,
        JtagState::PauseDR,
        JtagState::Exit2DR,
        JtagState::UpdateDR,
        JtagState::SelectIR,
        JtagState::CaptureIR,
        JtagState::ShiftIR,
        JtagState::Exit1IR,
        JtagState::PauseIR,
        JtagState::Exit2IR,
        JtagState::UpdateIR,
    ];

    /// The state the TAP controller moves to on a TCK rising edge with the given TMS level.
    pub fn next(self, tms: bool) -> JtagState {
        use JtagState::*;
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
            (UpdateIR, true) => SelectDR,
        }
    }
}

/// TMS sequence that reaches Test-Logic-Reset from any state, then parks in Run-Test/Idle.
pub const RESET_SEQUENCE: [bool; 6] = [true, true, true, true, true, false];

#[derive(Clone)]
struct Path {
    path: Vec<bool>,
    state: JtagState,
}

pub struct JtagSM {
    cable: Box<dyn Cable>,
    state: JtagState,
}

impl JtagSM {
    /// Create a JTAG state machine using an existing `Cable`.  The chain is reset and left in
    /// Run-Test/Idle.
    pub fn new(cable: Box<dyn Cable>) -> Result<Self> {
        let mut sm = Self {
            cable,
            state: JtagState::Reset,
        };
        sm.mode_reset()?;
        Ok(sm)
    }

    pub fn state(&self) -> JtagState {
        self.state
    }

    pub fn cable_mut(&mut self) -> &mut dyn Cable {
        self.cable.as_mut()
    }

    /// Reset the scan chain by driving TMS high for 5 clocks, ending in Idle
    pub fn mode_reset(&mut self) -> Result<()> {
        self.cable.change_mode(&RESET_SEQUENCE, true)?;
        self.state = JtagState::Idle;
        Ok(())
    }

    fn get_path(&self, state: JtagState) -> Vec<bool> {
        let mut paths = vec![Path {
            path: Vec::new(),
            state: self.state,
        }];

        // Every state is reachable from every other in at most 7 clocks, so the breadth-first
        // walk terminates well before the frontier gets large.
        loop {
            let mut newpaths = Vec::with_capacity(paths.len() * 2);

            for p in paths {
                for tms in [false, true] {
                    let mut next = p.clone();
                    next.state = p.state.next(tms);
                    next.path.push(tms);

                    if next.state == state {
                        return next.path;
                    }
                    newpaths.push(next);
                }
            }

            paths = newpaths;
        }
    }

    /// Use TMS to get into `state` by the most efficient path
    pub fn change_mode(&mut self, state: JtagState) -> Result<()> {
        if self.state == state {
            return Ok(());
        }

        let path = self.get_path(state);
        log::trace!("TMS path {:?} -> {:?}: {:?}", self.state, state, path);
        self.cable.change_mode(&path, true)?;
        self.state = state;
        Ok(())
    }

    fn enter_shift(&mut self, reg: Register) -> Result<()> {
        match reg {
            Register::Data => self.change_mode(JtagState::ShiftDR),
            Register::Instruction => self.change_mode(JtagState::ShiftIR),
        }
    }

    fn paused(&mut self, reg: Register, pause_after: bool) {
        if pause_after {
            self.state = match reg {
                Register::Data => JtagState::PauseDR,
                Register::Instruction => JtagState::PauseIR,
            };
        }
    }

    /// Read `bits` from either the instruction or data register
    pub fn read_reg(&mut self, reg: Register, bits: usize) -> Result<Vec<u8>> {
        self.enter_shift(reg)?;
        if bits == 0 {
            return Ok(Vec::new());
        }
        self.cable.read_data(bits)
    }

    /// Write `data` into either the instruction or data register.  `bits` indicates how many bits
    /// of the last byte should be written (8 indicates that the entire byte should be written).
    /// The mode will either be ShiftIR / ShiftDR if `pause_after` is false, or PauseIR / PauseDR
    /// if `pause_after` is true.
    pub fn write_reg(&mut self, reg: Register, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        self.enter_shift(reg)?;
        self.cable.write_data(data, bits, pause_after)?;
        self.paused(reg, pause_after);
        Ok(())
    }

    /// Similar to `write_reg` except it returns the bits that were shifted out during writing.
    pub fn read_write_reg(
        &mut self,
        reg: Register,
        data: &[u8],
        bits: u8,
        pause_after: bool,
    ) -> Result<Vec<u8>> {
        self.enter_shift(reg)?;
        let data = self.cable.read_write_data(data, bits, pause_after)?;
        self.paused(reg, pause_after);
        Ok(data)
    }

    /// Shift a whole register in one pass and latch it: Shift -> Pause -> Update -> Idle.
    /// Returns the captured bits when `capture` is set, an empty vector otherwise.
    pub fn scan_reg(&mut self, reg: Register, bits: &[bool], capture: bool) -> Result<Vec<bool>> {
        if bits.is_empty() {
            return Ok(Vec::new());
        }
        let (bytes, last) = pack_bits(bits);
        let captured = if capture {
            let out = self.read_write_reg(reg, &bytes, last, true)?;
            unpack_bits(&out, bits.len())
        } else {
            self.write_reg(reg, &bytes, last, true)?;
            Vec::new()
        };
        self.change_mode(JtagState::Idle)?;
        self.cable.flush()?;
        Ok(captured)
    }

    pub fn into_cable(self) -> Box<dyn Cable> {
        self.cable
    }
}
