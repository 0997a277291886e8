//! A simulated scan chain behind the `Cable` trait.  Every TAP runs its own IEEE 1149.1 controller
//! clock by clock, so the whole stack above the cable can be exercised without hardware.
//!
//! TAPs are ordered like chain positions: `taps[0]` is nearest TDO.  A TAP built from a BSDL
//! description also models its pads: each pin has an external level (pulled high unless set),
//! a value and output enable driven by the device core, and the boundary register's update
//! latch that takes over the pads under EXTEST.
use std::collections::HashMap;

use crate::bsdl::{BsdlDescription, CellFunction, PinDef};
use crate::cable::{pack_bits, unpack_bits, Cable};
use crate::error::{Error, Result};
use crate::statemachine::JtagState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Selected {
    Bypass,
    IdCode,
    Boundary { extest: bool },
}

pub struct SimTap {
    ir_len: usize,
    idcode: Option<u32>,
    description: Option<BsdlDescription>,
    ir: Vec<bool>,
    selected: Selected,
    shift: Vec<bool>,
    update: Vec<bool>,
    external: HashMap<String, bool>,
    core: HashMap<String, bool>,
    ir_updates: usize,
    extest_releases: usize,
}

impl SimTap {
    fn build(ir_len: usize, idcode: Option<u32>, description: Option<BsdlDescription>) -> Self {
        let update = description
            .as_ref()
            .map(|d| d.safe_register())
            .unwrap_or_default();
        let mut tap = Self {
            ir_len,
            idcode,
            description,
            ir: Vec::new(),
            selected: Selected::Bypass,
            shift: Vec::new(),
            update,
            external: HashMap::new(),
            core: HashMap::new(),
            ir_updates: 0,
            extest_releases: 0,
        };
        tap.reset();
        tap
    }

    /// A TAP without an IDCODE register: only BYPASS is implemented
    pub fn bypass(ir_len: usize) -> Self {
        Self::build(ir_len, None, None)
    }

    /// A TAP that selects IDCODE on reset and treats every other instruction as BYPASS
    pub fn with_idcode(ir_len: usize, idcode: u32) -> Self {
        Self::build(ir_len, Some(idcode), None)
    }

    /// A TAP implementing the instructions and boundary register of `description`
    pub fn from_description(description: BsdlDescription, idcode: u32) -> Self {
        let ir_len = description.instruction_length();
        Self::build(ir_len, Some(idcode), Some(description))
    }

    fn reset(&mut self) {
        let opcode = match (&self.description, self.idcode) {
            (Some(d), Some(_)) => d.opcode("IDCODE"),
            _ => None,
        };
        self.ir = opcode.unwrap_or_else(|| vec![true; self.ir_len]);
        self.selected = if self.idcode.is_some() {
            Selected::IdCode
        } else {
            Selected::Bypass
        };
    }

    fn decode(&self) -> Selected {
        let Some(d) = &self.description else {
            return Selected::Bypass;
        };
        match d.decode_instruction(&self.ir).map(str::to_ascii_uppercase).as_deref() {
            Some("IDCODE") if self.idcode.is_some() => Selected::IdCode,
            Some("EXTEST") => Selected::Boundary { extest: true },
            Some("SAMPLE") | Some("PRELOAD") | Some("SAMPLE/PRELOAD") => Selected::Boundary { extest: false },
            _ => Selected::Bypass,
        }
    }

    fn capture_ir(&mut self) {
        let capture = self
            .description
            .as_ref()
            .and_then(|d| d.instruction_capture())
            .filter(|c| c.len() == self.ir_len)
            .map(|c| c.chars().rev().map(|b| b == '1').collect());
        self.shift = capture.unwrap_or_else(|| {
            let mut bits = vec![false; self.ir_len];
            if let Some(b) = bits.first_mut() {
                *b = true;
            }
            bits
        });
    }

    fn capture_dr(&mut self) {
        self.shift = match self.selected {
            Selected::Bypass => vec![false],
            Selected::IdCode => unpack_bits(&self.idcode.unwrap_or(0).to_le_bytes(), 32),
            Selected::Boundary { .. } => self.capture_boundary(),
        };
    }

    fn capture_boundary(&self) -> Vec<bool> {
        let Some(d) = &self.description else {
            return Vec::new();
        };
        d.cells()
            .iter()
            .map(|cell| {
                let port = cell.port.as_deref();
                match cell.function {
                    CellFunction::Input | CellFunction::Clock | CellFunction::ObserveOnly | CellFunction::Bidir => {
                        port.and_then(|p| self.pad(p)).unwrap_or(false)
                    }
                    CellFunction::Output2 | CellFunction::Output3 => {
                        port.and_then(|p| self.core.get(p).copied()).unwrap_or(false)
                    }
                    CellFunction::Control | CellFunction::ControlR => {
                        let gated: Vec<&PinDef> = d
                            .pins()
                            .iter()
                            .filter(|p| p.control.is_some_and(|c| c.cell == cell.number))
                            .collect();
                        match gated.first().and_then(|p| p.control) {
                            Some(ctrl) => {
                                let enabled = gated.iter().any(|p| self.core.contains_key(&p.name));
                                enabled != ctrl.disable_value
                            }
                            None => cell.safe.unwrap_or(false),
                        }
                    }
                    CellFunction::Internal => cell.safe.unwrap_or(false),
                }
            })
            .collect()
    }

    fn update_ir(&mut self) {
        let was_extest = self.selected == Selected::Boundary { extest: true };
        self.ir = self.shift.clone();
        self.selected = self.decode();
        if was_extest && self.selected != (Selected::Boundary { extest: true }) {
            self.extest_releases += 1;
        }
        self.ir_updates += 1;
    }

    fn update_dr(&mut self) {
        if let Selected::Boundary { .. } = self.selected {
            self.update = self.shift.clone();
        }
    }

    fn shift_bit(&mut self, tdi: bool) -> bool {
        if self.shift.is_empty() {
            return tdi;
        }
        let out = self.shift.remove(0);
        self.shift.push(tdi);
        out
    }

    /// Level seen on the pad of `pin`, `None` for an unknown pin or a TAP without a description
    pub fn pad(&self, pin: &str) -> Option<bool> {
        let def = self.description.as_ref()?.pin(pin)?;
        let extest = self.selected == Selected::Boundary { extest: true };
        if extest {
            if let Some(cell) = def.output_cell {
                if def.output_enabled(&self.update) {
                    return Some(self.update[cell]);
                }
            }
        } else if let Some(value) = self.core.get(pin) {
            return Some(*value);
        }
        Some(self.external.get(pin).copied().unwrap_or(true))
    }

    /// Drive `pin` from outside the device
    pub fn set_input(&mut self, pin: &str, level: bool) {
        self.external.insert(pin.to_string(), level);
    }

    /// Have the device core drive `pin`, or release it with `None`
    pub fn set_core_output(&mut self, pin: &str, level: Option<bool>) {
        match level {
            Some(v) => self.core.insert(pin.to_string(), v),
            None => self.core.remove(pin),
        };
    }

    /// Name of the instruction in effect
    pub fn instruction_name(&self) -> String {
        if let Some(name) = self.description.as_ref().and_then(|d| d.decode_instruction(&self.ir)) {
            return name.to_string();
        }
        match self.selected {
            Selected::IdCode => "IDCODE".to_string(),
            _ => "BYPASS".to_string(),
        }
    }

    /// Number of times an instruction has been latched by Update-IR
    pub fn ir_updates(&self) -> usize {
        self.ir_updates
    }

    /// Number of Update-IR latches that took the pads out of EXTEST
    pub fn extest_releases(&self) -> usize {
        self.extest_releases
    }
}

pub struct SimChain {
    taps: Vec<SimTap>,
    state: JtagState,
    fault: Option<String>,
    stuck: Option<bool>,
}

impl SimChain {
    pub fn new(taps: Vec<SimTap>) -> Self {
        Self {
            taps,
            state: JtagState::Reset,
            fault: None,
            stuck: None,
        }
    }

    pub fn tap(&self, position: usize) -> Option<&SimTap> {
        self.taps.get(position)
    }

    pub fn tap_mut(&mut self, position: usize) -> Option<&mut SimTap> {
        self.taps.get_mut(position)
    }

    pub fn state(&self) -> JtagState {
        self.state
    }

    /// Make every cable operation fail with `message` until cleared
    pub fn set_fault(&mut self, message: Option<String>) {
        self.fault = message;
    }

    /// Hold TDO at a fixed level, as a broken or unpowered chain does
    pub fn set_stuck_tdo(&mut self, level: Option<bool>) {
        self.stuck = level;
    }

    fn check(&self) -> Result<()> {
        match &self.fault {
            Some(message) => Err(Error::cable(message)),
            None => Ok(()),
        }
    }

    /// One TCK cycle.  Returns the level of TDO sampled on the rising edge.
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let mut carry = tdi;
        match self.state {
            JtagState::CaptureIR => self.taps.iter_mut().for_each(SimTap::capture_ir),
            JtagState::CaptureDR => self.taps.iter_mut().for_each(SimTap::capture_dr),
            JtagState::ShiftIR | JtagState::ShiftDR => {
                for tap in self.taps.iter_mut().rev() {
                    carry = tap.shift_bit(carry);
                }
            }
            _ => {}
        }
        let tdo = match self.state {
            JtagState::ShiftIR | JtagState::ShiftDR => carry,
            _ => false,
        };

        self.state = self.state.next(tms);
        match self.state {
            JtagState::Reset => self.taps.iter_mut().for_each(SimTap::reset),
            JtagState::UpdateIR => self.taps.iter_mut().for_each(SimTap::update_ir),
            JtagState::UpdateDR => self.taps.iter_mut().for_each(SimTap::update_dr),
            _ => {}
        }
        self.stuck.unwrap_or(tdo)
    }

    fn shift(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        self.check()?;
        if data.is_empty() || !(1..=8).contains(&bits) {
            return Err(Error::cable(format!(
                "bad shift request: {} byte(s), {} bit(s) in the last",
                data.len(),
                bits
            )));
        }
        let total = (data.len() - 1) * 8 + bits as usize;
        let out: Vec<bool> = unpack_bits(data, total)
            .into_iter()
            .enumerate()
            .map(|(i, tdi)| self.clock(pause_after && i == total - 1, tdi))
            .collect();
        if pause_after {
            self.clock(false, true);
        }
        Ok(pack_bits(&out).0)
    }
}

impl Cable for SimChain {
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        self.check()?;
        for t in tms {
            self.clock(*t, tdi);
        }
        Ok(())
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        self.check()?;
        let out: Vec<bool> = (0..bits).map(|_| self.clock(false, true)).collect();
        Ok(pack_bits(&out).0)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        self.shift(data, bits, pause_after).map(|_| ())
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        self.shift(data, bits, pause_after)
    }
}
