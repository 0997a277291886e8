//! Boundary scan of every bound device in one pass over the chain.
//!
//! Each bound device keeps three register images: `pending` (what the next scan shifts in),
//! `applied` (what the last successful scan shifted in) and `captured` (what it shifted out).
//! Pin writes only touch `pending`; pin reads derive from `applied` and `captured`.  A scan that
//! fails part way leaves all three untouched.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::bsdl::BsdlDescription;
use crate::device::{AttachPolicy, BoundDevice, DeviceHandle};
use crate::error::{Error, Result};
use crate::statemachine::JtagSM;
use crate::taps::Taps;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// SAMPLE/PRELOAD: observe the pins, the device core keeps control of them
    #[default]
    Passive,
    /// EXTEST: the boundary register drives the pins
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinState {
    High,
    Low,
    HighZ,
    Unknown,
}

impl From<bool> for PinState {
    fn from(level: bool) -> Self {
        if level {
            PinState::High
        } else {
            PinState::Low
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PinState::High => "high",
            PinState::Low => "low",
            PinState::HighZ => "high-z",
            PinState::Unknown => "unknown",
        })
    }
}

/// Value a pin can be set to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinValue {
    High,
    Low,
    HighImpedance,
}

impl From<bool> for PinValue {
    fn from(level: bool) -> Self {
        if level {
            PinValue::High
        } else {
            PinValue::Low
        }
    }
}

/// `None` releases the pin
impl From<Option<bool>> for PinValue {
    fn from(level: Option<bool>) -> Self {
        level.map_or(PinValue::HighImpedance, PinValue::from)
    }
}

impl FromStr for PinValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "1" | "true" => Ok(PinValue::High),
            "low" | "0" | "false" => Ok(PinValue::Low),
            "high-z" | "z" | "highz" => Ok(PinValue::HighImpedance),
            _ => Err(Error::InvalidArgument(format!("`{}` is not a pin value", s))),
        }
    }
}

/// Raw register bits behind a pin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinRegister {
    /// Captured input cell
    Input,
    /// Pending output cell
    Output,
    /// Pending output enable, decoded from the control cell
    OutputEnable,
}

#[derive(Default)]
pub(crate) struct ScanEngine {
    devices: BTreeMap<usize, BoundDevice>,
    loaded_ir: Option<Vec<Vec<bool>>>,
}

impl ScanEngine {
    pub fn attach(
        &mut self,
        taps: &mut Taps,
        description: Arc<BsdlDescription>,
        position: usize,
        policy: AttachPolicy,
    ) -> Result<DeviceHandle> {
        let bound = BoundDevice::bind(taps, description, position, policy)?;
        if self.devices.insert(position, bound).is_some() {
            log::debug!("replaced description at position {}", position);
        }
        Ok(DeviceHandle { position })
    }

    /// Drop the description bound at `position`; the TAP goes back to BYPASS on the next scan
    pub fn detach(&mut self, taps: &Taps, position: usize) -> Result<()> {
        if position >= taps.len() {
            return Err(Error::PositionOutOfRange {
                position,
                count: taps.len(),
            });
        }
        if self.devices.remove(&position).is_some() {
            log::info!("detached position {}", position);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.loaded_ir = None;
    }

    pub fn device(&self, handle: DeviceHandle) -> Result<&BoundDevice> {
        self.devices.get(&handle.position).ok_or_else(|| {
            Error::InvalidArgument(format!("no description attached at position {}", handle.position))
        })
    }

    fn device_mut(&mut self, handle: DeviceHandle) -> Result<&mut BoundDevice> {
        self.devices.get_mut(&handle.position).ok_or_else(|| {
            Error::InvalidArgument(format!("no description attached at position {}", handle.position))
        })
    }

    pub fn set_mode(&mut self, handle: DeviceHandle, mode: ScanMode) -> Result<()> {
        self.device_mut(handle)?.mode = mode;
        Ok(())
    }

    /// Instruction for every chain position: bound devices per `mode_of`, the rest BYPASS
    fn instructions(&self, taps: &Taps, mode_of: impl Fn(&BoundDevice) -> ScanMode) -> Result<Vec<Vec<bool>>> {
        taps.devices()
            .iter()
            .map(|tap| match self.devices.get(&tap.position) {
                Some(dev) => {
                    let desc = &dev.description;
                    let opcode = match mode_of(dev) {
                        ScanMode::Passive => desc.sample_opcode(),
                        ScanMode::Active => desc.opcode("EXTEST"),
                    };
                    opcode.ok_or_else(|| {
                        Error::bsdl(0, format!("{} lacks a boundary-scan instruction", desc.entity()))
                    })
                }
                None => tap.ir_len.map(|len| vec![true; len]).ok_or_else(|| {
                    Error::ChainScanError(format!(
                        "IR length of position {} is unknown; attach a description or set it",
                        tap.position
                    ))
                }),
            })
            .collect()
    }

    fn load(&mut self, sm: &mut JtagSM, taps: &Taps, instructions: Vec<Vec<bool>>) -> Result<()> {
        if self.loaded_ir.as_ref() == Some(&instructions) {
            return Ok(());
        }
        self.loaded_ir = None;
        taps.load_ir(sm, &instructions)?;
        self.loaded_ir = Some(instructions);
        Ok(())
    }

    /// Pending registers of the bound devices with a bypass bit for every other TAP
    fn dr_vector(&self, taps: &Taps) -> Vec<bool> {
        let mut bits = Vec::new();
        for tap in taps.devices() {
            match self.devices.get(&tap.position) {
                Some(dev) => bits.extend_from_slice(&dev.pending),
                None => bits.push(false),
            }
        }
        bits
    }

    fn shift(&mut self, sm: &mut JtagSM, taps: &Taps, capture: bool) -> Result<Vec<bool>> {
        let bits = self.dr_vector(taps);
        taps.shift_dr(sm, &bits, capture).inspect_err(|_| self.loaded_ir = None)
    }

    /// Shift every pending register into the chain.  With `capture` set the shifted-out
    /// registers become the new captured images.
    pub fn scan(&mut self, sm: &mut JtagSM, taps: &Taps, capture: bool) -> Result<()> {
        let instructions = self.instructions(taps, |d| d.mode)?;

        // Preload before a device starts driving its pins, so EXTEST takes over the pads with
        // the pending values rather than stale latch contents.  Devices already in EXTEST keep it.
        let entering_extest = self
            .devices
            .values()
            .any(|d| d.mode == ScanMode::Active && d.applied_mode != Some(ScanMode::Active));
        if entering_extest && self.loaded_ir.as_ref() != Some(&instructions) {
            let preload = self.instructions(taps, |d| match d.applied_mode {
                Some(ScanMode::Active) => ScanMode::Active,
                _ => ScanMode::Passive,
            })?;
            self.load(sm, taps, preload)?;
            self.shift(sm, taps, false)?;
        }

        self.load(sm, taps, instructions)?;
        let out = self.shift(sm, taps, capture)?;

        let mut offset = 0;
        for tap in taps.devices() {
            match self.devices.get_mut(&tap.position) {
                Some(dev) => {
                    let len = dev.pending.len();
                    if capture {
                        dev.captured = Some(out[offset..offset + len].to_vec());
                    }
                    dev.applied = dev.pending.clone();
                    dev.applied_mode = Some(dev.mode);
                    offset += len;
                }
                None => offset += 1,
            }
        }
        log::debug!("scan of {} bits complete", offset);
        Ok(())
    }

    pub fn pin_state(&self, handle: DeviceHandle, name: &str) -> Result<PinState> {
        let dev = self.device(handle)?;
        let pin = dev.pin(name)?;
        let Some(captured) = &dev.captured else {
            return Ok(PinState::Unknown);
        };
        let sampled = pin.input_cell.map(|c| PinState::from(captured[c]));

        let state = match dev.applied_mode {
            Some(ScanMode::Active) => match pin.output_cell {
                Some(_) if !pin.output_enabled(&dev.applied) => PinState::HighZ,
                // Capture precedes update, so the sampled input still shows the previous drive
                Some(cell) => PinState::from(dev.applied[cell]),
                None => sampled.unwrap_or(PinState::Unknown),
            },
            _ => sampled
                .or_else(|| pin.output_cell.map(|c| PinState::from(captured[c])))
                .unwrap_or(PinState::Unknown),
        };
        Ok(state)
    }

    /// Raw register bit behind a pin, `None` when the pin has no such cell or nothing was
    /// captured yet
    pub fn pin_register(&self, handle: DeviceHandle, name: &str, register: PinRegister) -> Result<Option<bool>> {
        let dev = self.device(handle)?;
        let pin = dev.pin(name)?;
        Ok(match register {
            PinRegister::Input => pin
                .input_cell
                .zip(dev.captured.as_ref())
                .map(|(c, captured)| captured[c]),
            PinRegister::Output => pin.output_cell.map(|c| dev.pending[c]),
            PinRegister::OutputEnable => pin.output_cell.map(|_| pin.output_enabled(&dev.pending)),
        })
    }

    /// Stage a new value for a pin; it reaches the device on the next scan
    pub fn set_pin(&mut self, handle: DeviceHandle, name: &str, value: PinValue) -> Result<()> {
        let dev = self.device_mut(handle)?;
        let pin = dev.pin(name)?;
        let output = pin
            .output_cell
            .ok_or_else(|| Error::InvalidDirection(name.to_string()))?;
        let control = pin.control;

        match (value, control) {
            (PinValue::HighImpedance, Some(ctrl)) => dev.pending[ctrl.cell] = ctrl.disable_value,
            (PinValue::HighImpedance, None) => {
                return Err(Error::InvalidArgument(format!("pin {} cannot be tri-stated", name)))
            }
            (level, ctrl) => {
                dev.pending[output] = level == PinValue::High;
                if let Some(ctrl) = ctrl {
                    dev.pending[ctrl.cell] = !ctrl.disable_value;
                }
            }
        }
        log::trace!("pin {} at position {} set to {:?}", name, handle.position, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("high", PinValue::High)]
    #[case("1", PinValue::High)]
    #[case("TRUE", PinValue::High)]
    #[case("low", PinValue::Low)]
    #[case("0", PinValue::Low)]
    #[case("false", PinValue::Low)]
    #[case("high-z", PinValue::HighImpedance)]
    #[case("Z", PinValue::HighImpedance)]
    #[case("highz", PinValue::HighImpedance)]
    fn parses_pin_values(#[case] text: &str, #[case] expected: PinValue) {
        assert_eq!(text.parse::<PinValue>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("2")]
    #[case("floating")]
    #[case("hi")]
    fn rejects_other_values(#[case] text: &str) {
        assert!(matches!(text.parse::<PinValue>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn conversions() {
        assert_eq!(PinValue::from(true), PinValue::High);
        assert_eq!(PinValue::from(Some(false)), PinValue::Low);
        assert_eq!(PinValue::from(None), PinValue::HighImpedance);
        assert_eq!(PinState::from(false).to_string(), "low");
    }
}
