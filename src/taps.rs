//! Detection of the TAPs on a JTAG scan chain and whole-chain register access.
//!
//! Positions count from TDO: position 0 is the TAP whose IDCODE comes out first after a reset.
//! Chain-wide shift vectors follow the same order, so a vector is position 0's register (least
//! significant bit first) followed by position 1's and so on.
use crate::cable::{pack_bits, unpack_bits};
use crate::error::{Error, Result};
use crate::statemachine::{JtagSM, JtagState, Register};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainDevice {
    pub position: usize,
    /// `0` for a TAP without an IDCODE register
    pub idcode: u32,
    /// Instruction register length, when known
    pub ir_len: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct Taps {
    taps: Vec<ChainDevice>,
    total_ir: usize,
}

fn first_index_of(bits: &[bool], level: bool) -> Option<usize> {
    bits.iter().position(|b| *b == level)
}

fn to_u32(bits: &[bool]) -> u32 {
    bits.iter()
        .take(32)
        .enumerate()
        .fold(0, |acc, (i, b)| acc | (u32::from(*b) << i))
}

/// Split an IR capture into per-TAP lengths.  Each TAP captures `...01`, so a split is only
/// possible when the capture holds exactly one `1` per TAP and starts with one.
fn split_ir_capture(capture: &[bool], count: usize) -> Option<Vec<usize>> {
    let starts: Vec<usize> = capture
        .iter()
        .enumerate()
        .filter(|(_, b)| **b)
        .map(|(i, _)| i)
        .collect();
    if starts.len() != count || starts.first() != Some(&0) {
        return None;
    }
    let mut lengths: Vec<usize> = starts.windows(2).map(|w| w[1] - w[0]).collect();
    lengths.push(capture.len() - starts[count - 1]);
    (lengths.iter().all(|l| *l >= 2) || count == 1).then_some(lengths)
}

impl Taps {
    /// Reset the chain and work out how many TAPs it has, their IDCODEs and, where the IR
    /// capture pattern allows, their instruction register lengths.  The chain is left in
    /// Test-Logic-Reset.
    pub fn detect(sm: &mut JtagSM, max_devices: usize, max_ir_bits: usize) -> Result<Self> {
        sm.mode_reset()?;

        // After reset every TAP has IDCODE or BYPASS selected
        let id_bits = max_devices * 32 + 1;
        let id_stream = unpack_bits(&sm.read_reg(Register::Data, id_bits)?, id_bits);
        sm.change_mode(JtagState::Idle)?;

        // IR: the captured pattern comes out first while the chain fills with ones, then the
        // position of the first fed zero gives the total length.
        let capture = unpack_bits(&sm.read_reg(Register::Instruction, max_ir_bits)?, max_ir_bits);
        let (zeros, last) = pack_bits(&vec![false; max_ir_bits]);
        let flushed = unpack_bits(
            &sm.read_write_reg(Register::Instruction, &zeros, last, false)?,
            max_ir_bits,
        );
        let total_ir = match first_index_of(&flushed, false) {
            Some(0) => {
                return Err(Error::ChainScanError(
                    "no device responds, TDO reads back the fed zeros immediately".into(),
                ))
            }
            Some(n) => n,
            None => {
                return Err(Error::ChainScanError(format!(
                    "TDO stuck high or instruction registers longer than {} bits",
                    max_ir_bits
                )))
            }
        };
        // Refill with ones so every TAP latches BYPASS
        sm.read_reg(Register::Instruction, total_ir)?;
        sm.change_mode(JtagState::Idle)?;

        // Each bypass register captures 0; count them until the fed ones appear
        let count_bits = max_devices + 1;
        let bypass = unpack_bits(&sm.read_reg(Register::Data, count_bits)?, count_bits);
        let count = match first_index_of(&bypass, true) {
            Some(0) => return Err(Error::ChainScanError("no device found on the chain".into())),
            Some(n) => n,
            None => {
                return Err(Error::ChainScanError(format!(
                    "TDO stuck low or more than {} devices",
                    max_devices
                )))
            }
        };
        sm.mode_reset()?;

        let mut taps = Vec::with_capacity(count);
        let mut pos = 0;
        for position in 0..count {
            let idcode = match id_stream.get(pos) {
                Some(true) => {
                    let id = to_u32(&id_stream[pos..]);
                    if id == u32::MAX {
                        return Err(Error::ChainScanError(format!(
                            "IDCODE stream ended after {} of {} devices",
                            position, count
                        )));
                    }
                    pos += 32;
                    id
                }
                Some(false) => {
                    pos += 1;
                    0
                }
                None => return Err(Error::ChainScanError("IDCODE stream too short".into())),
            };
            taps.push(ChainDevice {
                position,
                idcode,
                ir_len: None,
            });
        }

        match split_ir_capture(&capture[..total_ir], count) {
            Some(lengths) => {
                for (tap, len) in taps.iter_mut().zip(lengths) {
                    tap.ir_len = Some(len);
                }
            }
            None => log::warn!(
                "cannot split {} IR bits between {} devices, lengths left unknown",
                total_ir,
                count
            ),
        }

        for tap in &taps {
            log::info!(
                "position {}: idcode {:#010x}, IR length {:?}",
                tap.position,
                tap.idcode,
                tap.ir_len
            );
        }
        Ok(Self { taps, total_ir })
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn devices(&self) -> &[ChainDevice] {
        &self.taps
    }

    /// Sum of all instruction register lengths, as measured
    pub fn total_ir(&self) -> usize {
        self.total_ir
    }

    pub fn devid(&self, position: usize) -> Result<u32> {
        self.taps
            .get(position)
            .map(|t| t.idcode)
            .ok_or(Error::IndexOutOfRange {
                index: position,
                count: self.taps.len(),
            })
    }

    pub fn ir_len(&self, position: usize) -> Option<usize> {
        self.taps.get(position).and_then(|t| t.ir_len)
    }

    /// Set the IR length of one TAP.  When a single TAP is left unknown afterwards, its length
    /// follows from the measured total.
    pub fn set_ir_len(&mut self, position: usize, len: usize) -> Result<()> {
        let count = self.taps.len();
        let tap = self
            .taps
            .get_mut(position)
            .ok_or(Error::IndexOutOfRange { index: position, count })?;
        if len == 0 {
            return Err(Error::InvalidArgument("IR length must be at least 1".into()));
        }
        let previous = tap.ir_len.replace(len);

        let known: usize = self.taps.iter().filter_map(|t| t.ir_len).sum();
        let unknown = self.taps.iter().filter(|t| t.ir_len.is_none()).count();
        let fits = match unknown {
            0 => known == self.total_ir,
            _ => known + unknown <= self.total_ir,
        };
        if !fits {
            self.taps[position].ir_len = previous;
            return Err(Error::InvalidArgument(format!(
                "IR length {} at position {} does not fit the {} IR bits measured",
                len, position, self.total_ir
            )));
        }
        if unknown == 1 {
            if let Some(last) = self.taps.iter_mut().find(|t| t.ir_len.is_none()) {
                last.ir_len = Some(self.total_ir - known);
            }
        }
        Ok(())
    }

    /// Shift one instruction per TAP and latch them all.  `instructions[i]` must be exactly as
    /// long as the IR of position `i`.
    pub fn load_ir(&self, sm: &mut JtagSM, instructions: &[Vec<bool>]) -> Result<()> {
        if instructions.len() != self.taps.len() {
            return Err(Error::InvalidArgument(format!(
                "{} instructions for {} devices",
                instructions.len(),
                self.taps.len()
            )));
        }
        let mut bits = Vec::with_capacity(self.total_ir);
        for (tap, inst) in self.taps.iter().zip(instructions) {
            match tap.ir_len {
                Some(len) if len == inst.len() => bits.extend_from_slice(inst),
                Some(len) => {
                    return Err(Error::InvalidArgument(format!(
                        "instruction of {} bits for position {} with IR length {}",
                        inst.len(),
                        tap.position,
                        len
                    )))
                }
                None => {
                    return Err(Error::ChainScanError(format!(
                        "IR length of position {} is unknown",
                        tap.position
                    )))
                }
            }
        }
        log::debug!("loading {} IR bits", bits.len());
        sm.scan_reg(Register::Instruction, &bits, false)?;
        Ok(())
    }

    /// Shift `bits` through the data registers of the whole chain and latch them.  Returns the
    /// captured bits when `capture` is set.
    pub fn shift_dr(&self, sm: &mut JtagSM, bits: &[bool], capture: bool) -> Result<Vec<bool>> {
        log::debug!("shifting {} DR bits", bits.len());
        sm.scan_reg(Register::Data, bits, capture)
    }
}
