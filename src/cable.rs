//! Implementations for different JTAG hardware adapters live here.  Hardware adapters should
//! implement the `Cable` trait.
//!
//! Bit order everywhere is LSB first: bit 0 of byte 0 is the first bit clocked onto TDI, and the
//! first bit sampled from TDO lands in bit 0 of byte 0 of the returned buffer.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;

pub mod gpio;
pub mod sim;
#[cfg(feature = "jlink")]
pub mod jlink;
#[cfg(feature = "ftdi")]
pub mod mpsse;
#[cfg(feature = "ftdi")]
pub mod usbblaster;

pub trait Cable: Send {
    /// Clock out a series of TMS values to change the state of the JTAG chain.  Each element of
    /// `tms` is the level of TMS for one TCK cycle.  `tdi` is the level of TDI during the mode
    /// change.
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()>;

    /// Shift in `bits` bits from the TDO line while clocking out ones.  Should be called with
    /// state = ShiftIR or ShiftDR, and will remain in that state.
    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>>;

    /// Shift out bits on the TDI line.  `bits` is the number of bits to send from the last byte
    /// (1 to 8).  Should be called with state = ShiftIR or ShiftDR.  State won't change unless
    /// `pause_after` is true, in which case it will be PauseIR or PauseDR on exit.
    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()>;

    /// Same as `write_data`, returning the bits shifted out of TDO meanwhile.
    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>>;

    /// Push any queued commands to the adapter.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<C: Cable + ?Sized> Cable for Box<C> {
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        (**self).change_mode(tms, tdi)
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        (**self).read_data(bits)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        (**self).write_data(data, bits, pause_after)
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        (**self).read_write_data(data, bits, pause_after)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// A cable that can be handed to a probe session while the owner keeps a second handle to it.
/// Used for cables that cannot be re-created on every open (GPIO pins) and for the simulator,
/// whose pads the tests poke while a session is running.
pub struct SharedCable<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedCable<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Cable> SharedCable<C> {
    pub fn new(cable: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cable)),
        }
    }

    /// Lock the underlying cable.  A panic on another holder does not make the cable unusable.
    pub fn lock(&self) -> MutexGuard<'_, C> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Cable> Cable for SharedCable<C> {
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        self.lock().change_mode(tms, tdi)
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        self.lock().read_data(bits)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        self.lock().write_data(data, bits, pause_after)
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        self.lock().read_write_data(data, bits, pause_after)
    }

    fn flush(&mut self) -> Result<()> {
        self.lock().flush()
    }
}

/// Pack a bit sequence into LSB-first bytes.  Returns the bytes and the number of valid bits in
/// the last byte (8 for a full byte), the shape `write_data` expects.  An empty sequence packs
/// to no bytes.
pub fn pack_bits(bits: &[bool]) -> (Vec<u8>, u8) {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    let last = match bits.len() % 8 {
        0 => 8,
        n => n as u8,
    };
    (bytes, last)
}

/// Inverse of `pack_bits`: take `count` bits out of LSB-first bytes.  Missing bytes read as zero.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_partial_byte() {
        let bits = [true, false, true, true, false, false, false, false, true, true];
        let (bytes, last) = pack_bits(&bits);
        assert_eq!(bytes, vec![0b0000_1101, 0b11]);
        assert_eq!(last, 2);
        assert_eq!(unpack_bits(&bytes, bits.len()), bits.to_vec());
    }

    #[test]
    fn pack_whole_bytes() {
        let (bytes, last) = pack_bits(&[true; 16]);
        assert_eq!(bytes, vec![0xff, 0xff]);
        assert_eq!(last, 8);
    }

    #[test]
    fn unpack_past_end_is_zero() {
        assert_eq!(unpack_bits(&[0x01], 10)[8..], [false, false]);
    }
}
