//! Bit-banged JTAG over `embedded-hal` GPIO pins
use std::fmt::Debug;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin, PinState};

use crate::cable::{pack_bits, unpack_bits, Cable};
use crate::error::{Error, Result};

fn pin_err(e: impl Debug) -> Error {
    Error::cable(format!("GPIO: {:?}", e))
}

pub struct Gpio<Clk, Tdi, Tdo, Tms, Delay>
where
    Clk: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Tms: OutputPin,
    Delay: DelayNs,
{
    half_period: u32,
    delay: Delay,
    clock: Clk,
    tdi: Tdi,
    tdo: Tdo,
    tms: Tms,
}

impl<Clk, Tdi, Tdo, Tms, Delay> Gpio<Clk, Tdi, Tdo, Tms, Delay>
where
    Clk: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Tms: OutputPin,
    Delay: DelayNs,
{
    /// `freq_khz` sets the TCK frequency; the clock starts low
    pub fn new(freq_khz: u32, clock: Clk, tdi: Tdi, tdo: Tdo, tms: Tms, delay: Delay) -> Self {
        let period_ns = 1_000_000 / freq_khz.max(1);
        let half_period = period_ns / 2;
        Gpio {
            half_period,
            delay,
            clock,
            tdi,
            tdo,
            tms,
        }
    }

    /// One TCK cycle.  TDO is sampled on the rising edge.
    fn cycle(&mut self, tms: bool, tdi: bool) -> Result<bool> {
        self.tms.set_state(PinState::from(tms)).map_err(pin_err)?;
        self.tdi.set_state(PinState::from(tdi)).map_err(pin_err)?;

        self.clock.set_high().map_err(pin_err)?;
        let tdo = self.tdo.is_high().map_err(pin_err)?;

        // Finish the clock period
        self.delay.delay_ns(self.half_period);
        self.clock.set_low().map_err(pin_err)?;
        self.delay.delay_ns(self.half_period);
        Ok(tdo)
    }

    fn shift(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        if data.is_empty() || !(1..=8).contains(&bits) {
            return Err(Error::cable("bad shift request"));
        }
        let total = (data.len() - 1) * 8 + bits as usize;
        let mut out = Vec::with_capacity(total);
        for (i, tdi) in unpack_bits(data, total).into_iter().enumerate() {
            // The last bit leaves Shift with TMS high
            out.push(self.cycle(pause_after && i == total - 1, tdi)?);
        }
        if pause_after {
            self.cycle(false, true)?;
        }
        Ok(pack_bits(&out).0)
    }
}

impl<Clk, Tdi, Tdo, Tms, Delay> Cable for Gpio<Clk, Tdi, Tdo, Tms, Delay>
where
    Clk: OutputPin + Send,
    Tdi: OutputPin + Send,
    Tdo: InputPin + Send,
    Tms: OutputPin + Send,
    Delay: DelayNs + Send,
{
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        for t in tms {
            self.cycle(*t, tdi)?;
        }
        Ok(())
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(bits);
        for _ in 0..bits {
            out.push(self.cycle(false, true)?);
        }
        Ok(pack_bits(&out).0)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        self.shift(data, bits, pause_after).map(|_| ())
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        self.shift(data, bits, pause_after)
    }
}
