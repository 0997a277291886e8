//! Implement the `Cable` trait for "jtagkey" compatible hardware adapters like the Bus Blaster
use std::fmt::Debug;
use std::time::Duration;

use ftdi_mpsse::{ClockTMS, ClockTMSOut};
use libftd2xx::{ClockBits, ClockBitsOut, ClockData, ClockDataOut};
use libftd2xx::{Ft2232h, Ftdi, FtdiCommon, FtdiMpsse, MpsseCmdBuilder, MpsseCmdExecutor};

use crate::cable::usbblaster::{UsbBlaster, USB_BLASTER_DESCRIPTION};
use crate::cable::{pack_bits, unpack_bits, Cable};
use crate::error::{Error, Result};
use crate::probe::ProbeDriver;

/// Commands are queued until this many bytes are pending
const BUFFER_LIMIT: usize = 4096;

pub(crate) fn ft_err(e: impl Debug) -> Error {
    Error::cable(format!("{:?}", e))
}

pub struct Mpsse<T> {
    ft: T,
    // Commands to send to the adapter
    buffer: Vec<u8>,
}

impl<T: FtdiMpsse + MpsseCmdExecutor> Mpsse<T>
where
    <T as MpsseCmdExecutor>::Error: Debug,
{
    pub fn new(mut ft: T, clock: u32) -> Result<Self> {
        ft.initialize_mpsse_default().map_err(ft_err)?;
        ft.set_clock(clock).map_err(ft_err)?;

        let builder = MpsseCmdBuilder::new()
            .disable_3phase_data_clocking()
            .disable_adaptive_data_clocking();
        ft.send(builder.as_slice()).map_err(ft_err)?;

        Ok(Self { ft, buffer: vec![] })
    }

    fn queue(&mut self, builder: MpsseCmdBuilder) -> Result<()> {
        if builder.as_slice().len() + self.buffer.len() > BUFFER_LIMIT {
            self.flush()?;
        }
        self.buffer.extend_from_slice(builder.as_slice());
        Ok(())
    }

    /// Send queued commands followed by `builder` and read `bytes` bytes of response
    fn transfer(&mut self, builder: MpsseCmdBuilder, bytes: usize) -> Result<Vec<u8>> {
        let mut cmd = std::mem::take(&mut self.buffer);
        cmd.extend_from_slice(builder.send_immediate().as_slice());
        let mut buf = vec![0; bytes];
        self.ft.xfer(&cmd, &mut buf).map_err(ft_err)?;
        Ok(buf)
    }

    /// Clock out all but the last bit of `data`, then the last bit together with TMS.  Returns
    /// the command and how many bytes of response it produces when `read` is set.
    fn shift_command(data: &[u8], bits: u8, pause_after: bool, read: bool) -> Result<(MpsseCmdBuilder, usize)> {
        let Some((&last_byte, whole)) = data.split_last() else {
            return Err(Error::cable("no data to shift"));
        };
        if !(1..=8).contains(&bits) {
            return Err(Error::cable(format!("cannot shift {} bits of the last byte", bits)));
        }
        let mut builder = MpsseCmdBuilder::new();
        let mut responses = 0;

        // The last bit goes out with clock_tms so TMS can rise with it
        let partial = bits - 1;
        if !whole.is_empty() {
            builder = if read {
                builder.clock_data(ClockData::LsbPosIn, whole)
            } else {
                builder.clock_data_out(ClockDataOut::LsbNeg, whole)
            };
            responses += whole.len();
        }
        if partial > 0 {
            builder = if read {
                builder.clock_bits(ClockBits::LsbPosIn, last_byte, partial)
            } else {
                builder.clock_bits_out(ClockBitsOut::LsbNeg, last_byte, partial)
            };
            responses += 1;
        }
        let last_bit = last_byte & (1 << partial) != 0;
        let tms = u8::from(pause_after);
        builder = if read {
            builder.clock_tms(ClockTMS::NegTMSPosTDO, tms, last_bit, 1)
        } else {
            builder.clock_tms_out(ClockTMSOut::NegEdge, tms, last_bit, 1)
        };
        responses += 1;
        if pause_after {
            builder = builder.clock_tms_out(ClockTMSOut::NegEdge, 0, true, 1);
        }
        Ok((builder, if read { responses } else { 0 }))
    }
}

impl<T: FtdiMpsse + MpsseCmdExecutor + Send> Cable for Mpsse<T>
where
    <T as MpsseCmdExecutor>::Error: Debug,
{
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        let mut builder = MpsseCmdBuilder::new();
        // clock_tms_out carries at most 7 TMS bits per command
        for chunk in tms.chunks(7) {
            let (bits, _) = pack_bits(chunk);
            builder = builder.clock_tms_out(ClockTMSOut::NegEdge, bits[0], tdi, chunk.len() as u8);
        }
        self.queue(builder)
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        let bytes = bits / 8;
        let rem = (bits % 8) as u8;
        let mut builder = MpsseCmdBuilder::new();
        if bytes > 0 {
            builder = builder.clock_data(ClockData::LsbPosIn, &vec![0xff; bytes]);
        }
        if rem > 0 {
            builder = builder.clock_bits(ClockBits::LsbPosIn, 0xff, rem);
        }
        let mut buf = self.transfer(builder, bytes + usize::from(rem > 0))?;
        if rem > 0 {
            // Partial bytes arrive in the top bits
            if let Some(last) = buf.last_mut() {
                *last >>= 8 - rem;
            }
        }
        Ok(buf)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        let (builder, _) = Self::shift_command(data, bits, pause_after, false)?;
        self.queue(builder)
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        let (builder, responses) = Self::shift_command(data, bits, pause_after, true)?;
        let resp = self.transfer(builder, responses)?;

        let whole = data.len() - 1;
        let partial = bits - 1;
        let mut out = unpack_bits(&resp[..whole], whole * 8);
        if partial > 0 {
            out.extend(unpack_bits(&[resp[whole] >> (8 - partial)], partial as usize));
        }
        out.push(resp[resp.len() - 1] & 0x80 != 0);
        Ok(pack_bits(&out).0)
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.ft.send(&self.buffer).map_err(ft_err)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

// Lower pins
const PIN_TCK: u8 = 1;
const PIN_TDI: u8 = 1 << 1;
const PIN_TMS: u8 = 1 << 3;
const PIN_N_OE: u8 = 1 << 4;
const LOWER_OUTPUT_PINS: u8 = PIN_TCK | PIN_TDI | PIN_TMS | PIN_N_OE;

// Upper pins
const PIN_N_TRST: u8 = 1;
const PIN_N_SRST: u8 = 1 << 1;
const PIN_N_TRST_OE: u8 = 1 << 2;
const PIN_N_SRST_OE: u8 = 1 << 3;
const UPPER_OUTPUT_PINS: u8 = PIN_N_TRST | PIN_N_SRST | PIN_N_TRST_OE | PIN_N_SRST_OE;

pub struct JtagKey {
    ft: Mpsse<Ft2232h>,
}

impl JtagKey {
    /// Open the FT2232 interface with USB description `description` (FT2232-based adapters have
    /// an "A" and a "B" interface).  `clock` is the TCK frequency in hertz.
    pub fn with_description(description: &str, clock: u32) -> Result<Self> {
        let ft = Ftdi::with_description(description).map_err(ft_err)?;
        let ft = Ft2232h::try_from(ft).map_err(ft_err)?;
        let mut ft = Mpsse::new(ft, clock)?;
        ft.ft.set_latency_timer(Duration::from_millis(0)).map_err(ft_err)?;
        ft.ft
            .set_gpio_upper(PIN_N_TRST | PIN_N_SRST, UPPER_OUTPUT_PINS)
            .map_err(ft_err)?;

        let builder = MpsseCmdBuilder::new().set_gpio_lower(PIN_TMS, LOWER_OUTPUT_PINS);
        ft.ft.send(builder.as_slice()).map_err(ft_err)?;

        Ok(JtagKey { ft })
    }

    /// Open interface A or B of a "Dual RS232-HS" adapter
    pub fn new(clock: u32, primary: bool) -> Result<Self> {
        let description = if primary {
            "Dual RS232-HS A"
        } else {
            "Dual RS232-HS B"
        };
        Self::with_description(description, clock)
    }

    /// JtagKey adapters implement the optional SRST signal.  This function puts the system in
    /// reset.
    pub fn assert_srst(&mut self) -> Result<()> {
        self.ft
            .ft
            .set_gpio_upper(PIN_N_TRST, UPPER_OUTPUT_PINS)
            .map_err(ft_err)
    }

    /// Take the system out of reset
    pub fn deassert_srst(&mut self) -> Result<()> {
        self.ft
            .ft
            .set_gpio_upper(PIN_N_TRST | PIN_N_SRST, UPPER_OUTPUT_PINS)
            .map_err(ft_err)
    }
}

impl Cable for JtagKey {
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        self.ft.change_mode(tms, tdi)
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        self.ft.read_data(bits)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        self.ft.write_data(data, bits, pause_after)
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        self.ft.read_write_data(data, bits, pause_after)
    }

    fn flush(&mut self) -> Result<()> {
        self.ft.flush()
    }
}

/// Enumerates FTDI-based adapters by USB description: `USB-JTAG-IF` is a USB Blaster, every
/// other description ending in ` A` is taken to be the JTAG interface of an FT2232 adapter.
pub struct FtdiDriver;

impl ProbeDriver for FtdiDriver {
    fn name(&self) -> &str {
        "ftdi"
    }

    fn probe_names(&self) -> Result<Vec<String>> {
        let devices = libftd2xx::list_devices().map_err(ft_err)?;
        let mut names: Vec<String> = devices
            .into_iter()
            .map(|d| d.description)
            .filter(|d| d == USB_BLASTER_DESCRIPTION || d.ends_with(" A"))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn open(&self, index: usize, clock_hz: u32) -> Result<Box<dyn Cable>> {
        let name = self
            .probe_names()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::ProbeUnavailable(format!("no FTDI probe {}", index)))?;
        log::debug!("opening FTDI adapter {}", name);
        if name == USB_BLASTER_DESCRIPTION {
            Ok(Box::new(UsbBlaster::new()?))
        } else {
            Ok(Box::new(JtagKey::with_description(&name, clock_hz)?))
        }
    }
}
