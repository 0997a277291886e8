//! Implement the `Cable` trait for "jlink" compatible hardware adapters
use std::time::Duration;

use rusb::constants::LIBUSB_CLASS_VENDOR_SPEC;
use rusb::{Device, DeviceHandle, Direction, GlobalContext};

use crate::cable::{pack_bits, Cable};
use crate::error::{Error, Result};
use crate::probe::ProbeDriver;

const JLINK_VID: u16 = 0x1366;

const CMD_SET_SPEED: u8 = 0x05;
const CMD_GET_STATE: u8 = 0x07;
const CMD_SELECT_IF: u8 = 0xc7;
const CMD_HW_JTAG2: u8 = 0xcd;
const CMD_HW_RESET0: u8 = 0xdc;
const CMD_HW_RESET1: u8 = 0xdd;
const CMD_HW_TRST0: u8 = 0xde;
const CMD_HW_TRST1: u8 = 0xdf;

/// Largest TMS/TDI payload of one JTAG command, in bytes
const MAX_SEQUENCE_BYTES: usize = 384;
/// Below this target voltage (mV) the target is taken to be unpowered
const MIN_VREF_MV: u16 = 1500;

fn usb_err(e: rusb::Error) -> Error {
    Error::cable(e)
}

pub struct JLink {
    device: DeviceHandle<GlobalContext>,
    // queued bytes to send
    buffer: Vec<u8>,
    // number of bytes we'll receive after sending the above
    recv_bytes: usize,
    read_endpoint: u8,
    write_endpoint: u8,
}

impl JLink {
    /// Open the first J-Link attached
    pub fn new(clock: u32) -> Result<Self> {
        let device = attached()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProbeUnavailable("no J-Link attached".into()))?;
        Self::open(device, clock)
    }

    pub fn open(device: Device<GlobalContext>, clock: u32) -> Result<Self> {
        let descriptor = device.active_config_descriptor().map_err(usb_err)?;
        for i in descriptor.interfaces() {
            for d in i.descriptors() {
                if d.class_code() != LIBUSB_CLASS_VENDOR_SPEC
                    || d.sub_class_code() != LIBUSB_CLASS_VENDOR_SPEC
                    || d.num_endpoints() < 2
                {
                    continue;
                }

                let mut read_endpoint = None;
                let mut write_endpoint = None;
                for e in d.endpoint_descriptors() {
                    match e.direction() {
                        Direction::In => read_endpoint = Some(e.address()),
                        Direction::Out => write_endpoint = Some(e.address()),
                    }
                }
                let (Some(read_endpoint), Some(write_endpoint)) = (read_endpoint, write_endpoint) else {
                    continue;
                };

                let mut handle = device.open().map_err(usb_err)?;
                handle.claim_interface(d.interface_number()).map_err(usb_err)?;

                // Drain anything left over from a previous user
                let mut buf = [0; 2];
                let _ = handle.read_bulk(read_endpoint, &mut buf, Duration::from_millis(10));

                let mut jlink = Self {
                    device: handle,
                    buffer: vec![],
                    recv_bytes: 0,
                    read_endpoint,
                    write_endpoint,
                };

                jlink.get_status()?;
                jlink.set_clock(clock);
                jlink.set_interface(0)?;
                jlink.deassert_trst();
                jlink.deassert_srst();
                jlink.flush()?;

                return Ok(jlink);
            }
        }
        Err(Error::ProbeUnavailable("J-Link has no JTAG interface".into()))
    }

    fn send_command(&mut self, cmd: u8, data: &[u8]) {
        self.buffer.push(cmd);
        self.buffer.extend_from_slice(data);
    }

    /// Submit pending commands and read `len` bytes of response, after discarding the responses
    /// to earlier commands nobody asked for
    fn transfer(&mut self, len: usize) -> Result<Vec<u8>> {
        if !self.buffer.is_empty() {
            let wr = self
                .device
                .write_bulk(self.write_endpoint, &self.buffer, Duration::from_millis(100))
                .map_err(usb_err)?;
            if wr != self.buffer.len() {
                return Err(Error::cable(format!("short USB write: {} of {} bytes", wr, self.buffer.len())));
            }
            self.buffer.clear();
        }

        let mut recv_bytes = len + self.recv_bytes;
        let mut data = vec![];

        while recv_bytes > 0 {
            let mut buffer = vec![0; recv_bytes];
            let len = self
                .device
                .read_bulk(self.read_endpoint, &mut buffer, Duration::from_millis(100))
                .map_err(usb_err)?;
            buffer.truncate(len);
            data.append(&mut buffer);
            recv_bytes -= len.min(recv_bytes);
        }

        let data = data.split_off(self.recv_bytes.min(data.len()));
        self.recv_bytes = 0;
        Ok(data)
    }

    /// Read the adapter state; fails if the target voltage is missing
    pub fn get_status(&mut self) -> Result<Vec<u8>> {
        self.send_command(CMD_GET_STATE, &[]);
        let data = self.transfer(8)?;

        let vref = match data.as_slice() {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => return Err(Error::cable("short status response")),
        };
        log::debug!("J-Link target voltage {} mV", vref);
        if vref < MIN_VREF_MV {
            return Err(Error::ProbeUnavailable(format!(
                "target voltage {} mV too low, possibly unpowered or disconnected",
                vref
            )));
        }
        Ok(data)
    }

    pub fn set_clock(&mut self, clock: u32) {
        let khz = (clock / 1000).clamp(1, u16::MAX as u32) as u16;
        self.send_command(CMD_SET_SPEED, &khz.to_le_bytes());
    }

    pub fn set_interface(&mut self, intf: u8) -> Result<()> {
        self.send_command(CMD_SELECT_IF, &[intf]);
        self.transfer(4).map(|_| ())
    }

    pub fn assert_srst(&mut self) {
        self.send_command(CMD_HW_RESET0, &[]);
    }

    pub fn deassert_srst(&mut self) {
        self.send_command(CMD_HW_RESET1, &[]);
    }

    pub fn assert_trst(&mut self) {
        self.send_command(CMD_HW_TRST0, &[]);
    }

    pub fn deassert_trst(&mut self) {
        self.send_command(CMD_HW_TRST1, &[]);
    }

    /// Queue TMS/TDI sequences, split to fit the command size.  Returns the number of TDO bytes
    /// the adapter will answer with.
    fn tap_sequence(&mut self, tms: &[u8], tdi: &[u8], mut bits: usize) -> usize {
        let mut bytes = 0;
        for (tms, tdi) in tms.chunks(MAX_SEQUENCE_BYTES).zip(tdi.chunks(MAX_SEQUENCE_BYTES)) {
            let chunk_bits = bits.min(tms.len() * 8);
            bits -= chunk_bits;
            let mut cmd = (chunk_bits as u16).to_le_bytes().to_vec();
            cmd.extend_from_slice(tms);
            cmd.extend_from_slice(tdi);
            self.send_command(CMD_HW_JTAG2, &cmd);
            bytes += tms.len();
        }
        bytes
    }

    fn send_tdi(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<usize> {
        if data.is_empty() || !(1..=8).contains(&bits) {
            return Err(Error::cable("bad shift request"));
        }
        let mut total_bits = (data.len() - 1) * 8 + bits as usize;

        let mut tms = vec![0; data.len()];
        let mut data = data.to_vec();

        if pause_after {
            let len = tms.len();
            tms[len - 1] |= 1 << (bits - 1);

            // Add an extra clock for the transition to pause state
            if total_bits % 8 == 0 {
                data.push(0xff);
                tms.push(0);
            }
            total_bits += 1;
        }

        Ok(self.tap_sequence(&tms, &data, total_bits))
    }
}

impl Cable for JLink {
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        if tms.is_empty() {
            return Ok(());
        }
        let (buf, _) = pack_bits(tms);
        let tdi_bytes = vec![if tdi { 0xff } else { 0 }; buf.len()];

        // We don't care about the returned bytes, so read them whenever we do the next read
        let bytes = self.tap_sequence(&buf, &tdi_bytes, tms.len());
        self.recv_bytes += bytes;
        Ok(())
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        if bits == 0 {
            return Ok(Vec::new());
        }
        let (buf, last) = pack_bits(&vec![true; bits]);
        self.read_write_data(&buf, last, false)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        let bytes = self.send_tdi(data, bits, pause_after)?;
        self.recv_bytes += bytes;
        Ok(())
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        let bytes = self.send_tdi(data, bits, pause_after)?;
        let mut out = self.transfer(bytes)?;
        // Drop the pause clock's byte and bit
        out.truncate(data.len());
        if let Some(last) = out.last_mut() {
            if bits < 8 {
                *last &= (1 << bits) - 1;
            }
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<()> {
        self.transfer(0).map(|_| ())
    }
}

/// Attached J-Links in a stable order
fn attached() -> Result<Vec<Device<GlobalContext>>> {
    let mut found = vec![];
    for device in rusb::devices().map_err(usb_err)?.iter() {
        let descriptor = device.device_descriptor().map_err(usb_err)?;
        if descriptor.vendor_id() == JLINK_VID {
            found.push(device);
        }
    }
    found.sort_by_key(|d| (d.bus_number(), d.address()));
    Ok(found)
}

/// Enumerates SEGGER J-Links over libusb.  The first is `USB JLINK ARM`, the rest are numbered.
pub struct JLinkDriver;

impl JLinkDriver {
    fn probe_name(index: usize) -> String {
        match index {
            0 => "USB JLINK ARM".to_string(),
            n => format!("USB JLINK ARM #{}", n),
        }
    }
}

impl ProbeDriver for JLinkDriver {
    fn name(&self) -> &str {
        "jlink"
    }

    fn probe_names(&self) -> Result<Vec<String>> {
        Ok((0..attached()?.len()).map(Self::probe_name).collect())
    }

    fn open(&self, index: usize, clock_hz: u32) -> Result<Box<dyn Cable>> {
        let device = attached()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::ProbeUnavailable(Self::probe_name(index)))?;
        Ok(Box::new(JLink::open(device, clock_hz)?))
    }
}
