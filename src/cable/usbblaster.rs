//! Implement the `Cable` trait for Altera USB Blaster and clones
use libftd2xx::{Ftdi, FtdiCommon};

use crate::cable::mpsse::ft_err;
use crate::cable::{pack_bits, unpack_bits, Cable};
use crate::error::{Error, Result};

pub(crate) const USB_BLASTER_DESCRIPTION: &str = "USB-JTAG-IF";

// Bit-bang output byte
const TCK: u8 = 1;
const TMS: u8 = 1 << 1;
const TDI: u8 = 1 << 4;
const READ: u8 = 1 << 6;
// Response byte
const TDO: u8 = 1;

pub struct UsbBlaster {
    ft: Ftdi,
}

impl UsbBlaster {
    pub fn new() -> Result<Self> {
        libftd2xx::set_vid_pid(0x16c0, 0x06ad).map_err(ft_err)?;
        let mut ft = Ftdi::with_description(USB_BLASTER_DESCRIPTION).map_err(ft_err)?;
        ft.purge_all().map_err(ft_err)?;
        Ok(Self { ft })
    }

    /// One TCK cycle: set TMS and TDI with the clock low, then raise it
    fn clock(buf: &mut Vec<u8>, tms: bool, tdi: bool, read: bool) {
        let mut levels = 0;
        if tms {
            levels |= TMS;
        }
        if tdi {
            levels |= TDI;
        }
        buf.push(levels);
        buf.push(levels | TCK | if read { READ } else { 0 });
    }

    fn shift(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        if data.is_empty() || !(1..=8).contains(&bits) {
            return Err(Error::cable("bad shift request"));
        }
        let total = (data.len() - 1) * 8 + bits as usize;
        let mut buf = Vec::with_capacity(total * 2 + 2);
        for (i, tdi) in unpack_bits(data, total).into_iter().enumerate() {
            Self::clock(&mut buf, pause_after && i == total - 1, tdi, true);
        }
        if pause_after {
            Self::clock(&mut buf, false, true, false);
        }

        let mut recv = vec![0; total];
        self.ft.write_all(&buf).map_err(ft_err)?;
        self.ft.read_all(&mut recv).map_err(ft_err)?;
        let bits: Vec<bool> = recv.iter().map(|r| r & TDO != 0).collect();
        Ok(pack_bits(&bits).0)
    }
}

impl Cable for UsbBlaster {
    fn change_mode(&mut self, tms: &[bool], tdi: bool) -> Result<()> {
        let mut buf = Vec::with_capacity(tms.len() * 2);
        for t in tms {
            Self::clock(&mut buf, *t, tdi, false);
        }
        self.ft.write_all(&buf).map_err(ft_err)
    }

    fn read_data(&mut self, bits: usize) -> Result<Vec<u8>> {
        if bits == 0 {
            return Ok(Vec::new());
        }
        let (ones, last) = pack_bits(&vec![true; bits]);
        self.shift(&ones, last, false)
    }

    fn write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<()> {
        self.shift(data, bits, pause_after).map(|_| ())
    }

    fn read_write_data(&mut self, data: &[u8], bits: u8, pause_after: bool) -> Result<Vec<u8>> {
        self.shift(data, bits, pause_after)
    }
}
