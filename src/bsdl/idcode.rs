use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};

/// A 32-bit IDCODE with don't-care bits.  Bits cleared in `mask` are ignored when matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdCodePattern {
    value: u32,
    mask: u32,
}

impl IdCodePattern {
    pub fn new(value: u32, mask: u32) -> Self {
        Self {
            value: value & mask,
            mask,
        }
    }

    /// A pattern with every bit significant
    pub fn exact(value: u32) -> Self {
        Self::new(value, u32::MAX)
    }

    /// Parse the bit string of an `IDCODE_REGISTER` attribute: 32 characters of `0`, `1` or `X`,
    /// most significant bit first.  Whitespace is ignored.
    pub fn from_bsdl_bits(bits: &str) -> Result<Self> {
        let bits: Vec<char> = bits.chars().filter(|c| !c.is_whitespace()).collect();
        if bits.len() != 32 {
            return Err(Error::bsdl(0, format!("IDCODE_REGISTER has {} bits, expected 32", bits.len())));
        }
        let mut value = 0;
        let mut mask = 0;
        for c in bits {
            value <<= 1;
            mask <<= 1;
            match c {
                '0' => mask |= 1,
                '1' => {
                    value |= 1;
                    mask |= 1;
                }
                'x' | 'X' => {}
                c => return Err(Error::bsdl(0, format!("invalid IDCODE bit `{}`", c))),
            }
        }
        Ok(Self::new(value, mask))
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Masked comparison against a scanned IDCODE
    pub fn matches(&self, idcode: u32) -> bool {
        idcode & self.mask == self.value
    }

    /// Bits 31..28
    pub fn version(&self) -> Option<u8> {
        (self.mask >> 28 == 0xf).then_some((self.value >> 28) as u8)
    }

    /// Bits 27..12
    pub fn part_number(&self) -> Option<u16> {
        ((self.mask >> 12) & 0xffff == 0xffff).then_some((self.value >> 12) as u16)
    }

    /// JEDEC manufacturer code, bits 11..1
    pub fn manufacturer(&self) -> Option<u16> {
        ((self.mask >> 1) & 0x7ff == 0x7ff).then_some(((self.value >> 1) & 0x7ff) as u16)
    }
}

impl From<u32> for IdCodePattern {
    fn from(value: u32) -> Self {
        Self::exact(value)
    }
}

/// Accepts hex nibbles with `*` or `X` for a don't-care nibble, e.g. `0x4BA0*477`.
impl FromStr for IdCodePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() || digits.len() > 8 {
            return Err(Error::InvalidArgument(format!("bad IDCODE pattern `{}`", s)));
        }
        let mut value = 0u32;
        let mut mask = 0u32;
        for c in digits.chars() {
            value <<= 4;
            mask <<= 4;
            if c == '*' || c == 'x' || c == 'X' {
                continue;
            }
            let nibble = c
                .to_digit(16)
                .ok_or_else(|| Error::InvalidArgument(format!("bad IDCODE pattern `{}`", s)))?;
            value |= nibble;
            mask |= 0xf;
        }
        // Leading nibbles that were not written are significant zeros
        let written = digits.len() as u32 * 4;
        if written < 32 {
            mask |= u32::MAX << written;
        }
        Ok(Self::new(value, mask))
    }
}

impl fmt::Display for IdCodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nibbles_whole = (0..8).all(|i| matches!((self.mask >> (i * 4)) & 0xf, 0 | 0xf));
        if !nibbles_whole {
            return write!(f, "0x{:08X}/0x{:08X}", self.value, self.mask);
        }
        write!(f, "0x")?;
        for i in (0..8).rev() {
            if (self.mask >> (i * 4)) & 0xf == 0 {
                write!(f, "*")?;
            } else {
                write!(f, "{:X}", (self.value >> (i * 4)) & 0xf)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bsdl_bits_with_dont_care() {
        let p = IdCodePattern::from_bsdl_bits("0100 1011 1010 0000 XXXX 0100 0111 0111").unwrap();
        assert_eq!(p.mask(), 0xffff_0fff);
        assert!(p.matches(0x4BA0_0477));
        assert!(p.matches(0x4BA0_F477));
        assert!(!p.matches(0x4BA1_0477));
        assert_eq!(p.to_string(), "0x4BA0*477");
    }

    #[test]
    fn nibble_pattern_round_trip() {
        let p: IdCodePattern = "0x4BA0*477".parse().unwrap();
        assert_eq!(p, IdCodePattern::new(0x4BA0_0477, 0xffff_0fff));
        assert_eq!(p.to_string(), "0x4BA0*477");
    }

    #[test]
    fn short_pattern_is_zero_extended() {
        let p: IdCodePattern = "477".parse().unwrap();
        assert!(p.matches(0x477));
        assert!(!p.matches(0x1477));
    }

    #[test]
    fn partial_nibble_masks_display_with_mask() {
        let p = IdCodePattern::new(0x0641_3041, 0x0fff_ffff);
        assert_eq!(p.to_string(), "0x*6413041");
        let p = IdCodePattern::new(0x1, 0x1);
        assert_eq!(p.to_string(), "0x00000001/0x00000001");
    }

    #[test]
    fn fields() {
        let p = IdCodePattern::exact(0x4BA0_0477);
        assert_eq!(p.version(), Some(4));
        assert_eq!(p.part_number(), Some(0xBA00));
        assert_eq!(p.manufacturer(), Some(0x23B));
        let masked: IdCodePattern = "0x*BA00477".parse().unwrap();
        assert_eq!(masked.version(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!("0xG".parse::<IdCodePattern>().is_err());
        assert!("0x123456789".parse::<IdCodePattern>().is_err());
        assert!(IdCodePattern::from_bsdl_bits("0101").is_err());
    }
}
