//! Binding of BSDL descriptions to chain positions.
use std::sync::Arc;

use crate::bsdl::{BsdlDescription, PinDef, PinDirection};
use crate::error::{Error, Result};
use crate::scan::ScanMode;
use crate::taps::Taps;

/// What `attach` does when a description's ID pattern does not match the scanned IDCODE
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttachPolicy {
    /// Refuse with `DescriptionMismatch`
    #[default]
    Strict,
    /// Attach anyway and log a warning
    Permissive,
}

/// Refers to a bound device by its chain position.  The handle carries no identity of its own:
/// after `scan_init_chain` or a new `attach` at the same position it refers to whatever is bound
/// there now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    pub position: usize,
}

/// A chain position with a description attached, plus its boundary register images
#[derive(Debug)]
pub(crate) struct BoundDevice {
    pub position: usize,
    pub description: Arc<BsdlDescription>,
    pub mode: ScanMode,
    /// Register to shift in on the next scan
    pub pending: Vec<bool>,
    /// Register shifted in by the last successful scan
    pub applied: Vec<bool>,
    /// Register captured by the last successful scan
    pub captured: Option<Vec<bool>>,
    pub applied_mode: Option<ScanMode>,
}

impl BoundDevice {
    /// Check `description` against the TAP at `position` and build the binding
    pub fn bind(
        taps: &mut Taps,
        description: Arc<BsdlDescription>,
        position: usize,
        policy: AttachPolicy,
    ) -> Result<Self> {
        let idcode = taps.devid(position).map_err(|_| Error::PositionOutOfRange {
            position,
            count: taps.len(),
        })?;

        let mismatch = |reason: String| Error::DescriptionMismatch {
            entity: description.entity().to_string(),
            position,
            reason,
        };

        if let Some(pattern) = description.idcode() {
            if !pattern.matches(idcode) {
                let reason = format!("IDCODE {:#010x} does not match pattern {}", idcode, pattern);
                match policy {
                    AttachPolicy::Strict => return Err(mismatch(reason)),
                    AttachPolicy::Permissive => {
                        log::warn!("attaching {} at position {} anyway: {}", description.entity(), position, reason)
                    }
                }
            }
        } else if policy == AttachPolicy::Strict {
            return Err(mismatch("description has no IDCODE_REGISTER".into()));
        }

        let ir_len = description.instruction_length();
        match taps.ir_len(position) {
            Some(len) if len != ir_len => {
                return Err(mismatch(format!(
                    "instruction length {} but {} bits detected",
                    ir_len, len
                )))
            }
            Some(_) => {}
            None => taps
                .set_ir_len(position, ir_len)
                .map_err(|e| mismatch(e.to_string()))?,
        }

        let safe = description.safe_register();
        log::info!("attached {} at position {}", description.entity(), position);
        Ok(Self {
            position,
            description,
            mode: ScanMode::Passive,
            pending: safe.clone(),
            applied: safe,
            captured: None,
            applied_mode: None,
        })
    }

    pub fn pin_count(&self) -> usize {
        self.description.pins().len()
    }

    pub fn pin_by_index(&self, index: usize) -> Result<&PinDef> {
        self.description.pins().get(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.pin_count(),
        })
    }

    pub fn pin_index(&self, name: &str) -> Result<usize> {
        self.description
            .pin_index(name)
            .ok_or_else(|| Error::UnknownPinName(name.to_string()))
    }

    pub fn pin(&self, name: &str) -> Result<&PinDef> {
        self.pin_index(name).and_then(|i| self.pin_by_index(i))
    }

    pub fn properties(&self, index: usize) -> Result<(String, PinDirection)> {
        self.pin_by_index(index).map(|p| (p.name.clone(), p.direction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsdl;
    use crate::cable::sim::{SimChain, SimTap};
    use crate::statemachine::JtagSM;

    const PART: &str = r#"
entity PART is
  port (TCK, TMS, TDI : in bit; TDO : out bit; A : inout bit);
  attribute INSTRUCTION_LENGTH of PART : entity is 3;
  attribute INSTRUCTION_OPCODE of PART : entity is "BYPASS (111), EXTEST (000), SAMPLE (010)";
  attribute IDCODE_REGISTER of PART : entity is "0001" & "0000000000000011" & "00000000001" & "1";
  attribute BOUNDARY_LENGTH of PART : entity is 3;
  attribute BOUNDARY_REGISTER of PART : entity is
    "0 (BC_1, A, INPUT, X), 1 (BC_1, A, OUTPUT3, X, 2, 0, Z), 2 (BC_1, *, CONTROL, 0)";
end PART;
"#;

    fn chain(ir: usize, idcode: u32) -> Taps {
        let chain = SimChain::new(vec![SimTap::with_idcode(ir, idcode), SimTap::bypass(2)]);
        let mut sm = JtagSM::new(Box::new(chain)).unwrap();
        Taps::detect(&mut sm, 8, 64).unwrap()
    }

    fn part() -> Arc<BsdlDescription> {
        Arc::new(bsdl::parse(PART).unwrap())
    }

    #[test]
    fn strict_match() {
        let mut taps = chain(3, 0x1000_3003);
        let dev = BoundDevice::bind(&mut taps, part(), 0, AttachPolicy::Strict).unwrap();
        assert_eq!(dev.pin_count(), 5);
        assert_eq!(dev.properties(4).unwrap(), ("A".to_string(), PinDirection::Bidirectional));
        assert!(matches!(dev.properties(5), Err(Error::IndexOutOfRange { index: 5, count: 5 })));
        assert_eq!(dev.pin_index("A").unwrap(), 4);
        assert!(matches!(dev.pin_index("a"), Err(Error::UnknownPinName(_))));
        assert!(dev.captured.is_none());
    }

    #[test]
    fn strict_mismatch() {
        let mut taps = chain(3, 0x1000_3005);
        let err = BoundDevice::bind(&mut taps, part(), 0, AttachPolicy::Strict).unwrap_err();
        assert!(matches!(err, Error::DescriptionMismatch { position: 0, .. }));
    }

    #[test]
    fn permissive_mismatch() {
        let mut taps = chain(3, 0x1000_3005);
        assert!(BoundDevice::bind(&mut taps, part(), 0, AttachPolicy::Permissive).is_ok());
    }

    fn part_without_idcode() -> Arc<BsdlDescription> {
        let text: String = PART
            .lines()
            .filter(|l| !l.contains("IDCODE_REGISTER"))
            .collect::<Vec<_>>()
            .join("\n");
        let description = bsdl::parse(&text).unwrap();
        assert!(description.idcode().is_none());
        Arc::new(description)
    }

    #[test]
    fn strict_rejects_missing_idcode() {
        let mut taps = chain(3, 0x1000_3003);
        let err = BoundDevice::bind(&mut taps, part_without_idcode(), 0, AttachPolicy::Strict).unwrap_err();
        match err {
            Error::DescriptionMismatch { position: 0, reason, .. } => {
                assert!(reason.contains("IDCODE_REGISTER"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn permissive_accepts_missing_idcode() {
        let mut taps = chain(3, 0x1000_3003);
        let dev = BoundDevice::bind(&mut taps, part_without_idcode(), 0, AttachPolicy::Permissive).unwrap();
        assert_eq!(dev.position, 0);
        assert_eq!(dev.pin_count(), 5);
    }

    #[test]
    fn wrong_ir_length() {
        let mut taps = chain(4, 0x1000_3003);
        let err = BoundDevice::bind(&mut taps, part(), 0, AttachPolicy::Permissive).unwrap_err();
        assert!(matches!(err, Error::DescriptionMismatch { .. }));
    }

    #[test]
    fn position_out_of_range() {
        let mut taps = chain(3, 0x1000_3003);
        let err = BoundDevice::bind(&mut taps, part(), 2, AttachPolicy::Strict).unwrap_err();
        assert!(matches!(err, Error::PositionOutOfRange { position: 2, count: 2 }));
    }
}
