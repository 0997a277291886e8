//! Probe enumeration and exclusive access.
//!
//! Each adapter family is a `ProbeDriver`.  `ProbeTransport` asks every registered driver for its
//! probes, gives each one a `ProbeId` and hands out `ProbeHandle`s.  A probe can be held by one
//! handle at a time; the claim is dropped by `ProbeHandle::close` or when the handle goes away.
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cable::{Cable, SharedCable};
use crate::error::{Error, Result};
use crate::statemachine::JtagSM;

/// Identifies a probe within one `ProbeTransport`: driver index in the high bits, probe index
/// within that driver in the low 8 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub u32);

impl ProbeId {
    pub fn new(driver: usize, probe: usize) -> Self {
        ProbeId(((driver as u32) << 8) | (probe as u32 & 0xff))
    }

    pub fn driver(&self) -> usize {
        (self.0 >> 8) as usize
    }

    pub fn probe(&self) -> usize {
        (self.0 & 0xff) as usize
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

pub trait ProbeDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Display names of the probes currently attached, in a stable order
    fn probe_names(&self) -> Result<Vec<String>>;

    /// Open the probe at `index` in the `probe_names` list
    fn open(&self, index: usize, clock_hz: u32) -> Result<Box<dyn Cable>>;
}

type CableFactory = Box<dyn Fn(u32) -> Result<Box<dyn Cable>> + Send + Sync>;

/// A driver for cables the application constructs itself, such as a GPIO bit-bang cable or a
/// simulated chain.
#[derive(Default)]
pub struct FixedDriver {
    name: String,
    probes: Vec<(String, CableFactory)>,
}

impl FixedDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probes: Vec::new(),
        }
    }

    /// Register a probe whose cable is built on every open
    pub fn add_factory<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(u32) -> Result<Box<dyn Cable>> + Send + Sync + 'static,
    {
        self.probes.push((name.into(), Box::new(factory)));
        self
    }

    /// Register a probe backed by one cable instance.  Every open hands out a clone of the
    /// shared handle, so the caller keeps access to the cable.
    pub fn add_shared<C: Cable + 'static>(&mut self, name: impl Into<String>, cable: SharedCable<C>) -> &mut Self {
        self.add_factory(name, move |_| Ok(Box::new(cable.clone()) as Box<dyn Cable>))
    }
}

impl ProbeDriver for FixedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_names(&self) -> Result<Vec<String>> {
        Ok(self.probes.iter().map(|(name, _)| name.clone()).collect())
    }

    fn open(&self, index: usize, clock_hz: u32) -> Result<Box<dyn Cable>> {
        let (_, factory) = self
            .probes
            .get(index)
            .ok_or_else(|| Error::ProbeUnavailable(format!("{} has no probe {}", self.name, index)))?;
        factory(clock_hz)
    }
}

type ClaimTable = Arc<Mutex<HashSet<ProbeId>>>;

struct Claim {
    id: ProbeId,
    table: ClaimTable,
}

impl Claim {
    fn acquire(table: &ClaimTable, id: ProbeId) -> Option<Self> {
        let mut claimed = table.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.insert(id).then(|| Claim {
            id,
            table: Arc::clone(table),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[derive(Default)]
pub struct ProbeTransport {
    drivers: Vec<Box<dyn ProbeDriver>>,
    claims: ClaimTable,
}

impl ProbeTransport {
    /// A transport with no drivers registered
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport with the hardware drivers enabled by Cargo features
    pub fn with_default_drivers() -> Self {
        #[allow(unused_mut)]
        let mut transport = Self::new();
        #[cfg(feature = "jlink")]
        transport.register_driver(Box::new(crate::cable::jlink::JLinkDriver));
        #[cfg(feature = "ftdi")]
        transport.register_driver(Box::new(crate::cable::mpsse::FtdiDriver));
        transport
    }

    pub fn register_driver(&mut self, driver: Box<dyn ProbeDriver>) -> &mut Self {
        self.drivers.push(driver);
        self
    }

    /// Every attached probe by display name.  A driver that fails to enumerate is skipped.
    pub fn list_probes(&self) -> BTreeMap<String, ProbeId> {
        let mut probes = BTreeMap::new();
        for (d, driver) in self.drivers.iter().enumerate() {
            let names = match driver.probe_names() {
                Ok(names) => names,
                Err(e) => {
                    log::warn!("{} driver could not enumerate probes: {}", driver.name(), e);
                    continue;
                }
            };
            for (p, name) in names.into_iter().enumerate().take(256) {
                probes.entry(name).or_insert(ProbeId::new(d, p));
            }
        }
        log::debug!("found {} probe(s)", probes.len());
        probes
    }

    /// Claim and open a probe.  Fails with `ProbeUnavailable` if it is unknown or already held.
    pub fn open(&self, id: ProbeId, clock_hz: u32) -> Result<ProbeHandle> {
        let driver = self
            .drivers
            .get(id.driver())
            .ok_or_else(|| Error::ProbeUnavailable(format!("no probe with id {}", id)))?;
        let name = driver
            .probe_names()?
            .into_iter()
            .nth(id.probe())
            .ok_or_else(|| Error::ProbeUnavailable(format!("no probe with id {}", id)))?;
        let claim = Claim::acquire(&self.claims, id)
            .ok_or_else(|| Error::ProbeUnavailable(format!("{} is already in use", name)))?;

        // The claim is released again if the cable cannot be brought up
        let cable = driver.open(id.probe(), clock_hz)?;
        let sm = JtagSM::new(cable)?;
        log::info!("opened probe {} ({}) at {} Hz", name, id, clock_hz);
        Ok(ProbeHandle {
            id,
            name,
            sm: Some(sm),
            claim: Some(claim),
        })
    }

    /// Open a probe by its exact display name
    pub fn open_by_name(&self, name: &str, clock_hz: u32) -> Result<ProbeHandle> {
        let id = self
            .list_probes()
            .get(name)
            .copied()
            .ok_or_else(|| Error::ProbeUnavailable(format!("no probe named {}", name)))?;
        self.open(id, clock_hz)
    }
}

/// Exclusive access to one probe
pub struct ProbeHandle {
    id: ProbeId,
    name: String,
    sm: Option<JtagSM>,
    claim: Option<Claim>,
}

impl ProbeHandle {
    pub fn id(&self) -> ProbeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.sm.is_some()
    }

    /// The JTAG state machine of the open probe
    pub fn jtag(&mut self) -> Result<&mut JtagSM> {
        let name = &self.name;
        self.sm
            .as_mut()
            .ok_or_else(|| Error::ProbeUnavailable(format!("{} is closed", name)))
    }

    /// Put the chain back into Test-Logic-Reset and give up the probe.  Closing a closed handle
    /// does nothing.
    pub fn close(&mut self) {
        if let Some(mut sm) = self.sm.take() {
            if let Err(e) = sm.mode_reset().and_then(|_| sm.cable_mut().flush()) {
                log::warn!("reset on close of {} failed: {}", self.name, e);
            }
            log::info!("closed probe {}", self.name);
        }
        self.claim = None;
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cable::sim::{SimChain, SimTap};

    fn transport() -> ProbeTransport {
        let mut driver = FixedDriver::new("sim");
        driver.add_factory("SIM A", |_| {
            Ok(Box::new(SimChain::new(vec![SimTap::bypass(4)])) as Box<dyn Cable>)
        });
        driver.add_factory("SIM B", |_| Err(Error::cable("not powered")));
        let mut transport = ProbeTransport::new();
        transport.register_driver(Box::new(FixedDriver::new("empty")));
        transport.register_driver(Box::new(driver));
        transport
    }

    #[test]
    fn ids_encode_driver_and_probe() {
        let probes = transport().list_probes();
        assert_eq!(probes["SIM A"], ProbeId(0x100));
        assert_eq!(probes["SIM B"], ProbeId(0x101));
        assert_eq!(probes["SIM B"].driver(), 1);
        assert_eq!(probes["SIM B"].probe(), 1);
    }

    #[test]
    fn exclusive_claim() {
        let t = transport();
        let mut first = t.open_by_name("SIM A", 1_000_000).unwrap();
        assert!(matches!(t.open_by_name("SIM A", 1_000_000), Err(Error::ProbeUnavailable(_))));
        first.close();
        first.close();
        assert!(!first.is_open());
        assert!(first.jtag().is_err());
        let second = t.open_by_name("SIM A", 1_000_000).unwrap();
        drop(second);
        assert!(t.open_by_name("SIM A", 1_000_000).is_ok());
    }

    #[test]
    fn failed_open_releases_claim() {
        let t = transport();
        assert!(matches!(t.open_by_name("SIM B", 1_000_000), Err(Error::Cable(_))));
        assert!(t.claims.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_probe() {
        let t = transport();
        assert!(matches!(t.open(ProbeId(0x7ff), 1), Err(Error::ProbeUnavailable(_))));
        assert!(matches!(t.open_by_name("sim a", 1), Err(Error::ProbeUnavailable(_))));
    }
}
