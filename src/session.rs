//! The session ties one open probe to the chain behind it: detection, description binding, pin
//! staging and scans all go through a `Session`.  Dropping the session releases the probe.
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::bsdl::{self, BsdlDescription, PinDirection};
use crate::device::{AttachPolicy, DeviceHandle};
use crate::error::{Error, Result};
use crate::probe::{ProbeHandle, ProbeId, ProbeTransport};
use crate::scan::{PinRegister, PinState, PinValue, ScanEngine, ScanMode};
use crate::taps::{ChainDevice, Taps};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// TCK frequency requested from the probe
    pub clock_hz: u32,
    /// Chain detection gives up beyond this many TAPs
    pub max_devices: usize,
    /// Chain detection gives up beyond this many instruction register bits in total
    pub max_ir_bits: usize,
    pub attach_policy: AttachPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock_hz: 1_000_000,
            max_devices: 32,
            max_ir_bits: 1024,
            attach_policy: AttachPolicy::Strict,
        }
    }
}

impl SessionConfig {
    pub fn clock_hz(mut self, clock_hz: u32) -> Self {
        self.clock_hz = clock_hz;
        self
    }

    pub fn max_devices(mut self, max_devices: usize) -> Self {
        self.max_devices = max_devices;
        self
    }

    pub fn max_ir_bits(mut self, max_ir_bits: usize) -> Self {
        self.max_ir_bits = max_ir_bits;
        self
    }

    pub fn attach_policy(mut self, attach_policy: AttachPolicy) -> Self {
        self.attach_policy = attach_policy;
        self
    }
}

fn not_scanned() -> Error {
    Error::ChainScanError("chain has not been scanned".into())
}

pub struct Session {
    probe: ProbeHandle,
    config: SessionConfig,
    taps: Option<Taps>,
    engine: ScanEngine,
}

impl Session {
    /// Claim the probe `id` and start a session on it
    pub fn open(transport: &ProbeTransport, id: ProbeId, config: SessionConfig) -> Result<Self> {
        let probe = transport.open(id, config.clock_hz)?;
        Ok(Self::with_probe(probe, config))
    }

    /// Claim the probe with display name `name` and start a session on it
    pub fn open_by_name(transport: &ProbeTransport, name: &str, config: SessionConfig) -> Result<Self> {
        let probe = transport.open_by_name(name, config.clock_hz)?;
        Ok(Self::with_probe(probe, config))
    }

    pub fn with_probe(probe: ProbeHandle, config: SessionConfig) -> Self {
        Self {
            probe,
            config,
            taps: None,
            engine: ScanEngine::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn probe_name(&self) -> &str {
        self.probe.name()
    }

    pub fn is_open(&self) -> bool {
        self.probe.is_open()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ProbeUnavailable(format!("session on {} was closed", self.probe.name())))
        }
    }

    fn taps(&self) -> Result<&Taps> {
        self.ensure_open()?;
        self.taps.as_ref().ok_or_else(not_scanned)
    }

    /// Reset the chain and detect its devices.  Earlier detection results and bindings are
    /// discarded first, so a failed scan leaves an empty chain.
    pub fn scan_init_chain(&mut self) -> Result<usize> {
        self.ensure_open()?;
        self.taps = None;
        self.engine.clear();
        let sm = self.probe.jtag()?;
        let taps = Taps::detect(sm, self.config.max_devices, self.config.max_ir_bits)?;
        let count = taps.len();
        log::info!("{} device(s) on the chain of {}", count, self.probe.name());
        self.taps = Some(taps);
        Ok(count)
    }

    pub fn get_number_devices(&self) -> Result<usize> {
        self.taps().map(Taps::len)
    }

    pub fn get_devid(&self, position: usize) -> Result<u32> {
        self.taps()?.devid(position)
    }

    pub fn devices(&self) -> Result<&[ChainDevice]> {
        self.taps().map(Taps::devices)
    }

    /// Set the IR length of a TAP that detection could not work out
    pub fn set_ir_length(&mut self, position: usize, len: usize) -> Result<()> {
        self.ensure_open()?;
        self.taps.as_mut().ok_or_else(not_scanned)?.set_ir_len(position, len)
    }

    /// Bind `description` to the TAP at `position`
    pub fn attach(&mut self, description: impl Into<Arc<BsdlDescription>>, position: usize) -> Result<DeviceHandle> {
        self.ensure_open()?;
        let taps = self.taps.as_mut().ok_or(Error::PositionOutOfRange { position, count: 0 })?;
        self.engine
            .attach(taps, description.into(), position, self.config.attach_policy)
    }

    /// Parse a BSDL file and bind it to the TAP at `position`
    pub fn attach_file(&mut self, path: impl AsRef<Path>, position: usize) -> Result<DeviceHandle> {
        self.ensure_open()?;
        let description = bsdl::parse_file(path)?;
        self.attach(description, position)
    }

    pub fn detach(&mut self, position: usize) -> Result<()> {
        self.ensure_open()?;
        let taps = self.taps.as_ref().ok_or_else(not_scanned)?;
        self.engine.detach(taps, position)
    }

    pub fn description(&self, device: DeviceHandle) -> Result<Arc<BsdlDescription>> {
        self.ensure_open()?;
        self.engine.device(device).map(|d| Arc::clone(&d.description))
    }

    pub fn pins_get_number(&self, device: DeviceHandle) -> Result<usize> {
        self.ensure_open()?;
        self.engine.device(device).map(|d| d.pin_count())
    }

    pub fn pin_get_properties(&self, device: DeviceHandle, index: usize) -> Result<(String, PinDirection)> {
        self.ensure_open()?;
        self.engine.device(device)?.properties(index)
    }

    pub fn pin_get_id(&self, device: DeviceHandle, name: &str) -> Result<usize> {
        self.ensure_open()?;
        self.engine.device(device)?.pin_index(name)
    }

    /// Takes effect on the next `scan`
    pub fn set_scan_mode(&mut self, device: DeviceHandle, mode: ScanMode) -> Result<()> {
        self.ensure_open()?;
        self.engine.set_mode(device, mode)
    }

    pub fn get_scan_mode(&self, device: DeviceHandle) -> Result<ScanMode> {
        self.ensure_open()?;
        self.engine.device(device).map(|d| d.mode)
    }

    fn run_scan(&mut self, capture: bool) -> Result<()> {
        self.ensure_open()?;
        let taps = self.taps.as_ref().ok_or_else(not_scanned)?;
        let sm = self.probe.jtag()?;
        self.engine.scan(sm, taps, capture)
    }

    /// Shift every bound device's pending register in and capture its pins
    pub fn scan(&mut self) -> Result<()> {
        self.run_scan(true)
    }

    /// Shift the pending registers in without updating the captured pin values
    pub fn scan_write_only(&mut self) -> Result<()> {
        self.run_scan(false)
    }

    pub fn pin_get_state(&self, device: DeviceHandle, name: &str) -> Result<PinState> {
        self.ensure_open()?;
        self.engine.pin_state(device, name)
    }

    pub fn pin_get_register(&self, device: DeviceHandle, name: &str, register: PinRegister) -> Result<Option<bool>> {
        self.ensure_open()?;
        self.engine.pin_register(device, name, register)
    }

    /// Stage a pin value.  Nothing is clocked here; the value reaches the device on the next
    /// `scan` or `scan_write_only`.
    pub fn pin_set_state(&mut self, device: DeviceHandle, name: &str, value: impl Into<PinValue>) -> Result<()> {
        self.ensure_open()?;
        self.engine.set_pin(device, name, value.into())
    }

    /// Release the probe and forget the chain.  Safe to call more than once; afterwards every
    /// operation fails with `ProbeUnavailable`.
    pub fn deinit(&mut self) {
        if self.is_open() {
            log::info!("closing session on {}", self.probe.name());
        }
        self.engine.clear();
        self.taps = None;
        self.probe.close();
    }

    /// Wrap the session for use from several threads
    pub fn into_shared(self) -> SharedSession {
        SharedSession {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.deinit();
    }
}

/// A session behind a mutex.  Every call holds the lock for its whole duration, so scans and pin
/// updates from different threads never interleave.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
}

impl SharedSession {
    pub fn with<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut session = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *session)
    }

    pub fn scan(&self) -> Result<()> {
        self.with(Session::scan)
    }

    pub fn pin_get_state(&self, device: DeviceHandle, name: &str) -> Result<PinState> {
        self.with(|s| s.pin_get_state(device, name))
    }

    pub fn pin_set_state(&self, device: DeviceHandle, name: &str, value: impl Into<PinValue>) -> Result<()> {
        self.with(|s| s.pin_set_state(device, name, value))
    }

    pub fn deinit(&self) {
        self.with(Session::deinit)
    }
}
