//! This crate drives IEEE 1149.1 boundary scan through a JTAG probe, at a variety of levels of
//! abstraction.  At the lowest level, a `Cable` shifts bits in and out of the chain; adapters
//! for J-Link, FT2232 "jtagkey" designs, the Altera USB Blaster and plain GPIO pins are provided,
//! as well as a simulated chain.
//!
//! The next higher level of abstraction is the `JtagSM`, which keeps track of the mode of the
//! TAPs.  You tell it which mode you want (e.g., Reset or Idle) and it gets there with the fewest
//! number of mode changes.
//!
//! `ProbeTransport` finds the probes attached to the host and hands out exclusive access to one
//! of them.  On top of that, a `Session` detects the TAPs on the chain, binds BSDL descriptions
//! to them and samples or drives their pins with repeated scans.
//!
//! # Example
//! ```no_run
//! use jtag_bscan::{PinValue, ProbeTransport, ScanMode, Session, SessionConfig};
//!
//! # fn main() -> jtag_bscan::Result<()> {
//! let transport = ProbeTransport::with_default_drivers();
//! let mut session = Session::open_by_name(&transport, "USB JLINK ARM", SessionConfig::default())?;
//! session.scan_init_chain()?;
//! let mcu = session.attach_file("stm32f4.bsd", 0)?;
//!
//! session.set_scan_mode(mcu, ScanMode::Active)?;
//! session.pin_set_state(mcu, "PA9", PinValue::High)?;
//! session.scan()?;
//! println!("PA10 is {}", session.pin_get_state(mcu, "PA10")?);
//! # Ok(())
//! # }
//! ```

pub mod bsdl;
pub mod cable;
pub mod device;
pub mod error;
pub mod probe;
pub mod scan;
pub mod session;
pub mod statemachine;
pub mod taps;

pub use bsdl::{BsdlDescription, IdCodePattern, PinDef, PinDirection};
pub use device::{AttachPolicy, DeviceHandle};
pub use error::{Error, Result};
pub use probe::{FixedDriver, ProbeDriver, ProbeHandle, ProbeId, ProbeTransport};
pub use scan::{PinRegister, PinState, PinValue, ScanMode};
pub use session::{Session, SessionConfig, SharedSession};
