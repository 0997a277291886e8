//! Error type shared by every layer of the crate, from cable I/O up to the session.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The probe does not exist, is already claimed, or its session was closed.
    #[error("probe unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("chain scan failed: {0}")]
    ChainScanError(String),

    #[error("malformed BSDL (line {line}): {message}")]
    MalformedBsdl { line: usize, message: String },

    #[error("description {entity} does not match device at position {position}: {reason}")]
    DescriptionMismatch {
        entity: String,
        position: usize,
        reason: String,
    },

    #[error("position {position} out of range, chain has {count} device(s)")]
    PositionOutOfRange { position: usize, count: usize },

    #[error("index {index} out of range (limit {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("unknown pin name: {0}")]
    UnknownPinName(String),

    #[error("pin {0} cannot be driven")]
    InvalidDirection(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reported by the hardware adapter itself.
    #[error("cable error: {0}")]
    Cable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn bsdl(line: usize, message: impl Into<String>) -> Self {
        Error::MalformedBsdl {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn cable(message: impl core::fmt::Display) -> Self {
        Error::Cable(message.to_string())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
