// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the control-channel layer
//!
//! Every failure is classified into an [`ErrorKind`] so callers can tell a
//! missing vendor stack apart from a broken one, and an unsupported operation
//! apart from a failed transaction, without looking at message text.

use std::fmt;

use thiserror::Error;

/// Broad category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend's prerequisites are absent; selection moves on
    NotApplicable,
    /// The backend was partly present but failed to initialize
    Construction,
    /// A transaction failed after a driver was acquired
    Transport,
    /// The active backend does not offer this operation
    Unsupported,
    /// The request itself was malformed
    InvalidArgument,
    /// The configuration file could not be used
    Config,
}

/// Main error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No backend applies to this machine
    #[error("gpu: no compatible driver found")]
    NoDriver,

    /// The active backend does not implement the operation
    #[error("gpu: operation not implemented")]
    NotImplemented,

    /// A backend was found but could not be brought up
    #[error("{backend}: {reason}")]
    Init { backend: &'static str, reason: String },

    /// Several backends failed with hard errors
    #[error("{}", ErrorList(.0))]
    Aggregate(Vec<Error>),

    /// A native transaction failed
    #[error("{backend}: {op}: {fault}")]
    Transport {
        backend: &'static str,
        op: &'static str,
        #[source]
        fault: TransportFault,
    },

    /// The driver handle was closed before the call
    #[error("{0}: session already closed")]
    SessionClosed(&'static str),

    /// Length outside what the operation accepts
    #[error("{op} length {len} is invalid (allowed 1..={max})")]
    InvalidLength { op: &'static str, len: usize, max: usize },

    /// The request would run past the end of the 32-bit address space
    #[error("address range 0x{address:X}+{len} overflows")]
    AddressOverflow { address: u32, len: usize },

    /// A scripting byte sequence could not be converted
    #[error("table index {index} {reason}")]
    ByteSequence { index: usize, reason: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Low-level reason a transaction failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// Device error code reported by an AUX call, with the call status if it failed
    #[error("{error}{}", hresult_suffix(.hresult))]
    Aux { error: AuxError, hresult: Option<u32> },

    /// Call-level status from a vendor entry point
    #[error("{message} (0x{code:08X})")]
    Status { code: u32, message: String },

    /// The AUX side channel reported a timeout
    #[error("dp aux transaction timed out")]
    AuxTimeout,

    /// The AUX side channel reported a non-zero status
    #[error("dp aux error status 0x{0:X}")]
    AuxStatus(u32),

    /// A chunk moved fewer or more bytes than requested
    #[error("expected {expected} bytes, transferred {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// The native call echoed back an unexpected status byte
    #[error("unexpected status byte {0}")]
    UnexpectedStatusByte(i32),
}

/// Device error codes returned by the COM interface AUX slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxError {
    None,
    InvalidDevice,
    InvalidAddress,
    InvalidSize,
    Defer,
    Timeout,
    Unknown(i32),
}

impl AuxError {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => AuxError::None,
            67 => AuxError::InvalidDevice,
            68 => AuxError::InvalidAddress,
            69 => AuxError::InvalidSize,
            70 => AuxError::Defer,
            71 => AuxError::Timeout,
            other => AuxError::Unknown(other),
        }
    }
}

impl fmt::Display for AuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuxError::None => write!(f, "AUX call failed"),
            AuxError::InvalidDevice => write!(f, "Invalid AUX device"),
            AuxError::InvalidAddress => write!(f, "Invalid AUX address"),
            AuxError::InvalidSize => write!(f, "Invalid AUX data size"),
            AuxError::Defer => write!(f, "AUX defer"),
            AuxError::Timeout => write!(f, "AUX timeout"),
            AuxError::Unknown(code) => write!(f, "AUX unknown error ({code})"),
        }
    }
}

fn hresult_suffix(hresult: &Option<u32>) -> String {
    match hresult {
        Some(hr) => format!("; hr=0x{hr:08X}"),
        None => String::new(),
    }
}

struct ErrorList<'a>(&'a [Error]);

impl fmt::Display for ErrorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoDriver => ErrorKind::NotApplicable,
            Error::NotImplemented => ErrorKind::Unsupported,
            Error::Init { .. } | Error::Aggregate(_) => ErrorKind::Construction,
            Error::Transport { .. } | Error::SessionClosed(_) => ErrorKind::Transport,
            Error::InvalidLength { .. }
            | Error::AddressOverflow { .. }
            | Error::ByteSequence { .. } => ErrorKind::InvalidArgument,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_not_applicable(&self) -> bool {
        self.kind() == ErrorKind::NotApplicable
    }

    pub fn is_not_implemented(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }

    pub(crate) fn init(backend: &'static str, reason: impl Into<String>) -> Self {
        Error::Init {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(backend: &'static str, op: &'static str, fault: TransportFault) -> Self {
        Error::Transport { backend, op, fault }
    }

    /// Fold hard errors into one; a single error is returned as-is
    ///
    /// Nested aggregates are flattened, so the result is one flat list.
    pub(crate) fn join(errors: Vec<Error>) -> Option<Error> {
        let mut errors: Vec<Error> = errors
            .into_iter()
            .flat_map(|e| match e {
                Error::Aggregate(inner) => inner,
                other => vec![other],
            })
            .collect();
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}

/// Result type alias for [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
