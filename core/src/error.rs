//! Status codes.
//!
//! Every interface method reports failure through a single status-code
//! domain: zero is success, negative values are failures. [`Error`] is the
//! typed view of that domain; [`Error::code`] and [`Error::from_code`]
//! convert to and from the raw integer form used on the wire and in logs.

use core::fmt;

/// Failure reasons shared by every layer of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Operation killed by its supervisor
    Canceled,
    /// Data delivered to an interface with nobody listening
    BrokenPipe,
    /// Buffer allocation failed
    NoMemory,
    /// Fixed-size storage exhausted
    NoSpace,
    /// Operation or location type not supported by the destination
    NotSupported,
    /// Peer violated ordering or framing rules
    Protocol,
    /// Retry budget exhausted
    TimedOut,
    /// Interface restarted to make way for a new destination
    WouldBlock,
    /// Offset arithmetic overflowed
    Overflow,
    /// Request outside the permitted range
    Range,
    /// Requested data does not exist
    NotFound,
    /// Buffer has no backing storage
    NoStorage,
    /// Malformed argument (e.g. an unparseable URI)
    InvalidArgument,
    /// Remote end refused the connection
    ConnectionRefused,
    /// Remote end reset the connection
    ConnectionReset,
    /// Operation requires an established connection
    NotConnected,
    /// Local address or port already taken
    AddressInUse,
    /// Device-level failure
    Device,
    /// Code outside the known set. Non-negative codes report as `-1`.
    Other(i32),
}

impl Error {
    /// Negative status code for this error.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Canceled => -125,
            Self::BrokenPipe => -32,
            Self::NoMemory => -12,
            Self::NoSpace => -28,
            Self::NotSupported => -95,
            Self::Protocol => -71,
            Self::TimedOut => -110,
            Self::WouldBlock => -11,
            Self::Overflow => -75,
            Self::Range => -34,
            Self::NotFound => -2,
            Self::NoStorage => -25,
            Self::InvalidArgument => -22,
            Self::ConnectionRefused => -111,
            Self::ConnectionReset => -104,
            Self::NotConnected => -107,
            Self::AddressInUse => -98,
            Self::Device => -5,
            Self::Other(code) if *code < 0 => *code,
            Self::Other(_) => -1,
        }
    }

    /// Map a raw status code back to an error.
    ///
    /// Zero and positive values are not errors and yield `None`.
    pub const fn from_code(code: i32) -> Option<Self> {
        if code >= 0 {
            return None;
        }
        Some(match code {
            -125 => Self::Canceled,
            -32 => Self::BrokenPipe,
            -12 => Self::NoMemory,
            -28 => Self::NoSpace,
            -95 => Self::NotSupported,
            -71 => Self::Protocol,
            -110 => Self::TimedOut,
            -11 => Self::WouldBlock,
            -75 => Self::Overflow,
            -34 => Self::Range,
            -2 => Self::NotFound,
            -25 => Self::NoStorage,
            -22 => Self::InvalidArgument,
            -111 => Self::ConnectionRefused,
            -104 => Self::ConnectionReset,
            -107 => Self::NotConnected,
            -98 => Self::AddressInUse,
            -5 => Self::Device,
            other => Self::Other(other),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => write!(f, "Operation canceled"),
            Self::BrokenPipe => write!(f, "Broken pipe"),
            Self::NoMemory => write!(f, "Out of memory"),
            Self::NoSpace => write!(f, "No space left"),
            Self::NotSupported => write!(f, "Operation not supported"),
            Self::Protocol => write!(f, "Protocol error"),
            Self::TimedOut => write!(f, "Connection timed out"),
            Self::WouldBlock => write!(f, "Operation would block"),
            Self::Overflow => write!(f, "Value too large"),
            Self::Range => write!(f, "Result out of range"),
            Self::NotFound => write!(f, "No such entry"),
            Self::NoStorage => write!(f, "No backing storage"),
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::ConnectionRefused => write!(f, "Connection refused"),
            Self::ConnectionReset => write!(f, "Connection reset"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::AddressInUse => write!(f, "Address in use"),
            Self::Device => write!(f, "Device error"),
            Self::Other(code) => write!(f, "Error {}", code),
        }
    }
}

/// Outcome of an operation that produces no value.
pub type Status = core::result::Result<(), Error>;

pub type Result<T> = core::result::Result<T, Error>;

/// Raw integer form of a status: zero on success, negative on failure.
pub fn status_code(status: Status) -> i32 {
    match status {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_map_back() {
        for err in [
            Error::Canceled,
            Error::BrokenPipe,
            Error::TimedOut,
            Error::WouldBlock,
            Error::ConnectionRefused,
            Error::Other(-4242),
        ] {
            assert!(err.code() < 0);
            assert_eq!(Error::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn success_is_not_an_error() {
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(7), None);
        assert_eq!(status_code(Ok(())), 0);
        assert_eq!(status_code(Err(Error::Other(-5))), -5);
    }

    #[test]
    fn other_never_reports_success() {
        assert_eq!(Error::Other(0).code(), -1);
        assert_eq!(Error::Other(17).code(), -1);
        assert_eq!(status_code(Err(Error::Other(i32::MAX))), -1);
        assert_eq!(Error::from_code(Error::Other(3).code()), Some(Error::Other(-1)));
    }
}
