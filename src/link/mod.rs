pub mod emulator;
pub mod serial;
pub mod shell;

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::screen::codec::DecodeError;

pub use shell::ShellClient;

/// A duplex byte stream to the radio. Anything tokio can read and write fits:
/// a serial port, or an in-memory pipe to the emulator.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkStream for T {}

/// Broad failure classes of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream itself failed or went away.
    Transport,
    /// The firmware answered badly or not at all.
    Protocol,
    /// A response arrived but could not be decoded.
    Decode,
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Serial port is not open")]
    NotOpen,

    #[error("USB permission denied")]
    PermissionDenied,

    #[error("USB device disappeared: {0}")]
    DeviceGone(String),

    #[error("Failed opening serial port: {0}")]
    Open(String),

    #[error("Serial write failed: {0}")]
    Write(#[source] io::Error),

    #[error("Serial read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Serial link closed by device")]
    Closed,

    #[error("Mayhem returned error for: {0}")]
    Rejected(String),

    #[error("Mayhem response too long for: {0}")]
    TooLong(String),

    #[error("Timeout waiting for response to: {0}")]
    Timeout(String),

    #[error("Unable to parse screen resolution")]
    NoResolution,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::NotOpen
            | LinkError::PermissionDenied
            | LinkError::DeviceGone(_)
            | LinkError::Open(_)
            | LinkError::Write(_)
            | LinkError::Read(_)
            | LinkError::Closed => ErrorKind::Transport,
            LinkError::Rejected(_) | LinkError::TooLong(_) | LinkError::Timeout(_) => {
                ErrorKind::Protocol
            }
            LinkError::NoResolution | LinkError::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Whether the failure looks like a port held by another program
    /// (write timeouts on open are the usual symptom).
    pub fn is_busy(&self) -> bool {
        match self {
            LinkError::Write(e) | LinkError::Read(e) => e.kind() == io::ErrorKind::TimedOut,
            LinkError::Open(reason) => reason.to_lowercase().contains("busy"),
            _ => false,
        }
    }
}

/// One row of the device picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable identifier (the port path for serial devices).
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub has_permission: bool,
}

/// Discovers radios and opens byte streams to them.
pub trait DeviceProvider: Send + Sync {
    fn list(&self) -> Vec<DeviceInfo>;

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn LinkStream>, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(LinkError::Closed.kind(), ErrorKind::Transport);
        assert_eq!(LinkError::Timeout("getres".into()).kind(), ErrorKind::Protocol);
        assert_eq!(LinkError::NoResolution.kind(), ErrorKind::Decode);
        let decode: LinkError = DecodeError::FrameTooShort {
            expected: 2,
            width: 2,
            usable: 0,
        }
        .into();
        assert_eq!(decode.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_busy_detection() {
        let err = LinkError::Write(io::Error::new(io::ErrorKind::TimedOut, "rc=-1"));
        assert!(err.is_busy());
        assert!(!LinkError::Rejected("button 1".into()).is_busy());
    }
}
