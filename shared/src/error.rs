//! # Endpoint Errors
//!
//! One error type covers every failure the registry can report. Only
//! [`EndpointError::Bind`], [`EndpointError::Device`] and friends surface to
//! callers of `open`; [`EndpointError::WouldBlock`] never leaves a receive
//! loop, and [`EndpointError::TransientIo`] is logged and retried there.

use std::io;

use thiserror::Error;

use crate::registry::Handle;

/// Errors that can occur while opening, driving or polling an endpoint
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Port already in use or address not bindable
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// Target or bind address did not parse
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Serial device absent, access denied, or configuration rejected
    #[error("serial device {device}: {reason}")]
    Device { device: String, reason: String },
    /// Unknown or already-closed handle
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    /// No data available right now
    #[error("operation would block")]
    WouldBlock,
    /// A single failed read or write; the endpoint stays open
    #[error("transient I/O error: {0}")]
    TransientIo(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The platform has no implementation for this capability
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    /// Direct reads and the async receive loop are mutually exclusive
    #[error("read mode conflict on handle {handle}: {reason}")]
    ReadModeConflict {
        handle: Handle,
        reason: &'static str,
    },
    #[error("failed to start receive loop: {0}")]
    Spawn(#[source] io::Error),
    #[error("refusing to send an empty payload")]
    EmptyPayload,
    #[error("handle space exhausted")]
    HandlesExhausted,
}

impl EndpointError {
    /// Whether a receive loop should retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::TransientIo(_))
    }

    pub(crate) fn device(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for endpoint operations
pub type EndpointResult<T> = Result<T, EndpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EndpointError::WouldBlock.is_transient());
        assert!(EndpointError::TransientIo(io::Error::other("glitch")).is_transient());
        assert!(!EndpointError::EmptyPayload.is_transient());
        assert!(!EndpointError::device("COM9", "missing").is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = EndpointError::Bind {
            addr: "0.0.0.0:5000".into(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("0.0.0.0:5000"));

        let err = EndpointError::InvalidHandle(Handle::from_raw(7));
        assert_eq!(err.to_string(), "invalid handle 7");
    }
}
