//! # Endpoint Driver Abstractions
//!
//! This module defines the seams between the registry and the platform:
//!
//! - **EndpointDriver**: what a receive loop needs from an open endpoint
//! - **SerialLine**: raw byte I/O on one opened serial device
//! - **SerialBackend**: opens serial lines and enumerates devices; one
//!   implementation per platform plus an explicit "unsupported" variant
//!
//! ## Design Rationale
//!
//! The traits enable:
//! 1. **Testability**: In-memory lines and scripted drivers in unit tests
//! 2. **Portability**: Platform selection happens once, at registry
//!    construction, instead of at every call site

use crate::config::SerialConfig;
use crate::error::EndpointResult;
use crate::message::Message;

/// One open endpoint as seen by its receive loop
///
/// Implementations are shared between the loop thread and pollers, so
/// every method takes `&self`.
pub trait EndpointDriver: Send + Sync + 'static {
    /// Read whatever is available without blocking indefinitely
    ///
    /// Returns `Err(EndpointError::WouldBlock)` when nothing is pending.
    fn receive_nonblocking(&self) -> EndpointResult<Message>;

    /// Release the OS resource; later calls fail or report `WouldBlock`
    fn close(&self);

    /// Human-readable endpoint name used for logs and thread names
    fn describe(&self) -> String;
}

/// Raw byte pipe to one opened serial device
pub trait SerialLine: Send {
    /// Write every byte or fail
    fn write_all(&mut self, data: &[u8]) -> EndpointResult<()>;

    /// Read up to `buf.len()` bytes, waiting at most the read timeout
    ///
    /// A timeout with nothing read returns `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> EndpointResult<usize>;

    /// Bytes waiting in the input queue
    fn bytes_to_read(&mut self) -> EndpointResult<usize>;

    /// Discard pending input and/or output
    fn clear(&mut self, input: bool, output: bool) -> EndpointResult<()>;
}

/// Platform capability for serial devices
pub trait SerialBackend: Send + Sync + 'static {
    /// Open and configure a device
    fn open(&self, name: &str, config: &SerialConfig) -> EndpointResult<Box<dyn SerialLine>>;

    /// Names of devices present on this machine
    fn available_ports(&self) -> Vec<String>;
}
