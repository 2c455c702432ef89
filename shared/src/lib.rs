//! # Commlink Core Library
//!
//! This crate provides a handle-based asynchronous I/O registry for UDP
//! listeners and serial ports:
//!
//! - **Endpoint Drivers**: Open/close/send/receive raw bytes on a socket or
//!   serial device
//! - **Receive Loops**: One background thread per endpoint feeding its buffer
//! - **Bounded Buffers**: Drop-oldest FIFOs polled by synchronous callers
//! - **Handle Registry**: Integer handles mapped to endpoint records
//! - **Polling Facade**: Sentinel-returning API for foreign callers
//!
//! ## Architecture
//!
//! ```text
//! open(port) ──► Registry ──► Driver (socket / serial line)
//!                   │             │
//!                   │        ReceiveLoop (thread)
//!                   │             │ push
//!                   ▼             ▼
//! poll(handle) ──► Facade ──► BoundedBuffer ──► drain / peek / clear
//! ```
//!
//! The registry does not interpret payloads.

pub mod buffer;
pub mod config;
pub mod driver;
pub mod error;
pub mod facade;
pub mod message;
pub mod receiver;
pub mod registry;
pub mod traits;

// Re-export main types for convenience
pub use buffer::BoundedBuffer;
pub use config::{
    DataBits, ListenerConfig, Parity, SerialConfig, StopBits, DEFAULT_BAUD_RATE,
    DEFAULT_BUFFER_CAPACITY,
};
pub use driver::{
    default_serial_backend, send_datagram, SerialDriver, UdpDriver, UnsupportedSerial,
};
pub use error::{EndpointError, EndpointResult};
pub use facade::{PollingFacade, INVALID_HANDLE};
pub use message::{EndpointStats, Message, SerialChunk, UdpPacket};
pub use receiver::{LoopState, ReceiveLoop};
pub use registry::{
    EndpointInfo, EndpointKind, EndpointRegistry, Handle, HandleTable, SerialPorts, UdpListeners,
};
pub use traits::{EndpointDriver, SerialBackend, SerialLine};

/// Library version reported to foreign callers
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
