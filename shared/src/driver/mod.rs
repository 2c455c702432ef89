//! # Endpoint Drivers
//!
//! Platform-level open/close/send/receive of raw bytes. Drivers keep no
//! in-process shared state beyond their own OS handle.

pub mod serial;
pub mod udp;

#[cfg(feature = "native-serial")]
pub use serial::NativeSerial;
pub use serial::{default_serial_backend, SerialDriver, UnsupportedSerial, READ_CHUNK_SIZE};
pub use udp::{send_datagram, UdpDriver};
