//! # Polling Facade
//!
//! Synchronous, sentinel-returning operations for callers outside the core
//! (scripting hosts, UI layers, the native bridge):
//!
//! - opens return a raw handle, or `-1` on failure
//! - operations on a handle return `false`, `0`, `-1`, an empty `Vec` or
//!   `None` when the handle is unknown or the operation failed
//!
//! Every operation is bounded by a couple of mutex acquisitions, except
//! serial writes and direct reads, which wait at most the port's timeouts.
//! Errors are logged here and never propagated as panics.

use std::fmt::Display;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::{ListenerConfig, SerialConfig};
use crate::error::{EndpointError, EndpointResult};
use crate::message::{EndpointStats, SerialChunk, UdpPacket};
use crate::registry::{EndpointRegistry, Handle, SerialPorts, UdpListeners};
use crate::traits::SerialBackend;

/// Raw handle value returned by failed opens
pub const INVALID_HANDLE: i32 = Handle::INVALID.raw();

/// Sentinel API over an [`EndpointRegistry`]
pub struct PollingFacade {
    registry: EndpointRegistry,
}

impl PollingFacade {
    pub fn new(registry: EndpointRegistry) -> Self {
        Self { registry }
    }

    /// Facade over a fresh registry using the given serial backend
    pub fn with_serial_backend(backend: Arc<dyn SerialBackend>) -> Self {
        Self::new(EndpointRegistry::new(backend))
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    fn udp(&self) -> &UdpListeners {
        self.registry.udp()
    }

    fn serial(&self) -> &SerialPorts {
        self.registry.serial()
    }

    /// Close every endpoint of both kinds
    pub fn shutdown(&self) {
        self.registry.close_all();
    }

    // ==================== UDP ====================

    /// Open a buffered listener; `buffer_capacity <= 0` selects the default
    pub fn open_udp_listener(&self, port: i32, buffer_capacity: i32) -> i32 {
        let Ok(port) = u16::try_from(port) else {
            warn!("OpenUdpListener: port {} out of range", port);
            return INVALID_HANDLE;
        };
        let mut config = ListenerConfig::default();
        if buffer_capacity > 0 {
            config.buffer_capacity = buffer_capacity as usize;
        }
        self.open_udp_listener_with(port, &config)
    }

    pub fn open_udp_listener_with(&self, port: u16, config: &ListenerConfig) -> i32 {
        // The registry already logged the failure
        self.udp()
            .open(port, config)
            .map_or(INVALID_HANDLE, Handle::raw)
    }

    pub fn close_udp_listener(&self, handle: i32) -> bool {
        self.udp().close(Handle::from_raw(handle))
    }

    pub fn close_all_udp_listeners(&self) {
        self.udp().close_all();
    }

    pub fn is_udp_listener_valid(&self, handle: i32) -> bool {
        self.udp().is_valid(Handle::from_raw(handle))
    }

    pub fn active_udp_listener_count(&self) -> i32 {
        count(self.udp().count())
    }

    /// Bound port of a listener, `-1` for unknown handles
    pub fn udp_listener_port(&self, handle: i32) -> i32 {
        self.udp()
            .local_port(Handle::from_raw(handle))
            .map_or(-1, i32::from)
    }

    pub fn has_udp_data(&self, handle: i32) -> bool {
        polled(self.udp().has_data(Handle::from_raw(handle)), "HasUdpData").unwrap_or(false)
    }

    pub fn udp_packet_count(&self, handle: i32) -> i32 {
        polled(self.udp().packet_count(Handle::from_raw(handle)), "GetUdpPacketCount")
            .map_or(0, count)
    }

    /// Drain the listener's buffer, oldest first
    pub fn get_all_udp_packets(&self, handle: i32) -> Vec<UdpPacket> {
        polled(self.udp().take_all(Handle::from_raw(handle)), "GetAllUdpPackets")
            .unwrap_or_default()
    }

    pub fn get_latest_udp_packet(&self, handle: i32) -> Option<UdpPacket> {
        polled(self.udp().latest(Handle::from_raw(handle)), "GetLatestUdpPacket").flatten()
    }

    pub fn clear_udp_buffer(&self, handle: i32) -> bool {
        polled(self.udp().clear(Handle::from_raw(handle)), "ClearUdpBuffer").is_some()
    }

    pub fn udp_stats(&self, handle: i32) -> Option<EndpointStats> {
        polled(self.udp().stats(Handle::from_raw(handle)), "GetUdpStats")
    }

    pub fn udp_send_bytes(&self, ip: &str, port: i32, data: &[u8]) -> bool {
        let Ok(port) = u16::try_from(port) else {
            warn!("UdpSendBytes: port {} out of range", port);
            return false;
        };
        logged(self.udp().send(ip, port, data), "UdpSendBytes").is_some()
    }

    pub fn udp_send_string(&self, ip: &str, port: i32, message: &str) -> bool {
        self.udp_send_bytes(ip, port, message.as_bytes())
    }

    // ==================== Serial ====================

    /// Open a port with 8N1 defaults at `baud_rate`
    pub fn open_serial_port(&self, name: &str, baud_rate: i32) -> i32 {
        let Ok(baud_rate) = u32::try_from(baud_rate) else {
            warn!("OpenSerialPort: invalid baud rate {}", baud_rate);
            return INVALID_HANDLE;
        };
        self.open_serial_port_with(name, &SerialConfig::with_baud_rate(baud_rate))
    }

    pub fn open_serial_port_with(&self, name: &str, config: &SerialConfig) -> i32 {
        self.serial()
            .open(name, config)
            .map_or(INVALID_HANDLE, Handle::raw)
    }

    pub fn close_serial_port(&self, handle: i32) -> bool {
        self.serial().close(Handle::from_raw(handle))
    }

    pub fn close_all_serial_ports(&self) {
        self.serial().close_all();
    }

    pub fn is_serial_port_open(&self, handle: i32) -> bool {
        self.serial().is_open(Handle::from_raw(handle))
    }

    pub fn open_serial_port_count(&self) -> i32 {
        count(self.serial().count())
    }

    pub fn serial_write_bytes(&self, handle: i32, data: &[u8]) -> bool {
        logged(
            self.serial().write(Handle::from_raw(handle), data),
            "SerialWriteBytes",
        )
        .is_some()
    }

    pub fn serial_write_string(&self, handle: i32, message: &str) -> bool {
        self.serial_write_bytes(handle, message.as_bytes())
    }

    /// Direct read; empty on timeout, error, or while async read is active
    pub fn serial_read_bytes(&self, handle: i32, max_bytes: i32) -> Vec<u8> {
        let max_bytes = usize::try_from(max_bytes).unwrap_or(0);
        logged(
            self.serial().read(Handle::from_raw(handle), max_bytes),
            "SerialReadBytes",
        )
        .unwrap_or_default()
    }

    pub fn serial_read_string(&self, handle: i32, max_bytes: i32) -> String {
        String::from_utf8_lossy(&self.serial_read_bytes(handle, max_bytes)).into_owned()
    }

    pub fn serial_bytes_available(&self, handle: i32) -> i32 {
        logged(
            self.serial().bytes_available(Handle::from_raw(handle)),
            "GetSerialBytesAvailable",
        )
        .map_or(-1, count)
    }

    pub fn flush_serial_buffers(&self, handle: i32, clear_input: bool, clear_output: bool) -> bool {
        logged(
            self.serial()
                .flush(Handle::from_raw(handle), clear_input, clear_output),
            "FlushSerialBuffers",
        )
        .is_some()
    }

    pub fn start_serial_async_read(&self, handle: i32) -> bool {
        logged(
            self.serial().start_async_read(Handle::from_raw(handle)),
            "StartSerialAsyncRead",
        )
        .is_some()
    }

    pub fn stop_serial_async_read(&self, handle: i32) -> bool {
        logged(
            self.serial().stop_async_read(Handle::from_raw(handle)),
            "StopSerialAsyncRead",
        )
        .unwrap_or(false)
    }

    pub fn has_serial_data(&self, handle: i32) -> bool {
        polled(self.serial().has_data(Handle::from_raw(handle)), "HasSerialData").unwrap_or(false)
    }

    pub fn serial_chunk_count(&self, handle: i32) -> i32 {
        polled(self.serial().chunk_count(Handle::from_raw(handle)), "GetSerialChunkCount")
            .map_or(0, count)
    }

    pub fn get_all_serial_data(&self, handle: i32) -> Vec<SerialChunk> {
        polled(self.serial().take_all(Handle::from_raw(handle)), "GetAllSerialData")
            .unwrap_or_default()
    }

    pub fn get_latest_serial_data(&self, handle: i32) -> Option<SerialChunk> {
        polled(self.serial().latest(Handle::from_raw(handle)), "GetLatestSerialData").flatten()
    }

    pub fn clear_serial_buffer(&self, handle: i32) -> bool {
        polled(self.serial().clear(Handle::from_raw(handle)), "ClearSerialBuffer").is_some()
    }

    pub fn serial_stats(&self, handle: i32) -> Option<EndpointStats> {
        polled(self.serial().stats(Handle::from_raw(handle)), "GetSerialStats")
    }

    pub fn available_serial_ports(&self) -> Vec<String> {
        self.serial().available_ports()
    }
}

impl Default for PollingFacade {
    fn default() -> Self {
        Self::new(EndpointRegistry::default())
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Polling races with close, so unknown handles only rate a debug line
fn polled<T>(result: EndpointResult<T>, op: impl Display) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(EndpointError::InvalidHandle(handle)) => {
            debug!("{}: invalid handle {}", op, handle);
            None
        }
        Err(e) => {
            warn!("{}: {}", op, e);
            None
        }
    }
}

fn logged<T>(result: EndpointResult<T>, op: impl Display) -> Option<T> {
    result.map_err(|e| warn!("{}: {}", op, e)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UnsupportedSerial;
    use std::thread;
    use std::time::{Duration, Instant};

    fn facade() -> PollingFacade {
        PollingFacade::with_serial_backend(Arc::new(UnsupportedSerial))
    }

    #[test]
    fn test_invalid_handles_are_silent_false() {
        let facade = facade();
        for handle in [-1, 0, 42] {
            assert!(!facade.is_udp_listener_valid(handle));
            assert!(!facade.close_udp_listener(handle));
            assert!(!facade.has_udp_data(handle));
            assert_eq!(facade.udp_packet_count(handle), 0);
            assert!(facade.get_all_udp_packets(handle).is_empty());
            assert!(facade.get_latest_udp_packet(handle).is_none());
            assert!(!facade.clear_udp_buffer(handle));
            assert_eq!(facade.udp_listener_port(handle), -1);

            assert!(!facade.is_serial_port_open(handle));
            assert!(!facade.close_serial_port(handle));
            assert!(!facade.serial_write_bytes(handle, b"x"));
            assert!(facade.serial_read_bytes(handle, 16).is_empty());
            assert_eq!(facade.serial_bytes_available(handle), -1);
            assert!(!facade.flush_serial_buffers(handle, true, true));
            assert!(!facade.start_serial_async_read(handle));
            assert!(!facade.stop_serial_async_read(handle));
            assert!(facade.get_all_serial_data(handle).is_empty());
        }
    }

    #[test]
    fn test_out_of_range_arguments() {
        let facade = facade();
        assert_eq!(facade.open_udp_listener(70000, 10), INVALID_HANDLE);
        assert_eq!(facade.open_udp_listener(-5, 10), INVALID_HANDLE);
        assert!(!facade.udp_send_bytes("127.0.0.1", -1, b"x"));
        assert_eq!(facade.open_serial_port("COM1", -9600), INVALID_HANDLE);
    }

    #[test]
    fn test_serial_open_failure_returns_sentinel() {
        let facade = facade();
        assert_eq!(facade.open_serial_port("COM_NONEXISTENT", 9600), INVALID_HANDLE);
        assert!(!facade.is_serial_port_open(INVALID_HANDLE));
        assert_eq!(facade.open_serial_port_count(), 0);
    }

    #[test]
    fn test_udp_round_trip_through_facade() {
        let facade = facade();
        let handle = facade.open_udp_listener(0, 0);
        assert_ne!(handle, INVALID_HANDLE);
        let port = facade.udp_listener_port(handle);
        assert!(port > 0);
        assert_eq!(facade.udp_stats(handle).map(|s| s.capacity), Some(100));

        assert!(facade.udp_send_string("127.0.0.1", port, "héllo"));
        assert!(!facade.udp_send_bytes("127.0.0.1", port, b""));

        let deadline = Instant::now() + Duration::from_secs(3);
        while !facade.has_udp_data(handle) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let latest = facade.get_latest_udp_packet(handle).unwrap();
        assert_eq!(latest.data, "héllo".as_bytes());
        assert_eq!(facade.udp_packet_count(handle), 1);
        assert!(facade.clear_udp_buffer(handle));
        assert!(!facade.has_udp_data(handle));

        assert_eq!(facade.active_udp_listener_count(), 1);
        facade.shutdown();
        assert_eq!(facade.active_udp_listener_count(), 0);
        assert!(!facade.is_udp_listener_valid(handle));
    }
}
