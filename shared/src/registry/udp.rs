use log::{error, info};
use std::sync::Arc;

use super::{EndpointInfo, EndpointKind, EndpointRecord, Handle, HandleTable};
use crate::config::ListenerConfig;
use crate::driver::{send_datagram, UdpDriver};
use crate::error::EndpointResult;
use crate::message::{EndpointStats, UdpPacket};

/// Registry of buffered UDP listeners
pub struct UdpListeners {
    table: HandleTable<EndpointRecord<UdpDriver>>,
}

impl UdpListeners {
    pub fn new() -> Self {
        Self {
            table: HandleTable::new(EndpointKind::Udp),
        }
    }

    /// Bind `port`, start its receive loop and return the new handle
    ///
    /// Nothing is registered if the bind or the loop start fails.
    pub fn open(&self, port: u16, config: &ListenerConfig) -> EndpointResult<Handle> {
        let opened = config
            .validate()
            .and_then(|()| UdpDriver::bind(port, config));
        let driver = match opened {
            Ok(driver) => driver,
            Err(e) => {
                error!("UDP listener on port {} failed: {}", port, e);
                return Err(e);
            }
        };

        let bound_port = driver.local_addr().port();
        let info = EndpointInfo {
            kind: EndpointKind::Udp,
            name: bound_port.to_string(),
            port: Some(bound_port),
            baud_rate: None,
        };
        let record = Arc::new(EndpointRecord::new(
            info,
            driver,
            config.buffer_capacity,
            config.poll_interval(),
        ));

        if let Err(e) = record.start_loop(Handle::INVALID) {
            error!("UDP listener on port {}: {}", bound_port, e);
            record.shutdown();
            return Err(e);
        }

        let handle = self.table.register(record)?;
        info!(
            "UDP listener opened: handle {}, port {}, buffer {}",
            handle, bound_port, config.buffer_capacity
        );
        Ok(handle)
    }

    /// Open with default settings and a custom buffer capacity
    pub fn open_with_capacity(&self, port: u16, buffer_capacity: usize) -> EndpointResult<Handle> {
        self.open(port, &ListenerConfig::with_capacity(buffer_capacity))
    }

    pub fn close(&self, handle: Handle) -> bool {
        self.table.close(handle)
    }

    pub fn close_all(&self) {
        self.table.close_all();
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        self.table.contains(handle)
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.table.handles()
    }

    /// Port the listener is bound to (resolves port 0 opens)
    pub fn local_port(&self, handle: Handle) -> EndpointResult<u16> {
        self.table
            .get(handle)
            .map(|record| record.driver().local_addr().port())
    }

    pub fn has_data(&self, handle: Handle) -> EndpointResult<bool> {
        self.table.buffer(handle).map(|buffer| !buffer.is_empty())
    }

    pub fn packet_count(&self, handle: Handle) -> EndpointResult<usize> {
        self.table.buffer(handle).map(|buffer| buffer.len())
    }

    /// Drain every buffered datagram, oldest first
    pub fn take_all(&self, handle: Handle) -> EndpointResult<Vec<UdpPacket>> {
        let buffer = self.table.buffer(handle)?;
        Ok(buffer.drain().into_iter().map(UdpPacket::from).collect())
    }

    pub fn latest(&self, handle: Handle) -> EndpointResult<Option<UdpPacket>> {
        let buffer = self.table.buffer(handle)?;
        Ok(buffer.peek_latest().map(UdpPacket::from))
    }

    pub fn clear(&self, handle: Handle) -> EndpointResult<()> {
        self.table.buffer(handle).map(|buffer| buffer.clear())
    }

    pub fn stats(&self, handle: Handle) -> EndpointResult<EndpointStats> {
        self.table.stats(handle)
    }

    pub fn info(&self, handle: Handle) -> EndpointResult<EndpointInfo> {
        self.table.info(handle)
    }

    /// One-shot send; no listener handle involved
    pub fn send(&self, ip: &str, port: u16, data: &[u8]) -> EndpointResult<usize> {
        send_datagram(ip, port, data)
    }
}

impl Default for UdpListeners {
    fn default() -> Self {
        Self::new()
    }
}
