use std::sync::Arc;

use log::{debug, error, info};

use super::{EndpointInfo, EndpointKind, EndpointRecord, Handle, HandleTable};
use crate::config::SerialConfig;
use crate::driver::SerialDriver;
use crate::error::EndpointResult;
use crate::message::{EndpointStats, SerialChunk};
use crate::traits::SerialBackend;

/// Registry of open serial ports
///
/// Each port supports either direct reads or the async-buffered mode,
/// never both at once. Writes, flushes and byte counts work in both modes.
pub struct SerialPorts {
    table: HandleTable<EndpointRecord<SerialDriver>>,
    backend: Arc<dyn SerialBackend>,
}

impl SerialPorts {
    pub fn new(backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            table: HandleTable::new(EndpointKind::Serial),
            backend,
        }
    }

    /// Open and configure `name`; starts the async loop if
    /// `config.async_read` is set
    pub fn open(&self, name: &str, config: &SerialConfig) -> EndpointResult<Handle> {
        let driver = match SerialDriver::open(self.backend.as_ref(), name, config) {
            Ok(driver) => driver,
            Err(e) => {
                error!("Serial port {} failed to open: {}", name, e);
                return Err(e);
            }
        };

        let info = EndpointInfo {
            kind: EndpointKind::Serial,
            name: name.to_string(),
            port: None,
            baud_rate: Some(config.baud_rate),
        };
        let record = Arc::new(EndpointRecord::new(
            info,
            driver,
            config.buffer_capacity,
            config.poll_interval(),
        ));

        if config.async_read {
            if let Err(e) = record.start_loop(Handle::INVALID) {
                error!("Serial port {}: {}", name, e);
                record.shutdown();
                return Err(e);
            }
        }

        let handle = self.table.register(record)?;
        info!(
            "Serial port opened: {}, handle {}, baud {}",
            name, handle, config.baud_rate
        );
        Ok(handle)
    }

    pub fn close(&self, handle: Handle) -> bool {
        self.table.close(handle)
    }

    pub fn close_all(&self) {
        self.table.close_all();
    }

    pub fn is_open(&self, handle: Handle) -> bool {
        self.table.contains(handle)
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.table.handles()
    }

    pub fn write(&self, handle: Handle, data: &[u8]) -> EndpointResult<()> {
        self.table.get(handle)?.driver().write(data)
    }

    /// Synchronous read of at most `max_bytes`, bounded by the read timeout
    ///
    /// Refused while the async loop owns the port.
    pub fn read(&self, handle: Handle, max_bytes: usize) -> EndpointResult<Vec<u8>> {
        let record = self.table.get(handle)?;
        let _direct = record.begin_direct_read(handle)?;
        let data = record.driver().read(max_bytes)?;
        debug!("Serial handle {}: read {} bytes", handle, data.len());
        Ok(data)
    }

    pub fn bytes_available(&self, handle: Handle) -> EndpointResult<usize> {
        self.table.get(handle)?.driver().bytes_available()
    }

    pub fn flush(
        &self,
        handle: Handle,
        clear_input: bool,
        clear_output: bool,
    ) -> EndpointResult<()> {
        self.table
            .get(handle)?
            .driver()
            .flush(clear_input, clear_output)
    }

    /// Switch the port to async-buffered mode
    pub fn start_async_read(&self, handle: Handle) -> EndpointResult<()> {
        self.table.get(handle)?.start_loop(handle)?;
        info!("Serial handle {}: async read started", handle);
        Ok(())
    }

    /// Leave async mode; buffered data stays available for polling
    ///
    /// Returns `Ok(false)` when no loop was running.
    pub fn stop_async_read(&self, handle: Handle) -> EndpointResult<bool> {
        let stopped = self.table.get(handle)?.stop_loop();
        if stopped {
            info!("Serial handle {}: async read stopped", handle);
        }
        Ok(stopped)
    }

    pub fn is_async_reading(&self, handle: Handle) -> EndpointResult<bool> {
        self.table.get(handle).map(|record| record.is_receiving())
    }

    pub fn has_data(&self, handle: Handle) -> EndpointResult<bool> {
        self.table.buffer(handle).map(|buffer| !buffer.is_empty())
    }

    pub fn chunk_count(&self, handle: Handle) -> EndpointResult<usize> {
        self.table.buffer(handle).map(|buffer| buffer.len())
    }

    pub fn take_all(&self, handle: Handle) -> EndpointResult<Vec<SerialChunk>> {
        let buffer = self.table.buffer(handle)?;
        Ok(buffer.drain().into_iter().map(SerialChunk::from).collect())
    }

    pub fn latest(&self, handle: Handle) -> EndpointResult<Option<SerialChunk>> {
        let buffer = self.table.buffer(handle)?;
        Ok(buffer.peek_latest().map(SerialChunk::from))
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

    /// Devices the platform backend can see
    pub fn available_ports(&self) -> Vec<String> {
        self.backend.available_ports()
    }
}
