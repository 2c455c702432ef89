//! # Handle Registry
//!
//! Maps opaque integer handles to endpoint records and arbitrates every
//! create/destroy race.
//!
//! ## Locking
//!
//! ```text
//! ┌──────────────────────────┐
//! │ HandleTable (map mutex)  │──── lookup copies out Arc<EndpointRecord>
//! └──────────────────────────┘                 │
//!                                              ▼
//!            ┌───────────────────────────────────────────────┐
//!            │ EndpointRecord                                │
//!            │  control mutex  (receive loop, read mode)     │
//!            │  buffer mutex   (BoundedBuffer)               │
//!            │  driver         (OS resource)                 │
//!            └───────────────────────────────────────────────┘
//! ```
//!
//! Locks are taken in the order map → record, never the reverse, and none
//! is held while joining a receive thread. Handles are allocated only after
//! the driver opened and the loop started, so failed opens never consume a
//! handle number.

mod serial;
mod udp;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::buffer::BoundedBuffer;
use crate::driver::default_serial_backend;
use crate::error::{EndpointError, EndpointResult};
use crate::message::{EndpointStats, Message};
use crate::receiver::ReceiveLoop;
use crate::traits::{EndpointDriver, SerialBackend};

pub use serial::SerialPorts;
pub use udp::UdpListeners;

/// Opaque endpoint identifier
///
/// UDP listeners and serial ports are separate namespaces; both start at 1
/// and count up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(i32);

impl Handle {
    /// Sentinel returned across the polling API when an open fails
    pub const INVALID: Handle = Handle(-1);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which registry an endpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Udp,
    Serial,
}

/// Metadata describing an open endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub kind: EndpointKind,
    /// Local port for UDP, device name for serial
    pub name: String,
    pub port: Option<u16>,
    pub baud_rate: Option<u32>,
}

struct LoopControl {
    receiver: Option<ReceiveLoop>,
    /// A loop taken out of `receiver` is still being joined
    stopping: bool,
    closed: bool,
    direct_reads: usize,
}

/// Everything the registry owns for one endpoint
///
/// The receive loop only holds clones of the driver and buffer `Arc`s, and
/// it is always joined before the driver is closed.
pub struct EndpointRecord<D: EndpointDriver> {
    info: EndpointInfo,
    driver: Arc<D>,
    buffer: Arc<BoundedBuffer<Message>>,
    poll_interval: Duration,
    control: Mutex<LoopControl>,
    loop_joined: Condvar,
}

impl<D: EndpointDriver> EndpointRecord<D> {
    pub fn new(info: EndpointInfo, driver: D, capacity: usize, poll_interval: Duration) -> Self {
        Self {
            info,
            driver: Arc::new(driver),
            buffer: Arc::new(BoundedBuffer::new(capacity)),
            poll_interval,
            control: Mutex::new(LoopControl {
                receiver: None,
                stopping: false,
                closed: false,
                direct_reads: 0,
            }),
            loop_joined: Condvar::new(),
        }
    }

    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn buffer(&self) -> &BoundedBuffer<Message> {
        &self.buffer
    }

    pub fn is_receiving(&self) -> bool {
        let control = self.control.lock();
        control.receiver.is_some() || control.stopping
    }

    /// Lock the control block once no other caller is joining the loop
    fn settled_control(&self) -> MutexGuard<'_, LoopControl> {
        let mut control = self.control.lock();
        while control.stopping {
            self.loop_joined.wait(&mut control);
        }
        control
    }

    fn join_loop(&self, mut receiver: ReceiveLoop) {
        receiver.stop();
        self.control.lock().stopping = false;
        self.loop_joined.notify_all();
    }

    /// Start the receive loop (Created → Running)
    pub fn start_loop(&self, handle: Handle) -> EndpointResult<()> {
        let mut control = self.settled_control();
        if control.closed {
            return Err(EndpointError::InvalidHandle(handle));
        }
        if control.receiver.is_some() {
            return Err(EndpointError::ReadModeConflict {
                handle,
                reason: "async read already running",
            });
        }
        if control.direct_reads > 0 {
            return Err(EndpointError::ReadModeConflict {
                handle,
                reason: "direct read in progress",
            });
        }

        let driver: Arc<dyn EndpointDriver> = self.driver.clone();
        control.receiver = Some(ReceiveLoop::spawn(
            driver,
            Arc::clone(&self.buffer),
            self.poll_interval,
        )?);
        Ok(())
    }

    /// Stop and join the receive loop, keeping the endpoint open
    ///
    /// Returns `false` when no loop was running. Concurrent starts, direct
    /// reads and shutdowns wait until the join has finished.
    pub fn stop_loop(&self) -> bool {
        let receiver = {
            let mut control = self.settled_control();
            let receiver = control.receiver.take();
            control.stopping = receiver.is_some();
            receiver
        };
        match receiver {
            Some(receiver) => {
                self.join_loop(receiver);
                true
            }
            None => false,
        }
    }

    /// Mark the start of a synchronous read; refused while the loop runs
    pub fn begin_direct_read(&self, handle: Handle) -> EndpointResult<DirectRead<'_, D>> {
        let mut control = self.settled_control();
        if control.closed {
            return Err(EndpointError::InvalidHandle(handle));
        }
        if control.receiver.is_some() {
            return Err(EndpointError::ReadModeConflict {
                handle,
                reason: "async read owns this port",
            });
        }
        control.direct_reads += 1;
        Ok(DirectRead { record: self })
    }

    /// Stop the loop, then release the driver (StopRequested → Stopped)
    ///
    /// Also waits out a `stop_loop` that is still joining, so the driver is
    /// never closed under a live receive thread.
    pub fn shutdown(&self) {
        let receiver = {
            let mut control = self.settled_control();
            control.closed = true;
            let receiver = control.receiver.take();
            control.stopping = receiver.is_some();
            receiver
        };
        if let Some(receiver) = receiver {
            self.join_loop(receiver);
        }
        self.driver.close();
    }
}

/// Guard counting an in-flight direct read
pub struct DirectRead<'a, D: EndpointDriver> {
    record: &'a EndpointRecord<D>,
}

impl<D: EndpointDriver> Drop for DirectRead<'_, D> {
    fn drop(&mut self) {
        let mut control = self.record.control.lock();
        control.direct_reads = control.direct_reads.saturating_sub(1);
    }
}

struct TableInner<R> {
    next: i32,
    entries: HashMap<Handle, Arc<R>>,
}

/// Handle → record map guarded by one mutex
///
/// Lookups hand out `Arc` clones so callers never work under the map lock.
pub struct HandleTable<R> {
    kind: EndpointKind,
    inner: Mutex<TableInner<R>>,
}

impl<R> HandleTable<R> {
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(TableInner {
                next: 1,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Allocate the next handle and register `record` under it
    pub fn insert(&self, record: Arc<R>) -> EndpointResult<Handle> {
        let mut inner = self.inner.lock();
        if inner.next <= 0 {
            return Err(EndpointError::HandlesExhausted);
        }
        let handle = Handle(inner.next);
        // i32::MAX is the last handle; afterwards the table stays exhausted
        inner.next = inner.next.checked_add(1).unwrap_or(0);
        inner.entries.insert(handle, record);
        Ok(handle)
    }

    pub fn get(&self, handle: Handle) -> EndpointResult<Arc<R>> {
        self.inner
            .lock()
            .entries
            .get(&handle)
            .cloned()
            .ok_or(EndpointError::InvalidHandle(handle))
    }

    pub fn remove(&self, handle: Handle) -> Option<Arc<R>> {
        self.inner.lock().entries.remove(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.inner.lock().entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of registered handles, in ascending order
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.inner.lock().entries.keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}

impl<D: EndpointDriver> HandleTable<EndpointRecord<D>> {
    /// Register a record whose loop is already running; shut it down if
    /// no handle can be allocated
    pub(crate) fn register(&self, record: Arc<EndpointRecord<D>>) -> EndpointResult<Handle> {
        match self.insert(Arc::clone(&record)) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                record.shutdown();
                Err(e)
            }
        }
    }

    /// Unregister, stop the loop and release the driver
    ///
    /// Returns `false` for unknown or already-closed handles. The record is
    /// removed before joining, so concurrent closes of the same handle are
    /// resolved by the map lock and only one of them does the work.
    pub fn close(&self, handle: Handle) -> bool {
        let Some(record) = self.remove(handle) else {
            warn!("{:?} close ignored: invalid handle {}", self.kind, handle);
            return false;
        };
        record.shutdown();
        info!("{:?} endpoint {} closed (handle {})", self.kind, record.info.name, handle);
        true
    }

    /// Close every endpoint, one handle at a time
    pub fn close_all(&self) {
        let handles = self.handles();
        for handle in &handles {
            self.close(*handle);
        }
        if !handles.is_empty() {
            info!("Closed all {} {:?} endpoints", handles.len(), self.kind);
        }
    }

    pub fn buffer(&self, handle: Handle) -> EndpointResult<Arc<BoundedBuffer<Message>>> {
        self.get(handle).map(|record| Arc::clone(&record.buffer))
    }

    pub fn stats(&self, handle: Handle) -> EndpointResult<EndpointStats> {
        self.buffer(handle).map(|buffer| buffer.stats())
    }

    pub fn info(&self, handle: Handle) -> EndpointResult<EndpointInfo> {
        self.get(handle).map(|record| record.info.clone())
    }
}

/// Both endpoint registries, owned by the process's composition root
///
/// Dropping the registry closes every endpoint.
pub struct EndpointRegistry {
    udp: UdpListeners,
    serial: SerialPorts,
}

impl EndpointRegistry {
    pub fn new(serial_backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            udp: UdpListeners::new(),
            serial: SerialPorts::new(serial_backend),
        }
    }

    pub fn udp(&self) -> &UdpListeners {
        &self.udp
    }

    pub fn serial(&self) -> &SerialPorts {
        &self.serial
    }

    pub fn close_all(&self) {
        self.udp.close_all();
        self.serial.close_all();
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(default_serial_backend())
    }
}

impl Drop for EndpointRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    struct Idle;

    impl EndpointDriver for Idle {
        fn receive_nonblocking(&self) -> EndpointResult<Message> {
            Err(EndpointError::WouldBlock)
        }

        fn close(&self) {}

        fn describe(&self) -> String {
            "idle".into()
        }
    }

    fn record() -> Arc<EndpointRecord<Idle>> {
        let info = EndpointInfo {
            kind: EndpointKind::Udp,
            name: "idle".into(),
            port: None,
            baud_rate: None,
        };
        Arc::new(EndpointRecord::new(info, Idle, 4, Duration::from_millis(1)))
    }

    #[test]
    fn test_handles_are_monotonic_and_start_at_one() {
        let table = HandleTable::new(EndpointKind::Udp);
        let a = table.register(record()).unwrap();
        let b = table.register(record()).unwrap();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert!(table.close(a));
        let c = table.register(record()).unwrap();
        assert_eq!(c.raw(), 3);
        assert_eq!(table.handles(), vec![b, c]);
    }

    #[test]
    fn test_close_twice_and_unknown_handle() {
        let table = HandleTable::new(EndpointKind::Serial);
        let handle = table.register(record()).unwrap();
        assert!(table.contains(handle));
        assert!(table.close(handle));
        assert!(!table.contains(handle));
        assert!(!table.close(handle));
        assert!(!table.close(Handle::INVALID));
        assert!(!table.close(Handle::from_raw(999)));
        assert!(matches!(
            table.buffer(handle),
            Err(EndpointError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_close_all_empties_table() {
        let table = HandleTable::new(EndpointKind::Udp);
        for _ in 0..5 {
            let record = record();
            let handle = table.register(Arc::clone(&record)).unwrap();
            record.start_loop(handle).unwrap();
        }
        assert_eq!(table.len(), 5);
        table.close_all();
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_close_only_one_wins() {
        let table = Arc::new(HandleTable::new(EndpointKind::Udp));
        let record = record();
        let handle = table.register(Arc::clone(&record)).unwrap();
        record.start_loop(handle).unwrap();

        let closers: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.close(handle))
            })
            .collect();
        let wins = closers
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|closed| *closed)
            .count();
        assert_eq!(wins, 1);
        assert!(!record.is_receiving());
    }

    #[test]
    fn test_read_modes_are_exclusive() {
        let record = record();
        let handle = Handle::from_raw(1);

        {
            let _read = record.begin_direct_read(handle).unwrap();
            assert!(matches!(
                record.start_loop(handle),
                Err(EndpointError::ReadModeConflict { .. })
            ));
        }

        record.start_loop(handle).unwrap();
        assert!(matches!(
            record.start_loop(handle),
            Err(EndpointError::ReadModeConflict { .. })
        ));
        assert!(record.begin_direct_read(handle).is_err());

        assert!(record.stop_loop());
        assert!(!record.stop_loop());
        assert!(record.begin_direct_read(handle).is_ok());
    }

    /// Parks inside every receive call and records closes that land there
    #[derive(Default)]
    struct SlowDriver {
        in_receive: AtomicBool,
        closed_during_receive: AtomicBool,
    }

    impl EndpointDriver for SlowDriver {
        fn receive_nonblocking(&self) -> EndpointResult<Message> {
            self.in_receive.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            self.in_receive.store(false, Ordering::SeqCst);
            Err(EndpointError::WouldBlock)
        }

        fn close(&self) {
            if self.in_receive.load(Ordering::SeqCst) {
                self.closed_during_receive.store(true, Ordering::SeqCst);
            }
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    fn slow_record() -> Arc<EndpointRecord<SlowDriver>> {
        let info = EndpointInfo {
            kind: EndpointKind::Serial,
            name: "slow".into(),
            port: None,
            baud_rate: None,
        };
        let driver = SlowDriver::default();
        Arc::new(EndpointRecord::new(info, driver, 4, Duration::from_millis(1)))
    }

    fn wait_until_receiving(record: &EndpointRecord<SlowDriver>) {
        while !record.driver().in_receive.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Wait until a concurrent `stop_loop` has taken the loop out
    fn wait_until_taken(record: &EndpointRecord<SlowDriver>) {
        loop {
            let control = record.control.lock();
            if control.stopping || control.receiver.is_none() {
                return;
            }
            drop(control);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_shutdown_waits_for_concurrent_stop() {
        let record = slow_record();
        let handle = Handle::from_raw(1);
        record.start_loop(handle).unwrap();
        wait_until_receiving(&record);

        let stopper = {
            let record = Arc::clone(&record);
            thread::spawn(move || record.stop_loop())
        };
        wait_until_taken(&record);
        record.shutdown();

        assert!(!record.driver().in_receive.load(Ordering::SeqCst));
        assert!(!record.driver().closed_during_receive.load(Ordering::SeqCst));
        assert!(!record.is_receiving());
        stopper.join().unwrap();
    }

    #[test]
    fn test_restart_waits_for_concurrent_stop() {
        let record = slow_record();
        let handle = Handle::from_raw(2);
        record.start_loop(handle).unwrap();
        wait_until_receiving(&record);

        let stopper = {
            let record = Arc::clone(&record);
            thread::spawn(move || record.stop_loop())
        };
        wait_until_taken(&record);

        // Only succeeds once the first loop has been joined
        record.start_loop(handle).unwrap();
        assert!(stopper.join().unwrap());
        assert!(record.is_receiving());
        record.shutdown();
        assert!(!record.driver().closed_during_receive.load(Ordering::SeqCst));
    }

    #[test]
    fn test_last_handle_is_issued_before_exhaustion() {
        let table = HandleTable::new(EndpointKind::Udp);
        table.inner.lock().next = i32::MAX;

        let last = table.register(record()).unwrap();
        assert_eq!(last.raw(), i32::MAX);
        assert!(matches!(
            table.register(record()),
            Err(EndpointError::HandlesExhausted)
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_shutdown_blocks_restart() {
        let record = record();
        let handle = Handle::from_raw(3);
        record.start_loop(handle).unwrap();
        record.shutdown();
        assert!(!record.is_receiving());
        assert!(matches!(
            record.start_loop(handle),
            Err(EndpointError::InvalidHandle(_))
        ));
    }
}
