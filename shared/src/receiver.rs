//! # Receive Loop
//!
//! One dedicated thread per open endpoint pulls bytes from its driver and
//! pushes them into the endpoint's [`BoundedBuffer`].
//!
//! ## State Machine
//!
//! ```text
//! Created ──spawn──► Running ──stop()──► StopRequested ──join──► Stopped
//! ```
//!
//! Cancellation is cooperative: the thread checks the state at the top of
//! every iteration. `stop()` does not return until the thread has been
//! joined, so the driver can be released right after.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::buffer::BoundedBuffer;
use crate::error::{EndpointError, EndpointResult};
use crate::message::Message;
use crate::traits::EndpointDriver;

/// Lifecycle of a receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Created = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl From<u8> for LoopState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

/// Handle to a running receive thread
pub struct ReceiveLoop {
    name: String,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl ReceiveLoop {
    /// Start a loop feeding `buffer` from `driver`
    ///
    /// `poll_interval` is how long the thread sleeps when the driver has
    /// nothing to read.
    pub fn spawn(
        driver: Arc<dyn EndpointDriver>,
        buffer: Arc<BoundedBuffer<Message>>,
        poll_interval: Duration,
    ) -> EndpointResult<Self> {
        let name = format!("rx-{}", driver.describe());
        let state = Arc::new(AtomicU8::new(LoopState::Created as u8));

        state.store(LoopState::Running as u8, Ordering::Release);
        let spawned = thread::Builder::new().name(name.clone()).spawn({
            let state = Arc::clone(&state);
            let name = name.clone();
            move || run(&name, driver.as_ref(), &buffer, &state, poll_interval)
        });

        match spawned {
            Ok(thread) => Ok(Self {
                name,
                state,
                thread: Some(thread),
            }),
            Err(e) => {
                state.store(LoopState::Stopped as u8, Ordering::Release);
                Err(EndpointError::Spawn(e))
            }
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a stop and wait for the thread to exit
    ///
    /// Must not be called while holding a lock the loop could need.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.state
            .store(LoopState::StopRequested as u8, Ordering::Release);
        if thread.join().is_err() {
            warn!("{}: receive thread panicked", self.name);
        }
        self.state.store(LoopState::Stopped as u8, Ordering::Release);

        debug!("{}: receive loop stopped", self.name);
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ReceiveLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveLoop")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn run(
    name: &str,
    driver: &dyn EndpointDriver,
    buffer: &BoundedBuffer<Message>,
    state: &AtomicU8,
    poll_interval: Duration,
) {
    debug!("{}: receive loop running", name);
    let mut error_streak = 0u32;

    while LoopState::from(state.load(Ordering::Acquire)) == LoopState::Running {
        match driver.receive_nonblocking() {
            Ok(message) => {
                if error_streak > 0 {
                    info!("{}: receive recovered after {} errors", name, error_streak);
                    error_streak = 0;
                }
                trace!("{}: buffered {} bytes", name, message.len());
                if buffer.push(message) {
                    trace!("{}: buffer full, dropped oldest message", name);
                }
            }
            Err(EndpointError::WouldBlock) => thread::sleep(poll_interval),
            Err(e) => {
                // Only an explicit stop ends the loop
                if !e.is_transient() {
                    error!("{}: receive failed: {}", name, e);
                } else if error_streak == 0 {
                    warn!("{}: receive failed: {}", name, e);
                } else {
                    debug!("{}: receive failed again: {}", name, e);
                }
                error_streak = error_streak.saturating_add(1);
                thread::sleep(poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Replays a script, then either blocks or produces forever
    struct ScriptedDriver {
        script: Mutex<VecDeque<EndpointResult<Message>>>,
        endless: bool,
        calls: AtomicUsize,
    }

    impl ScriptedDriver {
        fn new(script: Vec<EndpointResult<Message>>, endless: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                endless,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl EndpointDriver for ScriptedDriver {
        fn receive_nonblocking(&self) -> EndpointResult<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(step) => step,
                None if self.endless => Ok(Message::serial(vec![0])),
                None => Err(EndpointError::WouldBlock),
            }
        }

        fn close(&self) {}

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn test_messages_arrive_in_order_and_errors_are_survived() {
        let driver = ScriptedDriver::new(
            vec![
                Ok(Message::serial(b"a".to_vec())),
                Err(EndpointError::TransientIo(io::Error::other("glitch"))),
                Err(EndpointError::WouldBlock),
                Ok(Message::serial(b"b".to_vec())),
                Ok(Message::serial(b"c".to_vec())),
            ],
            false,
        );
        let buffer = Arc::new(BoundedBuffer::new(10));
        let mut rx =
            ReceiveLoop::spawn(driver, Arc::clone(&buffer), Duration::from_millis(1)).unwrap();
        assert!(rx.is_running());
        assert_eq!(rx.name(), "rx-scripted");

        assert!(wait_for(Duration::from_secs(2), || buffer.len() == 3));
        let payloads: Vec<Vec<u8>> = buffer
            .drain()
            .into_iter()
            .map(Message::into_payload)
            .collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        rx.stop();
        assert_eq!(rx.state(), LoopState::Stopped);
    }

    #[test]
    fn test_no_pushes_after_stop_returns() {
        let driver = ScriptedDriver::new(Vec::new(), true);
        let buffer = Arc::new(BoundedBuffer::new(1_000_000));
        let mut rx = ReceiveLoop::spawn(
            Arc::clone(&driver) as Arc<dyn EndpointDriver>,
            Arc::clone(&buffer),
            Duration::from_millis(1),
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(2), || !buffer.is_empty()));
        rx.stop();

        let calls = driver.calls.load(Ordering::SeqCst);
        let len = buffer.len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(driver.calls.load(Ordering::SeqCst), calls);
        assert_eq!(buffer.len(), len);
    }

    #[test]
    fn test_stop_is_idempotent_and_drop_joins() {
        let driver = ScriptedDriver::new(Vec::new(), false);
        let buffer = Arc::new(BoundedBuffer::new(4));
        let mut rx = ReceiveLoop::spawn(driver, buffer, Duration::from_millis(1)).unwrap();
        rx.stop();
        rx.stop();
        assert_eq!(rx.state(), LoopState::Stopped);

        let driver = ScriptedDriver::new(Vec::new(), false);
        let buffer = Arc::new(BoundedBuffer::new(4));
        let rx = ReceiveLoop::spawn(driver, buffer, Duration::from_millis(1)).unwrap();
        drop(rx);
    }

    #[test]
    fn test_non_transient_errors_do_not_end_the_loop() {
        let fatal = EndpointError::Unsupported("reads");
        assert!(!fatal.is_transient());

        let driver = ScriptedDriver::new(
            vec![
                Err(fatal),
                Err(EndpointError::InvalidConfig("bad line".into())),
                Ok(Message::serial(b"after".to_vec())),
            ],
            false,
        );
        let buffer = Arc::new(BoundedBuffer::new(4));
        let mut rx =
            ReceiveLoop::spawn(driver, Arc::clone(&buffer), Duration::from_millis(1)).unwrap();

        assert!(wait_for(Duration::from_secs(2), || buffer.len() == 1));
        assert!(rx.is_running());
        assert_eq!(buffer.drain()[0].payload(), b"after");
        rx.stop();
    }

    #[test]
    fn test_loop_state_from_u8() {
        assert_eq!(LoopState::from(0), LoopState::Created);
        assert_eq!(LoopState::from(1), LoopState::Running);
        assert_eq!(LoopState::from(2), LoopState::StopRequested);
        assert_eq!(LoopState::from(3), LoopState::Stopped);
    }
}
