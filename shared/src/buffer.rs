//! # Bounded Message Buffer
//!
//! This module provides the thread-safe bridge between a background receive
//! loop (producer) and synchronous pollers (consumers).
//!
//! ## Design
//!
//! 1. **Fixed Capacity**: The capacity is chosen when the endpoint opens and
//!    never changes. `len() <= capacity` holds after every operation.
//!
//! 2. **Drop-Oldest**: A push into a full buffer evicts the front element
//!    first. Eviction is O(1) because storage is a `VecDeque` ring.
//!
//! 3. **Single Lock**: Every operation runs under one per-buffer mutex, so a
//!    `drain()` racing a `push()` observes each message exactly once.
//!
//! 4. **Loss Accounting**: Evictions are counted so pollers can tell that
//!    the producer outran them.
//!
//! ## Layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 BoundedBuffer (capacity N)                │
//! ├───────────────────────────────────────────────────────────┤
//! │  oldest ◄── [ m0 | m1 | m2 | ... | mk ] ◄── push (newest) │
//! │    │                                   │                  │
//! │    ▼                                   ▼                  │
//! │  evicted when full              peek_latest()             │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::message::{EndpointStats, Message};

struct Inner<T> {
    items: VecDeque<T>,
    received: u64,
    dropped: u64,
}

/// Fixed-capacity, drop-oldest FIFO shared between one producer and any
/// number of pollers
///
/// # Example
///
/// ```rust
/// use commlink::buffer::BoundedBuffer;
///
/// let buffer = BoundedBuffer::new(2);
/// buffer.push("a");
/// buffer.push("b");
/// buffer.push("c");
///
/// assert_eq!(buffer.dropped(), 1);
/// assert_eq!(buffer.drain(), vec!["b", "c"]);
/// assert!(buffer.is_empty());
/// ```
pub struct BoundedBuffer<T = Message> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer; a capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                received: 0,
                dropped: 0,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item, evicting the oldest one if the buffer is full
    ///
    /// Returns `true` when an eviction happened.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        let evicted = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            true
        } else {
            false
        };
        inner.items.push_back(item);
        inner.received += 1;
        evicted
    }

    /// Remove and return every buffered item in receipt order
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.items.drain(..).collect()
    }

    /// Empty the buffer without returning its contents
    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Number of items evicted since creation
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Snapshot of counters taken under a single lock acquisition
    pub fn stats(&self) -> EndpointStats {
        let inner = self.inner.lock();
        EndpointStats {
            received: inner.received,
            dropped: inner.dropped,
            buffered: inner.items.len(),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Copy of the most recently pushed item, left in place
    pub fn peek_latest(&self) -> Option<T> {
        self.inner.lock().items.back().cloned()
    }
}

impl<T> std::fmt::Debug for BoundedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BoundedBuffer")
            .field("capacity", &self.capacity)
            .field("buffered", &stats.buffered)
            .field("dropped", &stats.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer: BoundedBuffer<u32> = BoundedBuffer::new(4);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.peek_latest(), None);
    }

    #[test]
    fn test_zero_capacity_becomes_one() {
        let buffer = BoundedBuffer::new(0);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.drain(), vec![2]);
    }

    #[test]
    fn test_keeps_last_n_in_order() {
        for capacity in 1..6usize {
            let buffer = BoundedBuffer::new(capacity);
            for i in 0..20usize {
                buffer.push(i);
                assert!(buffer.len() <= capacity);
            }
            let expected: Vec<usize> = (20 - capacity..20).collect();
            assert_eq!(buffer.drain(), expected);
            assert_eq!(buffer.dropped(), (20 - capacity) as u64);
        }
    }

    #[test]
    fn test_drop_oldest_letters() {
        let buffer = BoundedBuffer::new(3);
        assert!(!buffer.push("a"));
        assert!(!buffer.push("b"));
        assert!(!buffer.push("c"));
        assert!(buffer.push("d"));
        assert_eq!(buffer.drain(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_drain_empties_and_returns_since_last_clear() {
        let buffer = BoundedBuffer::new(10);
        buffer.push(1);
        buffer.clear();
        buffer.push(2);
        buffer.push(3);
        assert_eq!(buffer.drain(), vec![2, 3]);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_peek_latest_does_not_remove() {
        let buffer = BoundedBuffer::new(3);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.peek_latest(), Some(2));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_stats_snapshot() {
        let buffer = BoundedBuffer::new(2);
        for i in 0..5 {
            buffer.push(i);
        }
        let stats = buffer.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.capacity, 2);
    }

    #[test]
    fn test_concurrent_drain_sees_each_push_once() {
        const TOTAL: usize = 20_000;
        let buffer = Arc::new(BoundedBuffer::new(TOTAL));

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..TOTAL {
                    buffer.push(i);
                }
            })
        };

        let mut seen = Vec::with_capacity(TOTAL);
        while seen.len() < TOTAL {
            seen.extend(buffer.drain());
            if producer.is_finished() {
                seen.extend(buffer.drain());
                break;
            }
        }
        producer.join().unwrap();
        seen.extend(buffer.drain());

        let expected: Vec<usize> = (0..TOTAL).collect();
        assert_eq!(seen, expected);
    }
}
