//! Drop-Oldest Queues
//!
//! Bounded queues that sit between a venue session (producer) and the
//! consumer's blocking iterator.
//!
//! # Policy
//!
//! `push` never blocks. When the queue is full the oldest unread element is
//! evicted before the new one is inserted, so the queue always holds the most
//! recent `capacity` items in arrival order. A slow consumer sees fresh data
//! and a gap, never an ever-growing backlog.
//!
//! `pop` blocks until an item is available.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::domain::streaming::{Quote, Trade};

/// Default per-queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Item appended, nothing evicted.
    Enqueued,
    /// The queue was full; the oldest item was evicted to make room.
    EvictedOldest,
}

/// Bounded FIFO with drop-oldest-on-full semantics and a blocking pop.
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// A zero capacity is clamped to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            tracing::warn!("Queue capacity 0 requested, using 1");
            1
        } else {
            capacity
        };

        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an item, evicting the oldest one if the queue is full.
    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut items = self.items.lock();
            let outcome = if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::EvictedOldest
            } else {
                PushOutcome::Enqueued
            };
            items.push_back(item);
            outcome
        };

        self.available.notify_one();
        outcome
    }

    /// Remove the oldest item, blocking until one is available.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Remove the oldest item, waiting at most `timeout`.
    ///
    /// Returns `None` if nothing arrived in time.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Remove the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone> DropOldestQueue<T> {
    /// Copy of the queued items, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }
}

/// The quote and trade queues of one symbol.
#[derive(Debug)]
pub struct QueuePair {
    quotes: DropOldestQueue<Quote>,
    trades: DropOldestQueue<Trade>,
}

impl QueuePair {
    /// Create both queues with the same capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            quotes: DropOldestQueue::new(capacity),
            trades: DropOldestQueue::new(capacity),
        }
    }

    /// Quote queue.
    #[must_use]
    pub const fn quotes(&self) -> &DropOldestQueue<Quote> {
        &self.quotes
    }

    /// Trade queue.
    #[must_use]
    pub const fn trades(&self) -> &DropOldestQueue<Trade> {
        &self.trades
    }
}

impl Default for QueuePair {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
