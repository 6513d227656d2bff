//! In-memory event queue
//!
//! Append-only FIFO with a logical head pointer. Single-item dequeues only move
//! the head; the consumed prefix is discarded lazily once it is both large and at
//! least half of the backing storage. Draining with [`EventQueue::flush`] resets
//! the queue outright.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event::Event;

/// Head position past which a consumed prefix becomes eligible for compaction
const COMPACT_AFTER: usize = 1000;

/// FIFO event buffer
#[derive(Debug, Default)]
pub struct EventQueue {
    /// Slots in `[0, head)` have been taken and hold `None`
    items: Vec<Option<Event>>,
    head: usize,
    capacity: Option<usize>,
    dropped: u64,
}

impl EventQueue {
    /// Create an unbounded queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue holding at most `capacity` events.
    ///
    /// When full, enqueueing discards the oldest resident event (drop-oldest).
    /// A capacity of 0 retains nothing.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Append an event at the tail
    pub fn enqueue(&mut self, event: Event) {
        if let Some(capacity) = self.capacity
            && self.len() >= capacity
        {
            self.dropped += 1;
            if capacity == 0 {
                log::warn!("Event queue has zero capacity, dropping '{}'", event.event_type);
                return;
            }
            if let Some(oldest) = self.take_head() {
                log::warn!(
                    "Event queue full ({} events), dropping oldest '{}'",
                    capacity,
                    oldest.event_type
                );
            }
            self.compact();
        }
        self.items.push(Some(event));
    }

    /// Remove and return the event at the front
    pub fn dequeue(&mut self) -> Option<Event> {
        let item = self.take_head()?;
        self.compact();
        Some(item)
    }

    /// Remove every queued event, oldest first
    pub fn flush(&mut self) -> Vec<Event> {
        let head = self.head;
        self.head = 0;
        std::mem::take(&mut self.items).into_iter().skip(head).flatten().collect()
    }

    /// Number of events waiting to be drained
    pub fn len(&self) -> usize {
        self.items.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events discarded by the capacity ceiling since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn compact(&mut self) {
        if self.head > COMPACT_AFTER && self.head * 2 >= self.items.len() {
            self.items.drain(..self.head);
            self.head = 0;
        }
    }

    fn take_head(&mut self) -> Option<Event> {
        if self.head >= self.items.len() {
            return None;
        }
        let item = self.items[self.head].take();
        self.head += 1;
        item
    }
}

/// Process-scoped, cloneable handle to an [`EventQueue`]
///
/// Producers enqueue through it; the provider drains it. It outlives any single
/// provider activation, so events enqueued while no provider is running are kept
/// until the next drain.
#[derive(Debug, Clone, Default)]
pub struct SharedQueue {
    inner: Arc<Mutex<EventQueue>>,
}

impl SharedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared queue with a drop-oldest capacity ceiling
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventQueue::bounded(capacity))),
        }
    }

    pub fn enqueue(&self, event: Event) {
        self.lock().enqueue(event);
    }

    pub fn dequeue(&self) -> Option<Event> {
        self.lock().dequeue()
    }

    pub fn flush(&self) -> Vec<Event> {
        self.lock().flush()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped()
    }

    fn lock(&self) -> MutexGuard<'_, EventQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
