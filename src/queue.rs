//! Bounded priority queue feeding the UDP sender task.
//!
//! Higher priority messages jump the line, equal priorities stay in arrival
//! order. [SendQueue::clear] is the shutdown path: it drains the queue and
//! wakes every waiting getter with `None` so the sender task can exit.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tokio::sync::Notify;

use crate::error::JausBridgeError;
use crate::message::Message;

struct QueuedMessage {
    message: Message,
    /// Arrival stamp keeping equal priorities first-in first-out
    arrival: u64,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.message.priority == other.message.priority && self.arrival == other.arrival
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueuedMessage>,
    arrival_counter: u64,
}

/// Bounded priority queue for outgoing messages
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    /// Zero means unbounded
    capacity: usize,
    closed: AtomicBool,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                arrival_counter: 0,
            }),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message. Fails fast with [JausBridgeError::QueueFull] when
    /// the queue is at capacity; the caller logs and drops.
    pub fn put(&self, message: Message) -> Result<(), JausBridgeError> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(JausBridgeError::QueueClosed);
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| JausBridgeError::SendError("send queue poisoned".to_string()))?;
        if self.capacity > 0 && inner.heap.len() >= self.capacity {
            return Err(JausBridgeError::QueueFull);
        }
        let arrival = inner.arrival_counter;
        inner.arrival_counter += 1;
        inner.heap.push(QueuedMessage { message, arrival });
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next message by priority. Returns `None` once the queue
    /// has been cleared for shutdown.
    pub async fn get(&self) -> Option<Message> {
        loop {
            if self.closed.load(AtomicOrdering::SeqCst) {
                return None;
            }
            let notified = self.notify.notified();
            if let Some(message) = self.pop() {
                return Some(message);
            }
            notified.await;
        }
    }

    fn pop(&self) -> Option<Message> {
        let mut inner = self.inner.lock().ok()?;
        inner.heap.pop().map(|queued| queued.message)
    }

    /// Drain everything and wake all waiting getters with the shutdown
    /// sentinel.
    pub fn clear(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
        if let Ok(mut inner) = self.inner.lock() {
            inner.heap.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.heap.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
