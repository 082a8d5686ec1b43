//! Outgoing message queue.
//!
//! Application threads enqueue publishes and subscription changes; the
//! protocol loop drains them into the next batch. The mutex here is the only
//! synchronization point between the two for outgoing traffic.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Message;

/// Thread-safe FIFO of messages waiting for the next send opportunity
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, preserving insertion order
    pub fn enqueue(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// Take the whole current batch, leaving the queue empty.
    ///
    /// Messages enqueued after this returns land in the next batch.
    pub fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.lock()).into()
    }

    /// Put an unsent batch back ahead of anything enqueued since.
    pub fn requeue_front(&self, batch: Vec<Message>) {
        let mut messages = self.lock();
        for message in batch.into_iter().rev() {
            messages.push_front(message);
        }
    }

    /// Drop every queued message, returning them
    pub fn clear(&self) -> Vec<Message> {
        self.drain()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        // A panicking holder cannot leave the deque half-updated.
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
