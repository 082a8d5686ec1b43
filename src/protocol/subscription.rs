//! Ref-counted channel subscriptions.
//!
//! Several application subscriptions to the same channel share one
//! wire-level subscription: `/meta/subscribe` is enqueued when the first
//! listener arrives, `/meta/unsubscribe` when the last one leaves.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use super::{ChannelId, Message, MessageQueue};
use crate::listener::{ListenerId, MessageListener};

struct Entry {
    id: ListenerId,
    listener: Weak<MessageListener>,
}

/// Subscriptions by channel pattern
#[derive(Default)]
pub struct SubscriptionTable {
    channels: BTreeMap<ChannelId, Vec<Entry>>,
}

impl SubscriptionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener to `channel`, enqueueing `/meta/subscribe` if it is the
    /// first one.
    pub fn subscribe(
        &mut self,
        channel: ChannelId,
        listener: &Arc<MessageListener>,
        queue: &MessageQueue,
    ) -> ListenerId {
        let id = ListenerId::next();
        let entries = self.channels.entry(channel.clone()).or_default();
        if entries.is_empty() {
            queue.enqueue(Message::subscribe(channel.as_str()));
        }
        entries.push(Entry {
            id,
            listener: Arc::downgrade(listener),
        });
        id
    }

    /// Remove one listener from `channel`, enqueueing `/meta/unsubscribe` if
    /// it was the last one. Returns whether the listener was subscribed.
    pub fn unsubscribe(&mut self, channel: &ChannelId, id: ListenerId, queue: &MessageQueue) -> bool {
        let Some(entries) = self.channels.get_mut(channel) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return false;
        }
        if entries.is_empty() {
            self.channels.remove(channel);
            queue.enqueue(Message::unsubscribe(channel.as_str()));
        }
        true
    }

    /// Number of application subscriptions on `channel`
    pub fn refcount(&self, channel: &ChannelId) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one subscription
    pub fn channels(&self) -> Vec<ChannelId> {
        self.channels.keys().cloned().collect()
    }

    /// Live listeners whose pattern matches `channel`, in subscription order
    pub fn matching(&self, channel: &ChannelId) -> Vec<(ListenerId, Arc<MessageListener>)> {
        let mut matched: Vec<_> = self
            .channels
            .iter()
            .filter(|(pattern, _)| pattern.matches(channel))
            .flat_map(|(_, entries)| entries.iter())
            .filter_map(|entry| entry.listener.upgrade().map(|l| (entry.id, l)))
            .collect();
        matched.sort_by_key(|(id, _)| *id);
        matched
    }

    /// Drop every subscription without touching the wire
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Whether no subscription exists
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
