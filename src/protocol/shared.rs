//! Session state shared between the application handle and the protocol
//! loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};

use super::{ChannelId, Message, MessageQueue, SessionState, SubscriptionTable};
use crate::error::Result;
use crate::listener::{
    ListenerDispatcher, ListenerFailure, ListenerId, MessageListener, SessionEvent,
};

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Observable session status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state
    pub state: SessionState,
    /// Identity assigned by the server, while a session exists
    pub client_id: Option<String>,
}

type Receipt = oneshot::Sender<Result<()>>;

/// Structures touched by both application threads and the protocol loop
pub struct SessionShared {
    /// Outgoing messages
    pub queue: MessageQueue,
    /// Session lifecycle listeners
    pub session_listeners: ListenerDispatcher<SessionEvent>,
    /// Listeners for every inbound message
    pub message_listeners: ListenerDispatcher<Message>,
    subscriptions: Mutex<SubscriptionTable>,
    pending_publishes: Mutex<HashMap<String, Receipt>>,
    failures: broadcast::Sender<ListenerFailure>,
    status: watch::Sender<SessionStatus>,
    batch_depth: AtomicUsize,
    next_id: AtomicU64,
}

impl SessionShared {
    /// Create shared state for a disconnected session
    pub fn new() -> Arc<Self> {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Disconnected,
            client_id: None,
        });

        Arc::new(Self {
            queue: MessageQueue::new(),
            session_listeners: ListenerDispatcher::new(failures.clone()),
            message_listeners: ListenerDispatcher::new(failures.clone()),
            subscriptions: Mutex::new(SubscriptionTable::new()),
            pending_publishes: Mutex::new(HashMap::new()),
            failures,
            status,
            batch_depth: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    /// Fresh message id
    pub fn next_message_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Subscribe `listener` to `channel`
    pub fn subscribe(&self, channel: ChannelId, listener: &Arc<MessageListener>) -> ListenerId {
        self.subscriptions().subscribe(channel, listener, &self.queue)
    }

    /// Drop one subscription
    pub fn unsubscribe(&self, channel: &ChannelId, id: ListenerId) -> bool {
        self.subscriptions().unsubscribe(channel, id, &self.queue)
    }

    /// Enqueue a publish and return the receiver of its outcome
    pub fn enqueue_publish(&self, channel: &ChannelId, data: Value) -> oneshot::Receiver<Result<()>> {
        let id = self.next_message_id();
        let (tx, rx) = oneshot::channel();
        // Table lock orders this against `reset`
        let _table = self.subscriptions();
        self.receipts().insert(id.clone(), tx);
        self.queue
            .enqueue(Message::publish(channel.as_str(), data).with_id(id));
        rx
    }

    /// Drop subscriptions and queued messages, failing pending publishes.
    ///
    /// Runs under the subscription lock, so a concurrent subscribe or
    /// publish lands either wholly before (and is dropped) or wholly after.
    pub fn reset(&self, error: impl Fn() -> crate::error::BayeuxError) {
        let mut table = self.subscriptions();
        table.clear();
        self.queue.clear();
        self.fail_all_publishes(error);
    }

    /// Resolve a pending publish, if any
    pub fn resolve_publish(&self, id: &str, outcome: Result<()>) -> bool {
        match self.receipts().remove(id) {
            Some(tx) => {
                // The caller may have dropped the receipt.
                let _ = tx.send(outcome);
                true
            },
            None => false,
        }
    }

    /// Fail every pending publish
    pub fn fail_all_publishes(&self, error: impl Fn() -> crate::error::BayeuxError) {
        let pending: Vec<Receipt> = self.receipts().drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(error()));
        }
    }

    /// Lock the subscription table
    pub fn subscriptions(&self) -> MutexGuard<'_, SubscriptionTable> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Listener failure side channel
    pub fn failures(&self) -> &broadcast::Sender<ListenerFailure> {
        &self.failures
    }

    /// Publish the current status
    pub fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Open an application batch
    pub fn begin_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Close an application batch; `true` when the outermost one ends
    pub fn end_batch(&self) -> bool {
        self.batch_depth.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Whether an application batch is open
    pub fn in_batch(&self) -> bool {
        self.batch_depth.load(Ordering::SeqCst) > 0
    }

    fn receipts(&self) -> MutexGuard<'_, HashMap<String, Receipt>> {
        self.pending_publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
