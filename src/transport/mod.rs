//! Transport layer abstraction for the Bayeux client.
//!
//! A transport moves batches of messages to the server and reports the
//! outcome asynchronously to its listeners. The session state machine is
//! the only caller of [`ClientTransport::send`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          SessionStateMachine            │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ TransportRegistry::negotiate
//!          ┌────────┴─────────┐
//!          ▼                  ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  long-polling   │ │   application   │
//! │    (bundled)    │ │   transports    │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! Only one transport is active at a time. Outcomes flow back through
//! [`TransportListener`] callbacks, never through return values.

mod long_polling;
mod registry;

pub use long_polling::LongPollingTransport;
pub use registry::TransportRegistry;

use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Url;

use crate::config::Config;
use crate::error::{Result, TransportError};
use crate::protocol::Message;

/// Connection type of the bundled HTTP transport
pub const LONG_POLLING: &str = "long-polling";

/// Observer of transport exchanges.
///
/// Callbacks may run on any thread and must not block.
pub trait TransportListener: Send + Sync {
    /// A batch is about to be sent
    fn on_sending(&self, _request: &[Message]) {}

    /// The server replied to `request`
    fn on_messages(&self, request: Vec<Message>, replies: Vec<Message>);

    /// The exchange for `request` failed
    fn on_failure(&self, request: Vec<Message>, error: TransportError);
}

/// Pluggable client transport.
pub trait ClientTransport: Send + Sync {
    /// Connection type name, as listed in `supportedConnectionTypes`
    fn name(&self) -> &str;

    /// Register an observer
    fn add_listener(&self, listener: Arc<dyn TransportListener>);

    /// Unregister an observer
    fn remove_listener(&self, listener: &Arc<dyn TransportListener>);

    /// Whether this transport can carry the given protocol version
    fn accept(&self, bayeux_version: &str) -> bool;

    /// Prepare for sending. Must be called before [`send`](Self::send).
    fn init(&self, config: &Config) -> Result<()>;

    /// Release every resource; later sends fail fast with
    /// [`TransportError::Unavailable`].
    fn destroy(&self);

    /// A message pre-filled with transport defaults
    fn new_message(&self) -> Message {
        Message::default()
    }

    /// Dispatch one batch. The outcome is reported to listeners.
    fn send(&self, uri: &Url, messages: Vec<Message>);
}

/// Listener list shared by transport implementations
#[derive(Default)]
pub struct TransportListeners {
    listeners: Mutex<Vec<Arc<dyn TransportListener>>>,
}

impl TransportListeners {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn add(&self, listener: Arc<dyn TransportListener>) {
        self.lock().push(listener);
    }

    /// Remove a listener by identity
    pub fn remove(&self, listener: &Arc<dyn TransportListener>) {
        self.lock()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Report a batch about to be sent
    pub fn sending(&self, request: &[Message]) {
        for listener in self.snapshot() {
            listener.on_sending(request);
        }
    }

    /// Report replies for `request`
    pub fn messages(&self, request: Vec<Message>, replies: Vec<Message>) {
        for listener in self.snapshot() {
            listener.on_messages(request.clone(), replies.clone());
        }
    }

    /// Report a failed exchange for `request`
    pub fn failure(&self, request: Vec<Message>, error: TransportError) {
        for listener in self.snapshot() {
            listener.on_failure(request.clone(), error.clone());
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn TransportListener>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn TransportListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
