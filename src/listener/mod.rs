//! Application listeners and lifecycle events.
//!
//! Listeners are plain closures (or any type implementing [`Listener`]) that
//! the application keeps alive with an [`Arc`](std::sync::Arc); the engine
//! only holds weak references. A listener reports failure by returning an
//! error or by panicking. Either way the failure is isolated from the other
//! listeners and published on the [`ListenerFailure`] side channel.

mod dispatcher;

pub use dispatcher::{deliver, ListenerDispatcher, ListenerId};

use std::fmt;

use crate::protocol::{Message, Reconnect, SessionState};

/// Error type returned by listeners
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by listeners
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Receives events of type `E`
pub trait Listener<E>: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &E) -> ListenerResult;
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &E) -> ListenerResult {
        self(event)
    }
}

/// Listener for channel messages
pub type MessageListener = dyn Listener<Message>;

/// Listener for session lifecycle events
pub type SessionListener = dyn Listener<SessionEvent>;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called `disconnect`
    Requested,
    /// No transport is shared with the server
    NegotiationFailed(String),
    /// The server refused the handshake and advised not to retry
    HandshakeDenied(String),
    /// The server advised `reconnect: none` on a connect
    ServerAdvice,
    /// The client handle was dropped
    ClientDropped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "disconnect requested"),
            Self::NegotiationFailed(reason) => write!(f, "negotiation failed: {reason}"),
            Self::HandshakeDenied(reason) => write!(f, "handshake denied: {reason}"),
            Self::ServerAdvice => write!(f, "server advised to stop"),
            Self::ClientDropped => write!(f, "client dropped"),
        }
    }
}

/// Lifecycle event delivered to session listeners
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Every state transition
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// A handshake succeeded
    HandshakeCompleted {
        /// Identity assigned by the server
        client_id: String,
        /// Negotiated connection type
        connection_type: String,
    },
    /// A handshake failed; `reconnect` says what happens next
    HandshakeFailed {
        /// Failure description
        error: String,
        /// Applied directive
        reconnect: Reconnect,
    },
    /// A connect failed; `reconnect` says what happens next
    ConnectFailed {
        /// Failure description
        error: String,
        /// Applied directive
        reconnect: Reconnect,
    },
    /// Reply to a subscribe or unsubscribe (possibly synthesized locally)
    MetaReply(Message),
    /// The session reached `Disconnected` for good
    Terminated(DisconnectReason),
}

/// A listener that failed during delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Which listener failed
    pub listener: ListenerId,
    /// What was being delivered (channel or event name)
    pub context: String,
    /// Error text or panic message
    pub error: String,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listener {} failed on {}: {}",
            self.listener, self.context, self.error
        )
    }
}

impl SessionEvent {
    /// Short event name used in failure reports
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state-changed",
            Self::HandshakeCompleted { .. } => "handshake-completed",
            Self::HandshakeFailed { .. } => "handshake-failed",
            Self::ConnectFailed { .. } => "connect-failed",
            Self::MetaReply(_) => "meta-reply",
            Self::Terminated(_) => "terminated",
        }
    }
}
