//! Bayeux protocol: session state machine, batching and retry.
//!
//! # Message Flow
//!
//! ```text
//! Client                                   Server
//!    |                                       |
//!    |--- /meta/handshake (types) --------->|  negotiate transport
//!    |<-- clientId, advice, types ----------|
//!    |                                       |
//!    |--- /meta/connect ------------------->|  held until messages
//!    |<-- channel messages + connect reply -|  or server timeout
//!    |--- /meta/connect ------------------->|  long-poll loop
//!    |          ...                          |
//!    |--- /meta/disconnect ---------------->|
//! ```
//!
//! ## State Machine
//!
//! | State          | Description                                | Next                          |
//! |----------------|--------------------------------------------|-------------------------------|
//! | `Disconnected` | No session (initial and terminal)          | → Handshaking                 |
//! | `Handshaking`  | Handshake in flight or scheduled           | → Connected, Disconnected     |
//! | `Connected`    | Session up, no connect in flight           | → Connecting, Handshaking     |
//! | `Connecting`   | Connect in flight (long-poll held)         | → Connected, Unconnected      |
//! | `Unconnected`  | Connect failed, retry scheduled            | → Connecting, Disconnected    |
//!
//! ## Reconnection Advice
//!
//! Every failure is resolved through the last advice received:
//!
//! | `reconnect` | After a failed connect            | After a failed handshake  |
//! |-------------|-----------------------------------|---------------------------|
//! | `retry`     | connect again after backoff       | handshake after backoff   |
//! | `handshake` | drop clientId, handshake again    | handshake after backoff   |
//! | `none`      | session over                      | session over              |

mod backoff;
mod channel;
mod extension;
mod message;
mod queue;
mod session;
mod shared;
mod subscription;

pub use backoff::{BackoffHandle, BackoffScheduler, RetryAction};
pub use channel::{
    is_meta_channel, ChannelId, Wildcard, META_CONNECT, META_DISCONNECT, META_HANDSHAKE,
    META_SUBSCRIBE, META_UNSUBSCRIBE,
};
pub use extension::{Extension, HandshakeExt};
pub use message::{Advice, Message, Reconnect, SessionAdvice};
pub use queue::MessageQueue;
pub use session::{Command, SessionState, SessionStateMachine, TransportEvent};
pub use shared::{SessionShared, SessionStatus};
pub use subscription::SubscriptionTable;

/// Bayeux protocol version spoken by this client
pub const BAYEUX_VERSION: &str = "1.0";

/// Connect hold time assumed before the server advises one
pub const DEFAULT_ADVICE_TIMEOUT_MS: u64 = 30_000;
