//! # Bayeux - Publish/Subscribe Client Engine
//!
//! Client side of the Bayeux protocol over request/response transports.
//! The application establishes a session with a messaging server, subscribes
//! to named channels, publishes messages and receives pushed messages.
//! Connection loss, server reconnection advice and transport fallback are
//! handled by the engine.
//!
//! ## Protocol Overview
//!
//! ```text
//! Application          BayeuxClient          Protocol loop           Server
//!     |                     |                      |                    |
//!     |-- subscribe ------->|-- queue + Flush ---->|                    |
//!     |-- handshake ------->|-- Handshake -------->|--- /meta/handshake->|
//!     |                     |                      |<-- clientId -------|
//!     |                     |                      |--- /meta/connect -->|
//!     |<===== channel messages (listeners) ========|<-- messages -------|
//!     |-- disconnect ------>|-- Disconnect ------->|--- /meta/disconnect>|
//! ```
//!
//! One tokio task per client owns the session state machine. Application
//! threads only touch the outgoing queue and the subscription table, then
//! wake the loop.
//!
//! ### Session States
//!
//! | State          | Meaning                                   |
//! |----------------|-------------------------------------------|
//! | `Disconnected` | No session (initial and terminal)         |
//! | `Handshaking`  | Handshake in flight or scheduled          |
//! | `Connected`    | Session up, waiting to send next connect  |
//! | `Connecting`   | Long-poll connect held by the server      |
//! | `Unconnected`  | Connect failed, retry with same clientId  |
//!
//! ### Wire Message
//!
//! | Field                      | Used by                              |
//! |----------------------------|--------------------------------------|
//! | `channel`                  | every message                        |
//! | `id`                       | correlates replies with requests     |
//! | `clientId`                 | every message after the handshake    |
//! | `advice`                   | server reconnect / interval / timeout|
//! | `supportedConnectionTypes` | handshake negotiation                |
//! | `subscription`             | `/meta/subscribe`, `/meta/unsubscribe`|
//! | `data`                     | published and delivered messages     |
//! | `ext`                      | extensions                           |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bayeux::{BayeuxClient, Config, ListenerResult, Message, MessageListener};
//!
//! let client = BayeuxClient::new(Config::default().with_url("http://localhost:8080/cometd"))?;
//! let listener: Arc<MessageListener> = Arc::new(|m: &Message| -> ListenerResult {
//!     println!("{}: {:?}", m.channel, m.data);
//!     Ok(())
//! });
//! let _subscription = client.subscribe("/chat/*", &listener)?;
//! client.handshake()?;
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Application handle, batching and publish receipts
//! - [`protocol`]: Session state machine, channels, queue, backoff
//! - [`transport`]: Transport contract, registry and long-polling transport
//! - [`listener`]: Listener traits, session events and failure isolation
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use client::{BatchGuard, BayeuxClient, ClientBuilder, PublishReceipt, Subscription};
pub use config::{BackoffConfig, BackoffGrowth, BatchPolicy, Config};
pub use error::{BayeuxError, Result, TransportError};
pub use listener::{
    DisconnectReason, Listener, ListenerFailure, ListenerId, ListenerResult, MessageListener,
    SessionEvent, SessionListener,
};
pub use protocol::{
    Advice, ChannelId, Extension, HandshakeExt, Message, Reconnect, SessionAdvice, SessionState,
    BAYEUX_VERSION,
};
pub use transport::{
    ClientTransport, LongPollingTransport, TransportListener, TransportListeners, LONG_POLLING,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
