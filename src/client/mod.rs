//! Application handle for a Bayeux session.
//!
//! [`BayeuxClient`] is cheap to clone and safe to share between threads.
//! Building one spawns the protocol loop on the current tokio runtime; the
//! loop exits (after a best-effort `/meta/disconnect`) once every clone of
//! the handle is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bayeux::{BayeuxClient, Config, ListenerResult, Message, MessageListener};
//!
//! let client = BayeuxClient::builder(Config::default().with_url("http://localhost:8080/cometd"))
//!     .build()?;
//! let listener: Arc<MessageListener> = Arc::new(|m: &Message| -> ListenerResult {
//!     println!("{:?}", m.data);
//!     Ok(())
//! });
//! let subscription = client.subscribe("/chat/**", &listener)?;
//! client.handshake()?;
//! client.publish("/chat/room", serde_json::json!({"text": "hi"}))?.await?;
//! client.disconnect().await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::Config;
use crate::error::{BayeuxError, Result, TransportError};
use crate::listener::{ListenerFailure, ListenerId, MessageListener, SessionListener};
use crate::protocol::{
    BackoffHandle, ChannelId, Command, Extension, SessionShared, SessionState,
    SessionStateMachine, SessionStatus,
};
use crate::transport::{ClientTransport, LongPollingTransport, TransportRegistry};

/// Builder for [`BayeuxClient`]
pub struct ClientBuilder {
    config: Config,
    transports: Vec<Arc<dyn ClientTransport>>,
    extensions: Vec<Box<dyn Extension>>,
}

impl ClientBuilder {
    /// Start from `config`
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transports: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Declare a transport. Declaration order is preference order.
    ///
    /// Without any declared transport the client uses
    /// [`LongPollingTransport`].
    pub fn with_transport(mut self, transport: Arc<dyn ClientTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Add a message extension; extensions run in registration order
    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Validate the configuration and spawn the protocol loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<BayeuxClient> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BayeuxError::Config(format!("No tokio runtime: {e}")))?;

        let mut registry = TransportRegistry::new(self.config.transport.allowed.clone());
        if self.transports.is_empty() {
            registry.register(Arc::new(LongPollingTransport::new()))?;
        }
        for transport in self.transports {
            registry.register(transport)?;
        }

        let shared = SessionShared::new();
        let machine =
            SessionStateMachine::new(self.config, shared.clone(), registry, self.extensions)?;
        let backoff = machine.backoff_handle();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        runtime.spawn(machine.run(commands_rx));

        Ok(BayeuxClient {
            inner: Arc::new(Inner {
                shared,
                commands,
                backoff,
            }),
        })
    }
}

struct Inner {
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedSender<Command>,
    backoff: BackoffHandle,
}

/// Handle to a Bayeux session
#[derive(Clone)]
pub struct BayeuxClient {
    inner: Arc<Inner>,
}

impl BayeuxClient {
    /// Builder with `config`
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Client with the default long-polling transport
    pub fn new(config: Config) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    /// Start a session. No-op while one exists.
    pub fn handshake(&self) -> Result<()> {
        self.send(Command::Handshake)
    }

    /// Subscribe `listener` to `channel` (wildcards allowed).
    ///
    /// The listener is held weakly: keep the `Arc` alive for as long as
    /// messages should arrive.
    pub fn subscribe(&self, channel: &str, listener: &Arc<MessageListener>) -> Result<Subscription> {
        let channel = ChannelId::new(channel)?;
        if channel.is_meta() {
            return Err(BayeuxError::ReservedChannel(channel.to_string()));
        }
        let id = self.inner.shared.subscribe(channel.clone(), listener);
        self.wake();
        Ok(Subscription { channel, id })
    }

    /// Drop a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let removed = self
            .inner
            .shared
            .unsubscribe(&subscription.channel, subscription.id);
        if removed {
            self.wake();
        }
        removed
    }

    /// Publish `data` to a concrete, non-meta channel.
    pub fn publish(&self, channel: &str, data: Value) -> Result<PublishReceipt> {
        let channel = ChannelId::new(channel)?;
        if channel.is_meta() {
            return Err(BayeuxError::ReservedChannel(channel.to_string()));
        }
        if channel.is_wildcard() {
            return Err(BayeuxError::InvalidChannel(format!(
                "cannot publish to wildcard channel '{channel}'"
            )));
        }
        let rx = self.inner.shared.enqueue_publish(&channel, data);
        self.wake();
        Ok(PublishReceipt { rx })
    }

    /// End the session and wait for the protocol loop to settle.
    ///
    /// Pending retries are cancelled right away, even while the loop is
    /// busy. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.inner.backoff.cancel();
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Hold back standalone sends until the returned guard is dropped.
    ///
    /// Guards nest; the outermost one flushes on drop.
    pub fn batch(&self) -> BatchGuard {
        self.inner.shared.begin_batch();
        BatchGuard {
            client: self.clone(),
        }
    }

    /// Run `f` inside a batch
    pub fn batched<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        let _guard = self.batch();
        f(self)
    }

    /// Register a session lifecycle listener (held weakly)
    pub fn add_session_listener(&self, listener: &Arc<SessionListener>) -> ListenerId {
        self.inner.shared.session_listeners.add(listener)
    }

    /// Remove a session listener
    pub fn remove_session_listener(&self, id: ListenerId) -> bool {
        self.inner.shared.session_listeners.remove(id)
    }

    /// Register a listener for every inbound message (held weakly)
    pub fn add_message_listener(&self, listener: &Arc<MessageListener>) -> ListenerId {
        self.inner.shared.message_listeners.add(listener)
    }

    /// Remove a global message listener
    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.inner.shared.message_listeners.remove(id)
    }

    /// Failures raised by listeners from now on
    pub fn listener_failures(&self) -> broadcast::Receiver<ListenerFailure> {
        self.inner.shared.failures().subscribe()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.shared.status().state
    }

    /// Identity assigned by the server
    pub fn client_id(&self) -> Option<String> {
        self.inner.shared.status().client_id
    }

    /// Watch session status changes
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.shared.watch_status()
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> Result<()> {
        let mut status = self.watch();
        let outcome = tokio::time::timeout(timeout, status.wait_for(|s| s.state == target))
            .await
            .map(|reached| reached.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BayeuxError::Disconnected),
            Err(_) => Err(BayeuxError::Transport(TransportError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ))),
        }
    }

    fn wake(&self) {
        if !self.inner.shared.in_batch() {
            // A closed loop means the session is gone; queued work is moot.
            let _ = self.send(Command::Flush);
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| BayeuxError::Disconnected)
    }
}

/// A live subscription, returned by [`BayeuxClient::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    channel: ChannelId,
    id: ListenerId,
}

impl Subscription {
    /// Subscribed channel pattern
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Listener id within the channel
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

/// Resolves once the server acknowledges the publish, or it fails
#[derive(Debug)]
#[must_use = "a receipt does nothing unless awaited"]
pub struct PublishReceipt {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for PublishReceipt {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|outcome| outcome.unwrap_or(Err(BayeuxError::Disconnected)))
    }
}

/// Open application batch; see [`BayeuxClient::batch`]
#[must_use = "the batch ends when the guard is dropped"]
pub struct BatchGuard {
    client: BayeuxClient,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.client.inner.shared.end_batch() {
            self.client.wake();
        }
    }
}
