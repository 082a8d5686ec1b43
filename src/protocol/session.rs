//! Session state machine for the Bayeux client.
//!
//! Owns the session identity, the active transport and the retry timer.
//! It runs on a single task: application threads reach it only through
//! [`Command`]s and the shared queue, transports only through
//! [`TransportEvent`]s. Every outgoing message funnels through here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::{BackoffHandle, BackoffScheduler, RetryAction};
use super::extension::{apply_incoming, apply_outgoing, Extension};
use super::{
    is_meta_channel, Advice, ChannelId, Message, Reconnect, SessionAdvice, SessionShared,
    SessionStatus, BAYEUX_VERSION, META_CONNECT, META_DISCONNECT, META_HANDSHAKE,
    META_SUBSCRIBE, META_UNSUBSCRIBE,
};
use crate::config::{BatchPolicy, Config};
use crate::error::{BayeuxError, Result, TransportError};
use crate::listener::{deliver, DisconnectReason, SessionEvent};
use crate::transport::{TransportListener, TransportRegistry};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session; initial and terminal
    Disconnected,
    /// Handshake in flight or scheduled
    Handshaking,
    /// Session established, no connect in flight
    Connected,
    /// Connect in flight
    Connecting,
    /// Connect failed; retry scheduled with the same clientId
    Unconnected,
}

impl SessionState {
    /// Whether a clientId is held and the connect cycle is healthy
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Unconnected => "unconnected",
        };
        f.write_str(name)
    }
}

/// Request from the application handle to the protocol loop
#[derive(Debug)]
pub enum Command {
    /// Start a session if none exists
    Handshake,
    /// Queued messages are waiting
    Flush,
    /// End the session; the sender is notified once done
    Disconnect(oneshot::Sender<()>),
}

/// Outcome reported by the active transport
#[derive(Debug)]
pub enum TransportEvent {
    /// The server replied to `request`
    Replies {
        /// Batch that was sent
        request: Vec<Message>,
        /// Reply batch
        replies: Vec<Message>,
    },
    /// The exchange for `request` failed
    Failure {
        /// Batch that was sent
        request: Vec<Message>,
        /// What went wrong
        error: TransportError,
    },
}

/// Forwards transport callbacks into the protocol loop
struct EventForwarder {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportListener for EventForwarder {
    fn on_messages(&self, request: Vec<Message>, replies: Vec<Message>) {
        // Receiver gone means the loop has exited; nothing left to inform.
        let _ = self.tx.send(TransportEvent::Replies { request, replies });
    }

    fn on_failure(&self, request: Vec<Message>, error: TransportError) {
        let _ = self.tx.send(TransportEvent::Failure { request, error });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeKind {
    Handshake,
    Connect,
}

/// The one handshake or connect awaiting its reply
struct InFlight {
    kind: ExchangeKind,
    id: String,
    deadline: Instant,
    timeout: Duration,
    /// Application messages piggy-backed on the exchange
    carried: Vec<Message>,
}

/// Handshake / connect / reconnect protocol core
pub struct SessionStateMachine {
    config: Config,
    url: Url,
    shared: Arc<SessionShared>,
    registry: TransportRegistry,
    backoff: BackoffScheduler,
    extensions: Vec<Box<dyn Extension>>,
    listener: Arc<dyn TransportListener>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: SessionState,
    client_id: Option<String>,
    advice: SessionAdvice,
    default_advice: SessionAdvice,
    in_flight: Option<InFlight>,
    batch_in_flight: Option<Vec<String>>,
    resubscribe: bool,
}

impl SessionStateMachine {
    /// Create a disconnected state machine
    pub fn new(
        config: Config,
        shared: Arc<SessionShared>,
        registry: TransportRegistry,
        extensions: Vec<Box<dyn Extension>>,
    ) -> Result<Self> {
        let url = Url::parse(&config.session.url)
            .map_err(|e| BayeuxError::Config(format!("Invalid url '{}': {e}", config.session.url)))?;
        let (tx, events) = mpsc::unbounded_channel();
        let default_advice = SessionAdvice {
            timeout: Duration::from_millis(config.session.advice_timeout_ms),
            ..SessionAdvice::default()
        };

        Ok(Self {
            backoff: BackoffScheduler::new(config.backoff.clone()),
            config,
            url,
            shared,
            registry,
            extensions,
            listener: Arc::new(EventForwarder { tx }),
            events,
            state: SessionState::Disconnected,
            client_id: None,
            advice: default_advice,
            default_advice,
            in_flight: None,
            batch_in_flight: None,
            resubscribe: false,
        })
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity assigned by the server
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Last resolved advice
    pub fn advice(&self) -> SessionAdvice {
        self.advice
    }

    /// Handle to cancel the pending retry from another thread
    pub fn backoff_handle(&self) -> BackoffHandle {
        self.backoff.handle()
    }

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        let exchange = self.in_flight.as_ref().map(|f| f.deadline);
        match (exchange, self.backoff.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drive the protocol until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(url = %self.url, "protocol loop started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, Instant::now()),
                    None => break,
                },
                Some(event) = self.events.recv() => {
                    self.handle_transport_event(event, Instant::now());
                },
                () = sleep_until(deadline) => self.on_timer(Instant::now()),
            }
        }
        self.end_session(DisconnectReason::ClientDropped);
        debug!("protocol loop exited");
    }

    /// Handle every transport event already reported. Returns how many.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_transport_event(event, now);
            handled += 1;
        }
        handled
    }

    /// Apply an application command
    pub fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Handshake => {
                if self.state == SessionState::Disconnected {
                    self.backoff.reset();
                    self.advice = self.default_advice;
                    self.set_state(SessionState::Handshaking);
                    self.send_handshake(now);
                } else {
                    debug!(state = %self.state, "handshake ignored, session exists");
                }
            },
            Command::Flush => self.flush(),
            Command::Disconnect(done) => {
                self.end_session(DisconnectReason::Requested);
                let _ = done.send(());
            },
        }
    }

    /// Apply a transport outcome
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if self.state == SessionState::Disconnected {
            debug!("dropping transport event, session is over");
            return;
        }
        match event {
            TransportEvent::Replies { request, replies } => self.on_replies(&request, replies, now),
            TransportEvent::Failure { request, error } => self.on_failure(request, error, now),
        }
    }

    /// Expire the in-flight exchange and fire the retry timer, when due
    pub fn on_timer(&mut self, now: Instant) {
        if let Some(expired) = self.in_flight.take_if(|f| f.deadline <= now) {
            let error =
                TransportError::Timeout(u64::try_from(expired.timeout.as_millis()).unwrap_or(u64::MAX));
            self.fail_messages(&expired.carried, &error);
            match expired.kind {
                ExchangeKind::Handshake => self.handshake_failed(error.to_string(), None, now),
                ExchangeKind::Connect => self.connect_failed(error.to_string(), now),
            }
        }

        match self.backoff.take_due(now) {
            Some(RetryAction::Handshake)
                if self.state == SessionState::Handshaking && self.in_flight.is_none() =>
            {
                self.send_handshake(now);
            },
            Some(RetryAction::Connect) if self.client_id.is_some() && self.in_flight.is_none() => {
                self.send_connect(now);
            },
            Some(action) => debug!(?action, state = %self.state, "dropping stale timer"),
            None => {},
        }
    }

    fn send_handshake(&mut self, now: Instant) {
        self.client_id = None;
        let offered = self.registry.supported_types(BAYEUX_VERSION);
        let transport = match self
            .registry
            .negotiate(&offered, BAYEUX_VERSION)
            .and_then(|t| {
                self.registry
                    .activate(t.clone(), &self.config, &self.listener)
                    .map(|_| t)
            }) {
            Ok(transport) => transport,
            Err(err) => {
                warn!(error = %err, "no usable transport for handshake");
                return self.terminate(DisconnectReason::NegotiationFailed(err.to_string()));
            },
        };

        let mut handshake = transport.new_message();
        handshake.channel = META_HANDSHAKE.to_string();
        handshake.version = Some(BAYEUX_VERSION.to_string());
        handshake.minimum_version = Some(BAYEUX_VERSION.to_string());
        handshake.supported_connection_types = Some(offered);

        let batch = self.prepare(vec![handshake]);
        let timeout = self.config.session.max_network_delay();
        self.in_flight = Some(InFlight {
            kind: ExchangeKind::Handshake,
            id: batch[0].id.clone().unwrap_or_default(),
            deadline: now + timeout,
            timeout,
            carried: Vec::new(),
        });
        debug!(transport = transport.name(), "sending handshake");
        self.transmit(batch, now);
    }

    fn send_connect(&mut self, now: Instant) {
        let (Some(client_id), Some(transport)) =
            (self.client_id.clone(), self.registry.active().cloned())
        else {
            return;
        };

        let mut connect = transport.new_message();
        connect.channel = META_CONNECT.to_string();
        connect.client_id = Some(client_id);
        connect.connection_type = Some(transport.name().to_string());
        // The transport sizes its request timeout from the advised hold
        connect.advice = Some(Advice {
            interval: Some(millis(self.advice.interval)),
            timeout: Some(millis(self.advice.timeout)),
            ..Advice::default()
        });

        let mut batch = if self.can_flush() {
            self.shared.queue.drain()
        } else {
            Vec::new()
        };
        batch.push(connect);
        let batch = self.prepare(batch);

        let timeout = self.advice.timeout + self.config.session.max_network_delay();
        let (carried, connect) = batch.split_at(batch.len() - 1);
        self.in_flight = Some(InFlight {
            kind: ExchangeKind::Connect,
            id: connect[0].id.clone().unwrap_or_default(),
            deadline: now + timeout,
            timeout,
            carried: carried.to_vec(),
        });
        self.set_state(SessionState::Connecting);
        self.transmit(batch, now);
    }

    /// Send queued messages on their own, when the policy allows it
    fn flush(&mut self) {
        if self.client_id.is_none() || !self.can_flush() || self.shared.queue.is_empty() {
            return;
        }
        let ready = match self.config.session.batch_policy {
            BatchPolicy::Piggyback => {
                self.state == SessionState::Connected && self.in_flight.is_none()
            },
            BatchPolicy::Immediate => self.state.is_connected(),
        };
        if !ready {
            return;
        }

        let batch = self.prepare(self.shared.queue.drain());
        if batch.is_empty() {
            return;
        }
        self.batch_in_flight = Some(batch.iter().filter_map(|m| m.id.clone()).collect());
        debug!(size = batch.len(), "flushing standalone batch");
        self.transmit(batch, Instant::now());
    }

    fn can_flush(&self) -> bool {
        self.batch_in_flight.is_none() && !self.shared.in_batch()
    }

    /// Stamp ids and clientId, then run outgoing extensions
    fn prepare(&self, batch: Vec<Message>) -> Vec<Message> {
        batch
            .into_iter()
            .map(|mut message| {
                if message.id.is_none() {
                    message.id = Some(self.shared.next_message_id());
                }
                if message.channel != META_HANDSHAKE {
                    message.client_id.clone_from(&self.client_id);
                }
                apply_outgoing(&self.extensions, &mut message);
                message
            })
            .collect()
    }

    fn transmit(&mut self, batch: Vec<Message>, now: Instant) {
        match self.registry.active() {
            Some(transport) => transport.send(&self.url, batch),
            None => self.on_failure(
                batch,
                TransportError::Unavailable("no active transport".to_string()),
                now,
            ),
        }
    }

    fn on_replies(&mut self, request: &[Message], replies: Vec<Message>, now: Instant) {
        self.complete_batch(request);

        let mut session_replies = Vec::new();
        for mut reply in replies {
            if !apply_incoming(&self.extensions, &mut reply) {
                continue;
            }
            if self.is_stale(&reply) {
                debug!(channel = %reply.channel, "dropping message from a previous session");
                continue;
            }

            self.shared.message_listeners.notify(&reply, &reply.channel);
            let channel = reply.channel.clone();
            match channel.as_str() {
                META_HANDSHAKE | META_CONNECT => session_replies.push(reply),
                META_SUBSCRIBE | META_UNSUBSCRIBE => self.emit(SessionEvent::MetaReply(reply)),
                META_DISCONNECT => debug!("disconnect acknowledged"),
                other if is_meta_channel(other) => debug!(channel = other, "ignoring meta reply"),
                _ if reply.is_reply() && reply.data.is_none() => self.on_publish_reply(&reply),
                _ => self.deliver_to_subscribers(&reply),
            }
        }

        // Channel messages are out before the cycle moves on
        for reply in session_replies {
            if reply.channel == META_HANDSHAKE {
                self.on_handshake_reply(reply, now);
            } else {
                self.on_connect_reply(reply, now);
            }
        }

        self.flush();
    }

    fn on_failure(&mut self, request: Vec<Message>, error: TransportError, now: Instant) {
        self.complete_batch(&request);

        let exchange = self
            .in_flight
            .as_ref()
            .filter(|f| request.iter().any(|m| m.id.as_deref() == Some(f.id.as_str())))
            .map(|f| f.kind);
        let expired = exchange.is_none()
            && request
                .iter()
                .any(|m| matches!(m.channel.as_str(), META_HANDSHAKE | META_CONNECT));
        if expired {
            // Its timeout already failed the carried messages
            debug!(%error, "ignoring failure of an expired exchange");
            return;
        }

        let carried: Vec<Message> = request
            .into_iter()
            .filter(|m| {
                !matches!(
                    m.channel.as_str(),
                    META_HANDSHAKE | META_CONNECT | META_DISCONNECT
                )
            })
            .collect();

        if error.was_attempted() {
            self.fail_messages(&carried, &error);
        } else if !carried.is_empty() {
            debug!(size = carried.len(), %error, "batch not sent, requeueing");
            self.shared.queue.requeue_front(carried);
        }

        if let Some(kind) = exchange {
            self.in_flight = None;
            match kind {
                ExchangeKind::Handshake => self.handshake_failed(error.to_string(), None, now),
                ExchangeKind::Connect => self.connect_failed(error.to_string(), now),
            }
        }

        if error.was_attempted() {
            self.flush();
        }
    }

    fn on_handshake_reply(&mut self, reply: Message, now: Instant) {
        if !self.take_in_flight(ExchangeKind::Handshake, &reply) {
            debug!("ignoring stale handshake reply");
            return;
        }
        if let Some(advice) = &reply.advice {
            self.advice = self.default_advice.resolve(advice);
        }

        let server_types = reply.supported_connection_types.clone();
        if !reply.is_successful() {
            let error = reply
                .error
                .unwrap_or_else(|| "handshake refused".to_string());
            return self.handshake_failed(error, server_types, now);
        }

        match reply.client_id {
            Some(client_id) if !client_id.is_empty() => {
                self.handshake_succeeded(client_id, server_types, now);
            },
            _ => self.handshake_failed(
                "handshake reply without clientId".to_string(),
                server_types,
                now,
            ),
        }
    }

    fn handshake_succeeded(
        &mut self,
        client_id: String,
        server_types: Option<Vec<String>>,
        now: Instant,
    ) {
        if let Some(types) = server_types {
            if !self.renegotiate(&types) {
                return;
            }
        }
        let connection_type = self
            .registry
            .active()
            .map(|t| t.name().to_string())
            .unwrap_or_default();

        self.client_id = Some(client_id.clone());
        self.backoff.reset();
        if std::mem::take(&mut self.resubscribe) {
            self.resubscribe_all();
        }

        info!(client_id = %client_id, transport = %connection_type, "handshake completed");
        self.set_state(SessionState::Connected);
        self.emit(SessionEvent::HandshakeCompleted {
            client_id,
            connection_type,
        });

        if self.advice.reconnect == Reconnect::None {
            return self.terminate(DisconnectReason::ServerAdvice);
        }
        self.schedule_connect(now);
    }

    fn handshake_failed(&mut self, error: String, server_types: Option<Vec<String>>, now: Instant) {
        self.client_id = None;
        let reconnect = self.advice.reconnect;
        warn!(%error, ?reconnect, "handshake failed");
        self.emit(SessionEvent::HandshakeFailed {
            error: error.clone(),
            reconnect,
        });

        if reconnect == Reconnect::None {
            return self.terminate(DisconnectReason::HandshakeDenied(error));
        }
        if let Some(types) = server_types {
            if !self.renegotiate(&types) {
                return;
            }
        }

        self.set_state(SessionState::Handshaking);
        let delay = self
            .backoff
            .schedule_retry(now, self.advice.interval, RetryAction::Handshake);
        debug!(delay_ms = millis(delay), "handshake retry scheduled");
    }

    fn on_connect_reply(&mut self, reply: Message, now: Instant) {
        if !self.take_in_flight(ExchangeKind::Connect, &reply) {
            debug!("ignoring stale connect reply");
            return;
        }
        if let Some(advice) = &reply.advice {
            self.advice = self.default_advice.resolve(advice);
        }

        if !reply.is_successful() {
            let error = reply.error.unwrap_or_else(|| "connect refused".to_string());
            return self.connect_failed(error, now);
        }

        self.backoff.reset();
        self.set_state(SessionState::Connected);
        match self.advice.reconnect {
            Reconnect::Retry => self.schedule_connect(now),
            Reconnect::Handshake => self.rehandshake(now),
            Reconnect::None => self.terminate(DisconnectReason::ServerAdvice),
        }
    }

    fn connect_failed(&mut self, error: String, now: Instant) {
        let reconnect = self.advice.reconnect;
        warn!(%error, ?reconnect, "connect failed");
        self.emit(SessionEvent::ConnectFailed { error, reconnect });

        match reconnect {
            Reconnect::Retry => {
                self.set_state(SessionState::Unconnected);
                let delay = self
                    .backoff
                    .schedule_retry(now, self.advice.interval, RetryAction::Connect);
                debug!(delay_ms = millis(delay), "connect retry scheduled");
            },
            Reconnect::Handshake => self.rehandshake(now),
            Reconnect::None => self.terminate(DisconnectReason::ServerAdvice),
        }
    }

    fn schedule_connect(&mut self, now: Instant) {
        if self.advice.interval.is_zero() {
            self.send_connect(now);
        } else {
            self.backoff
                .schedule_after(now, self.advice.interval, RetryAction::Connect);
        }
    }

    fn rehandshake(&mut self, now: Instant) {
        self.client_id = None;
        self.in_flight = None;
        self.resubscribe = true;
        self.set_state(SessionState::Handshaking);
        let delay = self
            .backoff
            .schedule_retry(now, self.advice.interval, RetryAction::Handshake);
        info!(delay_ms = millis(delay), "re-handshake scheduled");
    }

    /// Switch to the best transport the server supports
    fn renegotiate(&mut self, server_types: &[String]) -> bool {
        let result = self
            .registry
            .negotiate(server_types, BAYEUX_VERSION)
            .and_then(|t| self.registry.activate(t, &self.config, &self.listener));
        match result {
            Ok(switched) => {
                if switched {
                    if let Some(transport) = self.registry.active() {
                        info!(transport = transport.name(), "switched transport");
                    }
                }
                true
            },
            Err(err) => {
                warn!(error = %err, ?server_types, "transport negotiation failed");
                self.terminate(DisconnectReason::NegotiationFailed(err.to_string()));
                false
            },
        }
    }

    /// The server forgot our subscriptions with the old clientId
    fn resubscribe_all(&self) {
        let table = self.shared.subscriptions();
        let (stale, others): (Vec<Message>, Vec<Message>) = self
            .shared
            .queue
            .drain()
            .into_iter()
            .partition(|m| matches!(m.channel.as_str(), META_SUBSCRIBE | META_UNSUBSCRIBE));

        let mut batch: Vec<Message> = table
            .channels()
            .iter()
            .map(|channel| Message::subscribe(channel.as_str()))
            .collect();
        debug!(
            channels = batch.len(),
            dropped = stale.len(),
            "re-subscribing after handshake"
        );
        batch.extend(others);
        self.shared.queue.requeue_front(batch);
    }

    fn end_session(&mut self, reason: DisconnectReason) {
        self.backoff.cancel();
        if self.state == SessionState::Disconnected {
            return;
        }
        if let (Some(client_id), Some(transport)) =
            (self.client_id.clone(), self.registry.active().cloned())
        {
            let mut disconnect = transport.new_message();
            disconnect.channel = META_DISCONNECT.to_string();
            disconnect.client_id = Some(client_id);
            // Best effort: the outcome is never awaited
            transport.send(&self.url, self.prepare(vec![disconnect]));
        }
        self.terminate(reason);
    }

    fn terminate(&mut self, reason: DisconnectReason) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.backoff.cancel();
        self.in_flight = None;
        self.batch_in_flight = None;
        self.client_id = None;
        self.resubscribe = false;
        self.registry.deactivate(&self.listener);

        self.shared.reset(|| BayeuxError::Disconnected);

        info!(%reason, "session terminated");
        self.set_state(SessionState::Disconnected);
        self.emit(SessionEvent::Terminated(reason));
    }

    fn take_in_flight(&mut self, kind: ExchangeKind, reply: &Message) -> bool {
        let current = self.in_flight.as_ref().is_some_and(|f| {
            f.kind == kind && reply.id.as_deref().is_none_or(|id| id == f.id)
        });
        if current {
            self.in_flight = None;
        }
        current
    }

    fn complete_batch(&mut self, request: &[Message]) {
        let done = self.batch_in_flight.as_ref().is_some_and(|ids| {
            request
                .iter()
                .any(|m| m.id.as_ref().is_some_and(|id| ids.contains(id)))
        });
        if done {
            self.batch_in_flight = None;
        }
    }

    fn is_stale(&self, reply: &Message) -> bool {
        match (&reply.client_id, &self.client_id) {
            (Some(theirs), Some(ours)) => theirs != ours && reply.channel != META_HANDSHAKE,
            _ => false,
        }
    }

    fn fail_messages(&self, messages: &[Message], error: &TransportError) {
        for message in messages {
            if message.is_meta() {
                let reply = Message::failure_reply(message, &error.to_string());
                self.emit(SessionEvent::MetaReply(reply));
            } else if let Some(id) = &message.id {
                self.shared
                    .resolve_publish(id, Err(BayeuxError::Transport(error.clone())));
            }
        }
    }

    fn on_publish_reply(&self, reply: &Message) {
        let Some(id) = reply.id.as_deref() else {
            return;
        };
        let outcome = if reply.is_successful() {
            Ok(())
        } else {
            Err(BayeuxError::Protocol(reply.error.clone().unwrap_or_else(|| {
                format!("publish to {} failed", reply.channel)
            })))
        };
        if !self.shared.resolve_publish(id, outcome) {
            debug!(id, "reply for unknown publish");
        }
    }

    fn deliver_to_subscribers(&self, message: &Message) {
        let Ok(channel) = ChannelId::new(&message.channel) else {
            warn!(channel = %message.channel, "dropping message on invalid channel");
            return;
        };
        let listeners = self.shared.subscriptions().matching(&channel);
        deliver(listeners, message, &message.channel, self.shared.failures());
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        self.state = to;
        self.shared.set_status(SessionStatus {
            state: to,
            client_id: self.client_id.clone(),
        });
        if from != to {
            debug!(%from, %to, "state changed");
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.shared.session_listeners.notify(&event, event.name());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
