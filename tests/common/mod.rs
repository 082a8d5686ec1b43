//! Fake Bayeux server and in-memory transport shared by the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bayeux::protocol::{
    META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};
use bayeux::{
    Advice, BackoffConfig, BackoffGrowth, ChannelId, ClientTransport, Config, ListenerResult,
    Message, MessageListener, Reconnect, SessionEvent, SessionListener, TransportError,
    TransportListener, TransportListeners, BAYEUX_VERSION,
};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Received batch, stamped with the (possibly paused) clock
#[derive(Debug, Clone)]
pub struct Received {
    pub at: Instant,
    pub batch: Vec<Message>,
}

#[derive(Default)]
struct ServerState {
    next_client: u64,
    sessions: HashMap<String, Vec<ChannelId>>,
    mailbox: HashMap<String, Vec<Message>>,
    received: Vec<Received>,
    deny_handshakes: bool,
    fail_connects: usize,
    fail_channel: Option<String>,
}

/// Minimal Bayeux server: sessions, subscriptions, fan-out, held connects
pub struct FakeServer {
    state: Mutex<ServerState>,
    wake: Notify,
    hold: Duration,
    advised_timeout: Duration,
    types: Vec<String>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Self::with_types(&["long-polling"])
    }

    pub fn with_types(types: &[&str]) -> Arc<Self> {
        Self::build(types, Duration::from_millis(500), Duration::from_millis(500))
    }

    /// Hold idle connects for `hold` while advising clients `advised_timeout`
    pub fn holding(hold: Duration, advised_timeout: Duration) -> Arc<Self> {
        Self::build(&["long-polling"], hold, advised_timeout)
    }

    fn build(types: &[&str], hold: Duration, advised_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            wake: Notify::new(),
            hold,
            advised_timeout,
            types: types.iter().map(|t| t.to_string()).collect(),
        })
    }

    pub fn deny_handshakes(&self) {
        self.state.lock().unwrap().deny_handshakes = true;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().unwrap().fail_connects = count;
    }

    /// Reply HTTP 500 to every batch carrying a message on `channel`
    pub fn fail_batches_on(&self, channel: &str) {
        self.state.lock().unwrap().fail_channel = Some(channel.to_string());
    }

    /// Drop every session, as after a server restart
    pub fn forget_sessions(&self) {
        let mut state = self.state.lock().unwrap();
        state.sessions.clear();
        state.mailbox.clear();
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn messages_on(&self, channel: &str) -> Vec<Message> {
        self.received()
            .into_iter()
            .flat_map(|r| r.batch)
            .filter(|m| m.channel == channel)
            .collect()
    }

    pub fn connects(&self) -> Vec<Message> {
        self.messages_on(META_CONNECT)
    }

    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut clients: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.as_str() == channel))
            .map(|(client, _)| client.clone())
            .collect();
        clients.sort();
        clients
    }

    /// Deliver a message to every matching subscriber
    pub fn push(&self, channel: &str, data: Value) {
        let message = Message::publish(channel, data);
        self.state.lock().unwrap().fan_out(&message);
        self.wake.notify_waiters();
    }

    /// Handle one batch the way a long-polling endpoint would
    pub async fn exchange(&self, batch: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let (mut replies, held) = self.process(&batch)?;
        self.wake.notify_waiters();

        if let Some((reply, client_id)) = held {
            if !self.has_mail(&client_id) {
                let _ = tokio::time::timeout(self.hold, self.wake.notified()).await;
            }
            replies.extend(self.take_mail(&client_id));
            replies.push(reply);
        }
        Ok(replies)
    }

    fn has_mail(&self, client_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .mailbox
            .get(client_id)
            .is_some_and(|mail| !mail.is_empty())
    }

    fn take_mail(&self, client_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .mailbox
            .remove(client_id)
            .unwrap_or_default()
    }

    #[allow(clippy::type_complexity)]
    fn process(
        &self,
        batch: &[Message],
    ) -> Result<(Vec<Message>, Option<(Message, String)>), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.received.push(Received {
            at: Instant::now(),
            batch: batch.to_vec(),
        });

        if let Some(channel) = &state.fail_channel {
            if batch.iter().any(|m| &m.channel == channel) {
                return Err(TransportError::Http { status: 500 });
            }
        }
        if state.fail_connects > 0 && batch.iter().any(|m| m.channel == META_CONNECT) {
            state.fail_connects -= 1;
            return Err(TransportError::Network("connection reset".to_string()));
        }

        let mut replies = Vec::new();
        let mut held = None;
        for message in batch {
            let client_id = message.client_id.clone().unwrap_or_default();
            let known = state.sessions.contains_key(&client_id);
            let mut reply = Message {
                channel: message.channel.clone(),
                id: message.id.clone(),
                client_id: message.client_id.clone(),
                successful: Some(true),
                ..Default::default()
            };

            match message.channel.as_str() {
                META_HANDSHAKE => {
                    reply.supported_connection_types = Some(self.types.clone());
                    reply.version = Some(BAYEUX_VERSION.to_string());
                    if state.deny_handshakes {
                        reply.successful = Some(false);
                        reply.error = Some("403::Handshake denied".to_string());
                        reply.advice = Some(Advice {
                            reconnect: Some(Reconnect::None),
                            ..Default::default()
                        });
                    } else {
                        state.next_client += 1;
                        let id = format!("client-{}", state.next_client);
                        state.sessions.insert(id.clone(), Vec::new());
                        reply.client_id = Some(id);
                        reply.advice = Some(Advice {
                            reconnect: Some(Reconnect::Retry),
                            interval: Some(0),
                            timeout: Some(self.advised_timeout.as_millis() as u64),
                        });
                    }
                },
                _ if !known => {
                    reply.successful = Some(false);
                    reply.error = Some("402::Unknown client".to_string());
                    reply.subscription.clone_from(&message.subscription);
                    reply.advice = Some(Advice {
                        reconnect: Some(Reconnect::Handshake),
                        interval: Some(0),
                        timeout: None,
                    });
                },
                META_CONNECT => {
                    held = Some((reply, client_id));
                    continue;
                },
                META_SUBSCRIBE => {
                    let channel = message.subscription.clone().unwrap_or_default();
                    reply.subscription = Some(channel.clone());
                    if let Ok(channel) = ChannelId::new(&channel) {
                        if let Some(subs) = state.sessions.get_mut(&client_id) {
                            subs.push(channel);
                        }
                    }
                },
                META_UNSUBSCRIBE => {
                    let channel = message.subscription.clone().unwrap_or_default();
                    if let Some(subs) = state.sessions.get_mut(&client_id) {
                        subs.retain(|s| s.as_str() != channel);
                    }
                    reply.subscription = Some(channel);
                },
                META_DISCONNECT => {
                    state.sessions.remove(&client_id);
                    state.mailbox.remove(&client_id);
                },
                _ => {
                    state.fan_out(&Message::publish(
                        &message.channel,
                        message.data.clone().unwrap_or(Value::Null),
                    ));
                },
            }
            replies.push(reply);
        }
        Ok((replies, held))
    }
}

impl ServerState {
    fn fan_out(&mut self, message: &Message) {
        let Ok(channel) = ChannelId::new(&message.channel) else {
            return;
        };
        let targets: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.matches(&channel)))
            .map(|(client, _)| client.clone())
            .collect();
        for client in targets {
            self.mailbox.entry(client).or_default().push(message.clone());
        }
    }
}

struct Exchange {
    holds: bool,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct MemoryState {
    ready: bool,
    tasks: Vec<Exchange>,
}

/// Transport that hands batches straight to a [`FakeServer`]
pub struct MemoryTransport {
    name: &'static str,
    server: Arc<FakeServer>,
    listeners: Arc<TransportListeners>,
    state: Mutex<MemoryState>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransport {
    pub fn new(name: &'static str, server: &Arc<FakeServer>, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            server: server.clone(),
            listeners: Arc::new(TransportListeners::new()),
            state: Mutex::new(MemoryState::default()),
            log: log.clone(),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl ClientTransport for MemoryTransport {
    fn name(&self) -> &str {
        self.name
    }

    fn add_listener(&self, listener: Arc<dyn TransportListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn TransportListener>) {
        self.listeners.remove(listener);
    }

    fn accept(&self, bayeux_version: &str) -> bool {
        bayeux_version == BAYEUX_VERSION
    }

    fn init(&self, _config: &Config) -> bayeux::Result<()> {
        self.state.lock().unwrap().ready = true;
        self.log.lock().unwrap().push(format!("init {}", self.name));
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.ready = false;
        for exchange in state.tasks.drain(..) {
            if exchange.holds {
                exchange.task.abort();
            }
        }
        drop(state);
        self.listeners.clear();
        self.log.lock().unwrap().push(format!("destroy {}", self.name));
    }

    fn send(&self, _uri: &Url, messages: Vec<Message>) {
        let mut state = self.state.lock().unwrap();
        if !state.ready {
            drop(state);
            self.listeners
                .failure(messages, TransportError::Unavailable("destroyed".to_string()));
            return;
        }

        let holds = messages.iter().any(|m| m.channel == META_CONNECT);
        let server = self.server.clone();
        let listeners = self.listeners.clone();
        let task = tokio::spawn(async move {
            match server.exchange(messages.clone()).await {
                Ok(replies) => listeners.messages(messages, replies),
                Err(error) => listeners.failure(messages, error),
            }
        });
        state.tasks.push(Exchange { holds, task });
    }
}

/// Config with a fast, bounded backoff
pub fn test_config() -> Config {
    Config::default()
        .with_url("http://bayeux.test/cometd")
        .with_backoff(BackoffConfig {
            base_ms: 100,
            max_ms: 1_000,
            growth: BackoffGrowth::Exponential { factor: 2 },
        })
}

/// Listener forwarding every message into a channel
pub fn collector() -> (Arc<MessageListener>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Arc<MessageListener> = Arc::new(move |message: &Message| -> ListenerResult {
        tx.send(message.clone())?;
        Ok(())
    });
    (listener, rx)
}

/// Listener recording every session event
pub fn recorder() -> (Arc<SessionListener>, Arc<Mutex<Vec<SessionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener: Arc<SessionListener> = Arc::new(move |event: &SessionEvent| -> ListenerResult {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    (listener, events)
}

/// Poll `condition` until it holds, panicking after `timeout`
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
