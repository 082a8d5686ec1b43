//! HTTP long-polling transport.
//!
//! Each batch is POSTed as a JSON array; the reply body is a JSON array of
//! messages. A batch carrying `/meta/connect` is held by the server for up
//! to the timeout advised on that connect, so its request timeout is that
//! hold plus the maximum network delay. `destroy` aborts held connects; short exchanges already on the
//! wire (such as a final `/meta/disconnect`) run to completion but their
//! outcome is no longer reported.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Client, Url};
use tokio::task::JoinHandle;

use super::{ClientTransport, TransportListener, TransportListeners, LONG_POLLING};
use crate::config::Config;
use crate::error::{BayeuxError, Result, TransportError};
use crate::protocol::{Message, BAYEUX_VERSION, META_CONNECT};

#[derive(Default)]
struct State {
    client: Option<Client>,
    default_hold: Duration,
    network_delay: Duration,
    tasks: Vec<Exchange>,
}

struct Exchange {
    holds: bool,
    task: JoinHandle<()>,
}

/// Long-polling transport backed by `reqwest`
pub struct LongPollingTransport {
    listeners: Arc<TransportListeners>,
    state: Mutex<State>,
}

impl LongPollingTransport {
    /// Create an uninitialized transport
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(TransportListeners::new()),
            state: Mutex::new(State::default()),
        }
    }

    /// Number of exchanges still running
    pub fn in_flight(&self) -> usize {
        let mut state = self.lock();
        state.tasks.retain(|exchange| !exchange.task.is_finished());
        state.tasks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LongPollingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientTransport for LongPollingTransport {
    fn name(&self) -> &str {
        LONG_POLLING
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

    fn init(&self, config: &Config) -> Result<()> {
        let network_delay = config.session.max_network_delay();
        let client = Client::builder()
            .connect_timeout(network_delay)
            .build()
            .map_err(|e| BayeuxError::Config(format!("Failed to build HTTP client: {e}")))?;

        let mut state = self.lock();
        state.client = Some(client);
        state.network_delay = network_delay;
        state.default_hold = Duration::from_millis(config.session.advice_timeout_ms);
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.lock();
        state.client = None;
        for exchange in state.tasks.drain(..) {
            if exchange.holds {
                exchange.task.abort();
            }
        }
        drop(state);
        self.listeners.clear();
    }

    fn send(&self, uri: &Url, messages: Vec<Message>) {
        let mut state = self.lock();
        let Some(client) = state.client.clone() else {
            drop(state);
            self.listeners.failure(
                messages,
                TransportError::Unavailable("long-polling transport not initialized".to_string()),
            );
            return;
        };

        let hold = held_for(&messages, state.default_hold);
        let holds = hold.is_some();
        let timeout = hold.unwrap_or_default() + state.network_delay;

        self.listeners.sending(&messages);

        let listeners = self.listeners.clone();
        let uri = uri.clone();
        state.tasks.retain(|exchange| !exchange.task.is_finished());
        let task = tokio::spawn(async move {
            match post_batch(&client, uri, &messages, timeout).await {
                Ok(replies) => listeners.messages(messages, replies),
                Err(error) => {
                    tracing::debug!(%error, "long-polling exchange failed");
                    listeners.failure(messages, error);
                },
            }
        });
        state.tasks.push(Exchange { holds, task });
    }
}

/// How long the server may hold `messages`, if they carry a connect
fn held_for(messages: &[Message], default_hold: Duration) -> Option<Duration> {
    let connect = messages.iter().find(|m| m.channel == META_CONNECT)?;
    Some(
        connect
            .advice
            .as_ref()
            .and_then(|advice| advice.timeout)
            .map_or(default_hold, Duration::from_millis),
    )
}

async fn post_batch(
    client: &Client,
    uri: Url,
    messages: &[Message],
    timeout: Duration,
) -> std::result::Result<Vec<Message>, TransportError> {
    let response = client
        .post(uri)
        .timeout(timeout)
        .json(messages)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            } else {
                e.into()
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Http {
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    Message::batch_from_json(&body).map_err(|e| TransportError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Advice;

    struct Capture(Mutex<Vec<TransportError>>);

    impl TransportListener for Capture {
        fn on_messages(&self, _request: Vec<Message>, _replies: Vec<Message>) {}
        fn on_failure(&self, _request: Vec<Message>, error: TransportError) {
            self.0.lock().unwrap().push(error);
        }
    }

    #[test]
    fn test_accepts_bayeux_1() {
        let transport = LongPollingTransport::new();
        assert!(transport.accept("1.0"));
        assert!(!transport.accept("2.0"));
        assert_eq!(transport.name(), "long-polling");
    }

    #[test]
    fn test_hold_follows_connect_advice() {
        let default_hold = Duration::from_millis(200);
        let mut connect = Message::new(META_CONNECT);
        connect.advice = Some(Advice {
            timeout: Some(3_000),
            ..Advice::default()
        });

        assert_eq!(
            held_for(&[Message::new("/chat"), connect], default_hold),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            held_for(&[Message::new(META_CONNECT)], default_hold),
            Some(default_hold)
        );
        assert_eq!(held_for(&[Message::new("/chat")], default_hold), None);
    }

    #[test]
    fn test_send_before_init_fails_fast() {
        let transport = LongPollingTransport::new();
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        transport.add_listener(capture.clone());

        let uri = Url::parse("http://127.0.0.1:1/cometd").unwrap();
        transport.send(&uri, vec![Message::new("/chat")]);

        let errors = capture.0.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].was_attempted());
    }

    #[tokio::test]
    async fn test_send_after_destroy_fails_fast() {
        let transport = LongPollingTransport::new();
        transport.init(&Config::default()).unwrap();
        transport.destroy();

        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        transport.add_listener(capture.clone());
        let uri = Url::parse("http://127.0.0.1:1/cometd").unwrap();
        transport.send(&uri, vec![Message::new("/chat")]);

        assert_eq!(capture.0.lock().unwrap().len(), 1);
        assert_eq!(transport.in_flight(), 0);
    }
}
