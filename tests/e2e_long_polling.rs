//! End-to-end long-polling tests.
//!
//! These run the bundled HTTP transport against a real axum endpoint
//! serving the fake Bayeux server, over a loopback socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bayeux::protocol::META_HANDSHAKE;
use bayeux::{
    BatchPolicy, BayeuxClient, BayeuxError, ClientTransport, LongPollingTransport, Message,
    SessionEvent, SessionState, TransportError, TransportListener, BAYEUX_VERSION,
};
use common::{collector, eventually, recorder, test_config, FakeServer};
use reqwest::Url;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

async fn cometd(
    State(server): State<Arc<FakeServer>>,
    Json(batch): Json<Vec<Message>>,
) -> Response {
    match server.exchange(batch).await {
        Ok(replies) => Json(replies).into_response(),
        Err(TransportError::Http { status }) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Serve `server` on a free port and return its endpoint URL
async fn spawn_endpoint(server: Arc<FakeServer>) -> String {
    let router = Router::new()
        .route("/cometd", post(cometd))
        .with_state(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}/cometd")
}

/// Find a port nobody listens on
async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/cometd")
}

struct Outcomes(mpsc::UnboundedSender<Result<Vec<Message>, TransportError>>);

impl TransportListener for Outcomes {
    fn on_messages(&self, _request: Vec<Message>, replies: Vec<Message>) {
        let _ = self.0.send(Ok(replies));
    }

    fn on_failure(&self, _request: Vec<Message>, error: TransportError) {
        let _ = self.0.send(Err(error));
    }
}

#[tokio::test]
async fn test_long_polling_round_trip() {
    let server = FakeServer::new();
    let url = spawn_endpoint(server.clone()).await;
    let client = BayeuxClient::new(test_config().with_url(url)).unwrap();
    let (listener, mut inbox) = collector();

    client.subscribe("/chat/**", &listener).unwrap();
    client.handshake().unwrap();
    client
        .wait_for_state(SessionState::Connecting, WAIT)
        .await
        .unwrap();
    eventually(WAIT, || server.subscribers("/chat/**").len() == 1).await;

    let receipt = client
        .publish("/chat/rooms/1", json!({"text": "over http"}))
        .unwrap();
    timeout(WAIT, receipt).await.unwrap().unwrap();

    let message = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(message.channel, "/chat/rooms/1");
    assert_eq!(message.data, Some(json!({"text": "over http"})));

    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_held_connect_follows_advised_timeout() {
    let server = FakeServer::holding(Duration::from_secs(1), Duration::from_secs(3));
    let url = spawn_endpoint(server.clone()).await;
    let mut config = test_config().with_url(url);
    config.session.advice_timeout_ms = 200;
    config.session.max_network_delay_ms = 300;
    let client = BayeuxClient::new(config).unwrap();
    let (listener, events) = recorder();
    client.add_session_listener(&listener);

    client.handshake().unwrap();
    eventually(WAIT, || server.connects().len() >= 3).await;
    client.disconnect().await;

    let failures: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ConnectFailed { error, .. } => Some(error.clone()),
            _ => None,
        })
        .collect();
    assert!(failures.is_empty(), "connect failures: {failures:?}");
    assert!(server
        .connects()
        .iter()
        .all(|c| c.advice.as_ref().and_then(|a| a.timeout) == Some(3_000)));
}

#[tokio::test]
async fn test_http_error_fails_publish_receipt() {
    let server = FakeServer::new();
    server.fail_batches_on("/broken");
    let url = spawn_endpoint(server.clone()).await;
    let client = BayeuxClient::new(
        test_config()
            .with_url(url)
            .with_batch_policy(BatchPolicy::Immediate),
    )
    .unwrap();

    client.handshake().unwrap();
    client
        .wait_for_state(SessionState::Connecting, WAIT)
        .await
        .unwrap();

    let receipt = client.publish("/broken", json!(null)).unwrap();
    let outcome = timeout(WAIT, receipt).await.unwrap();
    assert!(matches!(
        outcome,
        Err(BayeuxError::Transport(TransportError::Http { status: 500 }))
    ));
    assert!(client.state().is_connected());

    client.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_server_retries_handshake() {
    let client = BayeuxClient::new(test_config().with_url(closed_port_url().await)).unwrap();
    let (listener, events) = recorder();
    client.add_session_listener(&listener);

    client.handshake().unwrap();
    eventually(WAIT, || {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SessionEvent::HandshakeFailed { .. }))
            .count()
            >= 2
    })
    .await;
    assert_eq!(client.state(), SessionState::Handshaking);
    assert_eq!(client.client_id(), None);

    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_transport_exchange_and_destroy() {
    let server = FakeServer::new();
    let url = Url::parse(&spawn_endpoint(server.clone()).await).unwrap();
    let transport = LongPollingTransport::new();
    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let listener: Arc<dyn TransportListener> = Arc::new(Outcomes(tx));
    transport.add_listener(listener.clone());
    transport.init(&test_config()).unwrap();

    let handshake = Message {
        channel: META_HANDSHAKE.to_string(),
        id: Some("1".to_string()),
        version: Some(BAYEUX_VERSION.to_string()),
        supported_connection_types: Some(vec!["long-polling".to_string()]),
        ..Default::default()
    };
    transport.send(&url, vec![handshake]);

    let replies = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].is_successful());
    assert_eq!(replies[0].id.as_deref(), Some("1"));
    assert!(replies[0].client_id.is_some());

    transport.destroy();
    transport.add_listener(listener);
    transport.send(&url, vec![Message::new("/chat")]);
    let failure = outcomes.recv().await.unwrap().unwrap_err();
    assert!(!failure.was_attempted());
    assert_eq!(server.received().len(), 1);
}
