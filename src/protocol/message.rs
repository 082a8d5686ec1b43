//! Protocol messages for Bayeux communication.
//!
//! Defines the wire shape of a message and the reconnection advice the
//! server attaches to replies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::channel::{is_meta_channel, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE};

/// Server reconnection directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Retry the connect with the same clientId
    #[default]
    Retry,
    /// Drop the clientId and handshake again
    Handshake,
    /// Stop: the session is over
    None,
}

/// Advice as carried on the wire; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// Reconnection directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    /// Delay before the next connect, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// How long the server holds a connect, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Advice resolved against defaults; every field is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionAdvice {
    /// Reconnection directive
    pub reconnect: Reconnect,
    /// Delay before the next connect
    pub interval: Duration,
    /// How long the server holds a connect
    pub timeout: Duration,
}

impl Default for SessionAdvice {
    fn default() -> Self {
        Self {
            reconnect: Reconnect::Retry,
            interval: Duration::ZERO,
            timeout: Duration::from_millis(super::DEFAULT_ADVICE_TIMEOUT_MS),
        }
    }
}

impl SessionAdvice {
    /// Overlay received wire advice on these defaults.
    pub fn resolve(&self, advice: &Advice) -> Self {
        Self {
            reconnect: advice.reconnect.unwrap_or(self.reconnect),
            interval: advice
                .interval
                .map_or(self.interval, Duration::from_millis),
            timeout: advice.timeout.map_or(self.timeout, Duration::from_millis),
        }
    }
}

/// Protocol message envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Target channel
    pub channel: String,
    /// Correlates a request with its reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Session identity assigned at handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Application payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Present on replies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    /// Reconnection advice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    /// Failure description on unsuccessful replies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target of a subscribe/unsubscribe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Protocol version (handshake)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Lowest acceptable protocol version (handshake)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
    /// Connection types offered (handshake)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    /// Connection type in use (connect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Extension fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,
}

impl Message {
    /// Create an empty message on a channel
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    /// Create a `/meta/handshake` request
    pub fn handshake(version: &str, connection_types: Vec<String>) -> Self {
        Self {
            channel: META_HANDSHAKE.to_string(),
            version: Some(version.to_string()),
            minimum_version: Some(version.to_string()),
            supported_connection_types: Some(connection_types),
            ..Default::default()
        }
    }

    /// Create a `/meta/subscribe` request
    pub fn subscribe(subscription: &str) -> Self {
        Self {
            channel: META_SUBSCRIBE.to_string(),
            subscription: Some(subscription.to_string()),
            ..Default::default()
        }
    }

    /// Create a `/meta/unsubscribe` request
    pub fn unsubscribe(subscription: &str) -> Self {
        Self {
            channel: META_UNSUBSCRIBE.to_string(),
            subscription: Some(subscription.to_string()),
            ..Default::default()
        }
    }

    /// Create a publish on an application channel
    pub fn publish(channel: &str, data: Value) -> Self {
        Self {
            channel: channel.to_string(),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Set the message id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether the message is on a meta-channel
    pub fn is_meta(&self) -> bool {
        is_meta_channel(&self.channel)
    }

    /// Whether the message is a reply (carries `successful`)
    pub fn is_reply(&self) -> bool {
        self.successful.is_some()
    }

    /// Whether the message is a successful reply
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// Build a local failure reply for a request that never got one.
    pub fn failure_reply(request: &Message, error: &str) -> Self {
        Self {
            channel: request.channel.clone(),
            id: request.id.clone(),
            client_id: request.client_id.clone(),
            subscription: request.subscription.clone(),
            successful: Some(false),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Get (or create) the extension map
    pub fn ext_mut(&mut self) -> &mut Map<String, Value> {
        self.ext.get_or_insert_with(Map::new)
    }

    /// Deserialize a batch from JSON.
    ///
    /// A single object is accepted as a batch of one.
    pub fn batch_from_json(json: &str) -> Result<Vec<Message>, serde_json::Error> {
        match serde_json::from_str::<Value>(json)? {
            Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
            single => Ok(vec![serde_json::from_value(single)?]),
        }
    }
}
