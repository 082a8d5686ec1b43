//! Bayeux client error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Fatal**: the session cannot continue (`NoTransportAvailable`,
//!   `Disconnected`). These surface to the application as a terminal
//!   session event.
//! - **Recoverable**: `Transport` and `Protocol` failures are absorbed by the
//!   protocol loop and turned into a retry decision driven by server advice.
//!
//! Only the calling API (subscribe, publish, configuration loading) returns
//! these errors directly. Transport failures never reach the application as
//! raw errors, except through a publish receipt.

use thiserror::Error;

/// Bayeux client errors.
#[derive(Error, Debug)]
pub enum BayeuxError {
    /// No transport is supported by both client and server.
    #[error("No transport available: {0}")]
    NoTransportAvailable(String),

    /// A transport exchange failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with `successful: false`.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed channel name.
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// The channel is reserved for the protocol itself.
    #[error("Reserved channel: {0}")]
    ReservedChannel(String),

    /// The session was disconnected before the operation completed.
    #[error("Session disconnected")]
    Disconnected,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Bayeux operations
pub type Result<T> = std::result::Result<T, BayeuxError>;

/// Failure of a single transport exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network-level failure (connection refused, reset, DNS...).
    #[error("network failure: {0}")]
    Network(String),

    /// No reply within the configured bound.
    #[error("no reply within {0} ms")]
    Timeout(u64),

    /// The server answered with a non-success HTTP status.
    #[error("unexpected HTTP status {status}")]
    Http {
        /// Status code returned by the server.
        status: u16,
    },

    /// The reply could not be decoded as a message batch.
    #[error("undecodable reply: {0}")]
    Decode(String),

    /// The send was never attempted (transport destroyed or not initialized).
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Whether the batch actually left the client.
    ///
    /// Batches that were never attempted can be retried without risking
    /// duplicate delivery.
    pub fn was_attempted(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            TransportError::Http {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for BayeuxError {
    fn from(err: reqwest::Error) -> Self {
        BayeuxError::Transport(err.into())
    }
}

impl From<toml::de::Error> for BayeuxError {
    fn from(err: toml::de::Error) -> Self {
        BayeuxError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_not_attempted() {
        assert!(!TransportError::Unavailable("destroyed".to_string()).was_attempted());
        assert!(TransportError::Timeout(1000).was_attempted());
        assert!(TransportError::Http { status: 500 }.was_attempted());
    }

    #[test]
    fn test_transport_error_wraps() {
        let err: BayeuxError = TransportError::Network("reset".to_string()).into();
        assert_eq!(err.to_string(), "Transport error: network failure: reset");
    }

    #[test]
    fn test_toml_error_is_config() {
        let err: BayeuxError = toml::from_str::<toml::Value>("not = [valid")
            .unwrap_err()
            .into();
        assert!(matches!(err, BayeuxError::Config(_)));
    }
}
