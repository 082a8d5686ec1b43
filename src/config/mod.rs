//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`BAYEUX_*`)
//! - CLI arguments (for the `bayeux` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BayeuxError, Result};
use crate::protocol::DEFAULT_ADVICE_TIMEOUT_MS;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Retry backoff configuration
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Transport selection
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| BayeuxError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| BayeuxError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("BAYEUX_URL") {
            config.session.url = url;
        }
        if let Ok(policy) = std::env::var("BAYEUX_BATCH_POLICY") {
            if let Ok(policy) = policy.parse() {
                config.session.batch_policy = policy;
            }
        }
        if let Ok(val) = std::env::var("BAYEUX_MAX_NETWORK_DELAY_MS") {
            if let Ok(val) = val.parse() {
                config.session.max_network_delay_ms = val;
            }
        }

        if let Ok(val) = std::env::var("BAYEUX_BACKOFF_BASE_MS") {
            if let Ok(val) = val.parse() {
                config.backoff.base_ms = val;
            }
        }
        if let Ok(val) = std::env::var("BAYEUX_BACKOFF_MAX_MS") {
            if let Ok(val) = val.parse() {
                config.backoff.max_ms = val;
            }
        }

        if let Ok(list) = std::env::var("BAYEUX_TRANSPORTS") {
            config.transport.allowed = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config
    }

    /// Set the server URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.session.url = url.into();
        self
    }

    /// Set the flush policy
    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.session.batch_policy = policy;
        self
    }

    /// Set the backoff configuration
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.session.url)
            .map_err(|e| BayeuxError::Config(format!("Invalid url '{}': {e}", self.session.url)))?;
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(BayeuxError::Config(format!(
                "backoff max_ms ({}) below base_ms ({})",
                self.backoff.max_ms, self.backoff.base_ms
            )));
        }
        Ok(())
    }
}

/// When queued messages leave the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    /// Ride on the next connect; flush on their own only while connected
    /// with no connect in flight
    #[default]
    Piggyback,
    /// Flush as soon as a session exists, one batch in flight at a time
    Immediate,
}

impl std::str::FromStr for BatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "piggyback" => Ok(Self::Piggyback),
            "immediate" => Ok(Self::Immediate),
            _ => Err(format!("Unknown batch policy: {s}")),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bayeux endpoint URL
    pub url: String,

    /// Flush policy for queued messages
    pub batch_policy: BatchPolicy,

    /// Slack added to the server's hold time before a connect counts as
    /// failed; also the handshake timeout
    pub max_network_delay_ms: u64,

    /// Connect hold time assumed until the server advises one
    pub advice_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/cometd".to_string(),
            batch_policy: BatchPolicy::Piggyback,
            max_network_delay_ms: 10_000,
            advice_timeout_ms: DEFAULT_ADVICE_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Network delay as a duration
    pub fn max_network_delay(&self) -> Duration {
        Duration::from_millis(self.max_network_delay_ms)
    }
}

/// Backoff growth law
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffGrowth {
    /// Multiply by `factor` after each failure
    Exponential {
        /// Growth factor
        factor: u32,
    },
    /// Add `increment_ms` after each failure
    Linear {
        /// Increment in milliseconds
        increment_ms: u64,
    },
}

/// Retry backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay
    pub base_ms: u64,

    /// Ceiling
    pub max_ms: u64,

    /// Growth law
    pub growth: BackoffGrowth,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 30_000,
            growth: BackoffGrowth::Exponential { factor: 2 },
        }
    }
}

/// Transport selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection types the client may declare, in preference order.
    /// Empty means every registered transport, in registration order.
    pub allowed: Vec<String>,
}
