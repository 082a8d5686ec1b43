//! Channel names.
//!
//! A channel is an absolute, slash-separated path such as `/chat/room1`.
//! The last segment of a subscription pattern may be a wildcard:
//!
//! | Pattern       | Matches                               |
//! |---------------|---------------------------------------|
//! | `/chat/*`     | `/chat/room1` but not `/chat/a/b`     |
//! | `/chat/**`    | `/chat/room1` and `/chat/a/b`         |
//!
//! `/meta/**` is reserved for the protocol and `/service/**` is delivered
//! point-to-point by the server.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BayeuxError, Result};

/// Handshake meta-channel
pub const META_HANDSHAKE: &str = "/meta/handshake";
/// Connect meta-channel
pub const META_CONNECT: &str = "/meta/connect";
/// Subscribe meta-channel
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
/// Unsubscribe meta-channel
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
/// Disconnect meta-channel
pub const META_DISCONNECT: &str = "/meta/disconnect";

const META_PREFIX: &str = "/meta/";
const SERVICE_PREFIX: &str = "/service/";

/// Wildcard kind of a channel pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wildcard {
    /// Literal channel
    None,
    /// `*`: exactly one more segment
    Single,
    /// `**`: one or more segments
    Deep,
}

/// Validated channel name or subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Parse and validate a channel name.
    pub fn new(name: &str) -> Result<Self> {
        if !name.starts_with('/') || name.len() < 2 {
            return Err(BayeuxError::InvalidChannel(format!(
                "'{name}' must be an absolute path"
            )));
        }

        let segments: Vec<&str> = name[1..].split('/').collect();
        for (idx, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(BayeuxError::InvalidChannel(format!(
                    "'{name}' has an empty segment"
                )));
            }
            let is_last = idx + 1 == segments.len();
            if segment.contains('*') && !(is_last && (*segment == "*" || *segment == "**")) {
                return Err(BayeuxError::InvalidChannel(format!(
                    "'{name}' may only use a wildcard as its last segment"
                )));
            }
        }

        Ok(Self(name.to_string()))
    }

    /// Channel name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a `/meta/**` channel
    pub fn is_meta(&self) -> bool {
        self.0.starts_with(META_PREFIX)
    }

    /// Whether this is a `/service/**` channel
    pub fn is_service(&self) -> bool {
        self.0.starts_with(SERVICE_PREFIX)
    }

    /// Wildcard kind of the last segment
    pub fn wildcard(&self) -> Wildcard {
        if self.0.ends_with("/**") {
            Wildcard::Deep
        } else if self.0.ends_with("/*") {
            Wildcard::Single
        } else {
            Wildcard::None
        }
    }

    /// Whether this is a wildcard pattern
    pub fn is_wildcard(&self) -> bool {
        self.wildcard() != Wildcard::None
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.0[1..].split('/').count()
    }

    /// Whether `channel` is matched by this pattern.
    ///
    /// A literal pattern only matches itself.
    pub fn matches(&self, channel: &ChannelId) -> bool {
        match self.wildcard() {
            Wildcard::None => self == channel,
            Wildcard::Single => {
                let parent = &self.0[..self.0.len() - 1];
                channel.0.starts_with(parent) && channel.depth() == self.depth()
            },
            Wildcard::Deep => {
                let parent = &self.0[..self.0.len() - 2];
                channel.0.starts_with(parent) && channel.depth() >= self.depth()
            },
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ChannelId {
    type Err = BayeuxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = BayeuxError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.0
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether a raw channel name is a meta-channel
pub fn is_meta_channel(name: &str) -> bool {
    name.starts_with(META_PREFIX)
}
