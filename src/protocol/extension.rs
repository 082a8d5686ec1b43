//! Message extensions.
//!
//! Extensions see every message leaving and entering the client, in
//! registration order for outgoing messages and reverse order for incoming
//! ones, and typically read or write the `ext` field.

use serde_json::Value;

use super::Message;

/// Hook into outgoing and incoming messages
pub trait Extension: Send + Sync {
    /// Called before a message is handed to the transport
    fn outgoing(&self, _message: &mut Message) {}

    /// Called on every received message before it is processed.
    ///
    /// Returning `false` drops the message.
    fn incoming(&self, _message: &mut Message) -> bool {
        true
    }
}

/// Adds a fixed `ext` entry to outgoing handshakes (e.g. credentials).
#[derive(Debug, Clone)]
pub struct HandshakeExt {
    key: String,
    value: Value,
}

impl HandshakeExt {
    /// Create an extension writing `ext[key] = value` on `/meta/handshake`
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl Extension for HandshakeExt {
    fn outgoing(&self, message: &mut Message) {
        if message.channel == super::META_HANDSHAKE {
            message.ext_mut().insert(self.key.clone(), self.value.clone());
        }
    }
}

/// Apply outgoing hooks in order
pub(crate) fn apply_outgoing(extensions: &[Box<dyn Extension>], message: &mut Message) {
    for extension in extensions {
        extension.outgoing(message);
    }
}

/// Apply incoming hooks in reverse order; `false` if any dropped the message
pub(crate) fn apply_incoming(extensions: &[Box<dyn Extension>], message: &mut Message) -> bool {
    extensions
        .iter()
        .rev()
        .all(|extension| extension.incoming(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DropNoise;

    impl Extension for DropNoise {
        fn incoming(&self, message: &mut Message) -> bool {
            message.channel != "/noise"
        }
    }

    #[test]
    fn test_handshake_ext_only_on_handshake() {
        let extensions: Vec<Box<dyn Extension>> =
            vec![Box::new(HandshakeExt::new("auth", json!({"token": "t"})))];

        let mut handshake = Message::handshake("1.0", vec![]);
        apply_outgoing(&extensions, &mut handshake);
        assert_eq!(handshake.ext.unwrap()["auth"]["token"], "t");

        let mut publish = Message::publish("/chat", json!(1));
        apply_outgoing(&extensions, &mut publish);
        assert!(publish.ext.is_none());
    }

    #[test]
    fn test_incoming_can_drop() {
        let extensions: Vec<Box<dyn Extension>> = vec![Box::new(DropNoise)];
        assert!(!apply_incoming(&extensions, &mut Message::new("/noise")));
        assert!(apply_incoming(&extensions, &mut Message::new("/chat")));
    }
}
