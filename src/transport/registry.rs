//! Transport registration and negotiation.

use std::sync::Arc;

use super::{ClientTransport, TransportListener};
use crate::config::Config;
use crate::error::{BayeuxError, Result};

/// Client-declared transports and the single active one
#[derive(Default)]
pub struct TransportRegistry {
    transports: Vec<Arc<dyn ClientTransport>>,
    allowed: Vec<String>,
    active: Option<Arc<dyn ClientTransport>>,
}

impl TransportRegistry {
    /// Create a registry. A non-empty `allowed` list restricts and orders
    /// the declared connection types.
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            transports: Vec::new(),
            allowed,
            active: None,
        }
    }

    /// Register a transport; names must be unique.
    pub fn register(&mut self, transport: Arc<dyn ClientTransport>) -> Result<()> {
        if self.find(transport.name()).is_some() {
            return Err(BayeuxError::Config(format!(
                "transport '{}' registered twice",
                transport.name()
            )));
        }
        self.transports.push(transport);
        Ok(())
    }

    /// Connection types the client declares for `version`, in preference order
    pub fn supported_types(&self, version: &str) -> Vec<String> {
        self.candidates(version)
            .map(|t| t.name().to_string())
            .collect()
    }

    /// First client-preferred transport the server also supports.
    pub fn negotiate(
        &self,
        server_types: &[String],
        version: &str,
    ) -> Result<Arc<dyn ClientTransport>> {
        self.candidates(version)
            .find(|t| server_types.iter().any(|s| s == t.name()))
            .cloned()
            .ok_or_else(|| {
                BayeuxError::NoTransportAvailable(format!(
                    "client {:?}, server {:?}",
                    self.supported_types(version),
                    server_types
                ))
            })
    }

    /// Make `transport` the active one.
    ///
    /// The previous transport is destroyed before the new one is
    /// initialized. Returns `false` if it was already active.
    pub fn activate(
        &mut self,
        transport: Arc<dyn ClientTransport>,
        config: &Config,
        listener: &Arc<dyn TransportListener>,
    ) -> Result<bool> {
        if let Some(active) = &self.active {
            if Arc::ptr_eq(active, &transport) {
                return Ok(false);
            }
        }

        self.deactivate(listener);
        transport.init(config)?;
        transport.add_listener(listener.clone());
        tracing::debug!(transport = transport.name(), "transport activated");
        self.active = Some(transport);
        Ok(true)
    }

    /// Destroy the active transport, if any
    pub fn deactivate(&mut self, listener: &Arc<dyn TransportListener>) {
        if let Some(previous) = self.active.take() {
            previous.remove_listener(listener);
            previous.destroy();
            tracing::debug!(transport = previous.name(), "transport destroyed");
        }
    }

    /// The active transport
    pub fn active(&self) -> Option<&Arc<dyn ClientTransport>> {
        self.active.as_ref()
    }

    /// Registered transport by name
    pub fn find(&self, name: &str) -> Option<&Arc<dyn ClientTransport>> {
        self.transports.iter().find(|t| t.name() == name)
    }

    fn candidates<'a>(
        &'a self,
        version: &'a str,
    ) -> Box<dyn Iterator<Item = &'a Arc<dyn ClientTransport>> + 'a> {
        let accepted = move |t: &&Arc<dyn ClientTransport>| t.accept(version);
        if self.allowed.is_empty() {
            Box::new(self.transports.iter().filter(accepted))
        } else {
            Box::new(
                self.allowed
                    .iter()
                    .filter_map(move |name| self.find(name))
                    .filter(accepted),
            )
        }
    }
}
