//! In-process bus.
//!
//! Clients live in the same process as the provider. Calls go straight to
//! the endpoint's action table; events arrive on a per-client queue.

use crate::endpoint::EndpointCore;
use crate::traits::{Bus, ProviderEndpoint, TransportError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use switchboard_protocol::{ConnectPayload, Frame, Identity};
use tokio::sync::mpsc;
use tracing::debug;

/// A bus whose clients are handles in the same process.
#[derive(Clone, Default)]
pub struct LocalBus {
    providers: Arc<DashMap<String, Arc<EndpointCore>>>,
}

impl LocalBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a client window to a service.
    ///
    /// # Errors
    ///
    /// Returns an error if no provider exists for the service, the provider
    /// has not been started, or the identity is already connected.
    pub fn connect(
        &self,
        service: &str,
        identity: Identity,
        payload: Option<ConnectPayload>,
    ) -> Result<LocalClient, TransportError> {
        let endpoint = self
            .providers
            .get(service)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::ServiceNotFound(service.to_string()))?;
        if !endpoint.is_started() {
            return Err(TransportError::NotStarted(service.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        endpoint.accept(identity.clone(), payload, tx)?;

        Ok(LocalClient {
            identity,
            endpoint,
            events: rx,
        })
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn create_provider(
        &self,
        service: &str,
    ) -> Result<Arc<dyn ProviderEndpoint>, TransportError> {
        match self.providers.entry(service.to_string()) {
            Entry::Occupied(_) => Err(TransportError::ProviderExists(service.to_string())),
            Entry::Vacant(slot) => {
                let endpoint = Arc::new(EndpointCore::new(service));
                slot.insert(endpoint.clone());
                debug!(service = %service, "Created local provider");
                Ok(endpoint)
            }
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// A connected in-process client. Dropping it disconnects.
pub struct LocalClient {
    identity: Identity,
    endpoint: Arc<EndpointCore>,
    events: mpsc::UnboundedReceiver<Frame>,
}

impl LocalClient {
    /// The identity this client connected with.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Call a provider action.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Remote`] carrying the serialized error if
    /// the action failed.
    pub async fn dispatch(&self, topic: &str, payload: Value) -> Result<Value, TransportError> {
        self.endpoint
            .invoke(topic, payload, self.identity.clone())
            .await
            .map_err(TransportError::Remote)
    }

    /// Wait for the next event pushed by the provider.
    ///
    /// Returns `None` once the provider side has gone away.
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        while let Some(frame) = self.events.recv().await {
            if let Frame::Event { topic, payload } = frame {
                return Some((topic, payload));
            }
        }
        None
    }

    /// Take the next already-delivered event without waiting.
    pub fn try_next_event(&mut self) -> Option<(String, Value)> {
        while let Ok(frame) = self.events.try_recv() {
            if let Frame::Event { topic, payload } = frame {
                return Some((topic, payload));
            }
        }
        None
    }

    /// Disconnect from the provider.
    pub fn disconnect(self) {}
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        self.endpoint.release(&self.identity);
    }
}
