//! Shared provider endpoint state.
//!
//! [`EndpointCore`] holds everything a provider endpoint needs regardless of
//! how clients reach it: the action table, the connection list, the
//! per-client outbound queues and the connection hooks. Each bus feeds its
//! clients into the same core, and only once the core has been started.

use crate::traits::{
    ActionFn, ConnectionHook, DisconnectionHook, ProviderEndpoint, TransportError,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use switchboard_protocol::{ConnectPayload, Frame, Identity, SerializedError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Error kind returned for calls to topics nobody registered.
pub const UNKNOWN_TOPIC: &str = "UnknownTopic";

/// Provider endpoint state shared by all buses.
pub struct EndpointCore {
    service: String,
    actions: DashMap<String, ActionFn>,
    connections: RwLock<Vec<Identity>>,
    outbound: DashMap<Identity, mpsc::UnboundedSender<Frame>>,
    connection_hooks: RwLock<Vec<ConnectionHook>>,
    disconnection_hooks: RwLock<Vec<DisconnectionHook>>,
    started: watch::Sender<bool>,
}

impl EndpointCore {
    /// Create an endpoint for the named service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            actions: DashMap::new(),
            connections: RwLock::new(Vec::new()),
            outbound: DashMap::new(),
            connection_hooks: RwLock::new(Vec::new()),
            disconnection_hooks: RwLock::new(Vec::new()),
            started: watch::Sender::new(false),
        }
    }

    /// Whether [`ProviderEndpoint::start`] has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    /// Wait until the endpoint is started.
    pub async fn wait_started(&self) {
        let mut started = self.started.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = started.wait_for(|started| *started).await;
    }

    /// Record a new client and fire the connection hooks.
    ///
    /// The outbound queue is installed before the hooks run.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is already connected.
    pub fn accept(
        &self,
        identity: Identity,
        payload: Option<ConnectPayload>,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Result<(), TransportError> {
        match self.outbound.entry(identity.clone()) {
            Entry::Occupied(_) => return Err(TransportError::AlreadyConnected(identity)),
            Entry::Vacant(slot) => {
                slot.insert(outbound);
            }
        }
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(identity.clone());

        debug!(service = %self.service, identity = %identity, "Client connected");

        let hooks = self
            .connection_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(&identity, payload.as_ref());
        }

        Ok(())
    }

    /// Forget a client and fire the disconnection hooks.
    ///
    /// Returns `false` if the identity was not connected.
    pub fn release(&self, identity: &Identity) -> bool {
        if self.outbound.remove(identity).is_none() {
            return false;
        }
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|conn| conn != identity);

        debug!(service = %self.service, identity = %identity, "Client disconnected");

        let hooks = self
            .disconnection_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(identity);
        }

        true
    }

    /// Run the action registered for `topic` on behalf of `source`.
    ///
    /// # Errors
    ///
    /// Returns the action's serialized failure, or an `UnknownTopic` error.
    pub async fn invoke(
        &self,
        topic: &str,
        payload: Value,
        source: Identity,
    ) -> Result<Value, SerializedError> {
        let action = self.actions.get(topic).map(|entry| entry.value().clone());

        let Some(action) = action else {
            debug!(service = %self.service, topic = %topic, "Call to unknown topic");
            return Err(SerializedError::new(
                UNKNOWN_TOPIC,
                format!("No action registered for topic: {}", topic),
            ));
        };

        trace!(service = %self.service, topic = %topic, source = %source, "Invoking action");
        action(payload, source).await
    }

    /// Check whether an action is registered for `topic`.
    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.actions.contains_key(topic)
    }
}

impl ProviderEndpoint for EndpointCore {
    fn service(&self) -> &str {
        &self.service
    }

    fn register(&self, topic: &str, action: ActionFn) -> Result<(), TransportError> {
        match self.actions.entry(topic.to_string()) {
            Entry::Occupied(_) => Err(TransportError::TopicRegistered(topic.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(action);
                trace!(service = %self.service, topic = %topic, "Registered action");
                Ok(())
            }
        }
    }

    fn start(&self) {
        if !self.started.send_replace(true) {
            debug!(service = %self.service, "Endpoint started");
        }
    }

    fn on_connection(&self, hook: ConnectionHook) {
        self.connection_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    fn on_disconnection(&self, hook: DisconnectionHook) {
        self.disconnection_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    fn connections(&self) -> Vec<Identity> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send(&self, to: &Identity, topic: &str, payload: Value) -> Result<(), TransportError> {
        let sender = self
            .outbound
            .get(to)
            .ok_or_else(|| TransportError::NotConnected(to.clone()))?;

        sender
            .send(Frame::event(topic, payload))
            .map_err(|_| TransportError::NotConnected(to.clone()))
    }
}
