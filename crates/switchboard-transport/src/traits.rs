//! Bus abstraction traits for Switchboard.
//!
//! These traits define what the provider core needs from the underlying
//! message bus, allowing the core to be transport-agnostic.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use switchboard_protocol::{ConnectPayload, Identity, SerializedError};
use thiserror::Error;

/// Future returned by a registered action.
pub type ActionFuture = BoxFuture<'static, Result<Value, SerializedError>>;

/// A registered action: invoked with the request payload and the caller.
pub type ActionFn = Arc<dyn Fn(Value, Identity) -> ActionFuture + Send + Sync>;

/// Called when a client connects, with its optional connect payload.
pub type ConnectionHook = Arc<dyn Fn(&Identity, Option<&ConnectPayload>) + Send + Sync>;

/// Called when a client disconnects.
pub type DisconnectionHook = Arc<dyn Fn(&Identity) + Send + Sync>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A provider already exists for this service.
    #[error("Provider already exists: {0}")]
    ProviderExists(String),

    /// No provider exists for this service.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// An action is already registered for this topic.
    #[error("Topic already registered: {0}")]
    TopicRegistered(String),

    /// The provider has not started accepting clients yet.
    #[error("Provider not started: {0}")]
    NotStarted(String),

    /// The identity is already connected to this provider.
    #[error("Already connected: {0}")]
    AlreadyConnected(Identity),

    /// The identity is not connected to this provider.
    #[error("Not connected: {0}")]
    NotConnected(Identity),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The provider answered a call with a failure.
    #[error("Remote call failed: {0}")]
    Remote(SerializedError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] switchboard_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A message bus on which provider endpoints can be created.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Create the provider endpoint for a named service.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider already exists for the service or the
    /// underlying endpoint cannot be created.
    async fn create_provider(
        &self,
        service: &str,
    ) -> Result<Arc<dyn ProviderEndpoint>, TransportError>;

    /// Get the bus name (e.g., "local", "websocket").
    fn name(&self) -> &'static str;
}

/// The provider side of a service channel.
pub trait ProviderEndpoint: Send + Sync {
    /// The service name this endpoint was created for.
    fn service(&self) -> &str;

    /// Register the action invoked for `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is already registered.
    fn register(&self, topic: &str, action: ActionFn) -> Result<(), TransportError>;

    /// Begin accepting clients.
    ///
    /// Endpoints are created closed so that hooks and actions can be
    /// installed before the first client arrives. Calling this again does
    /// nothing.
    fn start(&self);

    /// Add a hook fired whenever a client connects.
    fn on_connection(&self, hook: ConnectionHook);

    /// Add a hook fired whenever a client disconnects.
    fn on_disconnection(&self, hook: DisconnectionHook);

    /// Currently connected clients, in connection order.
    fn connections(&self) -> Vec<Identity>;

    /// Push an event to a connected client. Does not wait for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is not connected.
    fn send(&self, to: &Identity, topic: &str, payload: Value) -> Result<(), TransportError>;
}
