//! Error taxonomy for the provider core.
//!
//! - [`LookupError`]: an id-based query named something that does not exist.
//! - [`ActionError`]: anything a registered action fails with. Always
//!   serialized at the dispatch boundary.
//! - [`DispatchError`]: startup and infrastructure failures of the dispatcher.
//! - [`ModelError`]: invalid channel definitions.

use crate::channel::ChannelId;
use serde::Serialize;
use serde_json::Value;
use switchboard_protocol::{Identity, SerializedError};
use tenvis_switchboard_transport::TransportError;
use thiserror::Error;

/// Error kind used for plain errors with no more specific kind.
pub const GENERIC_ERROR_KIND: &str = "Error";

/// Error kind used for payloads that fail to deserialize.
pub const INVALID_PAYLOAD_KIND: &str = "InvalidPayload";

/// Error kind used for results that fail to serialize.
pub const INVALID_RESULT_KIND: &str = "InvalidResult";

/// A lookup by id failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// No channel has the given id.
    #[error("No channel with channelId: {0}")]
    ChannelDoesNotExist(ChannelId),

    /// No window has the given identity.
    #[error("No window with identity: {0}")]
    WindowNotFound(Identity),
}

impl LookupError {
    /// The wire error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::ChannelDoesNotExist(_) => "ChannelDoesNotExist",
            LookupError::WindowNotFound(_) => "WindowNotFound",
        }
    }
}

/// A failure raised inside a registered action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The request payload did not match the action's payload type.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The action's result could not be serialized.
    #[error("Failed to encode result: {0}")]
    InvalidResult(#[source] serde_json::Error),

    /// An error with an explicit kind.
    #[error("{message}")]
    Custom {
        /// Error kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionError {
    /// Create an error with an explicit kind.
    #[must_use]
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ActionError::Custom {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The wire error kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            ActionError::Lookup(e) => e.kind(),
            ActionError::InvalidPayload(_) => INVALID_PAYLOAD_KIND,
            ActionError::InvalidResult(_) => INVALID_RESULT_KIND,
            ActionError::Custom { kind, .. } => kind,
            ActionError::Other(_) => GENERIC_ERROR_KIND,
        }
    }
}

/// Serialize an action result.
///
/// # Errors
///
/// Returns [`ActionError::InvalidResult`] if `result` has no JSON form.
pub fn encode_result<R: Serialize>(result: R) -> Result<Value, ActionError> {
    serde_json::to_value(result).map_err(ActionError::InvalidResult)
}

/// Convert an action failure into its transport-safe form.
#[must_use]
pub fn serialize_error(error: &ActionError) -> SerializedError {
    SerializedError::new(error.kind(), error.to_string())
}

/// Dispatcher startup and infrastructure errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The provider endpoint could not be created.
    #[error("Failed to create provider endpoint: {0}")]
    EndpointCreation(#[source] TransportError),

    /// A topic could not be registered on the endpoint.
    #[error("Failed to register topic {topic}: {source}")]
    Registration {
        topic: String,
        #[source]
        source: TransportError,
    },

    /// Actions were already registered on this dispatcher.
    #[error("Actions already registered")]
    AlreadyRegistered,

    /// No endpoint exists yet.
    #[error("Provider endpoint not created yet")]
    NotRegistered,

    /// Sending to a client failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Invalid channel definitions.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A channel id failed validation.
    #[error("Invalid channel id {id:?}: {reason}")]
    InvalidChannelId { id: String, reason: &'static str },

    /// Two channels share an id.
    #[error("Duplicate channel id: {0}")]
    DuplicateChannel(String),
}
