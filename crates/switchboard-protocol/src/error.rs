//! Transport-safe error representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error as it crosses the provider boundary.
///
/// Only the error kind and message survive serialization; handler errors
/// are always converted into this shape before a failed call is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{error_kind}: {message}")]
pub struct SerializedError {
    /// Error kind or name (e.g. `ChannelDoesNotExist`).
    pub error_kind: String,
    /// Human-readable message.
    pub message: String,
}

impl SerializedError {
    /// Create a new serialized error.
    #[must_use]
    pub fn new(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_kind: error_kind.into(),
            message: message.into(),
        }
    }
}
