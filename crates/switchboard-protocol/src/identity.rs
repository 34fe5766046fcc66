//! Client window identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a single client window: the owning application plus the
/// window name. Unique per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Application identifier.
    pub application_id: String,
    /// Window name within the application.
    pub window_name: String,
}

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(application_id: impl Into<String>, window_name: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            window_name: window_name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application_id, self.window_name)
    }
}
