//! Context channel abstraction for Switchboard.
//!
//! Channels are named groups that windows join to share context. Each
//! channel retains at most one context: the last one broadcast on it while
//! it had members.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use switchboard_protocol::{ChannelTransport, Context, DisplayMetadata};
use tracing::trace;

/// Maximum channel id length.
pub const MAX_CHANNEL_ID_LENGTH: usize = 256;

/// Id of the channel every window starts on.
pub const DEFAULT_CHANNEL_ID: &str = "default";

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel id.
///
/// # Errors
///
/// Returns an error message if the channel id is invalid.
pub fn validate_channel_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Channel id cannot be empty");
    }
    if id.len() > MAX_CHANNEL_ID_LENGTH {
        return Err("Channel id too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel id contains invalid characters");
    }
    Ok(())
}

/// The kind of a channel.
///
/// The set is open: kinds other than `default` and `desktop` are carried
/// through as [`ChannelKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelKind {
    /// The global channel windows belong to until they join another.
    Default,
    /// A user-visible channel, enumerable by clients.
    Desktop,
    /// Any other kind.
    Other(String),
}

impl ChannelKind {
    /// The wire discriminator for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::Default => "default",
            ChannelKind::Desktop => "desktop",
            ChannelKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ChannelKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "default" => ChannelKind::Default,
            "desktop" => ChannelKind::Desktop,
            _ => ChannelKind::Other(kind),
        }
    }
}

impl From<ChannelKind> for String {
    fn from(kind: ChannelKind) -> String {
        match kind {
            ChannelKind::Other(kind) => kind,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A context channel.
///
/// Channels compare equal by id. The retained context is only written by
/// the coordinator.
#[derive(Debug)]
pub struct ContextChannel {
    id: ChannelId,
    kind: ChannelKind,
    display_metadata: Option<DisplayMetadata>,
    stored_context: Mutex<Option<Context>>,
}

impl ContextChannel {
    /// Create a channel of any kind.
    #[must_use]
    pub fn new(id: impl Into<ChannelId>, kind: ChannelKind) -> Self {
        Self {
            id: id.into(),
            kind,
            display_metadata: None,
            stored_context: Mutex::new(None),
        }
    }

    /// Create the default channel.
    #[must_use]
    pub fn default_channel() -> Self {
        Self::new(DEFAULT_CHANNEL_ID, ChannelKind::Default)
    }

    /// Create a user-visible desktop channel.
    #[must_use]
    pub fn desktop(id: impl Into<ChannelId>, metadata: DisplayMetadata) -> Self {
        Self {
            display_metadata: Some(metadata),
            ..Self::new(id, ChannelKind::Desktop)
        }
    }

    /// Get the channel id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the channel kind.
    #[must_use]
    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    /// Get the presentation metadata, if any.
    #[must_use]
    pub fn display_metadata(&self) -> Option<&DisplayMetadata> {
        self.display_metadata.as_ref()
    }

    /// Check if this is a desktop channel.
    #[must_use]
    pub fn is_desktop(&self) -> bool {
        self.kind == ChannelKind::Desktop
    }

    /// The context retained on this channel, if any.
    #[must_use]
    pub fn stored_context(&self) -> Option<Context> {
        self.stored_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_stored_context(&self, context: Context) {
        trace!(channel = %self.id, context_type = %context.context_type(), "Retaining context");
        *self
            .stored_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(context);
    }

    pub(crate) fn clear_stored_context(&self) -> Option<Context> {
        self.stored_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The wire description of this channel.
    #[must_use]
    pub fn to_transport(&self) -> ChannelTransport {
        ChannelTransport {
            id: self.id.clone(),
            kind: self.kind.as_str().to_string(),
            display_metadata: self.display_metadata.clone(),
        }
    }
}

impl PartialEq for ContextChannel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContextChannel {}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> ContextChannel {
        ContextChannel::desktop(
            "red",
            DisplayMetadata {
                name: "Red".into(),
                color: "#FF0000".into(),
                glyph: None,
            },
        )
    }

    #[test]
    fn test_channel_creation() {
        let channel = red();
        assert_eq!(channel.id(), "red");
        assert!(channel.is_desktop());
        assert!(channel.stored_context().is_none());

        let default = ContextChannel::default_channel();
        assert_eq!(default.id(), DEFAULT_CHANNEL_ID);
        assert_eq!(default.kind(), &ChannelKind::Default);
        assert!(default.display_metadata().is_none());
    }

    #[test]
    fn test_stored_context() {
        let channel = red();
        channel.set_stored_context(Context::new("fdc3.instrument"));
        assert_eq!(
            channel.stored_context().map(|c| c.context_type().to_string()),
            Some("fdc3.instrument".to_string())
        );

        assert!(channel.clear_stored_context().is_some());
        assert!(channel.stored_context().is_none());
    }

    #[test]
    fn test_channel_kind_is_open() {
        assert_eq!(ChannelKind::from("desktop".to_string()), ChannelKind::Desktop);
        assert_eq!(
            ChannelKind::from("app".to_string()),
            ChannelKind::Other("app".to_string())
        );
        assert_eq!(String::from(ChannelKind::Other("app".into())), "app");

        let json = serde_json::to_value(ChannelKind::Default).unwrap();
        assert_eq!(json, serde_json::json!("default"));
    }

    #[test]
    fn test_to_transport() {
        let transport = red().to_transport();
        assert_eq!(transport.id, "red");
        assert_eq!(transport.kind, "desktop");
        assert_eq!(transport.display_metadata.unwrap().color, "#FF0000");
    }

    #[test]
    fn test_channel_id_validation() {
        assert!(validate_channel_id("red").is_ok());
        assert!(validate_channel_id("").is_err());
        assert!(validate_channel_id("bad\nid").is_err());

        let long_id = "a".repeat(MAX_CHANNEL_ID_LENGTH + 1);
        assert!(validate_channel_id(&long_id).is_err());
    }
}
