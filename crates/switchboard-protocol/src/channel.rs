//! Wire description of a context channel.

use serde::{Deserialize, Serialize};

/// How a desktop channel is presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// User-facing channel name.
    pub name: String,
    /// Channel colour, as a CSS colour string.
    pub color: String,
    /// Optional icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glyph: Option<String>,
}

/// A channel as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTransport {
    /// Channel identifier.
    pub id: String,
    /// Channel kind discriminator (`"default"`, `"desktop"`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Presentation metadata, present for desktop channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_metadata: Option<DisplayMetadata>,
}
