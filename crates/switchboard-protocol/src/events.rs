//! Events pushed from the provider to clients.

use crate::channel::ChannelTransport;
use crate::context::Context;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Event topic for [`ChannelChangedEvent`].
pub const CHANNEL_CHANGED: &str = "channel-changed";

/// Event topic for [`ContextEvent`].
pub const CONTEXT: &str = "context";

/// Emitted whenever a window's channel membership changes.
///
/// `channel` is `None` when the window has been removed; `previous_channel`
/// is `None` when the window has just been added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "channel-changed", rename_all = "camelCase")]
pub struct ChannelChangedEvent {
    /// The window whose membership changed.
    pub identity: Identity,
    /// The channel the window is now a member of.
    pub channel: Option<ChannelTransport>,
    /// The channel the window was a member of before the change.
    pub previous_channel: Option<ChannelTransport>,
}

/// A context delivered to a window because of a broadcast on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    /// The channel the context was broadcast on.
    pub channel: String,
    /// The broadcast context.
    pub context: Context,
}
