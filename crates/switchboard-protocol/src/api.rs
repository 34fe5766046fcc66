//! Provider API topics and their payloads.
//!
//! Each topic is a named remote action exposed by the provider. Payload
//! structs describe what a client sends; results are plain JSON values.

use crate::context::Context;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Topic names accepted by the provider.
pub mod topics {
    pub const GET_SYSTEM_CHANNELS: &str = "get-system-channels";
    pub const GET_CHANNEL_BY_ID: &str = "get-channel-by-id";
    pub const GET_CURRENT_CHANNEL: &str = "get-current-channel";
    pub const CHANNEL_GET_MEMBERS: &str = "channel-get-members";
    pub const CHANNEL_JOIN: &str = "channel-join";
    pub const CHANNEL_GET_CURRENT_CONTEXT: &str = "channel-get-current-context";
    pub const CHANNEL_BROADCAST: &str = "channel-broadcast";
    pub const BROADCAST: &str = "broadcast";
    pub const CHANNEL_ADD_CONTEXT_LISTENER: &str = "channel-add-context-listener";
    pub const CHANNEL_REMOVE_CONTEXT_LISTENER: &str = "channel-remove-context-listener";
}

/// Payload naming a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdPayload {
    /// Channel identifier.
    pub id: String,
}

/// Payload for `get-current-channel`. Without an identity, the caller's own
/// channel is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCurrentChannelPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

/// Payload for `channel-join`. Without an identity, the caller joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinChannelPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

/// Payload for `channel-broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBroadcastPayload {
    pub id: String,
    pub context: Context,
}

/// Payload for `broadcast` on the caller's current channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub context: Context,
}
