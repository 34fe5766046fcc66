//! Client windows known to the model.

use crate::channel::{ChannelId, ContextChannel};
use std::collections::HashSet;
use std::sync::Arc;
use switchboard_protocol::Identity;

/// A client window.
///
/// A window always belongs to exactly one channel. It may additionally
/// listen for context on channels it is not a member of.
#[derive(Debug, Clone)]
pub struct AppWindow {
    identity: Identity,
    channel: Arc<ContextChannel>,
    context_listeners: HashSet<ChannelId>,
}

impl AppWindow {
    pub(crate) fn new(identity: Identity, channel: Arc<ContextChannel>) -> Self {
        Self {
            identity,
            channel,
            context_listeners: HashSet::new(),
        }
    }

    /// The window's identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The channel this window is a member of.
    #[must_use]
    pub fn channel(&self) -> &Arc<ContextChannel> {
        &self.channel
    }

    /// Check whether the window is a member of `channel`.
    #[must_use]
    pub fn is_member_of(&self, channel: &ContextChannel) -> bool {
        *self.channel == *channel
    }

    /// Check whether the window listens for context on a channel.
    #[must_use]
    pub fn has_context_listener(&self, channel_id: &str) -> bool {
        self.context_listeners.contains(channel_id)
    }

    /// Move the window to another channel, returning the previous one.
    pub(crate) fn set_channel(&mut self, channel: Arc<ContextChannel>) -> Arc<ContextChannel> {
        std::mem::replace(&mut self.channel, channel)
    }

    pub(crate) fn add_context_listener(&mut self, channel_id: impl Into<ChannelId>) -> bool {
        self.context_listeners.insert(channel_id.into())
    }

    pub(crate) fn remove_context_listener(&mut self, channel_id: &str) -> bool {
        self.context_listeners.remove(channel_id)
    }
}
