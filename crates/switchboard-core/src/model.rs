//! Registry of channels and client windows.
//!
//! The model owns the canonical channel list (fixed at construction, with
//! the default channel always first) and the set of known windows. It
//! announces window arrival and departure through signals; it never
//! decides channel membership itself.

use crate::channel::{validate_channel_id, ChannelId, ContextChannel, DEFAULT_CHANNEL_ID};
use crate::error::ModelError;
use crate::signal::Signal;
use crate::window::AppWindow;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use switchboard_protocol::Identity;
use tracing::{debug, info};

/// The channel and window registry.
pub struct Model {
    channels: Vec<Arc<ContextChannel>>,
    windows: DashMap<Identity, AppWindow>,
    /// Fired after a window is registered.
    pub on_window_added: Signal<AppWindow>,
    /// Fired after a window is removed, with its last state.
    pub on_window_removed: Signal<AppWindow>,
}

impl Model {
    /// Create a model holding the default channel plus `channels`.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel id is invalid or used twice.
    pub fn new(channels: impl IntoIterator<Item = ContextChannel>) -> Result<Self, ModelError> {
        let mut seen: HashSet<ChannelId> = HashSet::new();
        seen.insert(DEFAULT_CHANNEL_ID.to_string());

        let mut all = vec![Arc::new(ContextChannel::default_channel())];
        for channel in channels {
            validate_channel_id(channel.id()).map_err(|reason| ModelError::InvalidChannelId {
                id: channel.id().to_string(),
                reason,
            })?;
            if !seen.insert(channel.id().to_string()) {
                return Err(ModelError::DuplicateChannel(channel.id().to_string()));
            }
            all.push(Arc::new(channel));
        }

        info!(channels = all.len(), "Created model");

        Ok(Self {
            channels: all,
            windows: DashMap::new(),
            on_window_added: Signal::new(),
            on_window_removed: Signal::new(),
        })
    }

    /// All channels, default channel first.
    #[must_use]
    pub fn channels(&self) -> &[Arc<ContextChannel>] {
        &self.channels
    }

    /// Look up a channel by id.
    #[must_use]
    pub fn channel(&self, id: &str) -> Option<Arc<ContextChannel>> {
        self.channels.iter().find(|c| c.id() == id).cloned()
    }

    /// The default channel.
    #[must_use]
    pub fn default_channel(&self) -> &Arc<ContextChannel> {
        &self.channels[0]
    }

    /// Snapshot of all windows, ordered by identity.
    #[must_use]
    pub fn windows(&self) -> Vec<AppWindow> {
        self.windows_where(|_| true)
    }

    /// Snapshot of the windows matching `predicate`, ordered by identity.
    #[must_use]
    pub fn windows_where(&self, predicate: impl Fn(&AppWindow) -> bool) -> Vec<AppWindow> {
        let mut windows: Vec<AppWindow> = self
            .windows
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        windows.sort_by(|a, b| a.identity().cmp(b.identity()));
        windows
    }

    /// Check whether any window matches `predicate`.
    #[must_use]
    pub fn any_window(&self, predicate: impl Fn(&AppWindow) -> bool) -> bool {
        self.windows.iter().any(|entry| predicate(entry.value()))
    }

    /// Look up a window.
    #[must_use]
    pub fn window(&self, identity: &Identity) -> Option<AppWindow> {
        self.windows.get(identity).map(|entry| entry.value().clone())
    }

    /// Number of registered windows.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Register a window on the default channel.
    ///
    /// Registering an identity twice returns the existing window and does
    /// not fire `on_window_added` again.
    pub fn register_window(&self, identity: Identity) -> AppWindow {
        let window = match self.windows.entry(identity.clone()) {
            Entry::Occupied(existing) => return existing.get().clone(),
            Entry::Vacant(slot) => slot
                .insert(AppWindow::new(identity, self.default_channel().clone()))
                .clone(),
        };

        debug!(identity = %window.identity(), "Window registered");
        self.on_window_added.emit(&window);
        window
    }

    /// Remove a window.
    ///
    /// Returns the removed window, or `None` if it was not registered.
    pub fn remove_window(&self, identity: &Identity) -> Option<AppWindow> {
        let (_, window) = self.windows.remove(identity)?;

        debug!(identity = %identity, channel = %window.channel().id(), "Window removed");
        self.on_window_removed.emit(&window);
        Some(window)
    }

    /// Start listening for context on a channel.
    ///
    /// Returns `None` if the window is not registered, otherwise whether a
    /// listener was added.
    pub fn add_context_listener(&self, identity: &Identity, channel_id: &str) -> Option<bool> {
        self.windows
            .get_mut(identity)
            .map(|mut window| window.add_context_listener(channel_id))
    }

    /// Stop listening for context on a channel.
    ///
    /// Returns `None` if the window is not registered, otherwise whether a
    /// listener was removed.
    pub fn remove_context_listener(&self, identity: &Identity, channel_id: &str) -> Option<bool> {
        self.windows
            .get_mut(identity)
            .map(|mut window| window.remove_context_listener(channel_id))
    }

    /// Move a window to another channel, returning its previous channel.
    pub(crate) fn set_window_channel(
        &self,
        identity: &Identity,
        channel: Arc<ContextChannel>,
    ) -> Option<Arc<ContextChannel>> {
        self.windows
            .get_mut(identity)
            .map(|mut window| window.set_channel(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn model() -> Model {
        Model::new([
            ContextChannel::new("red", ChannelKind::Desktop),
            ContextChannel::new("blue", ChannelKind::Desktop),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_channel_always_present() {
        let model = model();
        assert_eq!(model.channels().len(), 3);
        assert_eq!(model.default_channel().id(), DEFAULT_CHANNEL_ID);
        assert!(model.channel("red").is_some());
        assert!(model.channel("green").is_none());
    }

    #[test]
    fn test_invalid_channel_definitions() {
        assert!(matches!(
            Model::new([ContextChannel::new("", ChannelKind::Desktop)]),
            Err(ModelError::InvalidChannelId { .. })
        ));
        assert!(matches!(
            Model::new([ContextChannel::new("default", ChannelKind::Desktop)]),
            Err(ModelError::DuplicateChannel(_))
        ));
    }

    #[test]
    fn test_register_and_remove_window() {
        let model = model();
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));

        let a = added.clone();
        model.on_window_added.add(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let r = removed.clone();
        model.on_window_removed.add(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let identity = Identity::new("app", "main");
        let window = model.register_window(identity.clone());
        assert_eq!(window.channel().id(), DEFAULT_CHANNEL_ID);

        model.register_window(identity.clone());
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(model.window_count(), 1);

        assert!(model.remove_window(&identity).is_some());
        assert!(model.remove_window(&identity).is_none());
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_listeners() {
        let model = model();
        let identity = Identity::new("app", "main");
        assert_eq!(model.add_context_listener(&identity, "red"), None);

        model.register_window(identity.clone());
        assert_eq!(model.add_context_listener(&identity, "red"), Some(true));
        assert!(model.window(&identity).unwrap().has_context_listener("red"));
        assert_eq!(model.remove_context_listener(&identity, "red"), Some(true));
        assert_eq!(model.remove_context_listener(&identity, "red"), Some(false));
    }

    #[test]
    fn test_windows_sorted_by_identity() {
        let model = model();
        model.register_window(Identity::new("b", "w"));
        model.register_window(Identity::new("a", "w"));

        let names: Vec<String> = model
            .windows()
            .iter()
            .map(|w| w.identity().application_id.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
