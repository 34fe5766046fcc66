//! Channel coordination for Switchboard.
//!
//! The coordinator is the only writer of a window's channel and of a
//! channel's retained context. It keeps two invariants:
//!
//! - every window belongs to exactly one channel;
//! - a channel retains a context only while it has at least one member.
//!
//! Every membership change is announced on [`Coordinator::on_channel_changed`].
//! Events are delivered in the order the changes were applied, so the last
//! event seen for a window always names its current channel. Delivery may
//! happen on whichever thread drains the queue first.

use crate::channel::ContextChannel;
use crate::error::LookupError;
use crate::model::Model;
use crate::signal::{Signal, SlotId};
use crate::window::AppWindow;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use switchboard_protocol::{ChannelChangedEvent, Context, Identity};
use tracing::{debug, trace};

#[derive(Default)]
struct Outbox {
    queue: VecDeque<ChannelChangedEvent>,
    draining: bool,
}

/// Coordinates channel membership on top of a [`Model`].
pub struct Coordinator {
    model: Arc<Model>,
    /// Serializes membership mutations. Never held while emitting.
    membership: Mutex<()>,
    /// Events queued under `membership`, delivered outside it.
    outbox: Mutex<Outbox>,
    model_slots: [SlotId; 2],
    /// Fired after every membership change.
    pub on_channel_changed: Signal<ChannelChangedEvent>,
}

impl Coordinator {
    /// Create a coordinator and subscribe it to the model's window signals.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let added = weak.clone();
            let added_slot = model.on_window_added.add(move |window| {
                if let Some(coordinator) = added.upgrade() {
                    coordinator.handle_window_added(window);
                }
            });

            let removed = weak.clone();
            let removed_slot = model.on_window_removed.add(move |window| {
                if let Some(coordinator) = removed.upgrade() {
                    coordinator.handle_window_removed(window);
                }
            });

            Self {
                model,
                membership: Mutex::new(()),
                outbox: Mutex::new(Outbox::default()),
                model_slots: [added_slot, removed_slot],
                on_channel_changed: Signal::new(),
            }
        })
    }

    /// The model this coordinator works on.
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// All user-visible desktop channels.
    #[must_use]
    pub fn list_channels(&self) -> Vec<Arc<ContextChannel>> {
        self.model
            .channels()
            .iter()
            .filter(|channel| channel.is_desktop())
            .cloned()
            .collect()
    }

    /// All windows currently assigned to `channel`.
    #[must_use]
    pub fn get_channel_members(&self, channel: &ContextChannel) -> Vec<AppWindow> {
        self.model.windows_where(|window| window.is_member_of(channel))
    }

    /// All windows listening for context on `channel`, members or not.
    #[must_use]
    pub fn get_listening_windows(&self, channel: &ContextChannel) -> Vec<AppWindow> {
        self.model
            .windows_where(|window| window.has_context_listener(channel.id()))
    }

    /// Look up a channel by id.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ChannelDoesNotExist`] for unknown ids.
    pub fn get_channel_by_id(&self, id: &str) -> Result<Arc<ContextChannel>, LookupError> {
        self.model
            .channel(id)
            .ok_or_else(|| LookupError::ChannelDoesNotExist(id.to_string()))
    }

    /// The context retained on `channel`, if any.
    #[must_use]
    pub fn get_retained_context(&self, channel: &ContextChannel) -> Option<Context> {
        channel.stored_context()
    }

    /// Look up a window.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::WindowNotFound`] for unknown identities.
    pub fn get_window(&self, identity: &Identity) -> Result<AppWindow, LookupError> {
        self.model
            .window(identity)
            .ok_or_else(|| LookupError::WindowNotFound(identity.clone()))
    }

    /// The channel a window is currently a member of.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::WindowNotFound`] for unknown identities.
    pub fn get_current_channel(
        &self,
        identity: &Identity,
    ) -> Result<Arc<ContextChannel>, LookupError> {
        self.get_window(identity).map(|window| window.channel().clone())
    }

    /// Move a window to `channel`.
    ///
    /// Joining the channel the window is already on does nothing. Otherwise
    /// the previous channel loses its retained context if the window was its
    /// last member, and a `channel-changed` event is emitted.
    ///
    /// Returns `true` if the window changed channel.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::WindowNotFound`] for unknown identities.
    pub fn join_channel(
        &self,
        identity: &Identity,
        channel: &Arc<ContextChannel>,
    ) -> Result<bool, LookupError> {
        {
            let _guard = self.lock_membership();

            let window = self.get_window(identity)?;
            if window.is_member_of(channel) {
                trace!(identity = %identity, channel = %channel.id(), "Already a member");
                return Ok(false);
            }

            let previous = self
                .model
                .set_window_channel(identity, channel.clone())
                .ok_or_else(|| LookupError::WindowNotFound(identity.clone()))?;

            if self.is_channel_empty(&previous) && previous.clear_stored_context().is_some() {
                debug!(channel = %previous.id(), "Cleared context of emptied channel");
            }

            debug!(
                identity = %identity,
                channel = %channel.id(),
                previous = %previous.id(),
                "Window changed channel"
            );

            self.enqueue(ChannelChangedEvent {
                identity: identity.clone(),
                channel: Some(channel.to_transport()),
                previous_channel: Some(previous.to_transport()),
            });
        }

        self.flush();
        Ok(true)
    }

    /// Record `context` as the last broadcast on `channel`.
    ///
    /// The context is only retained while the channel has members; a
    /// broadcast into an empty channel leaves it without context.
    ///
    /// Returns `true` if the context was retained.
    pub fn set_last_broadcast_context(&self, channel: &ContextChannel, context: Context) -> bool {
        let _guard = self.lock_membership();

        if self.is_channel_empty(channel) {
            trace!(channel = %channel.id(), "Not retaining context on empty channel");
            return false;
        }

        channel.set_stored_context(context);
        true
    }

    fn handle_window_added(&self, window: &AppWindow) {
        {
            let _guard = self.lock_membership();
            // Report the window as it is now; a join or removal may already
            // have been applied and queued.
            if let Some(current) = self.model.window(window.identity()) {
                self.enqueue(ChannelChangedEvent {
                    identity: current.identity().clone(),
                    channel: Some(current.channel().to_transport()),
                    previous_channel: None,
                });
            }
        }

        self.flush();
    }

    fn handle_window_removed(&self, window: &AppWindow) {
        let channel = window.channel();
        {
            let _guard = self.lock_membership();
            if self.is_channel_empty(channel) && channel.clear_stored_context().is_some() {
                debug!(channel = %channel.id(), "Cleared context of emptied channel");
            }

            self.enqueue(ChannelChangedEvent {
                identity: window.identity().clone(),
                channel: None,
                previous_channel: Some(channel.to_transport()),
            });
        }

        self.flush();
    }

    /// Queue an event. Callers hold the membership guard.
    fn enqueue(&self, event: ChannelChangedEvent) {
        self.lock_outbox().queue.push_back(event);
    }

    /// Deliver queued events in order.
    ///
    /// Only one caller drains at a time; events queued meanwhile, including
    /// by handlers re-entering the coordinator, are picked up by that caller.
    fn flush(&self) {
        {
            let mut outbox = self.lock_outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let next = {
                let mut outbox = self.lock_outbox();
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.on_channel_changed.emit(&next);
        }
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_channel_empty(&self, channel: &ContextChannel) -> bool {
        !self.model.any_window(|window| window.is_member_of(channel))
    }

    fn lock_membership(&self) -> MutexGuard<'_, ()> {
        self.membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.model.on_window_added.remove(self.model_slots[0]);
        self.model.on_window_removed.remove(self.model_slots[1]);
    }
}
