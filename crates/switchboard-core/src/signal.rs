//! Typed publish/subscribe signals.
//!
//! A [`Signal`] is an observer list parameterized by its payload type.
//! Handlers run synchronously, in registration order, every time the
//! signal is emitted. Cloning a signal yields another handle to the same
//! observer list.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

/// Handle identifying a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    handlers: RwLock<Vec<(SlotId, Handler<T>)>>,
    next_id: AtomicU64,
}

/// A typed notification signal.
pub struct Signal<T> {
    slots: Arc<Slots<T>>,
}

impl<T> Signal<T> {
    /// Create a signal with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Slots {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler. Handlers are called in the order they were added.
    pub fn add<F>(&self, handler: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SlotId(self.slots.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler.
    ///
    /// Returns `true` if the handler was registered.
    pub fn remove(&self, id: SlotId) -> bool {
        let mut handlers = self
            .slots
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(slot, _)| *slot != id);
        handlers.len() != before
    }

    /// Deliver `payload` to every handler registered at the time of the call.
    ///
    /// A panicking handler is logged and does not stop delivery to the rest.
    pub fn emit(&self, payload: &T) {
        let handlers: Vec<Handler<T>> = self
            .slots
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                error!("Signal handler panicked");
            }
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_in_registration_order() {
        let signal = Signal::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            signal.add(move |n: &u32| seen.lock().unwrap().push(format!("{}:{}", tag, n)));
        }

        signal.emit(&7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:7", "second:7", "third:7"]
        );
    }

    #[test]
    fn test_remove_handler() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = signal.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(signal.len(), 1);

        signal.emit(&());
        assert!(signal.remove(id));
        assert!(!signal.remove(id));
        signal.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(signal.is_empty());
    }

    #[test]
    fn test_clone_shares_handlers() {
        let signal = Signal::<()>::new();
        let clone = signal.clone();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        clone.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicU64::new(0));

        signal.add(|_| panic!("handler failure"));
        let c = count.clone();
        signal.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_add_during_emit() {
        let signal = Signal::<()>::new();
        let inner = signal.clone();
        signal.add(move |_| {
            inner.add(|_| {});
        });

        signal.emit(&());
        assert_eq!(signal.len(), 2);
    }
}
