//! # switchboard-core
//!
//! The provider-side core of the Switchboard interop broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Signal** - Typed publish/subscribe notifications
//! - **ContextChannel** - Named context-broadcast groups
//! - **Model** - Registry of channels and client windows
//! - **Coordinator** - Channel membership and context retention
//! - **Dispatcher** - Named remote actions over a shared bus
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │     Bus     │────▶│ Dispatcher  │────▶│   Actions   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │    Model    │◀────│ Coordinator │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod channel;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod signal;
pub mod window;

pub use channel::{ChannelId, ChannelKind, ContextChannel, DEFAULT_CHANNEL_ID};
pub use coordinator::Coordinator;
pub use dispatcher::{
    Action, ActionSet, CallRecord, ClientConnection, Dispatcher, PendingResult, PANIC_KIND,
};
pub use error::{
    encode_result, serialize_error, ActionError, DispatchError, LookupError, ModelError,
};
pub use model::Model;
pub use signal::{Signal, SlotId};
pub use window::AppWindow;
