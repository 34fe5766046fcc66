//! # switchboard-transport
//!
//! Bus abstraction layer for the Switchboard interop broker.
//!
//! A [`Bus`] creates provider endpoints. A [`ProviderEndpoint`] accepts
//! per-topic actions, reports client connections and disconnections, and
//! pushes events to connected clients. Two buses are provided:
//!
//! - **LocalBus** - In-process, for embedding and tests
//! - **WebSocketBus** - Frames over WebSocket
//!
//! ```rust,ignore
//! use switchboard_transport::{Bus, LocalBus};
//!
//! let bus = LocalBus::new();
//! let endpoint = bus.create_provider("switchboard").await?;
//! endpoint.register("ping", action)?;
//! ```

pub mod endpoint;
pub mod local;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use endpoint::EndpointCore;
pub use local::{LocalBus, LocalClient};
pub use traits::{
    ActionFn, ActionFuture, Bus, ConnectionHook, DisconnectionHook, ProviderEndpoint,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketBus, WebSocketConfig};
