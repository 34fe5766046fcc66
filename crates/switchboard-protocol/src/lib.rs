//! # switchboard-protocol
//!
//! Wire protocol definitions for the Switchboard interop broker.
//!
//! This crate defines everything that crosses the boundary between the
//! provider and its client windows: identities, context payloads, channel
//! descriptions, events, serialized errors, API topics and the binary
//! frame format.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Handshake
//! - `Request` / `Response` / `Failure` - Remote action calls
//! - `Event` - Provider-pushed notifications
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, Frame};
//!
//! let frame = Frame::request(1, "get-system-channels", serde_json::Value::Null);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod api;
pub mod channel;
pub mod codec;
pub mod context;
pub mod error;
pub mod events;
pub mod frames;
pub mod identity;
pub mod version;

pub use channel::{ChannelTransport, DisplayMetadata};
pub use codec::{decode, encode, ProtocolError};
pub use context::Context;
pub use error::SerializedError;
pub use events::{ChannelChangedEvent, ContextEvent};
pub use frames::{ConnectPayload, Frame, FrameType};
pub use identity::Identity;
pub use version::{Version, PROTOCOL_VERSION};
