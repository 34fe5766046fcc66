//! Frame types for the Switchboard protocol.
//!
//! Frames are the fundamental unit of communication between a client
//! window and the provider. Each frame is serialized using MessagePack.

use crate::error::SerializedError;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Request = 0x03,
    Response = 0x04,
    Failure = 0x05,
    Event = 0x06,
    Ping = 0x07,
    Pong = 0x08,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Request),
            0x04 => Ok(FrameType::Response),
            0x05 => Ok(FrameType::Failure),
            0x06 => Ok(FrameType::Event),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Extra data a client may attach to its connect frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    /// Client library version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ConnectPayload {
    /// Create a payload announcing a client version.
    #[must_use]
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
        }
    }

    /// The announced version, if present and non-empty.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client handshake, must be the first frame on a connection.
    #[serde(rename = "connect")]
    Connect {
        /// The connecting window.
        identity: Identity,
        /// Major protocol version spoken by the client.
        protocol: u8,
        /// Optional connection metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<ConnectPayload>,
    },

    /// Handshake accepted.
    #[serde(rename = "connected")]
    Connected {
        /// Major protocol version spoken by the provider.
        protocol: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Invoke a named action on the provider.
    #[serde(rename = "request")]
    Request {
        /// Request ID, echoed in the response.
        id: u64,
        /// Action topic.
        topic: String,
        /// Action payload.
        payload: Value,
    },

    /// Successful action result.
    #[serde(rename = "response")]
    Response {
        /// ID of the originating request.
        id: u64,
        /// Action result.
        payload: Value,
    },

    /// Failed action result.
    #[serde(rename = "failure")]
    Failure {
        /// ID of the originating request (0 if not applicable).
        id: u64,
        /// Serialized error.
        error: SerializedError,
    },

    /// Provider-pushed notification.
    #[serde(rename = "event")]
    Event {
        /// Event topic.
        topic: String,
        /// Event payload.
        payload: Value,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Request { .. } => FrameType::Request,
            Frame::Response { .. } => FrameType::Response,
            Frame::Failure { .. } => FrameType::Failure,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(identity: Identity, protocol: u8, payload: Option<ConnectPayload>) -> Self {
        Frame::Connect {
            identity,
            protocol,
            payload,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(protocol: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            protocol,
            heartbeat,
        }
    }

    /// Create a new Request frame.
    #[must_use]
    pub fn request(id: u64, topic: impl Into<String>, payload: Value) -> Self {
        Frame::Request {
            id,
            topic: topic.into(),
            payload,
        }
    }

    /// Create a new Response frame.
    #[must_use]
    pub fn response(id: u64, payload: Value) -> Self {
        Frame::Response { id, payload }
    }

    /// Create a new Failure frame.
    #[must_use]
    pub fn failure(id: u64, error: SerializedError) -> Self {
        Frame::Failure { id, error }
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        Frame::Event {
            topic: topic.into(),
            payload,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
