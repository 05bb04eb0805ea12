//! Frame types for the Tableau protocol.
//!
//! Frames are the fundamental unit of communication. Binary WebSocket
//! messages carry MessagePack frames, text messages carry JSON frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current protocol version, announced in the `Connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Protocol error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded.
    pub const BAD_FRAME: u16 = 1001;
    /// The frame type is not accepted in this direction.
    pub const UNEXPECTED_FRAME: u16 = 1002;
    /// The message exceeds the configured maximum size.
    pub const MESSAGE_TOO_LARGE: u16 = 1009;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Call = 0x01,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Connected = 0x0A,
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
            0x01 => Ok(FrameType::Call),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            0x0A => Ok(FrameType::Connected),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Invoke a named operation on the peer.
    ///
    /// There is no reply channel: results come back as separate calls.
    #[serde(rename = "call")]
    Call {
        /// Operation name.
        op: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Call { .. } => FrameType::Call,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Create a new Call frame.
    #[must_use]
    pub fn call(op: impl Into<String>, args: Vec<Value>) -> Self {
        Frame::Call {
            op: op.into(),
            args,
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
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

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// The operation name if this is a call.
    #[must_use]
    pub fn op(&self) -> Option<&str> {
        match self {
            Frame::Call { op, .. } => Some(op),
            _ => None,
        }
    }
}
