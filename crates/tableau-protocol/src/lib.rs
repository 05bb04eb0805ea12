//! # tableau-protocol
//!
//! Wire protocol definitions for the Tableau collaborative canvas.
//!
//! Every remote interaction is a named operation call. Clients call server
//! operations (`addShape`, `getDraw`, ...) and the server calls client
//! notifications (`updateShapes`, `lobbyError`, ...) with the same frame type.
//!
//! ## Frame Types
//!
//! - `Call` - Invoke a named operation with positional arguments
//! - `Connected` - Handshake sent by the server after the socket opens
//! - `Ping` / `Pong` - Keepalive
//! - `Error` - Protocol-level failure (undecodable frame, oversized message)
//!
//! ## Example
//!
//! ```rust
//! use tableau_protocol::{codec, ops, Frame};
//! use serde_json::json;
//!
//! let frame = Frame::call(ops::client::REMOVE_SHAPE, vec![json!(3)]);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod model;
pub mod ops;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType, PROTOCOL_VERSION};
pub use model::{
    Fields, Geometry, Point, RenderedTable, SaveSummary, Shape, ShapeId, ShapeUpdate, TableId,
    TableSummary, UserInfo,
};
