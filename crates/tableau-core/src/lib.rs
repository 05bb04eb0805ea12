//! # tableau-core
//!
//! Reactive dispatch, group multicast and shared table documents for the
//! Tableau collaborative canvas.
//!
//! This crate provides the server's building blocks:
//!
//! - **Stream** - Synchronous `Event` / `Behavior` primitives
//! - **Bridge** - Remote operations as request events, calls back out
//! - **Group** - Named multicast groups with lifecycle events
//! - **Table** - Authoritative shape documents with state-transfer broadcast
//! - **Accounts** / **Session** - Identities, saved drawings, per-connection state
//! - **App** - The context that owns it all and the serializing dispatcher
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Inbound    │────▶│ Dispatcher  │────▶│  RpcBridge  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │ Event<Request>
//!                                                ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Group     │◀────│ TableStore  │◀────│ Controllers │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │ invoke_group
//!        ▼
//!   ConnectionSink
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tableau_core::{AppConfig, AppContext, ConnectionId, Inbound};
//! use tableau_protocol::{ops, Frame};
//! use tokio::sync::mpsc;
//!
//! let ctx = AppContext::new(AppConfig::default());
//! let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
//! let conn = ConnectionId::from("c1");
//!
//! ctx.handle(Inbound::Connected { connection: conn.clone(), sink: Arc::new(tx) });
//! ctx.handle(Inbound::Call {
//!     connection: conn,
//!     op: ops::client::GUEST_LOGIN.to_string(),
//!     args: vec![],
//! });
//!
//! assert_eq!(rx.try_recv().unwrap().op(), Some(ops::server::LOGIN_OK));
//! ```

pub mod accounts;
pub mod app;
pub mod bridge;
mod controllers;
pub mod gesture;
pub mod group;
pub mod session;
pub mod stream;
pub mod table;

pub use accounts::{
    AccountError, AccountErrorKind, IdentityStore, InMemoryIdentityStore, InMemorySaveStore,
    NicknamePolicy, SaveStore, SavedTable, User,
};
pub use app::{AppConfig, AppContext, AppError, AppStats, Dispatcher, Inbound};
pub use bridge::{BridgeError, ConnectionId, ConnectionSink, Remote, Request, RpcBridge};
pub use gesture::{Brush, Gesture, GestureOutput, Pointer, Tool};
pub use group::{Group, GroupId, GroupRegistry, EVERYONE};
pub use session::{Session, SessionRegistry};
pub use stream::{snapshot, Behavior, Event, ListenerId};
pub use table::{Table, TableError, TableStore};
