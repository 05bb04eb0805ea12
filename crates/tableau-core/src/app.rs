//! Application context and the serializing dispatcher.
//!
//! [`AppContext`] owns every registry of a running server. All inbound
//! traffic is funnelled through one [`Dispatcher`], which handles one
//! [`Inbound`] message to completion before taking the next.

use crate::accounts::{
    AccountError, IdentityStore, InMemoryIdentityStore, InMemorySaveStore, NicknamePolicy,
    SaveStore, DEFAULT_MIN_NICKNAME_LENGTH, GUEST_PREFIX,
};
use crate::bridge::{BridgeError, ConnectionId, ConnectionSink, RpcBridge};
use crate::controllers;
use crate::group::GroupRegistry;
use crate::session::SessionRegistry;
use crate::table::{TableError, TableStore, DEFAULT_MAX_TABLES};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tableau_protocol::ops::server;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Application settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum simultaneously open tables.
    pub max_tables: usize,
    pub min_nickname_length: usize,
    pub reserved_nicknames: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            min_nickname_length: DEFAULT_MIN_NICKNAME_LENGTH,
            reserved_nicknames: vec![GUEST_PREFIX.to_string()],
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn nickname_policy(&self) -> NicknamePolicy {
        NicknamePolicy {
            min_length: self.min_nickname_length,
            reserved: self.reserved_nicknames.clone(),
        }
    }
}

/// Failures of a single request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Table {0} not found.")]
    TableNotFound(String),

    #[error("You are already drawing!")]
    AlreadyDrawing,

    #[error("Not logged in.")]
    NotLoggedIn,

    #[error("Not drawing on a table")]
    NotDrawing,

    #[error("User doesn't exist.")]
    UnknownUser,

    #[error("Save {0} not found")]
    SaveNotFound(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AppError {
    /// The notification reporting this error to the caller, if any.
    #[must_use]
    pub fn notification(&self) -> Option<&'static str> {
        match self {
            AppError::TableNotFound(_)
            | AppError::AlreadyDrawing
            | AppError::NotLoggedIn
            | AppError::Table(_) => Some(server::LOBBY_ERROR),
            AppError::UnknownUser => Some(server::LOGIN_ERROR),
            AppError::Account(_) => Some(server::REGISTRATION_ERROR),
            AppError::NotDrawing | AppError::SaveNotFound(_) | AppError::Bridge(_) => None,
        }
    }

    /// Whether the caller is told about this error.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        self.notification().is_some()
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::TableNotFound(_) => "table_not_found",
            AppError::AlreadyDrawing => "already_drawing",
            AppError::NotLoggedIn => "not_logged_in",
            AppError::NotDrawing => "not_drawing",
            AppError::UnknownUser => "unknown_user",
            AppError::SaveNotFound(_) => "save_not_found",
            AppError::Account(_) => "account",
            AppError::Table(_) => "table_limit",
            AppError::Bridge(_) => "invalid_argument",
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppStats {
    pub connections: usize,
    pub sessions: usize,
    pub logged_in: usize,
    pub tables: usize,
    pub groups: usize,
}

/// Everything a running server owns.
pub struct AppContext {
    bridge: Arc<RpcBridge>,
    groups: Arc<GroupRegistry>,
    tables: Arc<TableStore>,
    sessions: SessionRegistry,
    identities: Arc<dyn IdentityStore>,
    saves: Arc<dyn SaveStore>,
    config: AppConfig,
}

impl AppContext {
    /// Create a context with in-memory stores and every controller installed.
    #[must_use]
    pub fn new(config: AppConfig) -> Arc<Self> {
        let identities = Arc::new(InMemoryIdentityStore::new(config.nickname_policy()));
        Self::with_stores(config, identities, Arc::new(InMemorySaveStore::new()))
    }

    /// Create a context over the given stores.
    #[must_use]
    pub fn with_stores(
        config: AppConfig,
        identities: Arc<dyn IdentityStore>,
        saves: Arc<dyn SaveStore>,
    ) -> Arc<Self> {
        let bridge = Arc::new(RpcBridge::new());
        let groups = Arc::new(GroupRegistry::new());
        let tables = TableStore::new(Arc::clone(&bridge), Arc::clone(&groups), config.max_tables);
        let ctx = Arc::new(Self {
            bridge,
            groups,
            tables,
            sessions: SessionRegistry::new(),
            identities,
            saves,
            config,
        });
        controllers::install(&ctx);
        ctx
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<RpcBridge> {
        &self.bridge
    }

    #[must_use]
    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    #[must_use]
    pub fn tables(&self) -> &Arc<TableStore> {
        &self.tables
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn identities(&self) -> &dyn IdentityStore {
        self.identities.as_ref()
    }

    #[must_use]
    pub fn saves(&self) -> &dyn SaveStore {
        self.saves.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Register a newly opened connection.
    pub fn connect(&self, conn: &ConnectionId, sink: Arc<dyn ConnectionSink>) {
        self.bridge.attach(conn.clone(), sink);
        self.sessions.open(conn);
        self.groups.connect(conn);
        info!(connection = %conn, "Connection opened");
    }

    /// Tear down a lost connection.
    ///
    /// The connection leaves every group it was in (closing tables it was the
    /// last viewer of) before its session is dropped.
    pub fn disconnect(&self, conn: &ConnectionId) {
        let session = self.sessions.get(conn).unwrap_or_default();
        self.bridge.detach(conn);
        self.groups.disconnect(conn);
        if let (Some(user), Some(table)) = (&session.user, session.current) {
            controllers::announce_left(self, table, &user.nickname);
        }
        self.sessions.close(conn);
        info!(connection = %conn, "Connection closed");
    }

    /// Deliver one call.
    pub fn dispatch(&self, conn: &ConnectionId, op: &str, args: Vec<Value>) -> bool {
        self.bridge.dispatch(conn, op, args)
    }

    /// Process one inbound message. Returns `false` if a handler panicked.
    pub fn handle(&self, inbound: Inbound) -> bool {
        let label = inbound.label();
        let result = panic::catch_unwind(AssertUnwindSafe(|| match inbound {
            Inbound::Connected { connection, sink } => self.connect(&connection, sink),
            Inbound::Call {
                connection,
                op,
                args,
            } => {
                self.dispatch(&connection, &op, args);
            }
            Inbound::Disconnected { connection } => self.disconnect(&connection),
        }));
        match result {
            Ok(()) => true,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(inbound = %label, reason = %reason, "Handler panicked");
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> AppStats {
        AppStats {
            connections: self.bridge.connection_count(),
            sessions: self.sessions.len(),
            logged_in: self.sessions.logged_in(),
            tables: self.tables.len(),
            groups: self.groups.len(),
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}

/// One message for the dispatcher.
pub enum Inbound {
    Connected {
        connection: ConnectionId,
        sink: Arc<dyn ConnectionSink>,
    },
    Call {
        connection: ConnectionId,
        op: String,
        args: Vec<Value>,
    },
    Disconnected {
        connection: ConnectionId,
    },
}

impl Inbound {
    /// Operation name or lifecycle label.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Inbound::Connected { .. } => "connected".to_string(),
            Inbound::Call { op, .. } => op.clone(),
            Inbound::Disconnected { .. } => "disconnected".to_string(),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionId {
        match self {
            Inbound::Connected { connection, .. }
            | Inbound::Call { connection, .. }
            | Inbound::Disconnected { connection } => connection,
        }
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("kind", &self.label())
            .field("connection", self.connection())
            .finish()
    }
}

/// The single consumer of the inbound queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: Arc<AppContext>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Process one message to completion.
    pub fn process(&self, inbound: Inbound) -> bool {
        self.ctx.handle(inbound)
    }

    /// Consume `rx` until every sender is dropped. Returns the number of
    /// messages processed.
    pub async fn run(self, mut rx: mpsc::Receiver<Inbound>) -> u64 {
        let mut processed = 0;
        while let Some(inbound) = rx.recv().await {
            self.process(inbound);
            processed += 1;
        }
        debug!(processed, "Dispatcher stopped");
        processed
    }
}
