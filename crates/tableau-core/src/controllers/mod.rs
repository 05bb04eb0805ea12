//! Feature controllers.
//!
//! Each controller registers its operations on the bridge and maps the
//! resulting request events onto handlers. A handler returns
//! `Result<(), AppError>`; [`report`] turns user-facing errors into the
//! feature's error notification and logs the rest.

mod draw;
mod lobby;
mod login;
mod register;

use crate::accounts::User;
use crate::app::{AppContext, AppError};
use crate::bridge::{ConnectionId, Request};
use crate::stream::Event;
use crate::table::Table;
use serde_json::{json, Value};
use std::sync::Arc;
use tableau_protocol::ops::server;
use tableau_protocol::TableId;
use tracing::{debug, warn};

type Handler = fn(&AppContext, &Request) -> Result<(), AppError>;

/// Install every controller on `ctx`.
pub(crate) fn install(ctx: &Arc<AppContext>) {
    login::install(ctx);
    register::install(ctx);
    lobby::install(ctx);
    draw::install(ctx);
}

/// Register `op` and run `handler` for each request.
fn route(ctx: &Arc<AppContext>, op: &str, params: &[&str], handler: Handler) {
    let requests = ctx.bridge().receive(op, params);
    handle(ctx, &requests, handler);
}

/// Run `handler` for each occurrence of `requests`.
fn handle(ctx: &Arc<AppContext>, requests: &Event<Request>, handler: Handler) {
    let ctx = Arc::downgrade(ctx);
    requests.subscribe(move |request| {
        if let Some(ctx) = ctx.upgrade() {
            report(request, handler(&ctx, request));
        }
    });
}

fn report(request: &Request, result: Result<(), AppError>) {
    let Err(e) = result else {
        return;
    };
    match e.notification() {
        Some(op) => {
            debug!(connection = %request.caller, op = %request.op, error = %e, "Request rejected");
            request.reply(op, vec![json!(e.to_string())]);
        }
        None if matches!(e, AppError::NotDrawing) => {
            debug!(connection = %request.caller, op = %request.op, "Ignoring request outside a table");
        }
        None => {
            warn!(connection = %request.caller, op = %request.op, error = %e, "Request dropped");
        }
    }
}

fn require_user(ctx: &AppContext, request: &Request) -> Result<User, AppError> {
    ctx.sessions()
        .user(&request.caller)
        .ok_or(AppError::NotLoggedIn)
}

/// The table the caller is drawing on.
fn drawing(ctx: &AppContext, conn: &ConnectionId) -> Result<Arc<Table>, AppError> {
    let id = ctx.sessions().current(conn).ok_or(AppError::NotDrawing)?;
    match ctx.tables().get(id) {
        Some(table) => Ok(table),
        None => {
            ctx.sessions().set_current(conn, None);
            Err(AppError::NotDrawing)
        }
    }
}

/// Read a table id given as a number or a numeric string.
fn table_id(request: &Request, name: &str) -> Result<TableId, AppError> {
    let raw: Value = request.param(name)?;
    let parsed = match &raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        AppError::TableNotFound(match raw {
            Value::String(s) => s,
            other => other.to_string(),
        })
    })
}

/// Take `conn` off its current table, if any. Returns the table left.
fn leave_current(ctx: &AppContext, conn: &ConnectionId) -> Option<TableId> {
    let id = ctx.sessions().take_current(conn)?;
    if let Some(table) = ctx.tables().get(id) {
        ctx.tables().remove_member(&table, conn);
    }
    if let Some(user) = ctx.sessions().user(conn) {
        announce_left(ctx, id, &user.nickname);
    }
    Some(id)
}

fn announce(table: &Table, ctx: &AppContext, message: String) {
    ctx.bridge()
        .invoke_group(table.group(), server::RECEIVE_DRAW_MESSAGE, vec![json!(message)]);
}

pub(crate) fn announce_joined(ctx: &AppContext, table: &Table, nickname: &str) {
    announce(table, ctx, format!("{nickname} joined the table"));
}

/// Tell the remaining viewers of `table` that `nickname` left. Closed tables
/// are skipped.
pub(crate) fn announce_left(ctx: &AppContext, table: TableId, nickname: &str) {
    if let Some(table) = ctx.tables().get(table) {
        announce(&table, ctx, format!("{nickname} left the table"));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::app::{AppConfig, AppContext, Inbound};
    use crate::bridge::testing::RecordingSink;
    use serde_json::Value;
    use std::sync::Arc;

    /// An app context with recording connections.
    pub(crate) struct Harness {
        pub ctx: Arc<AppContext>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            Self::with_config(AppConfig::default())
        }

        pub(crate) fn with_config(config: AppConfig) -> Self {
            Self {
                ctx: AppContext::new(config),
            }
        }

        pub(crate) fn connect(&self, id: &str) -> Arc<RecordingSink> {
            let sink = RecordingSink::new();
            self.ctx.handle(Inbound::Connected {
                connection: id.into(),
                sink: sink.clone(),
            });
            sink
        }

        pub(crate) fn disconnect(&self, id: &str) {
            self.ctx.handle(Inbound::Disconnected {
                connection: id.into(),
            });
        }

        pub(crate) fn call(&self, id: &str, op: &str, args: Vec<Value>) {
            self.ctx.handle(Inbound::Call {
                connection: id.into(),
                op: op.to_string(),
                args,
            });
        }

        /// Connect and log in as a guest.
        pub(crate) fn guest(&self, id: &str) -> Arc<RecordingSink> {
            let sink = self.connect(id);
            self.call(id, tableau_protocol::ops::client::GUEST_LOGIN, vec![]);
            sink.clear();
            sink
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RpcBridge;

    fn request(body: Value) -> Request {
        let bridge = RpcBridge::new();
        Request {
            caller: "c1".into(),
            op: Arc::from("getDraw"),
            body: body.as_object().cloned().unwrap_or_default(),
            target: bridge.remote(&"c1".into()),
        }
    }

    #[test]
    fn test_table_id_accepts_numbers_and_strings() {
        assert_eq!(table_id(&request(json!({"id": 3})), "id").unwrap(), 3);
        assert_eq!(table_id(&request(json!({"id": "12"})), "id").unwrap(), 12);
    }

    #[test]
    fn test_table_id_rejects_garbage() {
        let err = table_id(&request(json!({"id": "abc"})), "id").unwrap_err();
        assert_eq!(err.to_string(), "Table abc not found.");
        let err = table_id(&request(json!({"id": -1})), "id").unwrap_err();
        assert_eq!(err.to_string(), "Table -1 not found.");
        assert!(matches!(
            table_id(&request(json!({})), "id"),
            Err(AppError::Bridge(_))
        ));
    }
}
