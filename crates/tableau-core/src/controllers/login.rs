//! Login: registered and guest logins, and the logged-in state query.

use super::{leave_current, report, route};
use crate::accounts::User;
use crate::app::{AppContext, AppError};
use crate::bridge::Request;
use crate::stream::Event;
use serde_json::{json, Value};
use std::sync::Arc;
use tableau_protocol::ops::{client, server};
use tracing::info;

pub(super) fn install(ctx: &Arc<AppContext>) {
    let bridge = ctx.bridge();

    let weak = Arc::downgrade(ctx);
    let registered = bridge
        .receive(client::LOGIN, &["nickname"])
        .filter_map(move |request| {
            let ctx = weak.upgrade()?;
            match lookup(&ctx, request) {
                Ok(user) => Some((request.clone(), user)),
                Err(e) => {
                    report(request, Err(e));
                    None
                }
            }
        });

    let weak = Arc::downgrade(ctx);
    let guests = bridge
        .receive(client::GUEST_LOGIN, &[])
        .filter_map(move |request| {
            let ctx = weak.upgrade()?;
            Some((request.clone(), ctx.identities().add_guest()))
        });

    let weak = Arc::downgrade(ctx);
    Event::merge(&[registered, guests]).subscribe(move |(request, user)| {
        if let Some(ctx) = weak.upgrade() {
            finish_login(&ctx, request, user.clone());
        }
    });

    route(ctx, client::GET_LOGGEDIN, &[], get_loggedin);
}

fn lookup(ctx: &AppContext, request: &Request) -> Result<User, AppError> {
    let nickname: String = request.param("nickname")?;
    ctx.identities()
        .get_user(&nickname)
        .ok_or(AppError::UnknownUser)
}

fn finish_login(ctx: &AppContext, request: &Request, user: User) {
    // A connection logging in again starts off the tables.
    leave_current(ctx, &request.caller);
    info!(connection = %request.caller, nickname = %user.nickname, guest = user.guest, "Logged in");
    ctx.sessions().login(&request.caller, user);
    request.reply(server::LOGIN_OK, vec![]);
}

fn get_loggedin(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let user = match ctx.sessions().user(&request.caller) {
        Some(user) => json!(user.info()),
        None => Value::Null,
    };
    request.reply(server::RECEIVE_LOGGEDIN, vec![user]);
    Ok(())
}
