//! Lobby: logout, table creation and the table and save listings.

use super::{leave_current, require_user, route};
use crate::accounts::User;
use crate::app::{AppContext, AppError};
use crate::bridge::Request;
use serde_json::json;
use std::sync::Arc;
use tableau_protocol::ops::{client, server};
use tableau_protocol::SaveSummary;
use tracing::info;

pub(super) fn install(ctx: &Arc<AppContext>) {
    route(ctx, client::LOGOUT, &[], logout);
    route(ctx, client::CREATE_TABLE, &["width", "height"], create_table);
    route(ctx, client::UPDATE_MY_TABLES, &[], update_my_tables);
    route(ctx, client::UPDATE_MY_SAVES, &[], update_my_saves);
}

fn logout(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    leave_current(ctx, &request.caller);
    if let Some(user) = ctx.sessions().logout(&request.caller) {
        info!(connection = %request.caller, nickname = %user.nickname, "Logged out");
    }
    request.reply(server::LOGOUT_OK, vec![]);
    Ok(())
}

fn create_table(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let user = require_user(ctx, request)?;
    let width: u32 = request.param("width")?;
    let height: u32 = request.param("height")?;
    let table = ctx.tables().create(user.nickname, width, height, Vec::new())?;
    request.reply(server::CREATE_TABLE_OK, vec![json!(table.id())]);
    Ok(())
}

fn update_my_tables(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    request.reply(server::UPDATE_TABLES, vec![json!(ctx.tables().listing())]);
    Ok(())
}

fn update_my_saves(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let user = require_user(ctx, request)?;
    request.reply(server::UPDATE_SAVES, vec![json!(saves_of(ctx, &user))]);
    Ok(())
}

/// Save listing of `user`.
pub(super) fn saves_of(ctx: &AppContext, user: &User) -> Vec<SaveSummary> {
    ctx.saves()
        .list_saves(user)
        .iter()
        .map(|s| s.summary())
        .collect()
}
