//! Registration of new nicknames.

use super::route;
use crate::app::{AppContext, AppError};
use crate::bridge::Request;
use std::sync::Arc;
use tableau_protocol::ops::{client, server};

pub(super) fn install(ctx: &Arc<AppContext>) {
    route(ctx, client::REGISTER, &["nickname"], register);
}

fn register(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let nickname: String = request.param("nickname")?;
    ctx.identities().add_user(&nickname)?;
    request.reply(server::REGISTRATION_OK, vec![]);
    Ok(())
}
