//! Drawing tables: joining, leaving, saving, loading, chat and shape edits.

use super::lobby::saves_of;
use super::{announce_joined, drawing, leave_current, require_user, route, table_id};
use crate::app::{AppContext, AppError};
use crate::bridge::Request;
use serde_json::json;
use std::sync::Arc;
use tableau_protocol::ops::{client, server};
use tableau_protocol::{Shape, ShapeId, ShapeUpdate};
use tracing::info;

pub(super) fn install(ctx: &Arc<AppContext>) {
    route(ctx, client::GET_DRAW, &["id"], get_draw);
    route(ctx, client::LEAVE_DRAW, &[], leave_draw);
    route(ctx, client::SAVE_DRAW, &["name"], save_draw);
    route(ctx, client::LOAD_DRAW, &["name"], load_draw);
    route(ctx, client::CHAT_WITH_DRAW, &["message"], chat_with_draw);

    route(ctx, client::ADD_SHAPE, &["shape"], add_shape);
    route(ctx, client::REMOVE_SHAPE, &["id"], remove_shape);
    route(ctx, client::UPDATE_SHAPE, &["shape"], update_shape);
    route(ctx, client::MOVE_DOWN_SHAPE, &["id"], move_down_shape);
    route(ctx, client::MOVE_UP_SHAPE, &["id"], move_up_shape);
}

fn get_draw(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let user = require_user(ctx, request)?;
    let id = table_id(request, "id")?;
    let table = ctx
        .tables()
        .get(id)
        .ok_or_else(|| AppError::TableNotFound(id.to_string()))?;
    if ctx.sessions().current(&request.caller).is_some() {
        return Err(AppError::AlreadyDrawing);
    }

    ctx.sessions().set_current(&request.caller, Some(id));
    ctx.tables().add_member(&table, &request.caller);
    request.reply(server::RECEIVE_DRAW, vec![json!(table.render())]);
    announce_joined(ctx, &table, &user.nickname);
    info!(connection = %request.caller, table = id, nickname = %user.nickname, "Joined table");
    Ok(())
}

fn leave_draw(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let id = ctx
        .sessions()
        .current(&request.caller)
        .ok_or(AppError::NotDrawing)?;
    request.reply(server::LOBBY_MESSAGE, vec![json!(format!("Left table {id}"))]);
    leave_current(ctx, &request.caller);
    Ok(())
}

fn save_draw(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let user = require_user(ctx, request)?;
    let name: String = request.param("name")?;
    let table = drawing(ctx, &request.caller)?;
    ctx.saves().save(&user, &name, &table);
    request.reply(server::UPDATE_SAVES, vec![json!(saves_of(ctx, &user))]);
    request.reply(server::SAVE_DRAW_OK, vec![]);
    Ok(())
}

fn load_draw(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let user = require_user(ctx, request)?;
    let name: String = request.param("name")?;
    let save = ctx
        .saves()
        .get_save(&user, &name)
        .ok_or(AppError::SaveNotFound(name))?;
    let table = ctx
        .tables()
        .create(save.name, save.width, save.height, save.shapes)?;
    request.reply(server::CREATE_TABLE_OK, vec![json!(table.id())]);
    Ok(())
}

fn chat_with_draw(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let message: String = request.param("message")?;
    let user = require_user(ctx, request)?;
    let table = drawing(ctx, &request.caller)?;
    ctx.bridge().invoke_group(
        table.group(),
        server::RECEIVE_DRAW_CHAT,
        vec![json!(user.nickname), json!(message)],
    );
    Ok(())
}

fn add_shape(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let shape: Shape = request.param("shape")?;
    let table = drawing(ctx, &request.caller)?;
    ctx.tables().add_shape(&table, shape);
    Ok(())
}

fn remove_shape(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let id: ShapeId = request.param("id")?;
    let table = drawing(ctx, &request.caller)?;
    ctx.tables().remove_shape(&table, id);
    Ok(())
}

fn update_shape(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let ShapeUpdate(shape) = request.param("shape")?;
    let table = drawing(ctx, &request.caller)?;
    ctx.tables().update_shape(&table, shape);
    Ok(())
}

fn move_down_shape(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let id: ShapeId = request.param("id")?;
    let table = drawing(ctx, &request.caller)?;
    ctx.tables().move_shape_down(&table, id);
    Ok(())
}

fn move_up_shape(ctx: &AppContext, request: &Request) -> Result<(), AppError> {
    let id: ShapeId = request.param("id")?;
    let table = drawing(ctx, &request.caller)?;
    ctx.tables().move_shape_up(&table, id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::bridge::testing::RecordingSink;
    use crate::controllers::testing::Harness;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tableau_protocol::ops::{client, server};

    fn line(x: f64) -> Value {
        json!({"type": "LineShape", "x1": x, "y1": 0, "x2": 10, "y2": 10, "size": 2, "color": "#000"})
    }

    /// Two guests on table 0, created by `a`.
    fn shared_table(h: &Harness) -> (Arc<RecordingSink>, Arc<RecordingSink>) {
        let a = h.guest("a");
        let b = h.guest("b");
        h.call("a", client::CREATE_TABLE, vec![json!(400), json!(300)]);
        h.call("a", client::GET_DRAW, vec![json!(0)]);
        h.call("b", client::GET_DRAW, vec![json!("0")]);
        a.clear();
        b.clear();
        (a, b)
    }

    fn shape_ids(update: &[Value]) -> Vec<u64> {
        update[0]
            .as_array()
            .map(|shapes| shapes.iter().filter_map(|s| s["id"].as_u64()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_get_draw_sends_rendered_table() {
        let h = Harness::new();
        let sink = h.guest("c1");
        h.call("c1", client::CREATE_TABLE, vec![json!(640), json!(480)]);
        h.call("c1", client::GET_DRAW, vec![json!(0)]);

        let rendered = sink.calls_to(server::RECEIVE_DRAW);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0][0]["width"], json!(640));
        assert_eq!(rendered[0][0]["shapes"], json!([]));
        assert_eq!(
            sink.calls_to(server::RECEIVE_DRAW_MESSAGE),
            vec![vec![json!("guest0 joined the table")]]
        );
        assert_eq!(h.ctx.sessions().current(&"c1".into()), Some(0));
    }

    #[test]
    fn test_get_draw_errors() {
        let h = Harness::new();
        let sink = h.guest("c1");
        h.call("c1", client::GET_DRAW, vec![json!(9)]);
        h.call("c1", client::CREATE_TABLE, vec![json!(10), json!(10)]);
        h.call("c1", client::GET_DRAW, vec![json!(0)]);
        h.call("c1", client::GET_DRAW, vec![json!(0)]);

        assert_eq!(
            sink.calls_to(server::LOBBY_ERROR),
            vec![
                vec![json!("Table 9 not found.")],
                vec![json!("You are already drawing!")],
            ]
        );
    }

    #[test]
    fn test_mutations_reach_every_viewer() {
        let h = Harness::new();
        let (a, b) = shared_table(&h);

        h.call("a", client::ADD_SHAPE, vec![line(1.0)]);
        h.call("b", client::ADD_SHAPE, vec![line(2.0)]);
        h.call("a", client::MOVE_UP_SHAPE, vec![json!(0)]);

        for sink in [&a, &b] {
            let updates = sink.calls_to(server::UPDATE_SHAPES);
            assert_eq!(updates.len(), 3);
            assert_eq!(shape_ids(&updates[2]), vec![1, 0]);
        }
        assert_eq!(a.calls_to(server::UPDATE_SHAPES)[2][0][1]["x1"], json!(1.0));
    }

    #[test]
    fn test_noop_mutations_are_silent() {
        let h = Harness::new();
        let (a, _) = shared_table(&h);
        h.call("a", client::ADD_SHAPE, vec![line(1.0)]);
        a.clear();

        h.call("a", client::REMOVE_SHAPE, vec![json!(5)]);
        h.call("a", client::MOVE_DOWN_SHAPE, vec![json!(0)]);
        h.call("a", client::MOVE_UP_SHAPE, vec![json!(0)]);
        assert!(a.calls_to(server::UPDATE_SHAPES).is_empty());

        h.call("a", client::REMOVE_SHAPE, vec![json!(0)]);
        assert_eq!(a.calls_to(server::UPDATE_SHAPES), vec![vec![json!([])]]);
    }

    #[test]
    fn test_update_shape_replaces_and_keeps_type() {
        let h = Harness::new();
        let (a, _) = shared_table(&h);
        h.call("a", client::ADD_SHAPE, vec![line(1.0)]);
        let mut replacement = line(5.0);
        replacement["id"] = json!(0);
        h.call("a", client::UPDATE_SHAPE, vec![replacement]);

        let updates = a.calls_to(server::UPDATE_SHAPES);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1][0][0]["x1"], json!(5.0));
        assert_eq!(updates[1][0][0]["type"], json!("LineShape"));

        // No id: nothing to match.
        h.call("a", client::UPDATE_SHAPE, vec![line(9.0)]);
        assert_eq!(a.calls_to(server::UPDATE_SHAPES).len(), 2);
        assert_eq!(h.ctx.tables().get(0).unwrap().shapes()[0].id, 0);
    }

    #[test]
    fn test_client_fields_and_tags_survive() {
        let h = Harness::new();
        let (a, b) = shared_table(&h);
        let mut shape = line(1.0);
        shape["opacity"] = json!(0.5);
        shape["dash"] = json!([4, 2]);
        h.call("a", client::ADD_SHAPE, vec![shape]);
        h.call(
            "a",
            client::ADD_SHAPE,
            vec![json!({
                "type": "PolygonShape",
                "corners": [{"x": 0, "y": 0}, {"x": 5, "y": 0}, {"x": 0, "y": 5}],
                "size": 1, "color": "#000", "fill": "#f00"
            })],
        );

        let updates = b.calls_to(server::UPDATE_SHAPES);
        assert_eq!(updates.len(), 2);
        let first = &updates[1][0][0];
        assert_eq!(first["type"], json!("LineShape"));
        assert_eq!(first["opacity"], json!(0.5));
        assert_eq!(first["dash"], json!([4, 2]));
        assert_eq!(updates[1][0][1]["type"], json!("PolygonShape"));

        // Edits replace the extra fields along with the geometry.
        let mut edit = line(3.0);
        edit["id"] = json!(0);
        edit["opacity"] = json!(1.0);
        h.call("a", client::UPDATE_SHAPE, vec![edit]);
        let last = a.calls_to(server::UPDATE_SHAPES).pop().unwrap();
        assert_eq!(last[0][0]["opacity"], json!(1.0));
        assert_eq!(last[0][0]["dash"], Value::Null);
        assert_eq!(last[0][0]["x1"], json!(3.0));
    }

    #[test]
    fn test_unknown_shape_type_dropped() {
        let h = Harness::new();
        let (a, _) = shared_table(&h);
        h.call("a", client::ADD_SHAPE, vec![json!({"type": "star", "points": 5})]);
        assert!(a.calls().is_empty());
        assert!(h.ctx.tables().get(0).unwrap().shapes().is_empty());
    }

    #[test]
    fn test_mutation_outside_table_is_noop() {
        let h = Harness::new();
        let (a, _) = shared_table(&h);
        let outsider = h.guest("c");
        h.call("c", client::ADD_SHAPE, vec![line(1.0)]);
        h.call("c", client::REMOVE_SHAPE, vec![json!(0)]);
        assert!(outsider.calls().is_empty());
        assert!(a.calls().is_empty());
    }

    #[test]
    fn test_chat_goes_to_table_group() {
        let h = Harness::new();
        let (a, b) = shared_table(&h);
        let outsider = h.guest("c");
        h.call("b", client::CHAT_WITH_DRAW, vec![json!("hi all")]);

        let expected = vec![vec![json!("guest1"), json!("hi all")]];
        assert_eq!(a.calls_to(server::RECEIVE_DRAW_CHAT), expected);
        assert_eq!(b.calls_to(server::RECEIVE_DRAW_CHAT), expected);
        assert!(outsider.calls().is_empty());
    }

    #[test]
    fn test_leave_draw_announces_and_lists() {
        let h = Harness::new();
        let (a, b) = shared_table(&h);
        h.call("b", client::LEAVE_DRAW, vec![]);

        assert_eq!(
            b.calls_to(server::LOBBY_MESSAGE),
            vec![vec![json!("Left table 0")]]
        );
        assert_eq!(
            a.calls_to(server::RECEIVE_DRAW_MESSAGE),
            vec![vec![json!("guest1 left the table")]]
        );
        let listing = b.calls_to(server::UPDATE_TABLES);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0][0][0]["userCount"], json!(1));
        assert_eq!(h.ctx.sessions().current(&"b".into()), None);
    }

    #[test]
    fn test_leave_draw_when_not_drawing() {
        let h = Harness::new();
        let sink = h.guest("c1");
        h.call("c1", client::LEAVE_DRAW, vec![]);
        assert!(sink.calls().is_empty());
    }

    #[test]
    fn test_disconnect_of_last_viewer_closes_table() {
        let h = Harness::new();
        let (_, b) = shared_table(&h);
        h.disconnect("a");
        assert_eq!(
            b.calls_to(server::RECEIVE_DRAW_MESSAGE),
            vec![vec![json!("guest0 left the table")]]
        );
        assert_eq!(h.ctx.tables().get(0).unwrap().user_count(), 1);

        h.disconnect("b");
        assert!(h.ctx.tables().get(0).is_none());
        assert_eq!(h.ctx.stats().connections, 0);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let h = Harness::new();
        let (a, _) = shared_table(&h);
        h.call("a", client::ADD_SHAPE, vec![line(1.0)]);
        h.call("a", client::ADD_SHAPE, vec![line(2.0)]);
        h.call("a", client::REMOVE_SHAPE, vec![json!(0)]);
        h.call("a", client::SAVE_DRAW, vec![json!("sketch")]);

        let saves = a.calls_to(server::UPDATE_SAVES);
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0][0][0]["name"], json!("sketch"));
        assert_eq!(saves[0][0][0]["shapeCount"], json!(1));
        let ops: Vec<String> = a.calls().into_iter().map(|(op, _)| op).collect();
        let saved_at = ops.iter().position(|op| op == server::UPDATE_SAVES);
        let ok_at = ops.iter().position(|op| op == server::SAVE_DRAW_OK);
        assert!(saved_at < ok_at);

        h.call("a", client::LEAVE_DRAW, vec![]);
        h.call("a", client::LOAD_DRAW, vec![json!("sketch")]);
        assert_eq!(a.calls_to(server::CREATE_TABLE_OK), vec![vec![json!(1)]]);

        let loaded = h.ctx.tables().get(1).unwrap();
        assert_eq!(loaded.name(), "sketch");
        assert_eq!((loaded.width(), loaded.height()), (400, 300));
        // Loaded shapes are renumbered from 0.
        assert_eq!(loaded.shapes()[0].id, 0);
        assert_eq!(loaded.next_shape_id(), 1);
    }

    #[test]
    fn test_load_missing_save_is_silent() {
        let h = Harness::new();
        let sink = h.guest("c1");
        h.call("c1", client::LOAD_DRAW, vec![json!("nothing")]);
        assert!(sink.calls().is_empty());
        assert!(h.ctx.tables().is_empty());
    }

    #[test]
    fn test_save_requires_table() {
        let h = Harness::new();
        let sink = h.guest("c1");
        h.call("c1", client::SAVE_DRAW, vec![json!("x")]);
        assert!(sink.calls().is_empty());
        assert!(h.ctx.saves().list_saves(&crate::accounts::User::guest("guest0")).is_empty());
    }
}
