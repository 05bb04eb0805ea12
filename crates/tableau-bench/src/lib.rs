//! Shared fixtures for the Tableau benchmarks.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tableau_core::{AppContext, BridgeError, ConnectionId, ConnectionSink};
use tableau_protocol::ops::client;
use tableau_protocol::{Frame, Geometry, Point, Shape};

/// Sink that drops frames and counts them.
#[derive(Debug, Default)]
pub struct CountingSink {
    frames: AtomicU64,
}

impl CountingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl ConnectionSink for CountingSink {
    fn deliver(&self, _frame: Frame) -> Result<(), BridgeError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A free-hand stroke of `points` points.
#[must_use]
pub fn stroke(seed: usize, points: usize) -> Shape {
    let f = seed as f64;
    Shape::new(
        0,
        Geometry::Dot {
            points: (0..points)
                .map(|p| Point::new(f + p as f64, f * 2.0 + p as f64))
                .collect(),
            size: 3.0,
            color: "#336699".into(),
        },
    )
}

/// `stroke` as a call argument.
#[must_use]
pub fn stroke_arg(seed: usize, points: usize) -> Value {
    serde_json::to_value(stroke(seed, points)).unwrap_or(Value::Null)
}

/// A context with one table (id 0) viewed by `members` guest connections.
///
/// Connection ids are `m0`, `m1`, ...; `m0` created the table.
pub fn table_with_members(members: usize) -> (Arc<AppContext>, Vec<Arc<CountingSink>>) {
    let ctx = AppContext::new(Default::default());
    let sinks: Vec<_> = (0..members)
        .map(|i| {
            let conn = member(i);
            let sink = CountingSink::new();
            ctx.connect(&conn, Arc::clone(&sink) as Arc<dyn ConnectionSink>);
            ctx.dispatch(&conn, client::GUEST_LOGIN, vec![]);
            sink
        })
        .collect();
    ctx.dispatch(&member(0), client::CREATE_TABLE, vec![json!(1920), json!(1080)]);
    for i in 0..members {
        ctx.dispatch(&member(i), client::GET_DRAW, vec![json!(0)]);
    }
    (ctx, sinks)
}

/// Connection id of member `i`.
#[must_use]
pub fn member(i: usize) -> ConnectionId {
    ConnectionId::new(format!("m{i}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_with_members_joins_everyone() {
        let (ctx, sinks) = table_with_members(3);
        let table = ctx.tables().get(0).unwrap();
        assert_eq!(table.user_count(), 3);

        let before = sinks[2].frames();
        ctx.dispatch(&member(0), client::ADD_SHAPE, vec![stroke_arg(1, 4)]);
        assert_eq!(table.shapes().len(), 1);
        assert_eq!(sinks[2].frames(), before + 1);
    }
}
