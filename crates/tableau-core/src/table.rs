//! Shared table documents.
//!
//! A [`Table`] is the authoritative, ordered shape list of one drawing
//! session plus the [`Group`] of its viewers. All mutations go through the
//! [`TableStore`], which follows every change with a state-transfer multicast
//! of the full shape list to the table's group.

use crate::bridge::{ConnectionId, RpcBridge};
use crate::group::{Group, GroupRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tableau_protocol::ops::server;
use tableau_protocol::{RenderedTable, Shape, ShapeId, TableId, TableSummary};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Default cap on simultaneously open tables.
pub const DEFAULT_MAX_TABLES: usize = 10_000;

/// Table store errors.
#[derive(Debug, Error)]
pub enum TableError {
    /// Opening another table would exceed the configured cap.
    #[error("Server table cap reached. Try again later.")]
    LimitReached { max: usize },
}

/// Ordered shapes and the shape-id counter.
#[derive(Debug, Default)]
struct Document {
    shapes: Vec<Shape>,
    next_shape_id: ShapeId,
}

impl Document {
    /// Renumber `shapes` from 0 in order.
    fn from_shapes(shapes: Vec<Shape>) -> Self {
        let mut document = Self::default();
        for shape in shapes {
            document.add(shape);
        }
        document
    }

    fn position(&self, id: ShapeId) -> Option<usize> {
        self.shapes.iter().position(|s| s.id == id)
    }

    fn add(&mut self, mut shape: Shape) -> ShapeId {
        let id = self.next_shape_id;
        self.next_shape_id += 1;
        shape.id = id;
        self.shapes.push(shape);
        id
    }

    fn remove(&mut self, id: ShapeId) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.shapes.remove(idx);
                true
            }
            None => false,
        }
    }

    fn update(&mut self, shape: Shape) -> bool {
        match self.position(shape.id) {
            Some(idx) => {
                self.shapes[idx] = shape;
                true
            }
            None => false,
        }
    }

    // Index 0 is the bottom layer; "up" moves towards the end.
    fn move_up(&mut self, id: ShapeId) -> bool {
        match self.position(id) {
            Some(idx) if idx + 1 < self.shapes.len() => {
                self.shapes.swap(idx, idx + 1);
                true
            }
            _ => false,
        }
    }

    fn move_down(&mut self, id: ShapeId) -> bool {
        match self.position(id) {
            Some(idx) if idx > 0 => {
                self.shapes.swap(idx - 1, idx);
                true
            }
            _ => false,
        }
    }
}

/// One drawing session.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    name: String,
    width: u32,
    height: u32,
    group: Arc<Group>,
    document: Mutex<Document>,
}

impl Table {
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The group of connections viewing this table.
    #[must_use]
    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    /// Current shapes in paint order.
    #[must_use]
    pub fn shapes(&self) -> Vec<Shape> {
        self.document.lock().shapes.clone()
    }

    /// The id the next added shape will get.
    #[must_use]
    pub fn next_shape_id(&self) -> ShapeId {
        self.document.lock().next_shape_id
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.group.len()
    }

    /// Lobby listing entry.
    #[must_use]
    pub fn summary(&self) -> TableSummary {
        TableSummary {
            id: self.id,
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            user_count: self.user_count(),
        }
    }

    /// Full state for a joining viewer.
    #[must_use]
    pub fn render(&self) -> RenderedTable {
        RenderedTable {
            id: self.id,
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            shapes: self.shapes(),
        }
    }

    /// Apply `op` to the document; returns the shapes after a change.
    fn mutate(&self, op: impl FnOnce(&mut Document) -> bool) -> Option<Vec<Shape>> {
        let mut document = self.document.lock();
        op(&mut document).then(|| document.shapes.clone())
    }
}

/// Registry of open tables and the only entry point for mutating them.
pub struct TableStore {
    tables: DashMap<TableId, Arc<Table>>,
    next_id: AtomicU64,
    max_tables: usize,
    bridge: Arc<RpcBridge>,
    groups: Arc<GroupRegistry>,
    this: Weak<TableStore>,
}

impl TableStore {
    /// Create a store that multicasts through `bridge`.
    #[must_use]
    pub fn new(bridge: Arc<RpcBridge>, groups: Arc<GroupRegistry>, max_tables: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            tables: DashMap::new(),
            next_id: AtomicU64::new(0),
            max_tables,
            bridge,
            groups,
            this: this.clone(),
        })
    }

    /// Open a table. `initial_shapes` are renumbered from 0 in order.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::LimitReached`] when `max_tables` are open.
    pub fn create(
        &self,
        name: impl Into<String>,
        width: u32,
        height: u32,
        initial_shapes: Vec<Shape>,
    ) -> Result<Arc<Table>, TableError> {
        if self.tables.len() >= self.max_tables {
            warn!(max = self.max_tables, "Table limit reached");
            return Err(TableError::LimitReached {
                max: self.max_tables,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let group = self.groups.get_group(&format!("table_{id}"));
        let table = Arc::new(Table {
            id,
            name: name.into(),
            width,
            height,
            group: Arc::clone(&group),
            document: Mutex::new(Document::from_shapes(initial_shapes)),
        });

        let store = self.this.clone();
        group.on_join().subscribe(move |_| {
            if let Some(store) = store.upgrade() {
                store.broadcast_listing();
            }
        });
        let store = self.this.clone();
        group.on_left().subscribe(move |_| {
            let Some(store) = store.upgrade() else {
                return;
            };
            let empty = store.get(id).is_some_and(|t| t.group.is_empty());
            if empty {
                store.remove(id);
            }
            store.broadcast_listing();
        });

        self.tables.insert(id, Arc::clone(&table));
        info!(table = id, name = %table.name, width, height, "Table created");
        Ok(table)
    }

    /// Look up an open table.
    #[must_use]
    pub fn get(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.get(&id).map(|t| Arc::clone(t.value()))
    }

    /// Drop a table from the registry. Does not broadcast.
    pub fn remove(&self, id: TableId) -> Option<Arc<Table>> {
        let removed = self.tables.remove(&id).map(|(_, t)| t);
        if removed.is_some() {
            info!(table = id, "Table removed");
        }
        removed
    }

    /// Summaries of every open table, by id.
    #[must_use]
    pub fn listing(&self) -> Vec<TableSummary> {
        let tables: Vec<Arc<Table>> = self.tables.iter().map(|t| Arc::clone(t.value())).collect();
        let mut listing: Vec<TableSummary> = tables.iter().map(|t| t.summary()).collect();
        listing.sort_by_key(|s| s.id);
        listing
    }

    /// Number of open tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Send the listing to every connection.
    pub fn broadcast_listing(&self) -> usize {
        let Some(listing) = to_value(&self.listing()) else {
            return 0;
        };
        self.bridge
            .invoke_group(self.groups.everyone(), server::UPDATE_TABLES, vec![listing])
    }

    /// Add a viewer.
    pub fn add_member(&self, table: &Table, conn: &ConnectionId) -> bool {
        table.group.add_member(conn)
    }

    /// Remove a viewer. The table closes if it was the last one.
    pub fn remove_member(&self, table: &Table, conn: &ConnectionId) -> bool {
        table.group.remove_member(conn)
    }

    /// Append a shape on top and return its assigned id.
    pub fn add_shape(&self, table: &Table, shape: Shape) -> ShapeId {
        let mut assigned = 0;
        if let Some(shapes) = table.mutate(|doc| {
            assigned = doc.add(shape);
            true
        }) {
            trace!(table = table.id, shape = assigned, "Shape added");
            self.publish(table, &shapes);
        }
        assigned
    }

    /// Remove the shape with `id`; unknown ids are ignored.
    pub fn remove_shape(&self, table: &Table, id: ShapeId) -> bool {
        self.apply(table, "remove", id, |doc| doc.remove(id))
    }

    /// Replace the shape whose id matches `shape.id`; unknown ids are ignored.
    pub fn update_shape(&self, table: &Table, shape: Shape) -> bool {
        let id = shape.id;
        self.apply(table, "update", id, |doc| doc.update(shape))
    }

    /// Raise the shape one layer.
    pub fn move_shape_up(&self, table: &Table, id: ShapeId) -> bool {
        self.apply(table, "move_up", id, |doc| doc.move_up(id))
    }

    /// Lower the shape one layer.
    pub fn move_shape_down(&self, table: &Table, id: ShapeId) -> bool {
        self.apply(table, "move_down", id, |doc| doc.move_down(id))
    }

    fn apply(
        &self,
        table: &Table,
        op: &'static str,
        shape: ShapeId,
        f: impl FnOnce(&mut Document) -> bool,
    ) -> bool {
        match table.mutate(f) {
            Some(shapes) => {
                trace!(table = table.id, shape, op, "Shape mutated");
                self.publish(table, &shapes);
                true
            }
            None => {
                debug!(table = table.id, shape, op, "Mutation had no effect");
                false
            }
        }
    }

    fn publish(&self, table: &Table, shapes: &[Shape]) {
        if let Some(shapes) = to_value(shapes) {
            self.bridge
                .invoke_group(&table.group, server::UPDATE_SHAPES, vec![shapes]);
        }
    }
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("tables", &self.tables.len())
            .field("max_tables", &self.max_tables)
            .finish()
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Failed to serialize notification");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::RecordingSink;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use tableau_protocol::{Geometry, Point};

    struct Fixture {
        bridge: Arc<RpcBridge>,
        groups: Arc<GroupRegistry>,
        store: Arc<TableStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let bridge = Arc::new(RpcBridge::new());
            let groups = Arc::new(GroupRegistry::new());
            let store = TableStore::new(Arc::clone(&bridge), Arc::clone(&groups), 4);
            Self {
                bridge,
                groups,
                store,
            }
        }

        fn connect(&self, id: &str) -> (ConnectionId, Arc<RecordingSink>) {
            let conn = ConnectionId::from(id);
            let sink = RecordingSink::new();
            self.bridge.attach(conn.clone(), sink.clone());
            self.groups.connect(&conn);
            (conn, sink)
        }
    }

    fn dot(x: f64) -> Shape {
        Shape::new(
            99,
            Geometry::Dot {
                points: vec![Point::new(x, x)],
                size: 1.0,
                color: "#000".into(),
            },
        )
    }

    fn ids(table: &Table) -> Vec<ShapeId> {
        table.shapes().iter().map(|s| s.id).collect()
    }

    fn abc(f: &Fixture) -> Arc<Table> {
        let table = f.store.create("t", 100, 100, vec![]).unwrap();
        for x in 0..3 {
            f.store.add_shape(&table, dot(f64::from(x)));
        }
        table
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let f = Fixture::new();
        let table = abc(&f);
        assert_eq!(ids(&table), vec![0, 1, 2]);
        assert_eq!(table.next_shape_id(), 3);
    }

    #[test]
    fn test_move_down_swaps_with_lower_layer() {
        let f = Fixture::new();
        let table = abc(&f);
        assert!(f.store.move_shape_down(&table, 1));
        assert_eq!(ids(&table), vec![1, 0, 2]);
    }

    #[test]
    fn test_move_up_swaps_with_upper_layer() {
        let f = Fixture::new();
        let table = abc(&f);
        assert!(f.store.move_shape_up(&table, 1));
        assert_eq!(ids(&table), vec![0, 2, 1]);
    }

    #[test]
    fn test_move_at_boundaries_is_noop() {
        let f = Fixture::new();
        let table = abc(&f);
        assert!(!f.store.move_shape_up(&table, 2));
        assert!(!f.store.move_shape_down(&table, 0));
        assert!(!f.store.move_shape_up(&table, 42));
        assert_eq!(ids(&table), vec![0, 1, 2]);
    }

    #[test]
    fn test_update_replaces_whole_shape() {
        let f = Fixture::new();
        let table = abc(&f);
        let mut replacement = dot(50.0);
        replacement.id = 1;
        assert!(f.store.update_shape(&table, replacement.clone()));
        assert_eq!(table.shapes()[1], replacement);

        let mut stale = dot(7.0);
        stale.id = 9;
        assert!(!f.store.update_shape(&table, stale));
    }

    #[test]
    fn test_broadcast_only_on_change() {
        let f = Fixture::new();
        let (conn, sink) = f.connect("a");
        let table = f.store.create("t", 10, 10, vec![]).unwrap();
        f.store.add_member(&table, &conn);
        f.store.add_shape(&table, dot(1.0));
        sink.clear();

        assert!(!f.store.remove_shape(&table, 5));
        assert!(sink.calls_to(server::UPDATE_SHAPES).is_empty());

        assert!(f.store.remove_shape(&table, 0));
        assert_eq!(
            sink.calls_to(server::UPDATE_SHAPES),
            vec![vec![json!([])]]
        );
    }

    #[test]
    fn test_second_join_broadcasts_listing_once() {
        let f = Fixture::new();
        let (a, _) = f.connect("a");
        let (b, watcher) = f.connect("b");
        let table = f.store.create("t", 10, 10, vec![]).unwrap();
        f.store.add_member(&table, &a);
        watcher.clear();

        f.store.add_member(&table, &b);
        let updates = watcher.calls_to(server::UPDATE_TABLES);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0][0][0]["userCount"], json!(2));
    }

    #[test]
    fn test_last_leave_destroys_table() {
        let f = Fixture::new();
        let (a, sink) = f.connect("a");
        let table = f.store.create("t", 10, 10, vec![]).unwrap();
        let id = table.id();
        f.store.add_member(&table, &a);
        sink.clear();

        f.store.remove_member(&table, &a);
        assert!(f.store.get(id).is_none());
        assert_eq!(
            sink.calls_to(server::UPDATE_TABLES),
            vec![vec![Value::Array(vec![])]]
        );
    }

    #[test]
    fn test_disconnect_destroys_table() {
        let f = Fixture::new();
        let (a, _) = f.connect("a");
        let table = f.store.create("t", 10, 10, vec![]).unwrap();
        f.store.add_member(&table, &a);
        f.groups.disconnect(&a);
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_initial_shapes_are_renumbered() {
        let f = Fixture::new();
        let mut saved = vec![dot(1.0), dot(2.0)];
        saved[0].id = 7;
        saved[1].id = 7;
        let table = f.store.create("loaded", 10, 10, saved).unwrap();
        assert_eq!(ids(&table), vec![0, 1]);
        assert_eq!(f.store.add_shape(&table, dot(3.0)), 2);
    }

    #[test]
    fn test_table_cap() {
        let f = Fixture::new();
        for _ in 0..4 {
            f.store.create("t", 1, 1, vec![]).unwrap();
        }
        let err = f.store.create("t", 1, 1, vec![]).unwrap_err();
        assert_eq!(err.to_string(), "Server table cap reached. Try again later.");
    }

    #[test]
    fn test_listing_sorted_by_id() {
        let f = Fixture::new();
        f.store.create("a", 1, 1, vec![]).unwrap();
        f.store.create("b", 2, 2, vec![]).unwrap();
        let listing = f.store.listing();
        assert_eq!(listing.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(listing[1].name, "b");
        assert_eq!(listing[1].user_count, 0);
    }

    #[test]
    fn test_render_is_not_broadcast() {
        let f = Fixture::new();
        let (a, sink) = f.connect("a");
        let table = f.store.create("t", 640, 480, vec![dot(1.0)]).unwrap();
        f.store.add_member(&table, &a);
        let rendered = table.render();
        assert_eq!((rendered.width, rendered.height), (640, 480));
        assert_eq!(rendered.shapes.len(), 1);
        assert!(sink.calls_to(server::UPDATE_SHAPES).is_empty());
    }

    proptest! {
        #[test]
        fn prop_ids_follow_add_order(xs in proptest::collection::vec(-1e3f64..1e3, 0..40)) {
            let f = Fixture::new();
            let table = f.store.create("p", 10, 10, vec![]).unwrap();
            for x in &xs {
                f.store.add_shape(&table, dot(*x));
            }
            let shapes = table.shapes();
            prop_assert_eq!(shapes.len(), xs.len());
            for (i, (shape, x)) in shapes.iter().zip(&xs).enumerate() {
                prop_assert_eq!(shape.id, i as u64);
                prop_assert_eq!(shape, &dot(*x).with_id(i as u64));
            }
        }

        #[test]
        fn prop_remove_is_idempotent(n in 0usize..20, target in 0u64..25) {
            let f = Fixture::new();
            let once = f.store.create("once", 1, 1, vec![]).unwrap();
            let twice = f.store.create("twice", 1, 1, vec![]).unwrap();
            for i in 0..n {
                f.store.add_shape(&once, dot(i as f64));
                f.store.add_shape(&twice, dot(i as f64));
            }
            f.store.remove_shape(&once, target);
            f.store.remove_shape(&twice, target);
            prop_assert!(!f.store.remove_shape(&twice, target));
            prop_assert_eq!(once.shapes(), twice.shapes());
        }
    }

    trait WithId {
        fn with_id(self, id: ShapeId) -> Self;
    }

    impl WithId for Shape {
        fn with_id(mut self, id: ShapeId) -> Self {
            self.id = id;
            self
        }
    }
}
