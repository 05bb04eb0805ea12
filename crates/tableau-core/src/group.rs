//! Named multicast groups.
//!
//! A group is a dynamic set of connections with lifecycle events. The
//! reserved [`EVERYONE`] group contains every live connection and is the only
//! source of connect/disconnect transitions; table groups observe those
//! through the registry's [`GroupRegistry::disconnect`] fan-out.

use crate::bridge::ConnectionId;
use crate::stream::Event;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// A group identifier.
pub type GroupId = String;

/// Id of the group that implicitly contains every connection.
pub const EVERYONE: &str = "everyone";

/// A named, dynamic set of connections.
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    members: Mutex<BTreeSet<ConnectionId>>,
    connect: Event<ConnectionId>,
    disconnect: Event<ConnectionId>,
    join: Event<ConnectionId>,
    leave: Event<ConnectionId>,
    left: Event<ConnectionId>,
}

impl Group {
    /// Create an empty group.
    #[must_use]
    pub fn new(id: impl Into<GroupId>) -> Self {
        let disconnect = Event::new();
        let leave = Event::new();
        let left = Event::merge(&[leave.clone(), disconnect.clone()]);
        Self {
            id: id.into(),
            members: Mutex::new(BTreeSet::new()),
            connect: Event::new(),
            disconnect,
            join: Event::new(),
            leave,
            left,
        }
    }

    /// Get the group id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this is the reserved [`EVERYONE`] group.
    #[must_use]
    pub fn is_everyone(&self) -> bool {
        self.id == EVERYONE
    }

    /// Add a member. Fires `join` and returns `true` if it was not a member.
    pub fn add_member(&self, id: &ConnectionId) -> bool {
        if !self.insert(id) {
            return false;
        }
        debug!(group = %self.id, connection = %id, "Member joined");
        self.join.send(id.clone());
        true
    }

    /// Remove a member. Fires `leave` (and so `left`) and returns `true` if it
    /// was a member.
    pub fn remove_member(&self, id: &ConnectionId) -> bool {
        if !self.erase(id) {
            return false;
        }
        debug!(group = %self.id, connection = %id, "Member left");
        self.leave.send(id.clone());
        true
    }

    /// Add a newly opened connection. Fires `connect`.
    pub fn connect_member(&self, id: &ConnectionId) -> bool {
        if !self.insert(id) {
            return false;
        }
        trace!(group = %self.id, connection = %id, "Member connected");
        self.connect.send(id.clone());
        true
    }

    /// Drop a member whose connection is gone. Fires `disconnect` (and so
    /// `left`) if it was a member.
    pub fn disconnect_member(&self, id: &ConnectionId) -> bool {
        if !self.erase(id) {
            return false;
        }
        debug!(group = %self.id, connection = %id, "Member disconnected");
        self.disconnect.send(id.clone());
        true
    }

    fn insert(&self, id: &ConnectionId) -> bool {
        self.members.lock().insert(id.clone())
    }

    fn erase(&self, id: &ConnectionId) -> bool {
        self.members.lock().remove(id)
    }

    /// Members as of now, in id order.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.lock().iter().cloned().collect()
    }

    /// Current member count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.lock().contains(id)
    }

    /// Fires when a connection opens (only on [`EVERYONE`]).
    #[must_use]
    pub fn on_connect(&self) -> &Event<ConnectionId> {
        &self.connect
    }

    /// Fires when a member's connection is lost.
    #[must_use]
    pub fn on_disconnect(&self) -> &Event<ConnectionId> {
        &self.disconnect
    }

    /// Fires on every cooperative join.
    #[must_use]
    pub fn on_join(&self) -> &Event<ConnectionId> {
        &self.join
    }

    /// Fires on every cooperative leave.
    #[must_use]
    pub fn on_leave(&self) -> &Event<ConnectionId> {
        &self.leave
    }

    /// Fires when a member is gone for any reason.
    #[must_use]
    pub fn on_left(&self) -> &Event<ConnectionId> {
        &self.left
    }
}

/// Registry of groups by id.
///
/// Non-reserved groups are dropped from the registry once a `left` empties
/// them. Holders of the `Arc` keep a working group; the next
/// [`get_group`](Self::get_group) for the same id creates a fresh one.
#[derive(Debug)]
pub struct GroupRegistry {
    groups: Arc<DashMap<GroupId, Arc<Group>>>,
    everyone: Arc<Group>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    /// Create a registry holding only [`EVERYONE`].
    #[must_use]
    pub fn new() -> Self {
        let groups = Arc::new(DashMap::new());
        let everyone = Arc::new(Group::new(EVERYONE));
        groups.insert(EVERYONE.to_string(), Arc::clone(&everyone));
        Self { groups, everyone }
    }

    /// Get the group for `id`, creating it on first reference.
    pub fn get_group(&self, id: &str) -> Arc<Group> {
        if let Some(group) = self.groups.get(id) {
            return Arc::clone(group.value());
        }
        let group = self
            .groups
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(group = %id, "Group created");
                Arc::new(Group::new(id))
            })
            .value()
            .clone();
        if !group.is_everyone() {
            self.collect_when_empty(&group);
        }
        group
    }

    fn collect_when_empty(&self, group: &Arc<Group>) {
        // `or_insert_with` may lose a race with another creator; only the
        // registered instance gets the collector.
        let registered = self
            .groups
            .get(group.id())
            .is_some_and(|g| Arc::ptr_eq(g.value(), group));
        if !registered || group.on_left().listener_count() > 0 {
            return;
        }
        let groups: Weak<DashMap<GroupId, Arc<Group>>> = Arc::downgrade(&self.groups);
        let id = group.id().to_string();
        group.on_left().subscribe(move |_| {
            let Some(groups) = groups.upgrade() else {
                return;
            };
            if groups.remove_if(&id, |_, g| g.is_empty()).is_some() {
                debug!(group = %id, "Empty group removed");
            }
        });
    }

    /// Get a registered group without creating it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Group>> {
        self.groups.get(id).map(|g| Arc::clone(g.value()))
    }

    /// The reserved group of every live connection.
    #[must_use]
    pub fn everyone(&self) -> &Arc<Group> {
        &self.everyone
    }

    /// Add `conn` to the group `id`.
    pub fn add_member(&self, id: &str, conn: &ConnectionId) -> bool {
        self.get_group(id).add_member(conn)
    }

    /// Remove `conn` from the group `id`, if that group exists.
    pub fn remove_member(&self, id: &str, conn: &ConnectionId) -> bool {
        self.get(id).is_some_and(|g| g.remove_member(conn))
    }

    /// Register a newly opened connection.
    pub fn connect(&self, conn: &ConnectionId) {
        self.everyone.connect_member(conn);
    }

    /// Fan a lost connection out to every group holding it, then to
    /// [`EVERYONE`]. Returns the number of non-reserved groups it was in.
    pub fn disconnect(&self, conn: &ConnectionId) -> usize {
        let holding: Vec<Arc<Group>> = self
            .groups
            .iter()
            .filter(|g| !g.value().is_everyone() && g.value().contains(conn))
            .map(|g| Arc::clone(g.value()))
            .collect();
        for group in &holding {
            group.disconnect_member(conn);
        }
        self.everyone.disconnect_member(conn);
        holding.len()
    }

    /// Number of registered groups, [`EVERYONE`] included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always `false`: [`EVERYONE`] is permanent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: &Event<ConnectionId>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        event.subscribe(move |c: &ConnectionId| sink.lock().push(c.to_string()));
        seen
    }

    #[test]
    fn test_get_group_is_idempotent() {
        let registry = GroupRegistry::new();
        let a = registry.get_group("table_1");
        let b = registry.get_group("table_1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("table_2").is_none());
    }

    #[test]
    fn test_join_and_leave_fire_on_change_only() {
        let group = Group::new("table_0");
        let joins = record(group.on_join());
        let leaves = record(group.on_leave());

        assert!(group.add_member(&"a".into()));
        assert!(!group.add_member(&"a".into()));
        assert!(group.remove_member(&"a".into()));
        assert!(!group.remove_member(&"a".into()));

        assert_eq!(*joins.lock(), vec!["a"]);
        assert_eq!(*leaves.lock(), vec!["a"]);
    }

    #[test]
    fn test_left_covers_leave_and_disconnect() {
        let registry = GroupRegistry::new();
        let group = registry.get_group("table_0");
        let left = record(group.on_left());
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");

        registry.connect(&a);
        registry.connect(&b);
        group.add_member(&a);
        group.add_member(&b);

        group.remove_member(&a);
        assert_eq!(registry.disconnect(&b), 1);
        // Not a member anymore: no second `left`.
        registry.disconnect(&a);

        assert_eq!(*left.lock(), vec!["a", "b"]);
        assert!(registry.everyone().is_empty());
    }

    #[test]
    fn test_disconnect_reaches_everyone_last() {
        let registry = GroupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let table = registry.get_group("table_0");
        let sink = Arc::clone(&order);
        table
            .on_disconnect()
            .subscribe(move |_| sink.lock().push("table"));
        let sink = Arc::clone(&order);
        registry
            .everyone()
            .on_disconnect()
            .subscribe(move |_| sink.lock().push("everyone"));

        let conn = ConnectionId::from("c");
        registry.connect(&conn);
        table.add_member(&conn);
        registry.disconnect(&conn);

        assert_eq!(*order.lock(), vec!["table", "everyone"]);
    }

    #[test]
    fn test_len_is_current_inside_listeners() {
        let group = Arc::new(Group::new("table_0"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for event in [group.on_join(), group.on_left()] {
            let (group, seen) = (Arc::downgrade(&group), Arc::clone(&seen));
            event.subscribe(move |_| {
                if let Some(group) = group.upgrade() {
                    seen.lock().push(group.len());
                }
            });
        }

        group.add_member(&"a".into());
        group.add_member(&"b".into());
        group.remove_member(&"a".into());
        assert_eq!(*seen.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn test_empty_group_is_collected_after_left() {
        let registry = GroupRegistry::new();
        let group = registry.get_group("table_9");
        let conn = ConnectionId::from("a");
        group.add_member(&conn);
        group.remove_member(&conn);

        assert!(registry.get("table_9").is_none());
        // The held handle still works.
        assert!(group.add_member(&conn));
        assert!(!Arc::ptr_eq(&group, &registry.get_group("table_9")));
    }

    #[test]
    fn test_everyone_is_never_collected() {
        let registry = GroupRegistry::new();
        let conn = ConnectionId::from("a");
        registry.connect(&conn);
        registry.disconnect(&conn);
        assert!(registry.get(EVERYONE).is_some());
        assert_eq!(registry.len(), 1);
    }
}
