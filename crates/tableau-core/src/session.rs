//! Per-connection session state: the logged-in user and the current table.

use crate::accounts::User;
use crate::bridge::ConnectionId;
use dashmap::DashMap;
use tableau_protocol::TableId;

/// State bound to one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user: Option<User>,
    /// The table this connection is drawing on.
    pub current: Option<TableId>,
}

/// Sessions by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an anonymous session.
    pub fn open(&self, conn: &ConnectionId) {
        self.sessions.insert(conn.clone(), Session::default());
    }

    /// End a session, returning its last state.
    pub fn close(&self, conn: &ConnectionId) -> Option<Session> {
        self.sessions.remove(conn).map(|(_, s)| s)
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn get(&self, conn: &ConnectionId) -> Option<Session> {
        self.sessions.get(conn).map(|s| s.value().clone())
    }

    #[must_use]
    pub fn user(&self, conn: &ConnectionId) -> Option<User> {
        self.sessions.get(conn).and_then(|s| s.user.clone())
    }

    #[must_use]
    pub fn current(&self, conn: &ConnectionId) -> Option<TableId> {
        self.sessions.get(conn).and_then(|s| s.current)
    }

    /// Bind `user` to the connection. The current table is reset.
    pub fn login(&self, conn: &ConnectionId, user: User) {
        let mut session = self.sessions.entry(conn.clone()).or_default();
        session.user = Some(user);
        session.current = None;
    }

    /// Clear the user, returning it.
    pub fn logout(&self, conn: &ConnectionId) -> Option<User> {
        self.sessions.get_mut(conn).and_then(|mut s| s.user.take())
    }

    /// Set or clear the current table.
    pub fn set_current(&self, conn: &ConnectionId, table: Option<TableId>) {
        self.sessions.entry(conn.clone()).or_default().current = table;
    }

    /// Clear the current table, returning it.
    pub fn take_current(&self, conn: &ConnectionId) -> Option<TableId> {
        self.sessions.get_mut(conn).and_then(|mut s| s.current.take())
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions with a logged-in user.
    #[must_use]
    pub fn logged_in(&self) -> usize {
        self.sessions.iter().filter(|s| s.user.is_some()).count()
    }
}
