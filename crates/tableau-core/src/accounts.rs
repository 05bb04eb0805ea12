//! Accounts and saved drawings.
//!
//! Both stores sit behind traits so a persistent backend can replace the
//! in-memory implementations used by the server.

use crate::table::Table;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tableau_protocol::{SaveSummary, Shape, UserInfo};
use thiserror::Error;
use tracing::{debug, info};

/// Default minimum nickname length.
pub const DEFAULT_MIN_NICKNAME_LENGTH: usize = 3;

/// Prefix of generated guest nicknames; reserved by default.
pub const GUEST_PREFIX: &str = "guest";

/// A logged-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nickname: String,
    pub guest: bool,
}

impl User {
    #[must_use]
    pub fn registered(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            guest: false,
        }
    }

    #[must_use]
    pub fn guest(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            guest: true,
        }
    }

    /// Wire form.
    #[must_use]
    pub fn info(&self) -> UserInfo {
        UserInfo {
            nickname: self.nickname.clone(),
            guest: self.guest,
        }
    }
}

/// Why an account operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountErrorKind {
    InvalidNickname,
    TooShort,
    ReservedNickname,
    NicknameTaken,
}

/// A typed account failure. Displays as its user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AccountError {
    pub kind: AccountErrorKind,
    pub message: String,
}

impl AccountError {
    fn new(kind: AccountErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Rules for registered nicknames.
#[derive(Debug, Clone)]
pub struct NicknamePolicy {
    pub min_length: usize,
    /// Reserved names. A reserved name followed only by digits is reserved
    /// too, so no one can register a guest's nickname.
    pub reserved: Vec<String>,
}

impl Default for NicknamePolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_NICKNAME_LENGTH,
            reserved: vec![GUEST_PREFIX.to_string()],
        }
    }
}

impl NicknamePolicy {
    /// Check a nickname against the policy.
    ///
    /// # Errors
    ///
    /// Returns the first rule the nickname breaks.
    pub fn validate(&self, nickname: &str) -> Result<(), AccountError> {
        if !nickname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AccountError::new(
                AccountErrorKind::InvalidNickname,
                "Nickname contains disallowed symbols.",
            ));
        }
        if nickname.len() < self.min_length {
            return Err(AccountError::new(
                AccountErrorKind::TooShort,
                format!("Nickname must be at least {} long.", self.min_length),
            ));
        }
        if self.is_reserved(nickname) {
            return Err(AccountError::new(
                AccountErrorKind::ReservedNickname,
                "Nickname is reserved.",
            ));
        }
        Ok(())
    }

    fn is_reserved(&self, nickname: &str) -> bool {
        self.reserved.iter().any(|r| {
            nickname
                .strip_prefix(r.as_str())
                .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
        })
    }
}

/// Registered users.
pub trait IdentityStore: Send + Sync {
    /// Look up a registered user.
    fn get_user(&self, nickname: &str) -> Option<User>;

    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns an [`AccountError`] if the nickname is invalid or taken.
    fn add_user(&self, nickname: &str) -> Result<User, AccountError>;

    /// Create a fresh guest identity. Guests are not registered.
    fn add_guest(&self) -> User;
}

/// Process-lifetime identity store.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    users: DashMap<String, User>,
    next_guest: AtomicU64,
    policy: NicknamePolicy,
}

impl InMemoryIdentityStore {
    #[must_use]
    pub fn new(policy: NicknamePolicy) -> Self {
        Self {
            users: DashMap::new(),
            next_guest: AtomicU64::new(0),
            policy,
        }
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get_user(&self, nickname: &str) -> Option<User> {
        self.users.get(nickname).map(|u| u.value().clone())
    }

    fn add_user(&self, nickname: &str) -> Result<User, AccountError> {
        self.policy.validate(nickname)?;
        let user = User::registered(nickname);
        match self.users.entry(nickname.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AccountError::new(
                AccountErrorKind::NicknameTaken,
                "Nickname is already taken.",
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.clone());
                info!(nickname, "User registered");
                Ok(user)
            }
        }
    }

    fn add_guest(&self) -> User {
        let n = self.next_guest.fetch_add(1, Ordering::Relaxed);
        let user = User::guest(format!("{GUEST_PREFIX}{n}"));
        debug!(nickname = %user.nickname, "Guest created");
        user
    }
}

/// A drawing saved by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedTable {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub shapes: Vec<Shape>,
    pub saved_at: DateTime<Utc>,
}

impl SavedTable {
    /// Capture the current state of `table`.
    #[must_use]
    pub fn capture(name: impl Into<String>, table: &Table) -> Self {
        Self {
            name: name.into(),
            width: table.width(),
            height: table.height(),
            shapes: table.shapes(),
            saved_at: Utc::now(),
        }
    }

    /// Listing entry.
    #[must_use]
    pub fn summary(&self) -> SaveSummary {
        SaveSummary {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            shape_count: self.shapes.len(),
            saved_at: self.saved_at.to_rfc3339(),
        }
    }
}

/// Saved drawings keyed by owner and name.
pub trait SaveStore: Send + Sync {
    /// Save `table` for `user` under `name`, replacing any save with that name.
    fn save(&self, user: &User, name: &str, table: &Table) -> SavedTable;

    /// Look up one save.
    fn get_save(&self, user: &User, name: &str) -> Option<SavedTable>;

    /// Every save of `user`, by name.
    fn list_saves(&self, user: &User) -> Vec<SavedTable>;
}

/// Process-lifetime save store.
#[derive(Debug, Default)]
pub struct InMemorySaveStore {
    saves: DashMap<String, BTreeMap<String, SavedTable>>,
}

impl InMemorySaveStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaveStore for InMemorySaveStore {
    fn save(&self, user: &User, name: &str, table: &Table) -> SavedTable {
        let saved = SavedTable::capture(name, table);
        self.saves
            .entry(user.nickname.clone())
            .or_default()
            .insert(name.to_string(), saved.clone());
        debug!(nickname = %user.nickname, name, table = table.id(), "Table saved");
        saved
    }

    fn get_save(&self, user: &User, name: &str) -> Option<SavedTable> {
        self.saves
            .get(&user.nickname)
            .and_then(|saves| saves.get(name).cloned())
    }

    fn list_saves(&self, user: &User) -> Vec<SavedTable> {
        self.saves
            .get(&user.nickname)
            .map(|saves| saves.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RpcBridge;
    use crate::group::GroupRegistry;
    use crate::table::TableStore;
    use std::sync::Arc;
    use tableau_protocol::{Geometry, Point};

    #[test]
    fn test_nickname_rules() {
        let store = InMemoryIdentityStore::default();
        let kind = |n: &str| store.add_user(n).unwrap_err().kind;

        assert_eq!(kind("bad name!"), AccountErrorKind::InvalidNickname);
        assert_eq!(kind("ab"), AccountErrorKind::TooShort);
        assert_eq!(kind("guest"), AccountErrorKind::ReservedNickname);
        assert_eq!(kind("guest12"), AccountErrorKind::ReservedNickname);
        assert!(store.add_user("guest_artist").is_ok());
    }

    #[test]
    fn test_error_messages() {
        let store = InMemoryIdentityStore::default();
        assert_eq!(
            store.add_user("a-b").unwrap_err().to_string(),
            "Nickname contains disallowed symbols."
        );
        assert_eq!(
            store.add_user("ab").unwrap_err().to_string(),
            "Nickname must be at least 3 long."
        );
        assert_eq!(
            store.add_user("guest").unwrap_err().to_string(),
            "Nickname is reserved."
        );
    }

    #[test]
    fn test_register_then_lookup() {
        let store = InMemoryIdentityStore::default();
        assert!(store.get_user("alice").is_none());
        let alice = store.add_user("alice").unwrap();
        assert_eq!(store.get_user("alice"), Some(alice));
        assert_eq!(
            store.add_user("alice").unwrap_err().kind,
            AccountErrorKind::NicknameTaken
        );
    }

    #[test]
    fn test_guests_are_numbered_and_unregistered() {
        let store = InMemoryIdentityStore::default();
        let first = store.add_guest();
        let second = store.add_guest();
        assert_eq!(first, User::guest("guest0"));
        assert_eq!(second.nickname, "guest1");
        assert!(store.get_user("guest0").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_custom_policy() {
        let store = InMemoryIdentityStore::new(NicknamePolicy {
            min_length: 5,
            reserved: vec!["admin".into()],
        });
        assert_eq!(
            store.add_user("bob").unwrap_err().to_string(),
            "Nickname must be at least 5 long."
        );
        assert!(store.add_user("admin").is_err());
        assert!(store.add_user("guest").is_ok());
    }

    #[test]
    fn test_save_overwrites_and_lists_by_name() {
        let store = TableStore::new(
            Arc::new(RpcBridge::new()),
            Arc::new(GroupRegistry::new()),
            8,
        );
        let table = store.create("alice", 300, 200, vec![]).unwrap();
        let saves = InMemorySaveStore::new();
        let alice = User::registered("alice");

        saves.save(&alice, "zebra", &table);
        saves.save(&alice, "apple", &table);
        store.add_shape(
            &table,
            Shape::new(
                0,
                Geometry::Dot {
                    points: vec![Point::new(1.0, 1.0)],
                    size: 2.0,
                    color: "#f00".into(),
                },
            ),
        );
        saves.save(&alice, "apple", &table);

        let listed = saves.list_saves(&alice);
        assert_eq!(
            listed.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["apple", "zebra"]
        );
        assert_eq!(listed[0].summary().shape_count, 1);
        assert_eq!(listed[1].shapes.len(), 0);
        assert_eq!(saves.get_save(&alice, "apple").unwrap().width, 300);
        assert!(saves.get_save(&User::registered("bob"), "apple").is_none());
        assert!(saves.list_saves(&User::registered("bob")).is_empty());
    }
}
