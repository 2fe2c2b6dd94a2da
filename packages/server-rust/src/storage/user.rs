//! The `users` resource and its SQL.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A user row. Soft-deleted rows carry `deleted_at` and are never returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// A new user with a random v4 UUID. Timestamps are truncated to
    /// milliseconds, the precision both engines store.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now().trunc_subsecs(3);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// The record returned for an unknown ID: the ID with zero timestamps.
    #[must_use]
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }
}

pub(crate) const SQLITE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT NULL
)";

pub(crate) const MYSQL_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id VARCHAR(36) NOT NULL PRIMARY KEY,
    created_at DATETIME(3) NOT NULL,
    updated_at DATETIME(3) NOT NULL,
    deleted_at DATETIME(3) NULL,
    INDEX idx_users_deleted_at (deleted_at)
)";

pub(crate) const LIST_USERS: &str =
    "SELECT id, created_at, updated_at, deleted_at FROM users WHERE deleted_at IS NULL ORDER BY created_at, id";

pub(crate) const FIND_USER: &str =
    "SELECT id, created_at, updated_at, deleted_at FROM users WHERE id = ? AND deleted_at IS NULL LIMIT 1";

pub(crate) const INSERT_USER: &str =
    "INSERT INTO users (id, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?)";
