//! Embedded SQLite engine settings.

use std::path::PathBuf;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::error::ConnectionError;
use crate::config::SqliteConfig;

/// Where the embedded database lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteStorage {
    Memory,
    File,
}

const STORAGE_MODES: &[(&str, SqliteStorage)] = &[
    ("in-memory", SqliteStorage::Memory),
    ("memory", SqliteStorage::Memory),
    ("file", SqliteStorage::File),
];

impl FromStr for SqliteStorage {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STORAGE_MODES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(_, mode)| *mode)
            .ok_or_else(|| ConnectionError::UnsupportedStorageMode(s.to_string()))
    }
}

/// Resolved settings for the embedded engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedConfig {
    pub storage: SqliteStorage,
    /// Database file; ignored for in-memory storage.
    pub path: PathBuf,
    pub foreign_keys: bool,
}

impl EmbeddedConfig {
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnsupportedStorageMode`] for an unknown
    /// `storage` value.
    pub fn from_config(config: &SqliteConfig) -> Result<Self, ConnectionError> {
        Ok(Self {
            storage: config.storage.parse()?,
            path: config.file.path.clone(),
            foreign_keys: config.enable_foreign_keys,
        })
    }

    /// An in-memory database with foreign keys enforced.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage: SqliteStorage::Memory,
            path: PathBuf::new(),
            foreign_keys: true,
        }
    }

    /// DSN in the form the Go service logged it.
    #[must_use]
    pub fn dsn(&self) -> String {
        let mut dsn = match self.storage {
            SqliteStorage::Memory => ":memory:".to_string(),
            SqliteStorage::File => self.path.display().to_string(),
        };
        if self.foreign_keys {
            dsn.push_str("?_pragma=foreign_keys(1)");
        }
        dsn
    }

    /// # Errors
    ///
    /// Propagates the driver's error for an unparsable in-memory URL.
    pub fn connect_options(&self) -> Result<SqliteConnectOptions, sqlx::Error> {
        let options = match self.storage {
            SqliteStorage::Memory => SqliteConnectOptions::from_str("sqlite::memory:")?,
            SqliteStorage::File => SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true),
        };
        Ok(options.foreign_keys(self.foreign_keys))
    }

    /// Each in-memory connection is its own database, so the pool is pinned
    /// to a single connection that is never recycled.
    #[must_use]
    pub fn pool_options(&self) -> SqlitePoolOptions {
        match self.storage {
            SqliteStorage::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>),
            SqliteStorage::File => SqlitePoolOptions::new(),
        }
    }
}
