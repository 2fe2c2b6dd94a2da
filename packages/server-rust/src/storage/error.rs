//! Storage error types.
//!
//! [`ConnectionError`] is startup-fatal: it is raised while resolving the
//! configured engine and propagates to `main`. [`StorageError`] is raised
//! per call and is mapped to an HTTP status by the handlers.

use std::time::Duration;

use thiserror::Error;

use super::engine::EngineKind;
use super::routing::Role;

/// Failure to resolve or open the configured storage topology.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("unsupported database engine {0:?} (expected sqlite, mysql-simple or mysql-split)")]
    UnsupportedEngine(String),
    #[error("unsupported sqlite storage mode {0:?} (expected in-memory, memory or file)")]
    UnsupportedStorageMode(String),
    #[error("unsupported mysql network type {0:?} (expected tcp or unix)")]
    UnsupportedNetworkType(String),
    #[error("unsupported replica policy {0:?}")]
    UnsupportedPolicy(String),
    #[error("mysql-split requires at least one replica")]
    NoReplicas,
    #[error("{engine} connection to {role} failed: {source}")]
    Connect {
        engine: EngineKind,
        role: Role,
        #[source]
        source: sqlx::Error,
    },
}

/// Whether a call reads or writes, used to pick the pool and the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Failure of a single storage call.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{access} on {role} failed: {source}")]
    Query {
        role: Role,
        access: Access,
        #[source]
        source: sqlx::Error,
    },
    #[error("{access} on {role} timed out after {timeout:?}")]
    Timeout {
        role: Role,
        access: Access,
        timeout: Duration,
    },
}

impl StorageError {
    /// Role of the pool the failing call was routed to.
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Query { role, .. } | Self::Timeout { role, .. } => *role,
        }
    }
}
