//! The live storage handle created once at startup.
//!
//! [`StorageConnection`] owns the pool(s) of the configured topology and
//! implements [`UserStore`] on top of them. For the split topology every
//! write is sent to the primary and every read to a replica picked by the
//! router; callers never see which pool served them.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{MySqlPool, SqlitePool};

use super::engine::EngineKind;
use super::error::{Access, StorageError};
use super::mysql::OperationTimeouts;
use super::routing::{ReadRouter, Role};
use super::user::{User, FIND_USER, INSERT_USER, LIST_USERS, MYSQL_SCHEMA, SQLITE_SCHEMA};
use crate::traits::UserStore;

/// A MySQL pool with the per-call read/write limits of its descriptor.
#[derive(Debug, Clone)]
pub struct MysqlTarget {
    pool: MySqlPool,
    timeouts: OperationTimeouts,
}

impl MysqlTarget {
    #[must_use]
    pub fn new(pool: MySqlPool, timeouts: OperationTimeouts) -> Self {
        Self { pool, timeouts }
    }

    /// Runs `work` under the read or write limit.
    async fn bounded<T>(
        &self,
        role: Role,
        access: Access,
        work: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, StorageError> {
        let outcome = match self.timeouts.limit(access) {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| StorageError::Timeout {
                    role,
                    access,
                    timeout: limit,
                })?,
            None => work.await,
        };
        outcome.map_err(|source| StorageError::Query {
            role,
            access,
            source,
        })
    }
}

#[derive(Debug)]
enum Topology {
    Embedded(SqlitePool),
    Networked(MysqlTarget),
    Split {
        primary: MysqlTarget,
        replicas: ReadRouter<MysqlTarget>,
    },
}

/// The pool a single call was routed to.
enum Route<'a> {
    Sqlite(&'a SqlitePool),
    Mysql(Role, &'a MysqlTarget),
}

impl Route<'_> {
    fn role(&self) -> Role {
        match self {
            Self::Sqlite(_) => Role::Primary,
            Self::Mysql(role, _) => *role,
        }
    }
}

/// Opaque handle owning the live pool(s).
#[derive(Debug)]
pub struct StorageConnection {
    engine: EngineKind,
    topology: Topology,
}

impl StorageConnection {
    #[must_use]
    pub fn embedded(pool: SqlitePool) -> Self {
        Self {
            engine: EngineKind::Sqlite,
            topology: Topology::Embedded(pool),
        }
    }

    #[must_use]
    pub fn networked(target: MysqlTarget) -> Self {
        Self {
            engine: EngineKind::MysqlSimple,
            topology: Topology::Networked(target),
        }
    }

    #[must_use]
    pub fn split(primary: MysqlTarget, replicas: ReadRouter<MysqlTarget>) -> Self {
        Self {
            engine: EngineKind::MysqlSplit,
            topology: Topology::Split { primary, replicas },
        }
    }

    #[must_use]
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    fn route(&self, access: Access) -> Route<'_> {
        match (&self.topology, access) {
            (Topology::Embedded(pool), _) => Route::Sqlite(pool),
            (Topology::Networked(target), _) | (Topology::Split { primary: target, .. }, Access::Write) => {
                Route::Mysql(Role::Primary, target)
            }
            (Topology::Split { replicas, .. }, Access::Read) => {
                let (role, target) = replicas.pick();
                Route::Mysql(role, target)
            }
        }
    }

    /// Role the next call of the given kind would be routed to.
    #[must_use]
    pub fn role_for(&self, access: Access) -> Role {
        self.route(access).role()
    }

    fn trace_call<T>(
        &self,
        operation: &'static str,
        role: Role,
        started: Instant,
        result: &Result<T, StorageError>,
    ) {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(_) => tracing::debug!(
                operation,
                engine = %self.engine,
                role = %role,
                elapsed_ms,
                "storage call"
            ),
            Err(err) => tracing::debug!(
                operation,
                engine = %self.engine,
                role = %role,
                elapsed_ms,
                error = %err,
                "storage call failed"
            ),
        }
    }
}

fn sqlite_error(access: Access) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |source| StorageError::Query {
        role: Role::Primary,
        access,
        source,
    }
}

#[async_trait]
impl UserStore for StorageConnection {
    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let started = Instant::now();
        let route = self.route(Access::Read);
        let result = match &route {
            Route::Sqlite(pool) => sqlx::query_as::<_, User>(LIST_USERS)
                .fetch_all(*pool)
                .await
                .map_err(sqlite_error(Access::Read)),
            Route::Mysql(role, target) => {
                target
                    .bounded(
                        *role,
                        Access::Read,
                        sqlx::query_as::<_, User>(LIST_USERS).fetch_all(&target.pool),
                    )
                    .await
            }
        };
        self.trace_call("list_users", route.role(), started, &result);
        result
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        let started = Instant::now();
        let route = self.route(Access::Read);
        let result = match &route {
            Route::Sqlite(pool) => sqlx::query_as::<_, User>(FIND_USER)
                .bind(id)
                .fetch_optional(*pool)
                .await
                .map_err(sqlite_error(Access::Read)),
            Route::Mysql(role, target) => {
                target
                    .bounded(
                        *role,
                        Access::Read,
                        sqlx::query_as::<_, User>(FIND_USER)
                            .bind(id)
                            .fetch_optional(&target.pool),
                    )
                    .await
            }
        };
        self.trace_call("find_user", route.role(), started, &result);
        result
    }

    async fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let started = Instant::now();
        let route = self.route(Access::Write);
        let result = match &route {
            Route::Sqlite(pool) => sqlx::query(INSERT_USER)
                .bind(&user.id)
                .bind(user.created_at)
                .bind(user.updated_at)
                .bind(user.deleted_at)
                .execute(*pool)
                .await
                .map(|_| ())
                .map_err(sqlite_error(Access::Write)),
            Route::Mysql(role, target) => target
                .bounded(
                    *role,
                    Access::Write,
                    sqlx::query(INSERT_USER)
                        .bind(&user.id)
                        .bind(user.created_at)
                        .bind(user.updated_at)
                        .bind(user.deleted_at)
                        .execute(&target.pool),
                )
                .await
                .map(|_| ()),
        };
        self.trace_call("create_user", route.role(), started, &result);
        result
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        let started = Instant::now();
        let route = self.route(Access::Write);
        let result = match &route {
            Route::Sqlite(pool) => sqlx::query(SQLITE_SCHEMA)
                .execute(*pool)
                .await
                .map(|_| ())
                .map_err(sqlite_error(Access::Write)),
            Route::Mysql(role, target) => target
                .bounded(
                    *role,
                    Access::Write,
                    sqlx::query(MYSQL_SCHEMA).execute(&target.pool),
                )
                .await
                .map(|_| ()),
        };
        self.trace_call("initialize", route.role(), started, &result);
        result
    }

    async fn close(&self) {
        match &self.topology {
            Topology::Embedded(pool) => pool.close().await,
            Topology::Networked(target) => target.pool.close().await,
            Topology::Split { primary, replicas } => {
                primary.pool.close().await;
                for (_, replica) in replicas.iter() {
                    replica.pool.close().await;
                }
            }
        }
        tracing::info!(engine = %self.engine, "storage connection closed");
    }
}
