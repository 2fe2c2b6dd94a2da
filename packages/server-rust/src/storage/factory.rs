//! Opens the configured storage topology.
//!
//! [`StorageProvider`] is the single construction point for a
//! [`StorageConnection`]: it takes a resolved [`EngineConfig`] and opens
//! every pool the topology needs before the server accepts traffic, so a
//! misconfigured or unreachable database fails startup instead of the first
//! request.

use super::connection::{MysqlTarget, StorageConnection};
use super::engine::{EngineConfig, EngineKind};
use super::error::ConnectionError;
use super::mysql::MysqlDescriptor;
use super::routing::{ReadRouter, Role};
use super::sqlite::EmbeddedConfig;
use crate::config::DatabaseConfig;

/// Builds a [`StorageConnection`] from engine configuration.
#[derive(Debug, Clone)]
pub struct StorageProvider {
    config: EngineConfig,
}

impl StorageProvider {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Resolves the `database` section into a provider.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_config`].
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        EngineConfig::from_config(config).map(Self::new)
    }

    #[must_use]
    pub fn engine(&self) -> EngineKind {
        self.config.kind()
    }

    /// Opens every pool of the configured topology.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Connect`] naming the engine and the pool
    /// role that could not be opened.
    pub async fn resolve(&self) -> Result<StorageConnection, ConnectionError> {
        match &self.config {
            EngineConfig::Embedded(embedded) => open_sqlite(embedded).await,
            EngineConfig::Networked(descriptor) => {
                let target = open_mysql(EngineKind::MysqlSimple, Role::Primary, descriptor).await?;
                Ok(StorageConnection::networked(target))
            }
            EngineConfig::Split(split) => {
                let primary =
                    open_mysql(EngineKind::MysqlSplit, Role::Primary, &split.primary).await?;
                let mut replicas = Vec::with_capacity(split.replicas.len());
                for (index, descriptor) in split.replicas.iter().enumerate() {
                    replicas.push(
                        open_mysql(EngineKind::MysqlSplit, Role::Replica(index), descriptor)
                            .await?,
                    );
                }
                let router = ReadRouter::new(replicas, split.policy)?;
                tracing::info!(
                    replicas = router.len(),
                    policy = ?router.policy(),
                    "read/write split enabled"
                );
                Ok(StorageConnection::split(primary, router))
            }
        }
    }
}

async fn open_sqlite(config: &EmbeddedConfig) -> Result<StorageConnection, ConnectionError> {
    let connect = |source| ConnectionError::Connect {
        engine: EngineKind::Sqlite,
        role: Role::Primary,
        source,
    };
    tracing::info!(engine = %EngineKind::Sqlite, dsn = %config.dsn(), "opening database");
    let options = config.connect_options().map_err(connect)?;
    let pool = config
        .pool_options()
        .connect_with(options)
        .await
        .map_err(connect)?;
    Ok(StorageConnection::embedded(pool))
}

async fn open_mysql(
    engine: EngineKind,
    role: Role,
    descriptor: &MysqlDescriptor,
) -> Result<MysqlTarget, ConnectionError> {
    tracing::info!(%engine, %role, dsn = %descriptor.dsn(), "opening database");
    let pool = descriptor
        .pool_options()
        .connect_with(descriptor.connect_options())
        .await
        .map_err(|source| ConnectionError::Connect {
            engine,
            role,
            source,
        })?;
    Ok(MysqlTarget::new(pool, descriptor.timeouts))
}
