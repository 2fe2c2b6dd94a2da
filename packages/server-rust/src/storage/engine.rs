//! Engine selection: the `database.engine` name table and the resolved
//! per-topology configuration.

use std::fmt;
use std::str::FromStr;

use super::error::ConnectionError;
use super::mysql::MysqlDescriptor;
use super::routing::ReplicaPolicy;
use super::sqlite::EmbeddedConfig;
use crate::config::DatabaseConfig;

/// Supported storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Sqlite,
    MysqlSimple,
    MysqlSplit,
}

/// Engine names as accepted in configuration.
pub const ENGINES: &[(&str, EngineKind)] = &[
    ("sqlite", EngineKind::Sqlite),
    ("mysql-simple", EngineKind::MysqlSimple),
    ("mysql-split", EngineKind::MysqlSplit),
];

impl EngineKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MysqlSimple => "mysql-simple",
            Self::MysqlSplit => "mysql-split",
        }
    }
}

impl FromStr for EngineKind {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ENGINES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ConnectionError::UnsupportedEngine(s.to_string()))
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary plus replicas for the split engine.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub primary: MysqlDescriptor,
    pub replicas: Vec<MysqlDescriptor>,
    pub policy: ReplicaPolicy,
}

/// Fully resolved engine configuration; exactly one variant per process.
#[derive(Debug, Clone)]
pub enum EngineConfig {
    Embedded(EmbeddedConfig),
    Networked(MysqlDescriptor),
    Split(SplitConfig),
}

impl EngineConfig {
    /// Resolves the `database` section.
    ///
    /// The engine name is checked before anything else, so an unknown
    /// engine fails without touching the filesystem or network.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] for unknown engine, storage mode, network
    /// type or policy names, and for a split topology without replicas.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        match config.engine.parse::<EngineKind>()? {
            EngineKind::Sqlite => Ok(Self::Embedded(EmbeddedConfig::from_config(
                &config.sqlite,
            )?)),
            EngineKind::MysqlSimple => {
                let simple = &config.mysql.simple;
                Ok(Self::Networked(MysqlDescriptor::from_config(
                    &simple.endpoint,
                    &simple.session,
                )?))
            }
            EngineKind::MysqlSplit => {
                let split = &config.mysql.split;
                let policy = split.policy.parse()?;
                if split.replicas.is_empty() {
                    return Err(ConnectionError::NoReplicas);
                }
                let primary = MysqlDescriptor::from_config(&split.master, &split.session)?;
                let replicas = split
                    .replicas
                    .iter()
                    .map(|endpoint| MysqlDescriptor::from_config(endpoint, &split.session))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Split(SplitConfig {
                    primary,
                    replicas,
                    policy,
                }))
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Embedded(_) => EngineKind::Sqlite,
            Self::Networked(_) => EngineKind::MysqlSimple,
            Self::Split(_) => EngineKind::MysqlSplit,
        }
    }
}
