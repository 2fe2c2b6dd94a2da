//! Storage connection provider.
//!
//! Three engines are supported:
//!
//! - **sqlite**: embedded, in-memory or file backed
//! - **mysql-simple**: a single MySQL pool
//! - **mysql-split**: a primary for writes plus replicas for reads
//!
//! [`StorageProvider`] resolves configuration into a [`StorageConnection`],
//! which implements [`UserStore`](crate::traits::UserStore).

pub mod connection;
pub mod engine;
pub mod error;
pub mod factory;
pub mod mysql;
pub mod routing;
pub mod sqlite;
pub mod user;

pub use connection::{MysqlTarget, StorageConnection};
pub use engine::{EngineConfig, EngineKind, SplitConfig};
pub use error::{Access, ConnectionError, StorageError};
pub use factory::StorageProvider;
pub use mysql::{MysqlDescriptor, OperationTimeouts};
pub use routing::{ReadRouter, ReplicaPolicy, Role};
pub use sqlite::EmbeddedConfig;
pub use user::User;
