//! Application configuration loaded from YAML with per-field defaults.
//!
//! Keys mirror the configuration files of the existing deployment
//! (`log.level`, `database.mysql.simple.hostname`, ...). Every field has a
//! default, so an absent file yields a runnable development configuration.
//! `SERVER_*` environment variables are layered over the file (see [`env`]),
//! and command-line flags are applied last through [`ConfigOverrides`].

pub mod duration;
pub mod env;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub use crate::network::config::{NetworkConfig, TlsConfig};

/// Locations searched for `config.yaml` when no explicit path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["/app/conf/config.yaml", "config.yaml"];

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value in environment variable {key}: {message}")]
    Env { key: String, message: String },
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Root of the configuration tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Service name reported on spans and logs.
    pub service: String,
    /// Deployment environment reported on spans.
    pub environment: String,
    pub log: LogConfig,
    pub server: NetworkConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: "example-service".to_string(),
            environment: "development".to_string(),
            log: LogConfig::default(),
            server: NetworkConfig::default(),
            telemetry: TelemetryConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parses configuration from YAML text. Blank input yields defaults.
    ///
    /// # Errors
    ///
    /// Returns the YAML error when the document does not match the schema.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Loads configuration from `path`, or from the first existing file in
    /// [`DEFAULT_CONFIG_PATHS`]. With no explicit path and no file found,
    /// defaults are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicit file is missing or any file
    /// found cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match DEFAULT_CONFIG_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.is_file())
            {
                Some(found) => found,
                None => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Applies command-line overrides on top of file values.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if let Some(engine) = overrides.database_engine {
            self.database.engine = engine;
        }
        if let Some(exporter) = overrides.tracing_exporter {
            self.telemetry.tracing.exporter = exporter;
        }
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub database_engine: Option<String>,
    pub tracing_exporter: Option<String>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive seeding `EnvFilter` (`RUST_LOG` wins when set).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "debug".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub tracing: TracingConfig,
}

/// Span exporter and processor selection. Names are resolved once at
/// startup by the tracer lifecycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// One of `otlp_grpc`, `otlp_http`, `zipkin`, `stdout`.
    pub exporter: String,
    /// One of `batch`, `simple`.
    pub processor: String,
    pub otlp_grpc: OtlpGrpcConfig,
    pub otlp_http: OtlpHttpConfig,
    pub zipkin: ZipkinConfig,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            exporter: "otlp_http".to_string(),
            processor: "batch".to_string(),
            otlp_grpc: OtlpGrpcConfig::default(),
            otlp_http: OtlpHttpConfig::default(),
            zipkin: ZipkinConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ToggleConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtlpGrpcConfig {
    /// `host:port` of the collector; the scheme follows `tls.enabled`.
    pub endpoint: String,
    pub tls: ToggleConfig,
}

impl Default for OtlpGrpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:30080".to_string(),
            tls: ToggleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtlpHttpConfig {
    pub endpoint: String,
    pub url_path: String,
    pub tls: ToggleConfig,
}

impl Default for OtlpHttpConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:4318".to_string(),
            url_path: "/v1/traces".to_string(),
            tls: ToggleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZipkinConfig {
    pub endpoint: String,
}

impl Default for ZipkinConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9411/api/v2/spans".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// One of `sqlite`, `mysql-simple`, `mysql-split` (case-insensitive).
    pub engine: String,
    pub sqlite: SqliteConfig,
    pub mysql: MysqlConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "mysql-simple".to_string(),
            sqlite: SqliteConfig::default(),
            mysql: MysqlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SqliteConfig {
    /// `in-memory`/`memory` or `file`.
    pub storage: String,
    pub file: SqliteFileConfig,
    pub enable_foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            storage: "in-memory".to_string(),
            file: SqliteFileConfig::default(),
            enable_foreign_keys: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteFileConfig {
    pub path: PathBuf,
}

impl Default for SqliteFileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("application.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub simple: MysqlSimpleConfig,
    pub split: MysqlSplitConfig,
}

/// Where and as whom to connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MysqlEndpoint {
    /// `tcp` or `unix`.
    pub network_type: String,
    /// Host name, or the socket path for `unix`.
    pub hostname: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
}

impl Default for MysqlEndpoint {
    fn default() -> Self {
        Self {
            network_type: "tcp".to_string(),
            hostname: "localhost".to_string(),
            port: 3306,
            username: String::new(),
            password: String::new(),
            database_name: "database".to_string(),
        }
    }
}

/// Session options shared by every connection of a topology.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MysqlSessionConfig {
    pub collation: String,
    /// Timezone name: empty/`UTC`, `Local`, `±HH:MM` or an IANA zone.
    pub location: String,
    /// Ampersand-separated `key=value` pairs.
    pub params: String,
    pub timeouts: MysqlTimeouts,
    pub tls: MysqlTlsConfig,
}

impl Default for MysqlSessionConfig {
    fn default() -> Self {
        Self {
            collation: "utf8mb4_general_ci".to_string(),
            location: "UTC".to_string(),
            params: "parseTime=true".to_string(),
            timeouts: MysqlTimeouts::default(),
            tls: MysqlTlsConfig::default(),
        }
    }
}

/// Raw Go-style duration strings; each falls back independently when
/// unparsable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MysqlTimeouts {
    pub dial: String,
    pub read: String,
    pub write: String,
}

impl Default for MysqlTimeouts {
    fn default() -> Self {
        Self {
            dial: "2s".to_string(),
            read: "2s".to_string(),
            write: "2s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MysqlTlsConfig {
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MysqlSimpleConfig {
    #[serde(flatten)]
    pub endpoint: MysqlEndpoint,
    #[serde(flatten)]
    pub session: MysqlSessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MysqlSplitConfig {
    pub master: MysqlEndpoint,
    /// Accepts a list under `replicas` or a single entry under `replica`.
    #[serde(alias = "replica", deserialize_with = "one_or_many")]
    pub replicas: Vec<MysqlEndpoint>,
    #[serde(flatten)]
    pub session: MysqlSessionConfig,
    /// Replica selection policy; only `random` exists.
    pub policy: String,
}

impl Default for MysqlSplitConfig {
    fn default() -> Self {
        Self {
            master: MysqlEndpoint::default(),
            replicas: vec![MysqlEndpoint::default()],
            session: MysqlSessionConfig::default(),
            policy: "random".to_string(),
        }
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<MysqlEndpoint>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<MysqlEndpoint>),
        One(MysqlEndpoint),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(endpoints) => endpoints,
        OneOrMany::One(endpoint) => vec![endpoint],
    })
}
