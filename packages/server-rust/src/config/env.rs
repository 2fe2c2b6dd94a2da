//! Environment overlay for [`AppConfig`].
//!
//! A variable named `<PREFIX>_<PATH>` overrides the configuration key at
//! `<PATH>`, where the path is the key's YAML path with dots written as
//! underscores: `SERVER_DATABASE_MYSQL_SIMPLE_PASSWORD` sets
//! `database.mysql.simple.password`. Matching ignores case and underscores,
//! so camelCase keys accept either spelling (`..._DATABASE_NAME` and
//! `..._DATABASENAME` both set `databaseName`). Replicas of the split
//! topology are addressed by index (`..._SPLIT_REPLICAS_0_HOSTNAME`);
//! `..._SPLIT_REPLICA_<FIELD>` targets the first one. Unknown names are
//! ignored.

use std::path::PathBuf;

use super::duration::parse_duration;
use super::{AppConfig, ConfigError, LogFormat, MysqlEndpoint, MysqlSessionConfig, TlsConfig};

/// Prefix of the variables read by [`AppConfig::apply_env_overrides`].
pub const ENV_PREFIX: &str = "SERVER";

type Setter<T> = fn(&mut T, &str) -> Result<(), String>;

const ROOT_KEYS: &[(&str, Setter<AppConfig>)] = &[
    ("service", |c, v| {
        c.service = v.to_string();
        Ok(())
    }),
    ("environment", |c, v| {
        c.environment = v.to_string();
        Ok(())
    }),
    ("log.format", |c, v| {
        c.log.format = match v.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            _ => return Err("expected 'json' or 'text'".to_string()),
        };
        Ok(())
    }),
    ("log.level", |c, v| {
        c.log.level = v.to_string();
        Ok(())
    }),
    ("server.host", |c, v| {
        c.server.host = v.to_string();
        Ok(())
    }),
    ("server.port", |c, v| {
        c.server.port = parse_port(v)?;
        Ok(())
    }),
    ("server.corsOrigins", |c, v| {
        c.server.cors_origins = v
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
        Ok(())
    }),
    ("server.requestTimeout", |c, v| {
        c.server.request_timeout = parse_duration(v.trim()).map_err(|err| err.to_string())?;
        Ok(())
    }),
    ("server.heartbeatPath", |c, v| {
        c.server.heartbeat_path = v.to_string();
        Ok(())
    }),
    ("server.tls.certPath", |c, v| {
        server_tls(c).cert_path = PathBuf::from(v);
        Ok(())
    }),
    ("server.tls.keyPath", |c, v| {
        server_tls(c).key_path = PathBuf::from(v);
        Ok(())
    }),
    ("telemetry.tracing.exporter", |c, v| {
        c.telemetry.tracing.exporter = v.to_string();
        Ok(())
    }),
    ("telemetry.tracing.processor", |c, v| {
        c.telemetry.tracing.processor = v.to_string();
        Ok(())
    }),
    ("telemetry.tracing.otlp_grpc.endpoint", |c, v| {
        c.telemetry.tracing.otlp_grpc.endpoint = v.to_string();
        Ok(())
    }),
    ("telemetry.tracing.otlp_grpc.tls.enabled", |c, v| {
        c.telemetry.tracing.otlp_grpc.tls.enabled = parse_bool(v)?;
        Ok(())
    }),
    ("telemetry.tracing.otlp_http.endpoint", |c, v| {
        c.telemetry.tracing.otlp_http.endpoint = v.to_string();
        Ok(())
    }),
    ("telemetry.tracing.otlp_http.url_path", |c, v| {
        c.telemetry.tracing.otlp_http.url_path = v.to_string();
        Ok(())
    }),
    ("telemetry.tracing.otlp_http.tls.enabled", |c, v| {
        c.telemetry.tracing.otlp_http.tls.enabled = parse_bool(v)?;
        Ok(())
    }),
    ("telemetry.tracing.zipkin.endpoint", |c, v| {
        c.telemetry.tracing.zipkin.endpoint = v.to_string();
        Ok(())
    }),
    ("database.engine", |c, v| {
        c.database.engine = v.to_string();
        Ok(())
    }),
    ("database.sqlite.storage", |c, v| {
        c.database.sqlite.storage = v.to_string();
        Ok(())
    }),
    ("database.sqlite.file.path", |c, v| {
        c.database.sqlite.file.path = PathBuf::from(v);
        Ok(())
    }),
    ("database.sqlite.enableForeignKeys", |c, v| {
        c.database.sqlite.enable_foreign_keys = parse_bool(v)?;
        Ok(())
    }),
    ("database.mysql.split.policy", |c, v| {
        c.database.mysql.split.policy = v.to_string();
        Ok(())
    }),
];

const ENDPOINT_KEYS: &[(&str, Setter<MysqlEndpoint>)] = &[
    ("networkType", |e, v| {
        e.network_type = v.to_string();
        Ok(())
    }),
    ("hostname", |e, v| {
        e.hostname = v.to_string();
        Ok(())
    }),
    ("port", |e, v| {
        e.port = parse_port(v)?;
        Ok(())
    }),
    ("username", |e, v| {
        e.username = v.to_string();
        Ok(())
    }),
    ("password", |e, v| {
        e.password = v.to_string();
        Ok(())
    }),
    ("databaseName", |e, v| {
        e.database_name = v.to_string();
        Ok(())
    }),
];

// Durations stay raw strings here; the storage layer applies its own
// fallbacks when they do not parse.
const SESSION_KEYS: &[(&str, Setter<MysqlSessionConfig>)] = &[
    ("collation", |s, v| {
        s.collation = v.to_string();
        Ok(())
    }),
    ("location", |s, v| {
        s.location = v.to_string();
        Ok(())
    }),
    ("params", |s, v| {
        s.params = v.to_string();
        Ok(())
    }),
    ("timeouts.dial", |s, v| {
        s.timeouts.dial = v.to_string();
        Ok(())
    }),
    ("timeouts.read", |s, v| {
        s.timeouts.read = v.to_string();
        Ok(())
    }),
    ("timeouts.write", |s, v| {
        s.timeouts.write = v.to_string();
        Ok(())
    }),
    ("tls.enabled", |s, v| {
        s.tls.enabled = parse_bool(v)?;
        Ok(())
    }),
    ("tls.caFile", |s, v| {
        s.tls.ca_file = (!v.is_empty()).then(|| PathBuf::from(v));
        Ok(())
    }),
];

impl AppConfig {
    /// Applies `SERVER_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for a recognised variable whose value
    /// does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_vars(ENV_PREFIX, std::env::vars())
    }

    /// Applies every `<prefix>_*` pair in `vars`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for a recognised variable whose value
    /// does not parse.
    pub fn apply_env_vars<I, K, V>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let prefix = format!("{}_", prefix.to_ascii_uppercase());
        for (name, value) in vars {
            let name = name.as_ref();
            let Some(path) = name
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(&prefix))
                .map(|_| &name[prefix.len()..])
            else {
                continue;
            };
            self.apply_env_var(&normalize(path), value.as_ref())
                .map_err(|message| ConfigError::Env {
                    key: name.to_string(),
                    message,
                })?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str) -> Result<(), String> {
        if let Some(setter) = lookup(ROOT_KEYS, key) {
            return setter(self, value);
        }

        let mysql = &mut self.database.mysql;
        if let Some(field) = key.strip_prefix("DATABASEMYSQLSIMPLE") {
            if let Some(setter) = lookup(ENDPOINT_KEYS, field) {
                return setter(&mut mysql.simple.endpoint, value);
            }
            if let Some(setter) = lookup(SESSION_KEYS, field) {
                return setter(&mut mysql.simple.session, value);
            }
        } else if let Some(split) = key.strip_prefix("DATABASEMYSQLSPLIT") {
            if let Some(field) = split.strip_prefix("MASTER") {
                if let Some(setter) = lookup(ENDPOINT_KEYS, field) {
                    return setter(&mut mysql.split.master, value);
                }
            } else if let Some((index, field)) = replica_key(split) {
                if let Some(setter) = lookup(ENDPOINT_KEYS, field) {
                    let replicas = &mut mysql.split.replicas;
                    if index > replicas.len() {
                        return Err(format!(
                            "replica {index} is out of range ({} configured)",
                            replicas.len()
                        ));
                    }
                    if index == replicas.len() {
                        replicas.push(MysqlEndpoint::default());
                    }
                    return setter(&mut replicas[index], value);
                }
            } else if let Some(setter) = lookup(SESSION_KEYS, split) {
                return setter(&mut mysql.split.session, value);
            }
        }
        Ok(())
    }
}

/// Uppercases and drops separators so `a.fooBar`, `A_FOO_BAR` and
/// `A_FOOBAR` compare equal.
fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '.')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn lookup<T>(table: &[(&str, Setter<T>)], key: &str) -> Option<Setter<T>> {
    table
        .iter()
        .find(|(path, _)| normalize(path) == key)
        .map(|(_, setter)| *setter)
}

/// Splits `REPLICAS<N><FIELD>` or `REPLICA<FIELD>` into an index and field.
fn replica_key(key: &str) -> Option<(usize, &str)> {
    if let Some(rest) = key.strip_prefix("REPLICAS") {
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let index = rest[..digits].parse().ok()?;
        return Some((index, &rest[digits..]));
    }
    key.strip_prefix("REPLICA").map(|field| (0, field))
}

fn server_tls(config: &mut AppConfig) -> &mut TlsConfig {
    config.server.tls.get_or_insert_with(|| TlsConfig {
        cert_path: PathBuf::new(),
        key_path: PathBuf::new(),
    })
}

fn parse_port(value: &str) -> Result<u16, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("expected a port number, got {value:?}"))
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("expected a boolean, got {value:?}")),
    }
}
