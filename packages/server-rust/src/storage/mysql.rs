//! MySQL connection descriptors.
//!
//! A [`MysqlDescriptor`] is built once per pool from the endpoint and the
//! session settings shared by the topology. It resolves every lenient
//! setting up front (params, timezone, timeouts, TLS) so connecting is a
//! pure function of the descriptor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{Offset, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};

use super::error::{Access, ConnectionError};
use crate::config::duration::{format_duration, parse_or};
use crate::config::{MysqlEndpoint, MysqlSessionConfig, MysqlTimeouts, MysqlTlsConfig};

/// Timeout applied when a configured value does not parse.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Directories searched for IANA zone files, in order, after `$ZONEINFO`.
const ZONEINFO_DIRS: &[&str] = &[
    "/usr/share/zoneinfo",
    "/usr/share/lib/zoneinfo",
    "/usr/lib/locale/TZ",
];

// ---------------------------------------------------------------------------
// Network type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Tcp,
    Unix,
}

const NETWORK_TYPES: &[(&str, NetworkType)] =
    &[("tcp", NetworkType::Tcp), ("unix", NetworkType::Unix)];

impl NetworkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
        }
    }
}

impl FromStr for NetworkType {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NETWORK_TYPES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ConnectionError::UnsupportedNetworkType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Splits `a=1&b=2` into pairs. The first segment that does not split into
/// exactly one key and one value ends parsing; later pairs are dropped.
#[must_use]
pub fn parse_params(raw: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for segment in raw.split('&') {
        let parts: Vec<&str> = segment.split('=').collect();
        let [key, value] = parts.as_slice() else {
            break;
        };
        params.insert((*key).to_string(), (*value).to_string());
    }
    params
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Session timezone derived from the configured location name.
///
/// MySQL only ever receives a `±HH:MM` offset: zone names depend on the
/// server's timezone tables. `Local` and named zones are pinned to the
/// offset they have when the location is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Utc,
    /// This host's zone.
    Local { offset: String },
    /// A fixed `±HH:MM` offset.
    Offset(String),
    /// An IANA zone found in the local zoneinfo database.
    Named { name: String, offset: String },
}

impl Location {
    /// Resolves a location name. Unknown names fall back to UTC.
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name == "UTC" {
            return Self::Utc;
        }
        if name == "Local" {
            return Self::Local {
                offset: format_offset(chrono::Local::now().offset().local_minus_utc()),
            };
        }
        if let Some(offset) = parse_offset(name) {
            return Self::Offset(offset);
        }
        if zone_exists(name) {
            return Self::Named {
                name: name.to_string(),
                offset: zone_offset(name),
            };
        }
        tracing::debug!(location = name, "unknown timezone, falling back to UTC");
        Self::Utc
    }

    /// Value for MySQL's `time_zone` session variable.
    #[must_use]
    pub fn session_time_zone(&self) -> &str {
        match self {
            Self::Utc => "+00:00",
            Self::Local { offset } | Self::Offset(offset) | Self::Named { offset, .. } => offset,
        }
    }

    /// Name as it appears in the rendered DSN.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Utc => "UTC",
            Self::Local { .. } => "Local",
            Self::Offset(name) | Self::Named { name, .. } => name,
        }
    }
}

fn parse_offset(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    if bytes.len() != 6 || !matches!(bytes[0], b'+' | b'-') || bytes[3] != b':' {
        return None;
    }
    let hours: u8 = value.get(1..3)?.parse().ok()?;
    let minutes: u8 = value.get(4..6)?.parse().ok()?;
    if !bytes[1..3].iter().chain(&bytes[4..6]).all(u8::is_ascii_digit) {
        return None;
    }
    (hours <= 14 && minutes < 60).then(|| value.to_string())
}

/// Renders seconds east of UTC as `±HH:MM`.
fn format_offset(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!("{sign}{:02}:{:02}", minutes / 60, minutes % 60)
}

fn zone_offset(name: &str) -> String {
    match name.parse::<chrono_tz::Tz>() {
        Ok(zone) => format_offset(Utc::now().with_timezone(&zone).offset().fix().local_minus_utc()),
        Err(_) => {
            tracing::debug!(location = name, "no offset rules for timezone, using +00:00");
            "+00:00".to_string()
        }
    }
}

fn zone_exists(name: &str) -> bool {
    if name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|segment| segment.is_empty() || segment == "..")
    {
        return false;
    }
    let from_env = std::env::var_os("ZONEINFO").map(PathBuf::from);
    from_env
        .into_iter()
        .chain(ZONEINFO_DIRS.iter().map(PathBuf::from))
        .any(|dir| dir.join(name).is_file())
}

// ---------------------------------------------------------------------------
// Timeouts and TLS
// ---------------------------------------------------------------------------

/// Resolved dial/read/write timeouts. Zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub dial: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            dial: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
            write: DEFAULT_TIMEOUT,
        }
    }
}

impl OperationTimeouts {
    /// Parses each value independently, falling back to [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub fn from_config(raw: &MysqlTimeouts) -> Self {
        Self {
            dial: parse_or(&raw.dial, DEFAULT_TIMEOUT),
            read: parse_or(&raw.read, DEFAULT_TIMEOUT),
            write: parse_or(&raw.write, DEFAULT_TIMEOUT),
        }
    }

    /// Limit for a read or write call, if any.
    #[must_use]
    pub fn limit(&self, access: Access) -> Option<Duration> {
        let value = match access {
            Access::Read => self.read,
            Access::Write => self.write,
        };
        (!value.is_zero()).then_some(value)
    }
}

/// Transport security for a MySQL connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MysqlTls {
    Disabled,
    /// Verify the server certificate and host name, against `ca_file` when
    /// given or the bundled roots otherwise.
    Verify { ca_file: Option<PathBuf> },
}

impl MysqlTls {
    /// Resolves the TLS section. An unreadable CA file is a warning and the
    /// connection proceeds in plaintext.
    #[must_use]
    pub fn from_config(config: &MysqlTlsConfig) -> Self {
        if !config.enabled {
            return Self::Disabled;
        }
        match &config.ca_file {
            None => Self::Verify { ca_file: None },
            Some(path) => match std::fs::read(path) {
                Ok(_) => Self::Verify {
                    ca_file: Some(path.clone()),
                },
                Err(err) => {
                    tracing::warn!(
                        ca_file = %path.display(),
                        error = %err,
                        "couldn't load TLS CA for database connection, continuing without tls"
                    );
                    Self::Disabled
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Everything needed to open one MySQL pool.
#[derive(Clone)]
pub struct MysqlDescriptor {
    pub network: NetworkType,
    /// Host name, or socket path for [`NetworkType::Unix`].
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub collation: String,
    pub location: Location,
    pub params: BTreeMap<String, String>,
    pub timeouts: OperationTimeouts,
    pub tls: MysqlTls,
}

impl fmt::Debug for MysqlDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlDescriptor")
            .field("dsn", &self.dsn())
            .finish_non_exhaustive()
    }
}

impl MysqlDescriptor {
    /// Builds a descriptor from an endpoint and the topology's session
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnsupportedNetworkType`] for anything but
    /// `tcp` or `unix`.
    pub fn from_config(
        endpoint: &MysqlEndpoint,
        session: &MysqlSessionConfig,
    ) -> Result<Self, ConnectionError> {
        Ok(Self {
            network: endpoint.network_type.parse()?,
            host: endpoint.hostname.clone(),
            port: endpoint.port,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            database: endpoint.database_name.clone(),
            collation: session.collation.clone(),
            location: Location::resolve(&session.location),
            params: parse_params(&session.params),
            timeouts: OperationTimeouts::from_config(&session.timeouts),
            tls: MysqlTls::from_config(&session.tls),
        })
    }

    fn address(&self) -> String {
        match self.network {
            NetworkType::Unix => self.host.clone(),
            NetworkType::Tcp if self.host.contains(':') => format!("[{}]:{}", self.host, self.port),
            NetworkType::Tcp => format!("{}:{}", self.host, self.port),
        }
    }

    /// Go-driver style DSN with the password redacted, for logs.
    #[must_use]
    pub fn dsn(&self) -> String {
        let mut query: BTreeMap<&str, String> = self
            .params
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        if !self.collation.is_empty() {
            query.insert("collation", self.collation.clone());
        }
        query.insert("loc", self.location.name().to_string());
        query.insert("timeout", format_duration(self.timeouts.dial));
        query.insert("readTimeout", format_duration(self.timeouts.read));
        query.insert("writeTimeout", format_duration(self.timeouts.write));
        if matches!(self.tls, MysqlTls::Verify { .. }) {
            query.insert("tls", "custom".to_string());
        }

        let query = query
            .iter()
            .map(|(key, value)| format!("{key}={}", escape_query(value)))
            .collect::<Vec<_>>()
            .join("&");
        let credentials = match (self.username.is_empty(), self.password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{}@", self.username),
            (false, false) => format!("{}:***@", self.username),
        };

        format!(
            "{credentials}{}({})/{}?{query}",
            self.network.as_str(),
            self.address(),
            self.database
        )
    }

    fn statement_cache_capacity(&self) -> Option<usize> {
        let raw = self.params.get("statement-cache-capacity")?;
        match raw.parse() {
            Ok(capacity) => Some(capacity),
            Err(_) => {
                tracing::warn!(value = %raw, "ignoring invalid statement-cache-capacity");
                None
            }
        }
    }

    /// Driver options equivalent to [`dsn`](Self::dsn).
    #[must_use]
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
            .timezone(Some(self.location.session_time_zone().to_string()));

        options = match self.network {
            NetworkType::Tcp => options.host(&self.host).port(self.port),
            NetworkType::Unix => options.socket(Path::new(&self.host)),
        };
        if !self.collation.is_empty() {
            options = options.collation(&self.collation);
        }
        if let Some(charset) = self.params.get("charset").and_then(|v| v.split(',').next()) {
            options = options.charset(charset);
        }
        if let Some(capacity) = self.statement_cache_capacity() {
            options = options.statement_cache_capacity(capacity);
        }

        match &self.tls {
            MysqlTls::Disabled => options.ssl_mode(MySqlSslMode::Disabled),
            MysqlTls::Verify { ca_file: None } => options.ssl_mode(MySqlSslMode::VerifyIdentity),
            MysqlTls::Verify { ca_file: Some(path) } => options
                .ssl_mode(MySqlSslMode::VerifyIdentity)
                .ssl_ca(path),
        }
    }

    /// Pool options; the dial timeout bounds connection acquisition.
    #[must_use]
    pub fn pool_options(&self) -> MySqlPoolOptions {
        let options = MySqlPoolOptions::new();
        if self.timeouts.dial.is_zero() {
            options
        } else {
            options.acquire_timeout(self.timeouts.dial)
        }
    }
}

fn escape_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
