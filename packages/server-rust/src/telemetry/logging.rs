//! Process-wide log subscriber.
//!
//! `RUST_LOG` takes precedence over `log.level`. An unparsable level falls
//! back to `info`, and the fallback is reported once the subscriber is up.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::error::TelemetryError;
use crate::config::{LogConfig, LogFormat};

const FALLBACK_LEVEL: &str = "info";

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::Logging`] if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    let (filter, rejected) = build_filter(&config.level);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };
    installed.map_err(|err| TelemetryError::Logging(err.to_string()))?;

    if let Some(level) = rejected {
        tracing::warn!(level = %level, fallback = FALLBACK_LEVEL, "unparsable log level");
    }
    Ok(())
}

/// Builds the filter, returning the configured level as well when it had
/// to be replaced by the fallback.
fn build_filter(level: &str) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(level.trim().to_ascii_lowercase()) {
        Ok(filter) if !level.trim().is_empty() => (filter, None),
        _ => (EnvFilter::new(FALLBACK_LEVEL), Some(level.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // An exported `RUST_LOG` replaces the configured level entirely.
    fn env_overrides() -> bool {
        std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
    }

    #[test]
    fn valid_levels_are_kept() {
        if env_overrides() {
            return;
        }
        for level in ["debug", "WARN", "keystone_server=trace,info"] {
            let (_, rejected) = build_filter(level);
            assert!(rejected.is_none(), "{level} rejected");
        }
    }

    #[test]
    fn invalid_level_falls_back() {
        if env_overrides() {
            return;
        }
        let (filter, rejected) = build_filter("app=loud");
        assert_eq!(rejected.as_deref(), Some("app=loud"));
        assert_eq!(filter.to_string(), "info");

        let (_, rejected) = build_filter("  ");
        assert!(rejected.is_some());
    }
}
