//! `keystone-server` entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use keystone_server::network::middleware::TracingAccessLog;
use keystone_server::network::shutdown_signal;
use keystone_server::telemetry::init_logging;
use keystone_server::{App, AppConfig, ConfigOverrides};

/// HTTP service scaffold with tracing, access logging and SQL storage.
#[derive(Parser, Debug)]
#[command(name = "keystone-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Log filter directive (e.g. `info`, `keystone_server=debug`)
    #[arg(long, env = "SERVER_LOG_LEVEL")]
    log_level: Option<String>,

    /// One of `sqlite`, `mysql-simple`, `mysql-split`
    #[arg(long, env = "SERVER_DATABASE_ENGINE")]
    database_engine: Option<String>,

    /// One of `otlp_grpc`, `otlp_http`, `zipkin`, `stdout`
    #[arg(long, env = "SERVER_TELEMETRY_TRACING_EXPORTER")]
    tracing_exporter: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            log_level: self.log_level.clone(),
            database_engine: self.database_engine.clone(),
            tracing_exporter: self.tracing_exporter.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("keystone-server: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = config.apply_env_overrides() {
        eprintln!("keystone-server: {err}");
        return ExitCode::FAILURE;
    }
    config.apply(cli.overrides());

    if let Err(err) = init_logging(&config.log) {
        eprintln!("keystone-server: {err}");
        return ExitCode::FAILURE;
    }

    let app = match App::build(config, Arc::new(TracingAccessLog)).await {
        Ok(app) => app,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "startup failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = app.run(shutdown_signal()).await {
        tracing::error!(error = format!("{err:#}"), "server terminated with an error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
