//! Process bootstrap: wires configuration, storage, tracing and the HTTP
//! pipeline together and tears them down in reverse order.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use tracing::info;

use crate::config::AppConfig;
use crate::network::middleware::AccessLogSink;
use crate::network::{build_pipeline, router, AppState, HttpServer};
use crate::storage::{StorageConnection, StorageProvider};
use crate::telemetry::TracerLifecycle;
use crate::traits::UserStore;

/// A fully assembled, bound but not yet serving application.
pub struct App {
    server: HttpServer,
    router: Router,
    port: u16,
    tracer: TracerLifecycle,
    users: Arc<StorageConnection>,
}

impl App {
    /// Resolves storage, creates the schema, starts the tracer provider,
    /// builds the pipeline and binds the listener.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the first startup failure: unknown engine, exporter or
    /// processor names, an unreachable database, schema creation, or a
    /// port that cannot be bound.
    pub async fn build(config: AppConfig, access_log: Arc<dyn AccessLogSink>) -> anyhow::Result<Self> {
        let provider = StorageProvider::from_config(&config.database)?;
        let tracer = TracerLifecycle::init(&config)?;

        let users = Arc::new(provider.resolve().await?);
        users
            .initialize()
            .await
            .context("failed to initialize storage schema")?;

        let state = AppState {
            users: Arc::clone(&users) as Arc<dyn UserStore>,
        };
        let router = build_pipeline(router(state), &config.server, tracer.tracer(), access_log);

        let mut server = HttpServer::new(config.server);
        let port = server.start().await?;

        info!(
            service = %config.service,
            environment = %config.environment,
            engine = %provider.engine(),
            port,
            "application assembled"
        );

        Ok(Self {
            server,
            router,
            port,
            tracer,
            users,
        })
    }

    /// Port the listener is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until `shutdown` resolves, then flushes spans and closes the
    /// storage pools.
    ///
    /// # Errors
    ///
    /// Returns the server error, after teardown has run.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let Self {
            server,
            router,
            tracer,
            users,
            ..
        } = self;

        let served = server.serve(router, shutdown).await;

        tracer.shutdown();
        users.close().await;
        info!("application stopped");
        served
    }
}
