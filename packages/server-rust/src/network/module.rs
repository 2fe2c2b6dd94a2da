//! HTTP server with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` stores configuration,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Binding early lets startup fail fast on a busy port before
//! storage and telemetry are wired into the router.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context as _;
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tracing::info;

use super::config::{NetworkConfig, TlsConfig};
use super::context::ConnectionScheme;

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- stores configuration, binds nothing
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until the shutdown future resolves
pub struct HttpServer {
    config: NetworkConfig,
    listener: Option<TcpListener>,
}

impl HttpServer {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves `router` until `shutdown` resolves, then waits for in-flight
    /// requests to finish.
    ///
    /// Handlers see the peer address through `ConnectInfo<SocketAddr>` and
    /// the listener scheme through [`ConnectionScheme`].
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, if the TLS
    /// material cannot be loaded, or on a fatal I/O error.
    pub async fn serve(
        self,
        router: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .context("start() must be called before serve()")?;

        match self.config.tls {
            Some(ref tls) => serve_tls(listener, router, tls, shutdown).await,
            None => serve_plain(listener, router, shutdown).await,
        }
    }
}

/// Serves plain HTTP connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    let app = router.layer(Extension(ConnectionScheme::Http));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    let app = router.layer(Extension(ConnectionScheme::Https));
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("HTTPS server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::network::shutdown::ShutdownController;

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..NetworkConfig::default()
        }
    }

    async fn get_raw(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serve_before_start_is_an_error() {
        let server = HttpServer::new(local_config());
        let err = server
            .serve(Router::new(), std::future::ready(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn start_reports_ephemeral_port() {
        let mut server = HttpServer::new(local_config());
        let port = server.start().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn serves_until_shutdown_with_peer_and_scheme() {
        let router = Router::new().route(
            "/whoami",
            get(
                |ConnectInfo(peer): ConnectInfo<SocketAddr>,
                 Extension(scheme): Extension<ConnectionScheme>| async move {
                    format!("{} {}", scheme.as_str(), peer.ip())
                },
            ),
        );

        let mut server = HttpServer::new(local_config());
        let port = server.start().await.unwrap();
        let controller = Arc::new(ShutdownController::new());
        let task = tokio::spawn(server.serve(router, controller.wait()));

        let response = get_raw(port, "/whoami").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("http 127.0.0.1"), "{response}");

        controller.trigger();
        task.await.unwrap().unwrap();
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
