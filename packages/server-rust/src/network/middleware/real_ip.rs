//! Client address resolution.
//!
//! Stores a [`ClientAddr`] extension taken from `True-Client-IP`, then
//! `X-Real-IP`, then the first `X-Forwarded-For` entry, and finally the
//! peer socket address. A header value is used only if it parses as an IP
//! address; otherwise the next source is tried.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use tower::{Layer, Service};

use crate::network::context::ClientAddr;
use crate::network::headers::{TRUE_CLIENT_IP, X_FORWARDED_FOR, X_REAL_IP};

/// Tower layer resolving the client address.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealIpLayer;

impl<S> Layer<S> for RealIpLayer {
    type Service = RealIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RealIpService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RealIpService<S> {
    inner: S,
}

impl<S> Service<Request> for RealIpService<S>
where
    S: Service<Request, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let resolved = forwarded_client(req.headers()).or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.to_string())
        });
        if let Some(addr) = resolved {
            req.extensions_mut().insert(ClientAddr(addr));
        }
        self.inner.call(req)
    }
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let first_forwarded = header_value(headers, &X_FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim);
    [
        header_value(headers, &TRUE_CLIENT_IP),
        header_value(headers, &X_REAL_IP),
        first_forwarded,
    ]
    .into_iter()
    .flatten()
    .find_map(|candidate| IpAddr::from_str(candidate).ok())
    .map(|ip| ip.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::{service_fn, ServiceExt};

    use super::*;

    async fn echo(req: Request) -> Result<Response, Infallible> {
        let addr = req
            .extensions()
            .get::<ClientAddr>()
            .map(|addr| addr.0.clone())
            .unwrap_or_default();
        Ok(Response::new(Body::from(addr)))
    }

    async fn resolve(headers: &[(&str, &str)], peer: Option<SocketAddr>) -> String {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(peer) = peer {
            builder = builder.extension(ConnectInfo(peer));
        }
        let response = RealIpLayer
            .layer(service_fn(echo))
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn header_precedence() {
        let all = [
            ("true-client-ip", "1.1.1.1"),
            ("x-real-ip", "2.2.2.2"),
            ("x-forwarded-for", "3.3.3.3, 10.0.0.1"),
        ];
        assert_eq!(resolve(&all, None).await, "1.1.1.1");
        assert_eq!(resolve(&all[1..], None).await, "2.2.2.2");
        assert_eq!(resolve(&all[2..], None).await, "3.3.3.3");
    }

    #[tokio::test]
    async fn falls_back_to_peer_address() {
        let peer = SocketAddr::from(([192, 0, 2, 1], 5555));
        assert_eq!(resolve(&[], Some(peer)).await, "192.0.2.1:5555");
        assert_eq!(resolve(&[("x-real-ip", " ")], Some(peer)).await, "192.0.2.1:5555");
    }

    #[tokio::test]
    async fn values_that_are_not_addresses_are_skipped() {
        assert_eq!(
            resolve(
                &[
                    ("true-client-ip", "<script>"),
                    ("x-real-ip", "2.2.2.2"),
                ],
                None
            )
            .await,
            "2.2.2.2"
        );
        assert_eq!(
            resolve(
                &[
                    ("x-real-ip", "unknown"),
                    ("x-forwarded-for", "2001:db8::1, 10.0.0.1"),
                ],
                None
            )
            .await,
            "2001:db8::1"
        );

        let peer = SocketAddr::from(([192, 0, 2, 1], 5555));
        assert_eq!(
            resolve(&[("x-forwarded-for", "evil.example, 3.3.3.3")], Some(peer)).await,
            "192.0.2.1:5555"
        );
        assert_eq!(
            resolve(&[("true-client-ip", "1.1.1.1:80")], None).await,
            ""
        );
    }

    #[tokio::test]
    async fn nothing_known_leaves_extension_unset() {
        assert_eq!(resolve(&[], None).await, "");
    }
}
