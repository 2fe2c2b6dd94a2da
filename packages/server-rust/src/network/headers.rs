//! Header names used by the pipeline and `http::HeaderMap` carriers for
//! OpenTelemetry propagators.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};

/// Request correlation header.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
/// Client address set by CDNs such as Akamai and Cloudflare.
pub const TRUE_CLIENT_IP: HeaderName = HeaderName::from_static("true-client-ip");
/// Client address set by nginx-style proxies.
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
/// Comma-separated proxy chain, client first.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
/// Allowed in CORS requests alongside the standard headers.
pub const X_CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");

/// Read-only view of a header map for trace extraction.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Writable view of a header map for trace injection.
///
/// Request headers are overwritten so downstream hops see this service's
/// span; response headers keep whatever an inner stage already wrote.
pub struct HeaderInjector<'a> {
    headers: &'a mut HeaderMap,
    overwrite: bool,
}

impl<'a> HeaderInjector<'a> {
    /// Replaces existing values.
    pub fn overwrite(headers: &'a mut HeaderMap) -> Self {
        Self {
            headers,
            overwrite: true,
        }
    }

    /// Leaves headers that are already present untouched.
    pub fn first_write_wins(headers: &'a mut HeaderMap) -> Self {
        Self {
            headers,
            overwrite: false,
        }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) else {
            tracing::debug!(header = key, "skipping header that is not valid HTTP");
            return;
        };
        if self.overwrite || !self.headers.contains_key(&name) {
            self.headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use keystone_core::{propagation, B3Propagator, TraceContext};
    use opentelemetry::propagation::TextMapPropagator;

    use super::*;

    #[test]
    fn extractor_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-b3-traceid", HeaderValue::from_static("abc"));
        let extractor = HeaderExtractor(&headers);
        assert_eq!(extractor.get("X-B3-TraceId"), Some("abc"));
        assert_eq!(extractor.keys(), vec!["x-b3-traceid"]);
    }

    #[test]
    fn first_write_wins_keeps_existing_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            propagation::SAMPLED_HEADER,
            HeaderValue::from_static("0"),
        );
        let mut injector = HeaderInjector::first_write_wins(&mut headers);
        injector.set(propagation::SAMPLED_HEADER, "1".to_string());
        injector.set(propagation::SPAN_ID_HEADER, "a2fb4a1d1a96d312".to_string());

        assert_eq!(headers[propagation::SAMPLED_HEADER], "0");
        assert_eq!(headers[propagation::SPAN_ID_HEADER], "a2fb4a1d1a96d312");
    }

    #[test]
    fn overwrite_replaces_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            propagation::SAMPLED_HEADER,
            HeaderValue::from_static("0"),
        );
        HeaderInjector::overwrite(&mut headers).set(propagation::SAMPLED_HEADER, "1".to_string());
        assert_eq!(headers[propagation::SAMPLED_HEADER], "1");
    }

    #[test]
    fn invalid_values_are_skipped() {
        let mut headers = HeaderMap::new();
        HeaderInjector::overwrite(&mut headers).set("baggage-x", "line\nbreak".to_string());
        assert!(headers.is_empty());
    }

    #[test]
    fn propagator_round_trips_through_a_header_map() {
        let mut trace = TraceContext::new_root(true);
        trace
            .baggage
            .push(("baggage-tenant".to_string(), "acme".to_string()));
        let cx = opentelemetry::Context::new().with_value(trace.clone());

        let mut headers = HeaderMap::new();
        B3Propagator::new().inject_context(&cx, &mut HeaderInjector::overwrite(&mut headers));
        assert_eq!(headers["baggage-tenant"], "acme");

        let extracted = B3Propagator::new()
            .extract_with_context(&opentelemetry::Context::new(), &HeaderExtractor(&headers));
        assert_eq!(extracted.get::<TraceContext>(), Some(&trace));
    }
}
