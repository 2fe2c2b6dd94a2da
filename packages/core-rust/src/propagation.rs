//! B3 multi-header codec and its [`TextMapPropagator`].
//!
//! Reads and writes `X-B3-TraceId`, `X-B3-SpanId`, `X-B3-ParentSpanId`,
//! `X-B3-Sampled` and `baggage-*` headers through the `opentelemetry`
//! [`Extractor`] / [`Injector`] carrier traits. Extraction is strict: any
//! malformed header makes the whole context absent rather than partially
//! applied.
//!
//! [`B3Propagator`] differs from the Zipkin crate's B3 propagator in three
//! places the pipeline relies on: a missing sampling flag means sampled,
//! `baggage-*` headers travel with the context, and the caller's span is
//! re-emitted as `X-B3-ParentSpanId`.

use std::sync::OnceLock;

use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use thiserror::Error;

use crate::context::TraceContext;
use crate::ids::{ParseIdError, SpanId, TraceId};

/// Header carrying the 64 or 128-bit trace ID.
pub const TRACE_ID_HEADER: &str = "x-b3-traceid";
/// Header carrying the caller's span ID.
pub const SPAN_ID_HEADER: &str = "x-b3-spanid";
/// Header carrying the caller's parent span ID.
pub const PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
/// Header carrying the sampling decision.
pub const SAMPLED_HEADER: &str = "x-b3-sampled";
/// Prefix shared by all baggage headers.
pub const BAGGAGE_PREFIX: &str = "baggage-";

static B3_FIELDS: OnceLock<[String; 4]> = OnceLock::new();

/// Reasons an inbound B3 header set is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum B3Error {
    /// Only one of trace ID and span ID was supplied.
    #[error("trace id and span id must be supplied together")]
    Incomplete,
    /// `X-B3-TraceId` is not 16 or 32 hex digits, or is zero.
    #[error("invalid trace id: {0}")]
    TraceId(#[source] ParseIdError),
    /// `X-B3-SpanId` is not 16 hex digits, or is zero.
    #[error("invalid span id: {0}")]
    SpanId(#[source] ParseIdError),
    /// `X-B3-ParentSpanId` is present but not a valid span ID.
    #[error("invalid parent span id: {0}")]
    ParentSpanId(#[source] ParseIdError),
    /// `X-B3-Sampled` is not one of `1`, `0`, `true`, `false`, `d`.
    #[error("invalid sampling flag: {0:?}")]
    Sampled(String),
}

fn parse_sampled(raw: &str) -> Result<bool, B3Error> {
    match raw {
        "1" | "d" => Ok(true),
        "0" => Ok(false),
        _ if raw.eq_ignore_ascii_case("true") => Ok(true),
        _ if raw.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(B3Error::Sampled(raw.to_string())),
    }
}

/// Extracts a trace context, distinguishing "no B3 headers" (`Ok(None)`)
/// from "malformed B3 headers" (`Err`).
///
/// A missing sampling flag means sampled.
///
/// # Errors
///
/// Returns [`B3Error`] describing the first header that failed validation.
pub fn try_extract<E: Extractor + ?Sized>(carrier: &E) -> Result<Option<TraceContext>, B3Error> {
    let trace = carrier.get(TRACE_ID_HEADER).map(str::trim);
    let span = carrier.get(SPAN_ID_HEADER).map(str::trim);

    let (trace, span) = match (trace, span) {
        (None, None) => return Ok(None),
        (Some(trace), Some(span)) => (trace, span),
        _ => return Err(B3Error::Incomplete),
    };

    let trace_id = TraceId::parse_hex(trace).map_err(B3Error::TraceId)?;
    let span_id = SpanId::parse_hex(span).map_err(B3Error::SpanId)?;

    let parent_span_id = carrier
        .get(PARENT_SPAN_ID_HEADER)
        .map(|raw| SpanId::parse_hex(raw.trim()).map_err(B3Error::ParentSpanId))
        .transpose()?;

    let sampled = carrier
        .get(SAMPLED_HEADER)
        .map(|raw| parse_sampled(raw.trim()))
        .transpose()?
        .unwrap_or(true);

    let baggage = carrier
        .keys()
        .into_iter()
        .filter(|name| {
            name.len() > BAGGAGE_PREFIX.len()
                && name
                    .get(..BAGGAGE_PREFIX.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BAGGAGE_PREFIX))
        })
        .filter_map(|name| {
            carrier
                .get(name)
                .map(|value| (name.to_ascii_lowercase(), value.to_string()))
        })
        .collect();

    Ok(Some(TraceContext {
        trace_id,
        span_id,
        parent_span_id,
        sampled,
        baggage,
    }))
}

/// Extracts a trace context, treating malformed headers as absent.
#[must_use]
pub fn extract<E: Extractor + ?Sized>(carrier: &E) -> Option<TraceContext> {
    match try_extract(carrier) {
        Ok(context) => context,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed B3 headers");
            None
        }
    }
}

/// Writes `context` into `carrier` as B3 multi-headers plus baggage.
pub fn inject<I: Injector + ?Sized>(context: &TraceContext, carrier: &mut I) {
    carrier.set(TRACE_ID_HEADER, context.trace_id.to_string());
    carrier.set(SPAN_ID_HEADER, context.span_id.to_string());
    if let Some(parent) = context.parent_span_id {
        carrier.set(PARENT_SPAN_ID_HEADER, parent.to_string());
    }
    carrier.set(
        SAMPLED_HEADER,
        if context.sampled { "1" } else { "0" }.to_string(),
    );
    for (name, value) in &context.baggage {
        carrier.set(name, value.clone());
    }
}

// ---------------------------------------------------------------------------
// B3Propagator
// ---------------------------------------------------------------------------

/// [`TextMapPropagator`] speaking B3 multi-header plus `baggage-*`.
///
/// Extraction stores the remote span context and the full
/// [`TraceContext`] in the returned [`Context`]. Injection writes the
/// [`TraceContext`] value when the context carries one, and otherwise
/// derives the headers from the active span.
#[derive(Debug, Clone, Copy, Default)]
pub struct B3Propagator;

impl B3Propagator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TextMapPropagator for B3Propagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        if let Some(trace) = cx.get::<TraceContext>() {
            inject(trace, injector);
        } else if let Some(trace) = TraceContext::from_span_context(cx.span().span_context()) {
            inject(&trace, injector);
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        match extract(extractor) {
            Some(trace) => cx
                .with_remote_span_context(trace.remote_span_context())
                .with_value(trace),
            None => cx.clone(),
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(B3_FIELDS.get_or_init(|| {
            [
                TRACE_ID_HEADER,
                SPAN_ID_HEADER,
                PARENT_SPAN_ID_HEADER,
                SAMPLED_HEADER,
            ]
            .map(String::from)
        }))
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{SpanContext, TraceFlags, TraceState};
    use proptest::prelude::*;

    use super::*;

    /// Ordered header list with case-insensitive lookup.
    #[derive(Debug, Default)]
    struct Carrier(Vec<(String, String)>);

    impl Extractor for Carrier {
        fn get(&self, key: &str) -> Option<&str> {
            self.0
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value.as_str())
        }

        fn keys(&self) -> Vec<&str> {
            self.0.iter().map(|(name, _)| name.as_str()).collect()
        }
    }

    impl Injector for Carrier {
        fn set(&mut self, key: &str, value: String) {
            match self.0.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(key)) {
                Some(entry) => entry.1 = value,
                None => self.0.push((key.to_string(), value)),
            }
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Carrier {
        Carrier(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    fn extract_via_propagator(carrier: &Carrier) -> Option<TraceContext> {
        B3Propagator::new()
            .extract_with_context(&Context::new(), carrier)
            .get::<TraceContext>()
            .cloned()
    }

    fn inject_via_propagator(trace: &TraceContext) -> Carrier {
        let mut carrier = Carrier::default();
        B3Propagator::new().inject_context(&Context::new().with_value(trace.clone()), &mut carrier);
        carrier
    }

    #[test]
    fn no_headers_means_no_context() {
        assert_eq!(try_extract(&Carrier::default()), Ok(None));
        let cx = B3Propagator::new().extract(&Carrier::default());
        assert!(cx.get::<TraceContext>().is_none());
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn extracts_full_context() {
        let carrier = headers(&[
            ("X-B3-TraceId", "463ac35c9f6413ad48485a3953bb6124"),
            ("X-B3-SpanId", "a2fb4a1d1a96d312"),
            ("X-B3-ParentSpanId", "0020000000000001"),
            ("X-B3-Sampled", "0"),
        ]);
        let ctx = extract_via_propagator(&carrier).unwrap();
        assert_eq!(ctx.trace_id.to_string(), "463ac35c9f6413ad48485a3953bb6124");
        assert_eq!(ctx.span_id.to_string(), "a2fb4a1d1a96d312");
        assert_eq!(
            ctx.parent_span_id.map(|p| p.to_string()).as_deref(),
            Some("0020000000000001")
        );
        assert!(!ctx.sampled);
    }

    #[test]
    fn extraction_sets_the_remote_parent() {
        let carrier = headers(&[
            ("x-b3-traceid", "463ac35c9f6413ad48485a3953bb6124"),
            ("x-b3-spanid", "a2fb4a1d1a96d312"),
        ]);
        let cx = B3Propagator::new().extract(&carrier);
        let span = cx.span();
        let remote = span.span_context();
        assert!(remote.is_remote());
        assert!(remote.is_sampled());
        assert_eq!(remote.trace_id().to_string(), "463ac35c9f6413ad48485a3953bb6124");
        assert_eq!(remote.span_id().to_string(), "a2fb4a1d1a96d312");
    }

    #[test]
    fn missing_sampled_means_sampled() {
        let carrier = headers(&[
            ("x-b3-traceid", "48485a3953bb6124"),
            ("x-b3-spanid", "a2fb4a1d1a96d312"),
        ]);
        let ctx = extract_via_propagator(&carrier).unwrap();
        assert!(ctx.sampled);
        assert_eq!(ctx.trace_id.to_string(), "000000000000000048485a3953bb6124");
    }

    #[test]
    fn debug_flag_means_sampled() {
        let carrier = headers(&[
            ("x-b3-traceid", "48485a3953bb6124"),
            ("x-b3-spanid", "a2fb4a1d1a96d312"),
            ("x-b3-sampled", "d"),
        ]);
        assert!(extract_via_propagator(&carrier).unwrap().sampled);
    }

    fn rejected(pairs: &[(&str, &str)]) -> B3Error {
        let carrier = headers(pairs);
        assert!(extract_via_propagator(&carrier).is_none());
        try_extract(&carrier).unwrap_err()
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            rejected(&[("x-b3-traceid", "48485a3953bb6124")]),
            B3Error::Incomplete
        );
        assert!(matches!(
            rejected(&[("x-b3-traceid", "xyz"), ("x-b3-spanid", "a2fb4a1d1a96d312")]),
            B3Error::TraceId(_)
        ));
        assert_eq!(
            rejected(&[
                ("x-b3-traceid", "48485a3953bb6124"),
                ("x-b3-spanid", "0000000000000000"),
            ]),
            B3Error::SpanId(ParseIdError::Zero)
        );
        assert!(matches!(
            rejected(&[
                ("x-b3-traceid", "48485a3953bb6124"),
                ("x-b3-spanid", "a2fb4a1d1a96d312"),
                ("x-b3-parentspanid", "12"),
            ]),
            B3Error::ParentSpanId(_)
        ));
        assert!(matches!(
            rejected(&[
                ("x-b3-traceid", "48485a3953bb6124"),
                ("x-b3-spanid", "a2fb4a1d1a96d312"),
                ("x-b3-sampled", "yes"),
            ]),
            B3Error::Sampled(_)
        ));
    }

    #[test]
    fn baggage_is_collected_in_carrier_order() {
        let carrier = headers(&[
            ("x-b3-traceid", "48485a3953bb6124"),
            ("x-b3-spanid", "a2fb4a1d1a96d312"),
            ("Baggage-B", "2"),
            ("baggage-a", "1"),
            ("baggage-", "ignored"),
            ("other", "x"),
        ]);
        let ctx = extract_via_propagator(&carrier).unwrap();
        assert_eq!(
            ctx.baggage,
            vec![
                ("baggage-b".to_string(), "2".to_string()),
                ("baggage-a".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn inject_writes_every_header() {
        let mut parent = TraceContext::new_root(true);
        parent
            .baggage
            .push(("baggage-user".to_string(), "42".to_string()));
        let child = parent.child(SpanId::random());

        let carrier = inject_via_propagator(&child);

        let trace_id = child.trace_id.to_string();
        let parent_id = parent.span_id.to_string();
        assert_eq!(carrier.get(TRACE_ID_HEADER), Some(trace_id.as_str()));
        assert_eq!(carrier.get(PARENT_SPAN_ID_HEADER), Some(parent_id.as_str()));
        assert_eq!(carrier.get(SAMPLED_HEADER), Some("1"));
        assert_eq!(carrier.get("baggage-user"), Some("42"));
        assert_eq!(extract_via_propagator(&carrier), Some(child));
    }

    #[test]
    fn inject_falls_back_to_the_active_span() {
        let span = SpanContext::new(
            opentelemetry::trace::TraceId::from_hex("463ac35c9f6413ad48485a3953bb6124").unwrap(),
            opentelemetry::trace::SpanId::from_hex("a2fb4a1d1a96d312").unwrap(),
            TraceFlags::NOT_SAMPLED,
            false,
            TraceState::default(),
        );
        let mut carrier = Carrier::default();
        B3Propagator::new()
            .inject_context(&Context::new().with_remote_span_context(span), &mut carrier);
        assert_eq!(
            carrier.get(TRACE_ID_HEADER),
            Some("463ac35c9f6413ad48485a3953bb6124")
        );
        assert_eq!(carrier.get(SPAN_ID_HEADER), Some("a2fb4a1d1a96d312"));
        assert_eq!(carrier.get(SAMPLED_HEADER), Some("0"));
        assert!(carrier.get(PARENT_SPAN_ID_HEADER).is_none());

        let mut empty = Carrier::default();
        B3Propagator::new().inject_context(&Context::new(), &mut empty);
        assert!(empty.0.is_empty());
    }

    #[test]
    fn fields_name_the_b3_headers() {
        let propagator = B3Propagator::new();
        let fields: Vec<&str> = propagator.fields().collect();
        assert_eq!(
            fields,
            vec![TRACE_ID_HEADER, SPAN_ID_HEADER, PARENT_SPAN_ID_HEADER, SAMPLED_HEADER]
        );
    }

    proptest! {
        #[test]
        fn arbitrary_header_values_never_panic(
            trace in ".{0,40}",
            span in ".{0,20}",
            parent in proptest::option::of(".{0,20}"),
            sampled in proptest::option::of(".{0,6}"),
        ) {
            let mut carrier = headers(&[("x-b3-traceid", trace.as_str()), ("x-b3-spanid", span.as_str())]);
            if let Some(parent) = parent {
                carrier.set(PARENT_SPAN_ID_HEADER, parent);
            }
            if let Some(sampled) = sampled {
                carrier.set(SAMPLED_HEADER, sampled);
            }
            if let Some(ctx) = extract_via_propagator(&carrier) {
                prop_assert_ne!(ctx.trace_id.to_u128(), 0);
                prop_assert_ne!(ctx.span_id.to_u64(), 0);
            }
        }

        #[test]
        fn injected_contexts_extract_unchanged(
            trace in 1u128..,
            span in 1u64..,
            sampled in any::<bool>(),
        ) {
            let ctx = TraceContext {
                trace_id: TraceId::from_u128(trace).unwrap(),
                span_id: SpanId::from_u64(span).unwrap(),
                parent_span_id: None,
                sampled,
                baggage: Vec::new(),
            };
            let carrier = inject_via_propagator(&ctx);
            prop_assert_eq!(extract_via_propagator(&carrier), Some(ctx));
        }
    }
}
