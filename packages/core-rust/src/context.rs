use opentelemetry::trace::{SpanContext, TraceFlags, TraceState};

use crate::ids::{SpanId, TraceId};

/// Distributed trace position of a request.
///
/// Either reconstructed from an upstream caller's B3 headers or minted
/// fresh for a new root. `baggage` holds `(header, value)` pairs in the
/// order they arrived, so re-injection reproduces the caller's headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// Trace the request belongs to.
    pub trace_id: TraceId,
    /// Span representing this hop.
    pub span_id: SpanId,
    /// Span of the caller, if any.
    pub parent_span_id: Option<SpanId>,
    /// Whether spans on this trace should be recorded.
    pub sampled: bool,
    /// Baggage headers (`baggage-*`) carried alongside the trace.
    pub baggage: Vec<(String, String)>,
}

impl TraceContext {
    /// Mints a new root context with random identifiers.
    #[must_use]
    pub fn new_root(sampled: bool) -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            sampled,
            baggage: Vec::new(),
        }
    }

    /// Returns the context for a span started beneath this one: same trace,
    /// sampling decision and baggage, with this span as the parent.
    #[must_use]
    pub fn child(&self, span_id: SpanId) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id,
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
            baggage: self.baggage.clone(),
        }
    }

    /// The caller's position as an OpenTelemetry remote span context.
    #[must_use]
    pub fn remote_span_context(&self) -> SpanContext {
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        SpanContext::new(
            opentelemetry::trace::TraceId::from_bytes(self.trace_id.to_bytes()),
            opentelemetry::trace::SpanId::from_bytes(self.span_id.to_bytes()),
            flags,
            true,
            TraceState::default(),
        )
    }

    /// Converts a valid OpenTelemetry span context. The result has no parent
    /// and no baggage.
    #[must_use]
    pub fn from_span_context(span: &SpanContext) -> Option<Self> {
        Some(Self {
            trace_id: TraceId::from_bytes(span.trace_id().to_bytes())?,
            span_id: SpanId::from_bytes(span.span_id().to_bytes())?,
            parent_span_id: None,
            sampled: span.is_sampled(),
            baggage: Vec::new(),
        })
    }

    /// Looks up a baggage value by header name (case-insensitive).
    #[must_use]
    pub fn baggage_item(&self, header: &str) -> Option<&str> {
        self.baggage
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_keeps_trace_and_links_parent() {
        let mut parent = TraceContext::new_root(true);
        parent
            .baggage
            .push(("baggage-tenant".to_string(), "acme".to_string()));

        let span = SpanId::random();
        let child = parent.child(span);

        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.span_id, span);
        assert_eq!(child.parent_span_id, Some(parent.span_id));
        assert!(child.sampled);
        assert_eq!(child.baggage_item("Baggage-Tenant"), Some("acme"));
    }

    #[test]
    fn span_context_conversion_keeps_ids_and_sampling() {
        let root = TraceContext::new_root(false);
        let span = root.remote_span_context();
        assert!(span.is_valid());
        assert!(span.is_remote());
        assert!(!span.is_sampled());

        let back = TraceContext::from_span_context(&span).unwrap();
        assert_eq!(back, root);
        assert!(TraceContext::from_span_context(&SpanContext::empty_context()).is_none());
    }

    #[test]
    fn new_root_has_no_parent() {
        let root = TraceContext::new_root(false);
        assert!(root.parent_span_id.is_none());
        assert!(!root.sampled);
        assert!(root.baggage.is_empty());
    }
}
