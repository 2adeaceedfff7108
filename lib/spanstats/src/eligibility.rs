//! Span eligibility for stats computation.
//!
//! A span contributes to stats if it is top-level, explicitly measured, or (when enabled) carries a span kind that
//! crosses a service boundary. Partial snapshots of long-running spans never contribute, since the final version of
//! the span will be seen later.

use crate::{aggregation::TAG_SPAN_KIND, trace::Span};

/// Metric set to `1` on top-level spans.
pub const METRIC_TOP_LEVEL: &str = "_top_level";

/// Metric set to `1` on spans that should be measured even when not top-level.
pub const METRIC_MEASURED: &str = "_dd.measured";

/// Metric present, and non-negative, on partial snapshots of long-running spans.
pub const METRIC_PARTIAL_VERSION: &str = "_dd.partial_version";

/// Returns `true` if the span is marked as top-level.
pub fn is_top_level(span: &Span) -> bool {
    span.metrics().get(METRIC_TOP_LEVEL).is_some_and(|&v| v == 1.0)
}

/// Returns `true` if the span is marked as measured.
pub fn is_measured(span: &Span) -> bool {
    span.metrics().get(METRIC_MEASURED).is_some_and(|&v| v == 1.0)
}

/// Returns `true` if the span is a partial snapshot of a span that is still running.
pub fn is_partial_snapshot(span: &Span) -> bool {
    span.metrics().get(METRIC_PARTIAL_VERSION).is_some_and(|&v| v >= 0.0)
}

/// Returns `true` if spans of the given kind should have stats computed for them.
///
/// Only `server`, `consumer`, `client`, and `producer` qualify, compared case-insensitively.
pub fn compute_stats_for_span_kind(kind: &str) -> bool {
    kind.eq_ignore_ascii_case("server")
        || kind.eq_ignore_ascii_case("consumer")
        || kind.eq_ignore_ascii_case("client")
        || kind.eq_ignore_ascii_case("producer")
}

/// Returns `true` if the span should be counted toward stats.
pub fn is_span_eligible(span: &Span, compute_stats_by_span_kind: bool) -> bool {
    if is_partial_snapshot(span) {
        return false;
    }

    if is_top_level(span) || is_measured(span) {
        return true;
    }

    compute_stats_by_span_kind
        && span
            .meta()
            .get(TAG_SPAN_KIND)
            .is_some_and(|kind| compute_stats_for_span_kind(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_kind_eligibility() {
        for kind in ["server", "SERVER", "Consumer", "client", "PrOdUcEr"] {
            assert!(compute_stats_for_span_kind(kind), "{kind} should be eligible");
        }
        for kind in ["", "internal", "INTERNAL", "servers", "unknown"] {
            assert!(!compute_stats_for_span_kind(kind), "{kind} should not be eligible");
        }
    }

    #[test]
    fn top_level_and_measured() {
        let top_level = Span::default().with_metric(METRIC_TOP_LEVEL, 1.0);
        assert!(is_span_eligible(&top_level, false));

        let measured = Span::default().with_metric(METRIC_MEASURED, 1.0);
        assert!(is_span_eligible(&measured, false));

        let neither = Span::default().with_metric(METRIC_TOP_LEVEL, 0.0).with_metric(METRIC_MEASURED, 2.0);
        assert!(!is_span_eligible(&neither, true));
    }

    #[test]
    fn span_kind_requires_flag() {
        let client = Span::default().with_meta_entry(TAG_SPAN_KIND, "client");
        assert!(is_span_eligible(&client, true));
        assert!(!is_span_eligible(&client, false));

        let internal = Span::default().with_meta_entry(TAG_SPAN_KIND, "internal");
        assert!(!is_span_eligible(&internal, true));

        assert!(!is_span_eligible(&Span::default(), true));
    }

    #[test]
    fn partial_snapshots_are_never_eligible() {
        let span = Span::default()
            .with_metric(METRIC_TOP_LEVEL, 1.0)
            .with_metric(METRIC_MEASURED, 1.0)
            .with_meta_entry(TAG_SPAN_KIND, "server")
            .with_metric(METRIC_PARTIAL_VERSION, 0.0);
        assert!(is_partial_snapshot(&span));
        assert!(!is_span_eligible(&span, true));

        let negative = Span::default()
            .with_metric(METRIC_TOP_LEVEL, 1.0)
            .with_metric(METRIC_PARTIAL_VERSION, -1.0);
        assert!(!is_partial_snapshot(&negative));
        assert!(is_span_eligible(&negative, false));
    }
}
