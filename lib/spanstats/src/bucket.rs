//! Per-window span aggregation.

use rand::Rng as _;
use sketches_ddsketch::{Config as DDSketchConfig, DDSketch};
use tracing::error;

use crate::{
    aggregation::{
        get_status_code, tags_fnv_hash, Aggregation, BucketsAggregationKey, PayloadAggregationKey, SpanKind,
        TAG_SPAN_KIND, TAG_SYNTHETICS,
    },
    collections::FastHashMap,
    payload::{ClientGroupedStats, ClientStatsBucket, LatencySummary},
    peer_tags::matching_peer_tags,
    trace::Span,
};

const SKETCH_RELATIVE_ACCURACY: f64 = 0.01;
const SKETCH_MAX_BINS: u32 = 2048;
const SKETCH_MIN_VALUE: f64 = 1.0e-9;

/// The parts of a span that stats are computed from.
pub(crate) struct StatSpan<'a> {
    span: &'a Span,
    span_kind: SpanKind,
    status_code: u32,
    is_top_level: bool,
    matching_peer_tags: Vec<String>,
}

impl<'a> StatSpan<'a> {
    pub fn new(span: &'a Span, is_top_level: bool, peer_tag_keys: &[String]) -> Self {
        let span_kind = span
            .meta()
            .get(TAG_SPAN_KIND)
            .map(|kind| SpanKind::parse(kind))
            .unwrap_or_default();

        Self {
            span,
            span_kind,
            status_code: get_status_code(span.meta(), span.metrics()),
            is_top_level,
            matching_peer_tags: matching_peer_tags(span, peer_tag_keys),
        }
    }
}

struct GroupedStats {
    hits: f64,
    top_level_hits: f64,
    errors: f64,
    duration: f64,
    ok_distribution: DDSketch,
    err_distribution: DDSketch,
    peer_tags: Vec<String>,
}

impl GroupedStats {
    fn new(peer_tags: Vec<String>) -> Self {
        Self {
            hits: 0.0,
            top_level_hits: 0.0,
            errors: 0.0,
            duration: 0.0,
            ok_distribution: new_sketch(),
            err_distribution: new_sketch(),
            peer_tags,
        }
    }

    fn export(self, agg: &Aggregation) -> ClientGroupedStats {
        ClientGroupedStats::new(
            agg.bucket_key.service.clone(),
            agg.bucket_key.name.clone(),
            agg.bucket_key.resource.clone(),
        )
        .with_http_status_code(agg.bucket_key.status_code)
        .with_span_type(agg.bucket_key.span_type.clone())
        .with_span_kind(agg.bucket_key.span_kind.as_str())
        .with_peer_tags(self.peer_tags)
        .with_is_trace_root(agg.bucket_key.is_trace_root)
        .with_synthetics(agg.bucket_key.synthetics)
        .with_hits(round(self.hits))
        .with_errors(round(self.errors))
        .with_duration(round(self.duration))
        .with_top_level_hits(round(self.top_level_hits))
        .with_ok_summary(summarize(&self.ok_distribution))
        .with_error_summary(summarize(&self.err_distribution))
    }
}

/// Aggregated stats for a single time window.
pub(crate) struct RawBucket {
    /// Timestamp of the bucket start.
    start: u64,
    /// Bucket duration in nanoseconds.
    duration: u64,
    data: FastHashMap<Aggregation, GroupedStats>,
    /// Map of container ID to container tags.
    container_tags_by_id: FastHashMap<String, Vec<String>>,
}

impl RawBucket {
    pub fn new(start: u64, duration: u64) -> Self {
        Self {
            start,
            duration,
            data: FastHashMap::default(),
            container_tags_by_id: FastHashMap::default(),
        }
    }

    /// Store container tags for later export.
    pub fn set_container_tags(&mut self, container_id: String, tags: Vec<String>) {
        self.container_tags_by_id.insert(container_id, tags);
    }

    /// Removes and returns the container tags seen by this bucket.
    pub fn take_container_tags(&mut self) -> FastHashMap<String, Vec<String>> {
        std::mem::take(&mut self.container_tags_by_id)
    }

    #[cfg(test)]
    pub fn container_tags(&self, container_id: &str) -> Option<&Vec<String>> {
        self.container_tags_by_id.get(container_id)
    }

    pub fn handle_span(&mut self, span: &StatSpan<'_>, weight: f64, origin: &str, payload_key: PayloadAggregationKey) {
        if payload_key.env.is_empty() {
            error!(
                service = span.span.service(),
                trace_id = span.span.trace_id(),
                span_id = span.span.span_id(),
                "Payload aggregation key has an empty env. Dropping span."
            );
            return;
        }

        let aggr = new_aggregation_from_span(span, origin, payload_key);
        self.add(span, weight, aggr);
    }

    fn add(&mut self, span: &StatSpan<'_>, weight: f64, aggr: Aggregation) {
        let gs = self
            .data
            .entry(aggr)
            .or_insert_with(|| GroupedStats::new(span.matching_peer_tags.clone()));

        if span.is_top_level {
            gs.top_level_hits += weight;
        }
        gs.hits += weight;

        let errored = span.span.error() != 0;
        if errored {
            gs.errors += weight;
        }

        gs.duration += (span.span.duration() as f64) * weight;

        let trunc_dur = ns_timestamp_to_float(span.span.duration());
        if errored {
            gs.err_distribution.add(trunc_dur);
        } else {
            gs.ok_distribution.add(trunc_dur);
        }
    }

    /// Exports the bucket, grouping stats by payload key.
    pub fn export(self) -> FastHashMap<PayloadAggregationKey, ClientStatsBucket> {
        let mut grouped: FastHashMap<PayloadAggregationKey, Vec<ClientGroupedStats>> = FastHashMap::default();
        for (agg, gs) in self.data {
            let stats = gs.export(&agg);
            grouped.entry(agg.payload_key).or_default().push(stats);
        }

        grouped
            .into_iter()
            .map(|(key, stats)| (key, ClientStatsBucket::new(self.start, self.duration, stats)))
            .collect()
    }
}

fn new_sketch() -> DDSketch {
    DDSketch::new(DDSketchConfig::new(
        SKETCH_RELATIVE_ACCURACY,
        SKETCH_MAX_BINS,
        SKETCH_MIN_VALUE,
    ))
}

fn new_aggregation_from_span(span: &StatSpan<'_>, origin: &str, payload_key: PayloadAggregationKey) -> Aggregation {
    Aggregation {
        payload_key,
        bucket_key: BucketsAggregationKey {
            service: span.span.service().to_string(),
            name: span.span.name().to_string(),
            resource: span.span.resource().to_string(),
            span_type: span.span.span_type().to_string(),
            span_kind: span.span_kind,
            status_code: span.status_code,
            synthetics: origin.starts_with(TAG_SYNTHETICS),
            peer_tags_hash: tags_fnv_hash(&span.matching_peer_tags),
            is_trace_root: Some(span.span.parent_id() == 0),
        },
    }
}

fn summarize(sketch: &DDSketch) -> LatencySummary {
    let quantile = |q: f64| sketch.quantile(q).ok().flatten().unwrap_or(0.0);

    LatencySummary {
        count: sketch.count() as u64,
        sum: sketch.sum().unwrap_or(0.0),
        min: sketch.min().unwrap_or(0.0),
        max: sketch.max().unwrap_or(0.0),
        p50: quantile(0.5),
        p75: quantile(0.75),
        p90: quantile(0.9),
        p95: quantile(0.95),
        p99: quantile(0.99),
    }
}

fn ns_timestamp_to_float(ns: u64) -> f64 {
    // Keep 10 bits of mantissa, for about 0.1% relative precision.
    let f = ns as f64;
    let bits = f.to_bits();
    let truncated_bits = bits & 0xffff_f800_0000_0000;
    f64::from_bits(truncated_bits)
}

fn round(f: f64) -> u64 {
    let i = f as u64;
    let frac = f - (i as f64);
    if rand::rng().random::<f64>() < frac {
        i + 1
    } else {
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::METRIC_TOP_LEVEL;

    fn payload_key() -> PayloadAggregationKey {
        PayloadAggregationKey {
            env: "default".into(),
            hostname: "default".into(),
            container_id: "cid".into(),
            ..PayloadAggregationKey::default()
        }
    }

    fn span(duration: u64, error: i32) -> Span {
        Span::new("thing", "other", "yo", "web", 1, 2, 0, 0, duration, error).with_metric(METRIC_TOP_LEVEL, 1.0)
    }

    fn single_group(bucket: RawBucket) -> ClientGroupedStats {
        let exported = bucket.export();
        assert_eq!(exported.len(), 1);
        let (_, stats_bucket) = exported.into_iter().next().unwrap();
        assert_eq!(stats_bucket.stats().len(), 1);
        stats_bucket.stats()[0].clone()
    }

    #[test]
    fn test_ns_timestamp_to_float() {
        let ns: u64 = 1_000_000_000;
        let truncated = ns_timestamp_to_float(ns);
        let relative_error = ((truncated - ns as f64) / (ns as f64)).abs();
        assert!(relative_error < 0.001, "relative error too large: {}", relative_error);

        assert_eq!(ns_timestamp_to_float(0), 0.0);
        assert!(ns_timestamp_to_float(1000) > 0.0);
    }

    #[test]
    fn test_round_deterministic_cases() {
        assert_eq!(round(0.0), 0);
        assert_eq!(round(1.0), 1);
        assert_eq!(round(100.0), 100);

        let rounded = round(2.5);
        assert!(rounded == 2 || rounded == 3);
    }

    #[test]
    fn test_grain() {
        let span = span(0, 0);
        let stat_span = StatSpan::new(&span, false, &[]);
        let aggr = new_aggregation_from_span(&stat_span, "", payload_key());

        assert_eq!(aggr.payload_key.env, "default");
        assert_eq!(aggr.payload_key.hostname, "default");
        assert_eq!(aggr.payload_key.container_id, "cid");
        assert_eq!(aggr.bucket_key.service, "thing");
        assert_eq!(aggr.bucket_key.name, "other");
        assert_eq!(aggr.bucket_key.resource, "yo");
        assert_eq!(aggr.bucket_key.span_type, "web");
        assert_eq!(aggr.bucket_key.is_trace_root, Some(true));
        assert_eq!(aggr.bucket_key.peer_tags_hash, 0);
        assert!(!aggr.bucket_key.synthetics);
    }

    #[test]
    fn test_grain_with_peer_tags() {
        let keys = vec!["db.instance".to_string(), "peer.service".to_string()];

        let bare = span(0, 0).with_meta_entry("span.kind", "client");
        let aggr = new_aggregation_from_span(&StatSpan::new(&bare, false, &keys), "", payload_key());
        assert_eq!(aggr.bucket_key.span_kind, SpanKind::Client);
        assert_eq!(aggr.bucket_key.peer_tags_hash, 0);

        let tagged = bare.clone().with_meta_entry("peer.service", "aws-dynamodb");
        let one = new_aggregation_from_span(&StatSpan::new(&tagged, false, &keys), "", payload_key());
        assert_ne!(one.bucket_key.peer_tags_hash, 0);

        let more = tagged.with_meta_entry("db.instance", "dynamo.test.us1");
        let two = new_aggregation_from_span(&StatSpan::new(&more, false, &keys), "", payload_key());
        assert_ne!(two.bucket_key.peer_tags_hash, 0);
        assert_ne!(two.bucket_key.peer_tags_hash, one.bucket_key.peer_tags_hash);
    }

    #[test]
    fn test_grain_with_synthetics() {
        let span = span(0, 0)
            .with_parent_id(5)
            .with_metric("http.status_code", 418.0);
        let stat_span = StatSpan::new(&span, false, &[]);

        let aggr = new_aggregation_from_span(&stat_span, "synthetics-browser", payload_key());
        assert!(aggr.bucket_key.synthetics);
        assert_eq!(aggr.bucket_key.status_code, 418);
        assert_eq!(aggr.bucket_key.is_trace_root, Some(false));

        let aggr = new_aggregation_from_span(&stat_span, "real-traffic", payload_key());
        assert!(!aggr.bucket_key.synthetics);
    }

    #[test]
    fn weighted_counts_and_distributions() {
        let mut bucket = RawBucket::new(1000, 10);

        let ok = span(100, 0);
        let err = span(300, 1);
        bucket.handle_span(&StatSpan::new(&ok, true, &[]), 2.0, "", payload_key());
        bucket.handle_span(&StatSpan::new(&err, true, &[]), 2.0, "", payload_key());
        bucket.handle_span(&StatSpan::new(&ok, false, &[]), 1.0, "", payload_key());

        let stats = single_group(bucket);
        assert_eq!(stats.hits(), 5);
        assert_eq!(stats.top_level_hits(), 4);
        assert_eq!(stats.errors(), 2);
        assert_eq!(stats.duration(), 2 * 100 + 2 * 300 + 100);
        assert_eq!(stats.ok_summary().count, 2);
        assert_eq!(stats.error_summary().count, 1);
        assert!(stats.error_summary().max > 0.0);
    }

    #[test]
    fn export_groups_by_payload_key() {
        let mut bucket = RawBucket::new(20, 10);
        let s = span(5, 0);
        let other_host = PayloadAggregationKey {
            hostname: "elsewhere".into(),
            ..payload_key()
        };

        bucket.handle_span(&StatSpan::new(&s, true, &[]), 1.0, "", payload_key());
        bucket.handle_span(&StatSpan::new(&s, true, &[]), 1.0, "", other_host.clone());

        let exported = bucket.export();
        assert_eq!(exported.len(), 2);
        for key in [payload_key(), other_host] {
            let stats_bucket = &exported[&key];
            assert_eq!(stats_bucket.start(), 20);
            assert_eq!(stats_bucket.duration(), 10);
            assert_eq!(stats_bucket.stats().len(), 1);
        }
    }

    #[test]
    fn empty_env_is_rejected() {
        let mut bucket = RawBucket::new(0, 10);
        let s = span(5, 0);
        let key = PayloadAggregationKey {
            env: String::new(),
            ..payload_key()
        };

        bucket.handle_span(&StatSpan::new(&s, true, &[]), 1.0, "", key);
        assert!(bucket.export().is_empty());
    }

    #[test]
    fn container_tags_side_table() {
        let mut bucket = RawBucket::new(0, 10);
        bucket.set_container_tags("cid".into(), vec!["kube_namespace:default".into()]);
        assert_eq!(
            bucket.container_tags("cid"),
            Some(&vec!["kube_namespace:default".to_string()])
        );

        let taken = bucket.take_container_tags();
        assert_eq!(taken.len(), 1);
        assert!(bucket.container_tags("cid").is_none());
    }
}
