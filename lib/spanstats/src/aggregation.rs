//! Aggregation keys and helper functions for span stats.

use std::hash::Hasher as _;

use fnv::FnvHasher;

use crate::collections::FastHashMap;

pub(crate) const TAG_SYNTHETICS: &str = "synthetics";
pub(crate) const TAG_SPAN_KIND: &str = "span.kind";
pub(crate) const TAG_BASE_SERVICE: &str = "_dd.base_service";
const TAG_STATUS_CODE: &str = "http.status_code";

/// Span kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Unspecified or unrecognized span kind.
    #[default]
    Unspecified,

    /// Internal span, not crossing a process boundary.
    Internal,

    /// Server side of a request.
    Server,

    /// Client side of a request.
    Client,

    /// Sends a message to a queue or topic.
    Producer,

    /// Receives a message from a queue or topic.
    Consumer,
}

impl SpanKind {
    /// Parses a span kind in a case-insensitive fashion.
    ///
    /// Unrecognized values map to `SpanKind::Unspecified`.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("server") {
            Self::Server
        } else if s.eq_ignore_ascii_case("client") {
            Self::Client
        } else if s.eq_ignore_ascii_case("producer") {
            Self::Producer
        } else if s.eq_ignore_ascii_case("consumer") {
            Self::Consumer
        } else if s.eq_ignore_ascii_case("internal") {
            Self::Internal
        } else {
            Self::Unspecified
        }
    }

    /// Returns the canonical lowercase name, or an empty string when unspecified.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

/// Identity of one output group in a stats payload.
///
/// Every field takes part in equality and hashing: two keys are the same group only if all six fields match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadAggregationKey {
    /// Environment, from the tracer or the agent default.
    pub env: String,
    /// Hostname, from the tracer or the agent default.
    pub hostname: String,
    /// Application version.
    pub version: String,
    /// Container ID, only set when container stats are enabled.
    pub container_id: String,
    /// Git commit SHA of the application.
    pub git_commit_sha: String,
    /// Container image tag of the application.
    pub image_tag: String,
}

/// Grouping of spans within a single payload key and time bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct BucketsAggregationKey {
    pub service: String,
    pub name: String,
    pub resource: String,
    pub span_type: String,
    pub span_kind: SpanKind,
    pub status_code: u32,
    pub synthetics: bool,
    pub peer_tags_hash: u64,
    pub is_trace_root: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Aggregation {
    pub bucket_key: BucketsAggregationKey,
    pub payload_key: PayloadAggregationKey,
}

/// Hashes a set of tags with FNV-1a, independent of the order they are given in.
///
/// Returns `0` for an empty set.
pub(crate) fn tags_fnv_hash<I, T>(tags: I) -> u64
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut sorted_tags: Vec<T> = tags.into_iter().collect();
    if sorted_tags.is_empty() {
        return 0;
    }
    sorted_tags.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

    let mut hasher = FnvHasher::default();
    for (i, tag) in sorted_tags.iter().enumerate() {
        if i > 0 {
            hasher.write_u8(0);
        }
        hasher.write(tag.as_ref().as_bytes());
    }
    hasher.finish()
}

/// Extracts the HTTP status code, preferring the numeric tag over the string one.
pub(crate) fn get_status_code(meta: &FastHashMap<String, String>, metrics: &FastHashMap<String, f64>) -> u32 {
    if let Some(&code) = metrics.get(TAG_STATUS_CODE) {
        return code as u32;
    }

    meta.get(TAG_STATUS_CODE)
        .and_then(|code| code.parse::<u32>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_kind_parse() {
        assert_eq!(SpanKind::parse("CLIENT"), SpanKind::Client);
        assert_eq!(SpanKind::parse("Consumer"), SpanKind::Consumer);
        assert_eq!(SpanKind::parse("internal"), SpanKind::Internal);
        assert_eq!(SpanKind::parse(""), SpanKind::Unspecified);
        assert_eq!(SpanKind::parse("sever"), SpanKind::Unspecified);
        assert_eq!(SpanKind::Producer.as_str(), "producer");
    }

    #[test]
    fn payload_keys_differ_on_any_field() {
        let base = PayloadAggregationKey {
            env: "prod".into(),
            hostname: "host-a".into(),
            version: "1.0".into(),
            container_id: "cid".into(),
            git_commit_sha: "abc".into(),
            image_tag: "v1".into(),
        };

        let variants = [
            PayloadAggregationKey {
                env: "staging".into(),
                ..base.clone()
            },
            PayloadAggregationKey {
                hostname: "host-b".into(),
                ..base.clone()
            },
            PayloadAggregationKey {
                version: "1.1".into(),
                ..base.clone()
            },
            PayloadAggregationKey {
                container_id: "other".into(),
                ..base.clone()
            },
            PayloadAggregationKey {
                git_commit_sha: "def".into(),
                ..base.clone()
            },
            PayloadAggregationKey {
                image_tag: "v2".into(),
                ..base.clone()
            },
        ];

        let mut groups = FastHashMap::default();
        groups.insert(base.clone(), ());
        for variant in &variants {
            assert_ne!(&base, variant);
            groups.insert(variant.clone(), ());
        }
        assert_eq!(groups.len(), 7);

        groups.insert(base.clone(), ());
        assert_eq!(groups.len(), 7);
    }

    #[test]
    fn tags_hash_is_order_independent() {
        let a = tags_fnv_hash(["peer.service:db", "db.instance:i-1"]);
        let b = tags_fnv_hash(["db.instance:i-1", "peer.service:db"]);
        assert_eq!(a, b);
        assert_ne!(a, 0);
        assert_ne!(a, tags_fnv_hash(["peer.service:db"]));
        assert_eq!(tags_fnv_hash(Vec::<String>::new()), 0);
    }

    #[test]
    fn status_code() {
        let mut meta = FastHashMap::default();
        let mut metrics = FastHashMap::default();
        assert_eq!(get_status_code(&meta, &metrics), 0);

        meta.insert("http.status_code".to_string(), "200".to_string());
        assert_eq!(get_status_code(&meta, &metrics), 200);

        metrics.insert("http.status_code".to_string(), 302.0);
        assert_eq!(get_status_code(&meta, &metrics), 302);

        let mut bad_meta = FastHashMap::default();
        bad_meta.insert("http.status_code".to_string(), "x".to_string());
        assert_eq!(get_status_code(&bad_meta, &FastHashMap::default()), 0);
    }
}
