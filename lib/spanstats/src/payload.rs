//! Stats payloads handed to the writer.

use serde::Serialize;

/// Stats emitted by one flush of the concentrator.
///
/// Wraps every client payload produced by the flush, along with the identity of the agent that computed them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsPayload {
    agent_hostname: String,
    agent_env: String,
    agent_version: String,
    stats: Vec<ClientStatsPayload>,
}

impl StatsPayload {
    /// Creates a new `StatsPayload` with the given agent identity and client payloads.
    pub fn new(
        agent_hostname: impl Into<String>, agent_env: impl Into<String>, agent_version: impl Into<String>,
        stats: Vec<ClientStatsPayload>,
    ) -> Self {
        Self {
            agent_hostname: agent_hostname.into(),
            agent_env: agent_env.into(),
            agent_version: agent_version.into(),
            stats,
        }
    }

    /// Returns the agent hostname.
    pub fn agent_hostname(&self) -> &str {
        &self.agent_hostname
    }

    /// Returns the agent environment.
    pub fn agent_env(&self) -> &str {
        &self.agent_env
    }

    /// Returns the agent version.
    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    /// Returns the client payloads.
    pub fn stats(&self) -> &[ClientStatsPayload] {
        &self.stats
    }

    /// Returns `true` if the payload holds no client payloads.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Returns the total number of time buckets across all client payloads.
    pub fn bucket_count(&self) -> usize {
        self.stats.iter().map(|p| p.stats().len()).sum()
    }
}

/// Stats for one payload aggregation key.
///
/// Groups stats by tracer and container identity (hostname, env, version, container ID, git commit, image tag).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClientStatsPayload {
    hostname: String,
    env: String,
    version: String,
    container_id: String,
    git_commit_sha: String,
    image_tag: String,
    tags: Vec<String>,
    stats: Vec<ClientStatsBucket>,
}

impl ClientStatsPayload {
    /// Creates a new `ClientStatsPayload` with the required identity fields.
    pub fn new(hostname: impl Into<String>, env: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            env: env.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Sets the container identifier.
    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = container_id.into();
        self
    }

    /// Sets the git commit SHA.
    pub fn with_git_commit_sha(mut self, git_commit_sha: impl Into<String>) -> Self {
        self.git_commit_sha = git_commit_sha.into();
        self
    }

    /// Sets the container image tag.
    pub fn with_image_tag(mut self, image_tag: impl Into<String>) -> Self {
        self.image_tag = image_tag.into();
        self
    }

    /// Sets the container tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the stats buckets.
    pub fn with_stats(mut self, stats: Vec<ClientStatsBucket>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns the hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the environment.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Returns the version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the container identifier.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Returns the git commit SHA.
    pub fn git_commit_sha(&self) -> &str {
        &self.git_commit_sha
    }

    /// Returns the container image tag.
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Returns the container tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the stats buckets.
    pub fn stats(&self) -> &[ClientStatsBucket] {
        &self.stats
    }
}

/// A time bucket containing aggregated stats.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClientStatsBucket {
    /// Bucket start timestamp in nanoseconds since Unix epoch.
    start: u64,
    /// Bucket duration in nanoseconds.
    duration: u64,
    stats: Vec<ClientGroupedStats>,
}

impl ClientStatsBucket {
    /// Creates a new `ClientStatsBucket` with the given time range and stats.
    pub fn new(start: u64, duration: u64, stats: Vec<ClientGroupedStats>) -> Self {
        Self { start, duration, stats }
    }

    /// Returns the bucket start timestamp in nanoseconds.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the bucket duration in nanoseconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Returns the grouped stats within this bucket.
    pub fn stats(&self) -> &[ClientGroupedStats] {
        &self.stats
    }
}

/// A summary of a latency distribution, in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Number of samples.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Median.
    pub p50: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
}

/// Aggregated stats for spans grouped by aggregation key.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClientGroupedStats {
    // Aggregation key fields
    service: String,
    name: String,
    resource: String,
    http_status_code: u32,
    span_type: String,
    span_kind: String,
    peer_tags: Vec<String>,
    is_trace_root: Option<bool>,
    synthetics: bool,

    // Aggregated values
    hits: u64,
    errors: u64,
    duration: u64,
    top_level_hits: u64,
    ok_summary: LatencySummary,
    error_summary: LatencySummary,
}

impl ClientGroupedStats {
    /// Creates a new `ClientGroupedStats` with the required aggregation key fields.
    pub fn new(service: impl Into<String>, name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            resource: resource.into(),
            ..Self::default()
        }
    }

    /// Sets the HTTP status code.
    pub fn with_http_status_code(mut self, http_status_code: u32) -> Self {
        self.http_status_code = http_status_code;
        self
    }

    /// Sets the span type.
    pub fn with_span_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = span_type.into();
        self
    }

    /// Sets the span kind.
    pub fn with_span_kind(mut self, span_kind: impl Into<String>) -> Self {
        self.span_kind = span_kind.into();
        self
    }

    /// Sets the peer tags.
    pub fn with_peer_tags(mut self, peer_tags: Vec<String>) -> Self {
        self.peer_tags = peer_tags;
        self
    }

    /// Sets whether this is a trace root.
    pub fn with_is_trace_root(mut self, is_trace_root: Option<bool>) -> Self {
        self.is_trace_root = is_trace_root;
        self
    }

    /// Sets the synthetics traffic flag.
    pub fn with_synthetics(mut self, synthetics: bool) -> Self {
        self.synthetics = synthetics;
        self
    }

    /// Sets the hit count.
    pub fn with_hits(mut self, hits: u64) -> Self {
        self.hits = hits;
        self
    }

    /// Sets the error count.
    pub fn with_errors(mut self, errors: u64) -> Self {
        self.errors = errors;
        self
    }

    /// Sets the total duration in nanoseconds.
    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the top-level hit count.
    pub fn with_top_level_hits(mut self, top_level_hits: u64) -> Self {
        self.top_level_hits = top_level_hits;
        self
    }

    /// Sets the latency summary for successful spans.
    pub fn with_ok_summary(mut self, ok_summary: LatencySummary) -> Self {
        self.ok_summary = ok_summary;
        self
    }

    /// Sets the latency summary for error spans.
    pub fn with_error_summary(mut self, error_summary: LatencySummary) -> Self {
        self.error_summary = error_summary;
        self
    }

    /// Returns the service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the HTTP status code.
    pub fn http_status_code(&self) -> u32 {
        self.http_status_code
    }

    /// Returns the span type.
    pub fn span_type(&self) -> &str {
        &self.span_type
    }

    /// Returns the span kind.
    pub fn span_kind(&self) -> &str {
        &self.span_kind
    }

    /// Returns the peer tags.
    pub fn peer_tags(&self) -> &[String] {
        &self.peer_tags
    }

    /// Returns whether this is a trace root, if known.
    pub fn is_trace_root(&self) -> Option<bool> {
        self.is_trace_root
    }

    /// Returns the synthetics traffic flag.
    pub fn synthetics(&self) -> bool {
        self.synthetics
    }

    /// Returns the hit count.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Returns the error count.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Returns the total duration in nanoseconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Returns the top-level hit count.
    pub fn top_level_hits(&self) -> u64 {
        self.top_level_hits
    }

    /// Returns the latency summary for successful spans.
    pub fn ok_summary(&self) -> &LatencySummary {
        &self.ok_summary
    }

    /// Returns the latency summary for error spans.
    pub fn error_summary(&self) -> &LatencySummary {
        &self.error_summary
    }
}
