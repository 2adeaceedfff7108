//! Traces, as handed over by the trace ingestion path.

use crate::collections::FastHashMap;

/// A span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Span {
    service: String,
    name: String,
    resource: String,
    type_: String,
    trace_id: u64,
    span_id: u64,
    parent_id: u64,
    start: u64,
    duration: u64,
    error: i32,
    meta: FastHashMap<String, String>,
    metrics: FastHashMap<String, f64>,
}

impl Span {
    /// Creates a new `Span`.
    ///
    /// `start` is the span start in nanoseconds since the Unix epoch, and `duration` is in nanoseconds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: impl Into<String>, name: impl Into<String>, resource: impl Into<String>, type_: impl Into<String>,
        trace_id: u64, span_id: u64, parent_id: u64, start: u64, duration: u64, error: i32,
    ) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            resource: resource.into(),
            type_: type_.into(),
            trace_id,
            span_id,
            parent_id,
            start,
            duration,
            error,
            meta: FastHashMap::default(),
            metrics: FastHashMap::default(),
        }
    }

    /// Sets the service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Sets the parent span ID.
    pub fn with_parent_id(mut self, parent_id: u64) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Sets the start and duration, both in nanoseconds.
    pub fn with_timing(mut self, start: u64, duration: u64) -> Self {
        self.start = start;
        self.duration = duration;
        self
    }

    /// Adds a single string tag.
    pub fn with_meta_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Adds a single numeric tag.
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
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

    /// Returns the span type.
    pub fn span_type(&self) -> &str {
        &self.type_
    }

    /// Returns the trace ID.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// Returns the span ID.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Returns the parent span ID, or `0` for a trace root.
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    /// Returns the start time, in nanoseconds since the Unix epoch.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the duration, in nanoseconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Returns the end time, in nanoseconds since the Unix epoch.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }

    /// Returns the error flag. Non-zero means the span errored.
    pub fn error(&self) -> i32 {
        self.error
    }

    /// Returns the string tags.
    pub fn meta(&self) -> &FastHashMap<String, String> {
        &self.meta
    }

    /// Returns the numeric tags.
    pub fn metrics(&self) -> &FastHashMap<String, f64> {
        &self.metrics
    }
}

/// A chunk of spans belonging to the same trace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraceChunk {
    origin: String,
    spans: Vec<Span>,
}

impl TraceChunk {
    /// Creates a new `TraceChunk` from the given spans.
    pub fn new(spans: Vec<Span>) -> Self {
        Self {
            spans,
            ..Self::default()
        }
    }

    /// Sets the origin, such as `synthetics` or `lambda`.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Returns the origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the spans.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }
}

/// A trace chunk, along with the tracer metadata it arrived with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessedTrace {
    chunk: TraceChunk,
    root: Option<usize>,
    tracer_env: String,
    tracer_hostname: String,
    app_version: String,
    git_commit_sha: String,
    image_tag: String,
}

impl ProcessedTrace {
    /// Creates a new `ProcessedTrace` from the given chunk.
    ///
    /// The root is the first span without a parent, or the first span of the chunk if every span has a parent.
    pub fn new(chunk: TraceChunk) -> Self {
        let root = chunk
            .spans()
            .iter()
            .position(|s| s.parent_id() == 0)
            .or_else(|| (!chunk.spans().is_empty()).then_some(0));

        Self {
            chunk,
            root,
            ..Self::default()
        }
    }

    /// Sets the environment reported by the tracer.
    pub fn with_tracer_env(mut self, env: impl Into<String>) -> Self {
        self.tracer_env = env.into();
        self
    }

    /// Sets the hostname reported by the tracer.
    pub fn with_tracer_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.tracer_hostname = hostname.into();
        self
    }

    /// Sets the application version.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Sets the git commit SHA of the application.
    pub fn with_git_commit_sha(mut self, git_commit_sha: impl Into<String>) -> Self {
        self.git_commit_sha = git_commit_sha.into();
        self
    }

    /// Sets the container image tag of the application.
    pub fn with_image_tag(mut self, image_tag: impl Into<String>) -> Self {
        self.image_tag = image_tag.into();
        self
    }

    /// Returns the trace chunk.
    pub fn chunk(&self) -> &TraceChunk {
        &self.chunk
    }

    /// Returns the root span, if the chunk has any spans.
    pub fn root(&self) -> Option<&Span> {
        self.root.and_then(|i| self.chunk.spans().get(i))
    }

    /// Returns the environment reported by the tracer.
    pub fn tracer_env(&self) -> &str {
        &self.tracer_env
    }

    /// Returns the hostname reported by the tracer.
    pub fn tracer_hostname(&self) -> &str {
        &self.tracer_hostname
    }

    /// Returns the application version.
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Returns the git commit SHA.
    pub fn git_commit_sha(&self) -> &str {
        &self.git_commit_sha
    }

    /// Returns the container image tag.
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }
}
