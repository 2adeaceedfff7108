//! Batches of traces handed to the concentrator.

use crate::{
    config::{ConcentratorConfig, FEATURE_DISABLE_CID_STATS, FEATURE_ENABLE_CID_STATS},
    trace::ProcessedTrace,
};

/// A set of traces originating from the same tracer payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Input {
    traces: Vec<ProcessedTrace>,
    container_id: String,
    container_tags: Vec<String>,
    client_computed_stats: bool,
}

impl Input {
    /// Creates an input for an incoming tracer payload holding `num_chunks` trace chunks.
    ///
    /// When the client already computed stats for the payload, the input stays empty and pushing traces to it is a
    /// no-op. The container ID is only kept when per-container stats are enabled, either explicitly or by running on
    /// Fargate, and not disabled.
    pub fn new(
        num_chunks: usize, container_id: impl Into<String>, client_computed_stats: bool, config: &ConcentratorConfig,
    ) -> Self {
        if client_computed_stats {
            return Self {
                client_computed_stats: true,
                ..Self::default()
            };
        }

        let enable_containers = config.has_feature(FEATURE_ENABLE_CID_STATS) || config.fargate_orchestrator().is_some();
        let container_id = if enable_containers && !config.has_feature(FEATURE_DISABLE_CID_STATS) {
            container_id.into()
        } else {
            String::new()
        };

        Self {
            traces: Vec::with_capacity(num_chunks),
            container_id,
            container_tags: Vec::new(),
            client_computed_stats: false,
        }
    }

    /// Creates an input from already processed traces, with no container dimension.
    pub fn from_traces(traces: Vec<ProcessedTrace>) -> Self {
        Self {
            traces,
            ..Self::default()
        }
    }

    /// Sets the container tags.
    ///
    /// Tags are only reported when a container ID is also set.
    pub fn with_container_tags(mut self, tags: Vec<String>) -> Self {
        self.container_tags = tags;
        self
    }

    /// Adds a trace.
    pub fn push_trace(&mut self, trace: ProcessedTrace) {
        if !self.client_computed_stats {
            self.traces.push(trace);
        }
    }

    /// Returns the traces.
    pub fn traces(&self) -> &[ProcessedTrace] {
        &self.traces
    }

    /// Returns the container ID, or an empty string when the container dimension is disabled.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Returns the container tags.
    pub fn container_tags(&self) -> &[String] {
        &self.container_tags
    }

    /// Returns `true` if there are no traces.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}
