//! Concentrator configuration.

use std::{fmt, time::Duration};

use serde::{
    de::{self, SeqAccess},
    Deserialize, Deserializer,
};
use spanstats_config::{ConfigurationError, GenericConfiguration};

/// Feature flag that enables per-container stats.
pub const FEATURE_ENABLE_CID_STATS: &str = "enable_cid_stats";

/// Feature flag that disables per-container stats, overriding every other setting.
pub const FEATURE_DISABLE_CID_STATS: &str = "disable_cid_stats";

const fn default_bucket_interval() -> u64 {
    10
}

const fn default_buffer_len() -> usize {
    2
}

const fn default_peer_tags_aggregation() -> bool {
    true
}

const fn default_compute_stats_by_span_kind() -> bool {
    true
}

fn default_env() -> String {
    String::from("none")
}

/// Concentrator configuration.
///
/// Mirrors the `apm_config` section of the trace agent's configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ConcentratorConfig {
    /// Width of each time bucket, in seconds.
    ///
    /// Defaults to 10.
    bucket_interval: u64,

    /// Number of bucket widths kept in memory before a bucket is flushed.
    ///
    /// Defaults to 2.
    buffer_len: usize,

    /// Default environment to use when traces don't provide one.
    ///
    /// Defaults to "none".
    default_env: String,

    /// Default hostname to use when traces don't provide one.
    ///
    /// Defaults to empty string (no fallback).
    hostname: String,

    /// Version of the agent, reported in every payload envelope.
    agent_version: String,

    /// Enables aggregation of peer related tags (e.g., `peer.service`, `db.instance`, etc.).
    ///
    /// Defaults to `true`.
    peer_tags_aggregation: bool,

    /// Deprecated alias for `peer_tags_aggregation`.
    ///
    /// Defaults to `false`.
    peer_service_aggregation: bool,

    /// Supplementary peer tags that go beyond the defaults.
    peer_tags: Vec<String>,

    /// Computes stats for spans with an eligible `span.kind` (server, consumer, client, producer).
    ///
    /// Defaults to `true`.
    compute_stats_by_span_kind: bool,

    /// Enabled feature flags.
    features: Vec<String>,

    /// Orchestrator, when running on Fargate.
    fargate_orchestrator: Option<String>,
}

impl ConcentratorConfig {
    /// Builds the configuration from a generic configuration.
    ///
    /// Fields are read from the `apm_config` section, except `hostname` which is read from the top level. Missing
    /// fields take their default value.
    ///
    /// # Errors
    ///
    /// If a field is present but has the wrong type, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        let mut this = Self::default();

        if let Some(v) = config.try_get_typed("apm_config.bucket_interval")? {
            this.bucket_interval = v;
        }
        if let Some(v) = config.try_get_typed("apm_config.buffer_len")? {
            this.buffer_len = v;
        }
        if let Some(v) = config.try_get_typed("apm_config.default_env")? {
            this.default_env = v;
        }
        if let Some(v) = config.try_get_typed("hostname")? {
            this.hostname = v;
        }
        if let Some(v) = config.try_get_typed("apm_config.peer_tags_aggregation")? {
            this.peer_tags_aggregation = v;
        }
        if let Some(v) = config.try_get_typed("apm_config.peer_service_aggregation")? {
            this.peer_service_aggregation = v;
        }
        if let Some(StringList(v)) = config.try_get_typed("apm_config.peer_tags")? {
            this.peer_tags = v;
        }
        if let Some(v) = config.try_get_typed("apm_config.compute_stats_by_span_kind")? {
            this.compute_stats_by_span_kind = v;
        }
        if let Some(StringList(v)) = config.try_get_typed("apm_config.features")? {
            this.features = v;
        }
        this.fargate_orchestrator = config
            .try_get_typed::<String>("apm_config.fargate_orchestrator")?
            .filter(|s| !s.is_empty());

        Ok(this)
    }

    /// Sets the bucket width, in seconds.
    pub fn with_bucket_interval(mut self, secs: u64) -> Self {
        self.bucket_interval = secs;
        self
    }

    /// Sets the number of bucket widths kept in memory.
    pub fn with_buffer_len(mut self, buffer_len: usize) -> Self {
        self.buffer_len = buffer_len;
        self
    }

    /// Sets the default environment.
    pub fn with_default_env(mut self, env: impl Into<String>) -> Self {
        self.default_env = env.into();
        self
    }

    /// Sets the default hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the agent version.
    pub fn with_agent_version(mut self, version: impl Into<String>) -> Self {
        self.agent_version = version.into();
        self
    }

    /// Enables or disables peer tags aggregation.
    pub fn with_peer_tags_aggregation(mut self, enabled: bool) -> Self {
        self.peer_tags_aggregation = enabled;
        self
    }

    /// Enables or disables peer service aggregation (deprecated).
    pub fn with_peer_service_aggregation(mut self, enabled: bool) -> Self {
        self.peer_service_aggregation = enabled;
        self
    }

    /// Sets the supplementary peer tags.
    pub fn with_peer_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peer_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables stats computation by span kind.
    pub fn with_compute_stats_by_span_kind(mut self, enabled: bool) -> Self {
        self.compute_stats_by_span_kind = enabled;
        self
    }

    /// Sets the enabled feature flags.
    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the Fargate orchestrator.
    pub fn with_fargate_orchestrator(mut self, orchestrator: impl Into<String>) -> Self {
        self.fargate_orchestrator = Some(orchestrator.into());
        self
    }

    /// Returns the bucket width.
    pub fn bucket_interval(&self) -> Duration {
        Duration::from_secs(self.bucket_interval)
    }

    /// Returns the number of bucket widths kept in memory.
    pub const fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Returns the default environment.
    pub fn default_env(&self) -> &str {
        &self.default_env
    }

    /// Returns the default hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the agent version.
    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    /// Returns `true` if peer tags should be aggregated, via either the current or the deprecated setting.
    pub const fn peer_tags_enabled(&self) -> bool {
        self.peer_tags_aggregation || self.peer_service_aggregation
    }

    /// Returns the supplementary peer tags.
    pub fn peer_tags(&self) -> &[String] {
        &self.peer_tags
    }

    /// Returns `true` if stats computation by span kind is enabled.
    pub const fn compute_stats_by_span_kind(&self) -> bool {
        self.compute_stats_by_span_kind
    }

    /// Returns `true` if the given feature flag is enabled.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Returns the Fargate orchestrator, if any.
    pub fn fargate_orchestrator(&self) -> Option<&str> {
        self.fargate_orchestrator.as_deref()
    }
}

impl Default for ConcentratorConfig {
    fn default() -> Self {
        Self {
            bucket_interval: default_bucket_interval(),
            buffer_len: default_buffer_len(),
            default_env: default_env(),
            hostname: String::new(),
            agent_version: String::new(),
            peer_tags_aggregation: default_peer_tags_aggregation(),
            peer_service_aggregation: false,
            peer_tags: Vec::new(),
            compute_stats_by_span_kind: default_compute_stats_by_span_kind(),
            features: Vec::new(),
            fargate_orchestrator: None,
        }
    }
}

/// A list of strings, given either as a sequence or as a single string separated by commas or whitespace.
struct StringList(Vec<String>);

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> de::Visitor<'vde> for Visitor {
            type Value = StringList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a sequence of strings, or a string separated by commas or whitespace")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StringList(
                    value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect(),
                ))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'vde>,
            {
                let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringList(values))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use spanstats_config::ConfigurationLoader;

    use super::*;

    #[derive(Serialize)]
    struct Apm {
        apm_config: serde_json::Value,
    }

    fn load(value: serde_json::Value) -> GenericConfiguration {
        ConfigurationLoader::default()
            .add_defaults(Apm { apm_config: value })
            .into_generic()
    }

    #[test]
    fn defaults() {
        let config = ConcentratorConfig::from_configuration(&load(serde_json::json!({}))).unwrap();
        assert_eq!(config, ConcentratorConfig::default());
        assert_eq!(config.bucket_interval(), Duration::from_secs(10));
        assert_eq!(config.buffer_len(), 2);
        assert_eq!(config.default_env(), "none");
        assert!(config.peer_tags_enabled());
        assert!(config.compute_stats_by_span_kind());
        assert!(config.fargate_orchestrator().is_none());
    }

    #[test]
    fn reads_apm_config_section() {
        let config = ConcentratorConfig::from_configuration(&load(serde_json::json!({
            "bucket_interval": 5,
            "buffer_len": 3,
            "default_env": "staging",
            "peer_tags_aggregation": false,
            "peer_service_aggregation": true,
            "peer_tags": ["zz.custom"],
            "compute_stats_by_span_kind": false,
            "features": "enable_cid_stats other",
            "fargate_orchestrator": "ECS",
        })))
        .unwrap();

        assert_eq!(config.bucket_interval(), Duration::from_secs(5));
        assert_eq!(config.buffer_len(), 3);
        assert_eq!(config.default_env(), "staging");
        assert!(config.peer_tags_enabled());
        assert_eq!(config.peer_tags(), ["zz.custom".to_string()]);
        assert!(!config.compute_stats_by_span_kind());
        assert!(config.has_feature(FEATURE_ENABLE_CID_STATS));
        assert!(config.has_feature("other"));
        assert!(!config.has_feature(FEATURE_DISABLE_CID_STATS));
        assert_eq!(config.fargate_orchestrator(), Some("ECS"));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let result = ConcentratorConfig::from_configuration(&load(serde_json::json!({ "buffer_len": "many" })));
        assert!(result.is_err());
    }

    #[test]
    fn string_list_splits_on_commas_and_whitespace() {
        let list: StringList = serde_json::from_str("\"a,b  c,,d\"").unwrap();
        assert_eq!(list.0, ["a", "b", "c", "d"]);
    }
}
