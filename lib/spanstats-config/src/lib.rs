//! Loading and querying of layered configuration.
//!
//! Configuration is assembled from an ordered list of sources. Later sources override earlier ones: defaults first,
//! then a YAML file, then prefixed environment variables.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{borrow::Cow, collections::HashSet, path::Path, sync::Arc};

use figment::{
    error::Kind,
    providers::{Env, Format as _, Serialized, Yaml},
    value::{Dict, Map},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use spanstats_error::GenericError;
use tracing::debug;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// The configuration file could not be read or parsed.
    #[snafu(display("Failed to load configuration file '{}': {}", path, reason))]
    InvalidFile {
        /// Path of the file.
        path: String,

        /// Why loading failed.
        reason: String,
    },

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text listing the keys, including environment variable spellings, that would set the field.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field had a different data type than expected.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to query configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum LookupSource {
    Environment { prefix: String },
}

impl LookupSource {
    fn transform_key(&self, key: &str) -> String {
        match self {
            // Prefix is already uppercased and carries its trailing underscore.
            LookupSource::Environment { prefix } => format!("{}{}", prefix, key.replace('.', "_").to_uppercase()),
        }
    }
}

/// A provider whose data was read and parsed eagerly, so that load errors surface when the source is added.
struct ResolvedProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl ResolvedProvider {
    fn from_yaml(path: &Path) -> Result<Self, ConfigurationError> {
        let invalid_file = |reason: String| ConfigurationError::InvalidFile {
            path: path.to_string_lossy().into_owned(),
            reason,
        };

        let file_data = std::fs::read_to_string(path).map_err(|e| invalid_file(e.to_string()))?;
        let data = Yaml::string(&file_data).data().map_err(|e| invalid_file(e.to_string()))?;

        Ok(Self {
            data,
            metadata: Metadata::from("YAML file", path),
        })
    }
}

impl Provider for ResolvedProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Ok(self.data.clone())
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        self.0.data()
    }
}

/// Builder for a [`GenericConfiguration`].
///
/// Sources take priority in the order they are added: anything added later overrides keys set by sources added
/// before it.
#[derive(Default)]
pub struct ConfigurationLoader {
    lookup_sources: HashSet<LookupSource>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Adds a set of default values, serialized from `defaults`.
    pub fn add_defaults<T>(mut self, defaults: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.providers
            .push(BoxedProvider(Box::new(Serialized::defaults(defaults))));
        self
    }

    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, or is not valid YAML, an error is returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let provider = ResolvedProvider::from_yaml(path.as_ref())?;
        self.providers.push(BoxedProvider(Box::new(provider)));
        Ok(self)
    }

    /// Loads the given YAML configuration file, ignoring it if it is missing or invalid.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match ResolvedProvider::from_yaml(path.as_ref()) {
            Ok(provider) => self.providers.push(BoxedProvider(Box::new(provider))),
            Err(e) => {
                debug!(
                    error = %e,
                    file_path = %path.as_ref().to_string_lossy(),
                    "Unable to read YAML configuration file. Ignoring."
                );
            }
        }
        self
    }

    /// Loads configuration from environment variables starting with `prefix`.
    ///
    /// An underscore is appended to the prefix if it does not already end with one, so a prefix of `spanstats`
    /// matches `SPANSTATS_LOG_LEVEL`. Matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, or the environment cannot be read, an error is returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // `Env` is not `Send + Sync`, so snapshot it into a serialized provider.
        let values = Env::prefixed(&prefix)
            .data()
            .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
        if let Some(default_dict) = values.get(&Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
            self.lookup_sources.insert(LookupSource::Environment { prefix });
        }
        Ok(self)
    }

    /// Merges all sources into a [`GenericConfiguration`].
    pub fn into_generic(self) -> GenericConfiguration {
        let figment = self
            .providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        GenericConfiguration {
            inner: Arc::new(Inner {
                figment,
                lookup_sources: self.lookup_sources,
            }),
        }
    }
}

struct Inner {
    figment: Figment,
    lookup_sources: HashSet<LookupSource>,
}

/// Merged configuration, queryable by key or as a whole.
///
/// Keys use periods to indicate nesting: `apm_config.bucket_interval` looks up `bucket_interval` within the
/// `apm_config` map. The flat spelling, with periods replaced by underscores, is also consulted so that environment
/// variables such as `SPANSTATS_APM_CONFIG_BUCKET_INTERVAL` match nested keys.
#[derive(Clone)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        // Flat keys only ever come from environment variables, which are the highest priority source, so they win
        // over the nested spelling when both are present.
        let flat_key = key.replace('.', "_");
        let effective_key = if flat_key != key && self.inner.figment.contains(&flat_key) {
            flat_key.as_str()
        } else {
            key
        };

        self.inner
            .figment
            .extract_inner(effective_key)
            .map_err(|e| from_figment_error(&self.inner.lookup_sources, e))
    }

    /// Gets a configuration value by key.
    ///
    /// # Errors
    ///
    /// If the key does not exist, or the value cannot be deserialized into `T`, an error is returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, falling back to `T::default()` on any error.
    pub fn get_typed_or_default<'a, T>(&self, key: &str) -> T
    where
        T: Default + Deserialize<'a>,
    {
        self.get(key).unwrap_or_default()
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// # Errors
    ///
    /// If the key exists but the value cannot be deserialized into `T`, an error is returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized into `T`, an error is returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.lookup_sources, e))
    }
}

fn from_figment_error(lookup_sources: &HashSet<LookupSource>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = lookup_sources
                .iter()
                .map(|source| source.transform_key(&field))
                .collect::<Vec<_>>();
            valid_keys.insert(0, field.to_string());

            let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));
            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}
