//! Logging.

use serde::Deserialize;
use spanstats_config::GenericConfiguration;
use spanstats_error::{generic_error, ErrorContext as _, GenericError};
use tracing_subscriber::{
    filter::LevelFilter, fmt::Layer, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _,
    Registry,
};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_false() -> bool {
    false
}

#[derive(Deserialize)]
pub struct LoggingConfiguration {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_false")]
    pub log_format_json: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` instance from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let logging_config = config.as_typed()?;
        Ok(logging_config)
    }
}

#[derive(Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(EnvFilter);

impl LogLevel {
    pub fn as_env_filter(&self) -> EnvFilter {
        self.0.clone()
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(EnvFilter::default().add_directive(level.into()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(value)
            .map(Self)
            .error_context("Failed to parse valid log level.")
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Events are written to standard error, either as JSON objects or in a human-readable format, and filtered by the
/// configured log level.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    let layer: Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync> = if config.log_format_json {
        Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        Layer::new().with_target(true).with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use spanstats_config::ConfigurationLoader;

    use super::*;

    #[test]
    fn defaults_to_info() {
        let config = ConfigurationLoader::default()
            .add_defaults(serde_json::json!({}))
            .into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).unwrap();

        assert!(!logging.log_format_json);
        assert_eq!(logging.log_level.as_env_filter().max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn parses_directives() {
        let config = ConfigurationLoader::default()
            .add_defaults(serde_json::json!({ "log_level": "spanstats=debug,warn", "log_format_json": true }))
            .into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).unwrap();

        assert!(logging.log_format_json);
        assert_eq!(logging.log_level.as_env_filter().max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn rejects_empty_level() {
        assert!(LogLevel::try_from(String::new()).is_err());
        assert!(LogLevel::try_from("spanstats=loud".to_string()).is_err());
    }
}
