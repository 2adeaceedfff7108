//! Standalone span stats agent.
//!
//! Runs a span concentrator with its flush loop, writing every flushed payload to the log, until interrupted. On
//! interrupt, all remaining stats are flushed before the process exits.

#![deny(warnings)]
#![deny(missing_docs)]
use std::{path::PathBuf, sync::Arc, time::Instant};

use clap::Parser;
use spanstats::{now_nanos, Concentrator, ConcentratorConfig};
use spanstats_config::{ConfigurationLoader, GenericConfiguration};
use spanstats_error::{ErrorContext as _, GenericError};
use tracing::{error, info};

mod logging;
use self::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration};

mod writer;
use self::writer::LogWriter;

const ENV_PREFIX: &str = "SPANSTATS";

/// Span stats agent.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/spanstats/spanstats.yaml")]
    config: PathBuf,

    /// Fail if the configuration file cannot be read, instead of running with defaults.
    #[arg(long)]
    require_config: bool,

    /// Print every non-empty flushed payload to stdout as JSON.
    #[arg(long)]
    print_payloads: bool,
}

#[tokio::main]
async fn main() {
    let started = Instant::now();
    let cli = Cli::parse();

    let configuration = match load_configuration(&cli) {
        Ok(configuration) => configuration,
        Err(e) => {
            fatal_and_exit(format!("failed to load configuration: {:?}", e));
            return;
        }
    };

    match LoggingConfiguration::from_configuration(&configuration).and_then(|config| initialize_logging(&config)) {
        Ok(()) => {}
        Err(e) => fatal_and_exit(format!("failed to initialize logging: {:?}", e)),
    }

    match run(started, &cli, &configuration).await {
        Ok(()) => info!("Span stats agent stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn load_configuration(cli: &Cli) -> Result<GenericConfiguration, GenericError> {
    let loader = if cli.require_config {
        ConfigurationLoader::default()
            .from_yaml(&cli.config)
            .with_error_context(|| format!("Failed to load configuration from '{}'.", cli.config.display()))?
    } else {
        ConfigurationLoader::default().try_from_yaml(&cli.config)
    };

    let configuration = loader
        .from_environment(ENV_PREFIX)
        .error_context("Environment variable prefix should not be empty.")?
        .into_generic();

    Ok(configuration)
}

async fn run(started: Instant, cli: &Cli, configuration: &GenericConfiguration) -> Result<(), GenericError> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        process_id = std::process::id(),
        "Span stats agent starting..."
    );

    let config = ConcentratorConfig::from_configuration(configuration)
        .error_context("Failed to load concentrator configuration.")?
        .with_agent_version(env!("CARGO_PKG_VERSION"));

    let writer = Arc::new(LogWriter::new(cli.print_payloads));
    let concentrator =
        Concentrator::new(&config, writer, now_nanos()).error_context("Failed to create concentrator.")?;
    let running = concentrator.start().error_context("Failed to start concentrator.")?;

    info!(
        init_time_ms = started.elapsed().as_millis(),
        bucket_interval = ?config.bucket_interval(),
        buffer_len = config.buffer_len(),
        peer_tag_keys = running.concentrator().peer_tag_keys().len(),
        "Span stats agent started."
    );

    tokio::signal::ctrl_c()
        .await
        .error_context("Failed to listen for the interrupt signal.")?;

    info!("Received interrupt signal. Flushing remaining stats...");
    running.stop().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn cli(config: PathBuf, require_config: bool) -> Cli {
        Cli {
            config,
            require_config,
            print_payloads: false,
        }
    }

    #[test]
    fn parses_arguments() {
        let cli = Cli::parse_from(["spanstats-agent", "--config", "/tmp/stats.yaml", "--print-payloads"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/stats.yaml"));
        assert!(cli.print_payloads);
        assert!(!cli.require_config);
    }

    #[test]
    fn missing_optional_config_file_is_ignored() {
        let configuration = load_configuration(&cli(PathBuf::from("/nonexistent/spanstats.yaml"), false)).unwrap();
        let config = ConcentratorConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config.buffer_len(), 2);
    }

    #[test]
    fn missing_required_config_file_fails() {
        assert!(load_configuration(&cli(PathBuf::from("/nonexistent/spanstats.yaml"), true)).is_err());
    }

    #[test]
    fn reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hostname: agent-host\napm_config:\n  bucket_interval: 5\n  buffer_len: 3").unwrap();

        let configuration = load_configuration(&cli(file.path().to_path_buf(), true)).unwrap();
        let config = ConcentratorConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config.hostname(), "agent-host");
        assert_eq!(config.bucket_interval().as_secs(), 5);
        assert_eq!(config.buffer_len(), 3);
    }
}
