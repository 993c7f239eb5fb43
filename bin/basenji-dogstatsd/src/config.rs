use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use basenji_config::{deser::PermissiveBool, ConfigurationLoader, GenericConfiguration};
use basenji_error::{ErrorContext as _, GenericError};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_with::serde_as;

/// Prefix of environment variables that override configuration keys, as in `BASENJI_DOGSTATSD_PORT`.
const ENV_PREFIX: &str = "BASENJI";

const fn default_port() -> u16 {
    8125
}

const fn default_buffer_size() -> usize {
    8192
}

#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Path to a YAML configuration file.
    ///
    /// Settings in the file are overridden by `BASENJI_`-prefixed environment variables.
    #[arg(global = true, short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Subcommand to run. Defaults to `run`.
    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand)]
pub enum Action {
    /// Listen for DogStatsD packets and flush aggregated metrics every interval.
    Run,

    /// Aggregate a file of DogStatsD packets and print the flushed output.
    Replay(ReplayConfig),
}

#[derive(Args)]
pub struct ReplayConfig {
    /// File of newline-delimited DogStatsD packets.
    pub path: PathBuf,

    /// Time the packets are submitted at, in seconds since the Unix epoch. Defaults to the current time.
    #[arg(long)]
    pub at: Option<f64>,
}

/// Aggregation strategy.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorKind {
    /// Fixed-width time buckets, with zero values for idle counters.
    #[default]
    Bucket,

    /// One state per context, flushed in full every interval.
    Context,
}

/// DogStatsD server configuration.
#[serde_as]
#[derive(Debug, Deserialize)]
pub struct ServerConfiguration {
    #[serde(rename = "dogstatsd_port", default = "default_port")]
    pub port: u16,

    /// Listen on all interfaces instead of only loopback.
    #[serde_as(as = "PermissiveBool")]
    #[serde(rename = "dogstatsd_non_local_traffic", default)]
    pub non_local_traffic: bool,

    /// Receive buffer size. Longer datagrams are truncated.
    #[serde(rename = "dogstatsd_buffer_size", default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(rename = "dogstatsd_aggregator", default)]
    pub aggregator: AggregatorKind,

    /// File flushed payloads are appended to. Standard output if unset.
    #[serde(rename = "dogstatsd_output_path", default)]
    pub output_path: Option<PathBuf>,

    #[serde_as(as = "PermissiveBool")]
    #[serde(rename = "dogstatsd_stats_enable", default)]
    stats_enable: bool,

    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    send_dogstatsd_metrics: bool,
}

impl ServerConfiguration {
    /// Creates a new `ServerConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `ServerConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Returns the address to listen on.
    pub fn listen_address(&self) -> SocketAddr {
        let ip = if self.non_local_traffic {
            Ipv4Addr::UNSPECIFIED
        } else {
            Ipv4Addr::LOCALHOST
        };
        SocketAddr::from((ip, self.port))
    }

    /// Returns `true` if the packet count self-metric should be submitted on every flush.
    pub fn packet_count_metric(&self) -> bool {
        self.stats_enable || self.send_dogstatsd_metrics
    }
}

/// Loads configuration from the given YAML file, if any, and the environment.
pub fn load_configuration(path: Option<&Path>) -> Result<GenericConfiguration, GenericError> {
    let mut loader = ConfigurationLoader::default();
    if let Some(path) = path {
        loader = loader
            .from_yaml(path)
            .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?;
    }

    let loader = loader
        .from_environment(ENV_PREFIX)
        .error_context("Failed to load configuration from environment.")?;
    Ok(loader.into_generic())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde_json::json;

    use super::*;

    fn server_config(values: serde_json::Value) -> Result<ServerConfiguration, GenericError> {
        let config = ConfigurationLoader::default().with_values(values).into_generic();
        ServerConfiguration::from_configuration(&config)
    }

    #[test]
    fn defaults() {
        let config = server_config(json!({})).unwrap();

        assert_eq!(config.port, 8125);
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.aggregator, AggregatorKind::Bucket);
        assert_eq!(config.output_path, None);
        assert!(!config.packet_count_metric());
        assert_eq!(config.listen_address(), "127.0.0.1:8125".parse().unwrap());
    }

    #[test]
    fn overrides() {
        let config = server_config(json!({
            "dogstatsd_port": 9125,
            "dogstatsd_non_local_traffic": "true",
            "dogstatsd_aggregator": "context",
            "dogstatsd_output_path": "/tmp/series.jsonl",
        }))
        .unwrap();

        assert_eq!(config.aggregator, AggregatorKind::Context);
        assert_eq!(config.output_path, Some(PathBuf::from("/tmp/series.jsonl")));
        assert_eq!(config.listen_address(), "0.0.0.0:9125".parse().unwrap());
    }

    #[test]
    fn either_flag_enables_packet_count_metric() {
        assert!(server_config(json!({ "dogstatsd_stats_enable": true }))
            .unwrap()
            .packet_count_metric());
        assert!(server_config(json!({ "send_dogstatsd_metrics": 1 }))
            .unwrap()
            .packet_count_metric());
    }

    #[test]
    fn unknown_aggregator_rejected() {
        assert!(server_config(json!({ "dogstatsd_aggregator": "sliding" })).is_err());
    }

    #[test]
    fn load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"dogstatsd_port: 9999\ndogstatsd_interval: 15\n").unwrap();

        let configuration = load_configuration(Some(file.path())).unwrap();
        let config = ServerConfiguration::from_configuration(&configuration).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(configuration.get_typed::<f64>("dogstatsd_interval").unwrap(), 15.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_configuration(Some(Path::new("/nonexistent/basenji.yaml"))).is_err());
    }
}
