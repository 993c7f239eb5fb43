//! DogStatsD server.
//!
//! Listens for DogStatsD packets over UDP, aggregates them, and writes every flush as a line of JSON to standard
//! output or a file.

use std::time::Duration;

use basenji_aggregator::AggregatorConfiguration;
use basenji_app::prelude::*;
use basenji_config::GenericConfiguration;
use basenji_error::{ErrorContext as _, GenericError};
use clap::Parser as _;
use tokio::{net::UdpSocket, sync::mpsc};
use tracing::{error, info};

mod config;
use self::config::{load_configuration, Action, Cli, ReplayConfig, ServerConfiguration};

mod listener;
use self::listener::run_listener;

mod service;
use self::service::{build_aggregator, unix_now, DogStatsDService};

mod sink;
use self::sink::OutputSink;

/// Capacity of the channel between the listener and the aggregator, in datagrams.
const PAYLOAD_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = match load_configuration(cli.config.as_deref()) {
        Ok(configuration) => configuration,
        Err(e) => return fatal_and_exit(format!("failed to load configuration: {:#}", e)),
    };

    let logging_config = match LoggingConfiguration::from_configuration(&configuration) {
        Ok(logging_config) => logging_config,
        Err(e) => return fatal_and_exit(format!("invalid logging configuration: {:#}", e)),
    };
    if let Err(e) = initialize_logging(&logging_config) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    let result = match cli.action.unwrap_or(Action::Run) {
        Action::Run => run(&configuration).await,
        Action::Replay(replay_config) => replay(&configuration, replay_config).await,
    };

    match result {
        Ok(()) => info!("basenji stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(configuration: &GenericConfiguration) -> Result<(), GenericError> {
    let server_config =
        ServerConfiguration::from_configuration(configuration).error_context("Failed to load server configuration.")?;
    let aggregator_config = AggregatorConfiguration::from_configuration(configuration)
        .error_context("Failed to load aggregator configuration.")?;

    let aggregator = build_aggregator(server_config.aggregator, &aggregator_config)?;
    let sink = OutputSink::from_output_path(server_config.output_path.as_deref())?;
    let service = DogStatsDService::new(aggregator, sink, server_config.packet_count_metric());

    let listen_addr = server_config.listen_address();
    let socket = UdpSocket::bind(listen_addr)
        .await
        .with_error_context(|| format!("Failed to bind DogStatsD listener to {}.", listen_addr))?;

    info!(
        %listen_addr,
        aggregator = ?server_config.aggregator,
        interval_secs = aggregator_config.interval,
        "basenji starting..."
    );

    let (payloads_tx, payloads_rx) = mpsc::channel(PAYLOAD_CHANNEL_CAPACITY);
    let listener = tokio::spawn(run_listener(socket, server_config.buffer_size, payloads_tx));
    let service = tokio::spawn(service.run(payloads_rx, Duration::from_secs_f64(aggregator_config.interval)));

    tokio::signal::ctrl_c()
        .await
        .error_context("Failed to listen for shutdown signal.")?;
    info!("Received shutdown signal. Flushing remaining metrics...");

    // Stopping the listener drops the last sender, which makes the service flush and exit.
    listener.abort();
    service.await.error_context("DogStatsD service task failed.")?
}

async fn replay(configuration: &GenericConfiguration, replay_config: ReplayConfig) -> Result<(), GenericError> {
    let server_config =
        ServerConfiguration::from_configuration(configuration).error_context("Failed to load server configuration.")?;
    let aggregator_config = AggregatorConfiguration::from_configuration(configuration)
        .error_context("Failed to load aggregator configuration.")?;

    let payload = tokio::fs::read(&replay_config.path)
        .await
        .with_error_context(|| format!("Failed to read '{}'.", replay_config.path.display()))?;

    let aggregator = build_aggregator(server_config.aggregator, &aggregator_config)?;
    let mut service = DogStatsDService::new(aggregator, OutputSink::stdout(), server_config.packet_count_metric());

    let now = replay_config.at.unwrap_or_else(unix_now);
    service.handle_payload(&payload, now);

    // One interval later, the bucket holding `now` has closed.
    service.flush_to_sink(now + aggregator_config.interval)
}
