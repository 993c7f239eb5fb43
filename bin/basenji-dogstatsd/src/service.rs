use std::time::{Duration, SystemTime, UNIX_EPOCH};

use basenji_aggregator::{Aggregator, AggregatorConfiguration, BucketAggregator, ContextAggregator};
use basenji_error::GenericError;
use bytes::Bytes;
use tokio::{
    select,
    sync::mpsc,
    time::{interval_at, Instant},
};
use tracing::debug;

use crate::{
    config::AggregatorKind,
    sink::{FlushPayload, OutputSink},
};

/// Self-metric carrying the number of metric packets received during the interval.
const PACKET_COUNT_METRIC: &str = "datadog.dogstatsd.packet.count";

/// Returns the current time in seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Builds the aggregator for the given strategy.
pub fn build_aggregator(
    kind: AggregatorKind, config: &AggregatorConfiguration,
) -> Result<Box<dyn Aggregator + Send>, GenericError> {
    let aggregator: Box<dyn Aggregator + Send> = match kind {
        AggregatorKind::Bucket => Box::new(BucketAggregator::from_configuration(config)?),
        AggregatorKind::Context => Box::new(ContextAggregator::from_configuration(config)?),
    };
    Ok(aggregator)
}

/// Sole owner of the aggregator.
///
/// Payloads arrive over a channel and are applied in order. Flushes are driven by a ticker, so submission and
/// flushing never overlap.
pub struct DogStatsDService {
    aggregator: Box<dyn Aggregator + Send>,
    sink: OutputSink,
    packet_count_metric: bool,
}

impl DogStatsDService {
    pub fn new(aggregator: Box<dyn Aggregator + Send>, sink: OutputSink, packet_count_metric: bool) -> Self {
        Self {
            aggregator,
            sink,
            packet_count_metric,
        }
    }

    pub fn handle_payload(&mut self, payload: &[u8], now: f64) {
        match self.aggregator.submit_packets(payload, now) {
            Ok(outcome) if !outcome.is_clean() => {
                debug!(
                    applied = outcome.applied,
                    skipped = outcome.errors.len(),
                    "Skipped malformed packets in payload."
                );
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Dropped remainder of payload after a malformed packet."),
        }
    }

    pub fn flush(&mut self, now: f64) -> FlushPayload {
        if self.packet_count_metric {
            self.aggregator.send_packet_count(PACKET_COUNT_METRIC, now);
        }

        FlushPayload {
            series: self.aggregator.flush(now),
            events: self.aggregator.flush_events(),
            service_checks: self.aggregator.flush_service_checks(),
        }
    }

    /// Flushes and writes the payload to the sink, if there is anything to write.
    pub fn flush_to_sink(&mut self, now: f64) -> Result<(), GenericError> {
        let payload = self.flush(now);
        if payload.is_empty() {
            return Ok(());
        }

        debug!(
            series = payload.series.len(),
            events = payload.events.len(),
            service_checks = payload.service_checks.len(),
            "Writing flush payload."
        );
        self.sink.write_payload(&payload)
    }

    /// Applies payloads as they arrive and flushes every `flush_interval`.
    ///
    /// Once every sender of `payloads` is dropped, a final flush is performed and the service stops.
    pub async fn run(mut self, mut payloads: mpsc::Receiver<Bytes>, flush_interval: Duration) -> Result<(), GenericError> {
        let mut flush = interval_at(Instant::now() + flush_interval, flush_interval);

        debug!("DogStatsD service started.");

        loop {
            select! {
                _ = flush.tick() => self.flush_to_sink(unix_now())?,
                maybe_payload = payloads.recv() => match maybe_payload {
                    Some(payload) => self.handle_payload(&payload, unix_now()),
                    None => break,
                },
            }
        }

        self.flush_to_sink(unix_now())?;
        debug!("DogStatsD service stopped.");

        Ok(())
    }
}
