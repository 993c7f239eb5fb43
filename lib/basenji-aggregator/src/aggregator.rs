use std::{collections::BTreeMap, sync::Arc};

use basenji_codec::{
    dogstatsd::{
        DogStatsDPacket, DogstatsdCodec, DogstatsdCodecConfiguration, EventPacket, MetricValuePacket, ParseError,
        ServiceCheckPacket,
    },
    framing::LineFramer,
};
use basenji_context::Context;
use basenji_event::{DataPoint, EventD, ServiceCheck};
use snafu::Snafu;
use tracing::{debug, warn};

use crate::{
    config::{AggregatorConfiguration, HistogramConfiguration},
    formatter::{formatter_for_namespace, Formatter},
    metric::{FlushContext, MetricType, SampleValue},
    sample::MetricSample,
    stats::{FlushSummary, StatsRecorder},
    telemetry::Telemetry,
};

/// Tag whose value overrides the hostname of the sample carrying it.
const HOST_TAG_PREFIX: &str = "host:";

/// An aggregator configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum AggregatorConfigurationError {
    /// The aggregation interval is unusable.
    #[snafu(display("invalid aggregation interval {}: {}", interval, reason))]
    InvalidInterval {
        /// The configured interval.
        interval: f64,

        /// What the interval must be instead.
        reason: &'static str,
    },

    /// A duration setting is negative or not a number.
    #[snafu(display("'{}' must be a non-negative number of seconds, got {}", setting, value))]
    InvalidDuration {
        /// Name of the setting.
        setting: &'static str,

        /// The configured value.
        value: f64,
    },
}

/// A payload submission error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SubmitError {
    /// A line of the payload could not be parsed.
    #[snafu(display("failed to parse line {} of payload: {}", line, source))]
    Parse {
        /// One-based position of the line among the non-empty lines of the payload.
        line: usize,

        /// The underlying parse error.
        source: ParseError,
    },
}

/// How malformed lines in a payload are handled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ParseFailureMode {
    /// The first malformed line stops processing, and the lines after it are dropped.
    ///
    /// Lines before the malformed one have already been applied.
    AbortRemaining,

    /// Malformed lines are skipped and reported, and every valid line is applied.
    #[default]
    SkipLine,
}

/// Result of submitting a payload.
#[derive(Debug, Default)]
pub struct SubmitOutcome {
    /// Number of lines successfully parsed and applied.
    pub applied: usize,

    /// Errors for lines that were skipped.
    pub errors: Vec<SubmitError>,
}

impl SubmitOutcome {
    /// Returns `true` if every line was applied.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// State and behavior shared by every aggregator: configuration, event and service check buffers, packet counters,
/// and statistics.
pub struct AggregatorCore {
    hostname: Option<String>,
    interval: f64,
    expiry_seconds: f64,
    recent_point_threshold: f64,
    histogram: HistogramConfiguration,
    formatter: Box<dyn Formatter>,
    codec: DogstatsdCodec,
    failure_mode: ParseFailureMode,

    events: Vec<EventD>,
    service_checks: Vec<ServiceCheck>,
    count: u64,
    event_count: u64,
    service_check_count: u64,
    total_count: u64,
    num_discarded_old_points: u64,

    stats: Arc<StatsRecorder>,
    telemetry: Telemetry,
}

impl AggregatorCore {
    pub(crate) fn from_configuration(
        config: &AggregatorConfiguration, aggregator: &'static str,
    ) -> Result<Self, AggregatorConfigurationError> {
        if !(config.interval.is_finite() && config.interval > 0.0) {
            return InvalidInterval {
                interval: config.interval,
                reason: "must be a positive number of seconds",
            }
            .fail();
        }
        check_duration("dogstatsd_expiry_seconds", config.expiry_seconds)?;
        check_duration("recent_point_threshold", config.recent_point_threshold)?;

        let failure_mode = if config.abort_on_parse_error {
            ParseFailureMode::AbortRemaining
        } else {
            ParseFailureMode::SkipLine
        };
        let codec_config = DogstatsdCodecConfiguration::default().with_utf8_decoding(config.utf8_decoding);

        Ok(Self {
            hostname: Some(config.hostname.clone()).filter(|h| !h.is_empty()),
            interval: config.interval,
            expiry_seconds: config.expiry_seconds,
            recent_point_threshold: config.recent_point_threshold,
            histogram: config.histogram.clone(),
            formatter: formatter_for_namespace(config.namespace.as_deref()),
            codec: DogstatsdCodec::from_configuration(codec_config),
            failure_mode,
            events: Vec::new(),
            service_checks: Vec::new(),
            count: 0,
            event_count: 0,
            service_check_count: 0,
            total_count: 0,
            num_discarded_old_points: 0,
            stats: Arc::new(StatsRecorder::default()),
            telemetry: Telemetry::new(aggregator),
        })
    }

    /// Replaces the formatter.
    pub fn set_formatter(&mut self, formatter: Box<dyn Formatter>) {
        self.formatter = formatter;
    }

    /// Sets how malformed lines in submitted payloads are handled.
    pub fn set_parse_failure_mode(&mut self, mode: ParseFailureMode) {
        self.failure_mode = mode;
    }

    /// Returns the default hostname.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Returns the aggregation interval, in seconds.
    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Returns the context expiry, in seconds.
    pub fn expiry_seconds(&self) -> f64 {
        self.expiry_seconds
    }

    /// Returns the statistics recorder.
    pub fn stats(&self) -> Arc<StatsRecorder> {
        Arc::clone(&self.stats)
    }

    /// Metric packets received since the last flush.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Events received since the last event flush.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Service checks received since the last service check flush.
    pub fn service_check_count(&self) -> u64 {
        self.service_check_count
    }

    /// Packets of every kind received before the most recent flush of their kind.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub(crate) fn flush_context(&self) -> FlushContext<'_> {
        FlushContext {
            formatter: self.formatter.as_ref(),
            histogram: &self.histogram,
            interval: self.interval,
        }
    }

    /// Resolves the context for a sample, falling back to the default hostname.
    pub(crate) fn resolve_context(&self, sample: &MetricSample<'_>) -> Context {
        let hostname = match sample.hostname() {
            Some(hostname) => Some(hostname.to_string()),
            None => self.hostname.clone(),
        };
        Context::new(sample.name(), sample.tags().iter().copied(), hostname)
    }

    /// Checks a sample's timestamp against the recent point threshold.
    ///
    /// Returns `true`, and counts the sample as discarded, if it is too old to be aggregated.
    pub(crate) fn discard_if_too_old(&mut self, sample: &MetricSample<'_>, now: f64) -> bool {
        self.telemetry.increment_samples_submitted();

        match sample.timestamp() {
            Some(timestamp) if now - timestamp.trunc() > self.recent_point_threshold => {
                debug!(
                    metric = sample.name(),
                    timestamp,
                    now,
                    "Discarding sample with a timestamp older than the recent point threshold."
                );
                self.num_discarded_old_points += 1;
                self.telemetry.increment_points_discarded();
                true
            }
            _ => false,
        }
    }

    /// Finishes a metric flush: logs and resets the discard counter, rolls the packet count into the total, and
    /// records statistics.
    pub(crate) fn finish_flush(
        &mut self, now: f64, points: &[DataPoint], expired: usize, contexts: usize,
        contexts_by_source: Option<BTreeMap<String, usize>>,
    ) {
        let discarded = std::mem::take(&mut self.num_discarded_old_points);
        if discarded > 0 {
            warn!(
                discarded,
                threshold_secs = self.recent_point_threshold,
                "Discarded points with timestamps older than the recent point threshold."
            );
        }

        let packets = std::mem::take(&mut self.count);
        self.total_count += packets;

        self.telemetry.record_flush(points.len(), expired, contexts);
        self.stats.record_flush(FlushSummary {
            now,
            packets,
            points: points.len(),
            discarded,
            expired,
            contexts,
            contexts_by_source,
        });
    }

    fn push_event(&mut self, event: EventD) {
        let event = if event.hostname().is_none() {
            let hostname = self.hostname.clone();
            event.with_hostname(hostname)
        } else {
            event
        };
        self.events.push(event);
    }

    fn push_service_check(&mut self, check: ServiceCheck) {
        let check = if check.hostname().is_none() {
            let hostname = self.hostname.clone();
            check.with_hostname(hostname)
        } else {
            check
        };
        self.service_checks.push(check);
    }

    fn take_events(&mut self) -> Vec<EventD> {
        let events = std::mem::take(&mut self.events);
        self.total_count += std::mem::take(&mut self.event_count);
        self.stats.record_events(events.len());
        debug!(events = events.len(), "Flushed events.");
        events
    }

    fn take_service_checks(&mut self) -> Vec<ServiceCheck> {
        let checks = std::mem::take(&mut self.service_checks);
        self.total_count += std::mem::take(&mut self.service_check_count);
        self.stats.record_service_checks(checks.len());
        debug!(service_checks = checks.len(), "Flushed service checks.");
        checks
    }
}

fn check_duration(setting: &'static str, value: f64) -> Result<(), AggregatorConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        InvalidDuration { setting, value }.fail()
    }
}

/// A metric aggregator.
///
/// Aggregators are synchronous and single-owner: every submission and flush takes `now`, the current wall-clock time
/// in seconds since the Unix epoch, so timing behavior is fully determined by the caller.
pub trait Aggregator {
    /// Returns the shared aggregator state.
    fn core(&self) -> &AggregatorCore;

    /// Returns the shared aggregator state, mutably.
    fn core_mut(&mut self) -> &mut AggregatorCore;

    /// Submits a single metric sample.
    ///
    /// Samples whose metric type this aggregator doesn't support are dropped.
    fn submit_metric(&mut self, sample: MetricSample<'_>, now: f64);

    /// Flushes aggregated metrics into data points.
    fn flush(&mut self, now: f64) -> Vec<DataPoint>;

    /// Parses and submits a payload of newline-delimited DogStatsD packets.
    ///
    /// Metric packets are submitted as samples, with any `host:` tag overriding the hostname of its value group.
    /// Events and service checks are buffered until [`flush_events`][Self::flush_events] and
    /// [`flush_service_checks`][Self::flush_service_checks] are called.
    ///
    /// # Errors
    ///
    /// In [`ParseFailureMode::AbortRemaining`], the first malformed line is returned as an error, and the lines after
    /// it are not processed. In [`ParseFailureMode::SkipLine`], malformed lines are collected in the returned
    /// [`SubmitOutcome`] instead, and this never fails.
    fn submit_packets(&mut self, payload: &[u8], now: f64) -> Result<SubmitOutcome, SubmitError> {
        let (codec, mode) = {
            let core = self.core();
            (core.codec.clone(), core.failure_mode)
        };

        let payload = codec.prepare_payload(payload);
        let mut outcome = SubmitOutcome::default();
        for (idx, line) in LineFramer::new(&payload).enumerate() {
            match codec.decode_packet(line) {
                Ok(packet) => {
                    submit_packet(self, packet, now);
                    outcome.applied += 1;
                }
                Err(source) => {
                    self.core().telemetry.increment_parse_errors();
                    let error = SubmitError::Parse { line: idx + 1, source };
                    match mode {
                        ParseFailureMode::AbortRemaining => return Err(error),
                        ParseFailureMode::SkipLine => {
                            debug!(%error, "Skipping malformed packet.");
                            outcome.errors.push(error);
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Buffers an event.
    ///
    /// An event without a hostname gets the default hostname.
    fn submit_event(&mut self, event: EventD) {
        self.core_mut().push_event(event);
    }

    /// Buffers a service check.
    ///
    /// A service check without a hostname gets the default hostname.
    fn submit_service_check(&mut self, check: ServiceCheck) {
        self.core_mut().push_service_check(check);
    }

    /// Drains buffered events.
    fn flush_events(&mut self) -> Vec<EventD> {
        self.core_mut().take_events()
    }

    /// Drains buffered service checks.
    fn flush_service_checks(&mut self) -> Vec<ServiceCheck> {
        self.core_mut().take_service_checks()
    }

    /// Submits a gauge.
    fn gauge(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::Gauge, tags, hostname, now);
    }

    /// Increments a counter by `value`.
    fn increment(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::Counter, tags, hostname, now);
    }

    /// Decrements a counter by `value`.
    fn decrement(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, (-value).into(), MetricType::Counter, tags, hostname, now);
    }

    /// Adds `value` to a count.
    fn count(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::Count, tags, hostname, now);
    }

    /// Submits a raw reading of a monotonically increasing counter.
    fn monotonic_count(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::MonotonicCount, tags, hostname, now);
    }

    /// Adds a value to a histogram.
    fn histogram(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::Histogram, tags, hostname, now);
    }

    /// Adds a member to a set.
    fn set(&mut self, name: &str, value: &str, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::Set, tags, hostname, now);
    }

    /// Submits a raw reading whose per-second rate of change is reported.
    fn rate(&mut self, name: &str, value: f64, tags: &[&str], hostname: Option<&str>, now: f64) {
        submit_value(self, name, value.into(), MetricType::Rate, tags, hostname, now);
    }

    /// Submits the number of metric packets received since the last flush as a gauge.
    fn send_packet_count(&mut self, name: &str, now: f64) {
        let count = self.core().count as f64;
        self.gauge(name, count, &[], None, now);
    }

    /// Returns the metric packets received since the last flush per second of `interval`, rounded to two decimal
    /// places.
    fn packets_per_second(&self, interval: f64) -> f64 {
        if interval <= 0.0 {
            return 0.0;
        }
        let rate = self.core().count as f64 / interval;
        (rate * 100.0).round() / 100.0
    }
}

fn submit_value<A: Aggregator + ?Sized>(
    aggregator: &mut A, name: &str, value: SampleValue<'_>, metric_type: MetricType, tags: &[&str],
    hostname: Option<&str>, now: f64,
) {
    let sample = MetricSample::new(name, value, metric_type)
        .with_tags(tags.iter().copied())
        .with_hostname(hostname);
    aggregator.submit_metric(sample, now);
}

fn submit_packet<A: Aggregator + ?Sized>(aggregator: &mut A, packet: DogStatsDPacket<'_>, now: f64) {
    match packet {
        DogStatsDPacket::Metric(metric) => {
            for value in metric.values {
                aggregator.core_mut().count += 1;
                if let Some(sample) = sample_from_packet(metric.name, value) {
                    aggregator.submit_metric(sample, now);
                }
            }
        }
        DogStatsDPacket::Event(event) => {
            let core = aggregator.core_mut();
            core.event_count += 1;
            let event = event_from_packet(event, now);
            core.push_event(event);
        }
        DogStatsDPacket::ServiceCheck(check) => {
            let core = aggregator.core_mut();
            core.service_check_count += 1;
            let check = service_check_from_packet(check, now);
            core.push_service_check(check);
        }
    }
}

fn sample_from_packet<'a>(name: &'a str, packet: MetricValuePacket<'a>) -> Option<MetricSample<'a>> {
    let metric_type = MetricType::from_wire(packet.metric_type)?;

    let mut hostname = None;
    let mut tags = Vec::new();
    for tag in packet.tags.into_iter().flatten() {
        match tag.strip_prefix(HOST_TAG_PREFIX) {
            Some(host) => hostname = Some(host),
            None => tags.push(tag),
        }
    }

    Some(
        MetricSample::new(name, packet.value, metric_type)
            .with_tags(tags)
            .with_hostname(hostname)
            .with_sample_rate(packet.sample_rate),
    )
}

fn unix_seconds(now: f64) -> u64 {
    now.max(0.0) as u64
}

fn event_from_packet(packet: EventPacket<'_>, now: f64) -> EventD {
    let tags = packet.tags.into_iter().flatten().map(String::from).collect();
    EventD::new(packet.title, packet.text, packet.timestamp.unwrap_or_else(|| unix_seconds(now)))
        .with_hostname(packet.hostname.map(String::from))
        .with_aggregation_key(packet.aggregation_key.map(String::from))
        .with_priority(packet.priority)
        .with_source_type_name(packet.source_type_name.map(String::from))
        .with_alert_type(packet.alert_type)
        .with_tags(tags)
}

fn service_check_from_packet(packet: ServiceCheckPacket<'_>, now: f64) -> ServiceCheck {
    ServiceCheck::new(
        packet.name,
        packet.status,
        packet.timestamp.unwrap_or_else(|| unix_seconds(now)),
    )
    .with_hostname(packet.hostname.map(String::from))
    .with_message(packet.message)
    .with_tags(packet.tags)
}
