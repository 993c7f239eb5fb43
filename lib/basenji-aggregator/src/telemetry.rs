use metrics::{counter, gauge, Counter, Gauge};

/// Internal telemetry for an aggregator, reported through the `metrics` facade.
#[derive(Clone)]
pub(crate) struct Telemetry {
    samples_submitted: Counter,
    points_discarded: Counter,
    contexts_expired: Counter,
    parse_errors: Counter,
    points_flushed: Counter,
    active_contexts: Gauge,
}

impl Telemetry {
    pub fn new(aggregator: &'static str) -> Self {
        Self {
            samples_submitted: counter!("aggregator_samples_submitted_total", "aggregator" => aggregator),
            points_discarded: counter!("aggregator_points_discarded_total", "aggregator" => aggregator, "reason" => "too_old"),
            contexts_expired: counter!("aggregator_contexts_expired_total", "aggregator" => aggregator),
            parse_errors: counter!("aggregator_packet_parse_errors_total", "aggregator" => aggregator),
            points_flushed: counter!("aggregator_points_flushed_total", "aggregator" => aggregator),
            active_contexts: gauge!("aggregator_active_contexts", "aggregator" => aggregator),
        }
    }

    pub fn increment_samples_submitted(&self) {
        self.samples_submitted.increment(1);
    }

    pub fn increment_points_discarded(&self) {
        self.points_discarded.increment(1);
    }

    pub fn increment_parse_errors(&self) {
        self.parse_errors.increment(1);
    }

    pub fn record_flush(&self, points: usize, expired: usize, active_contexts: usize) {
        self.points_flushed.increment(points as u64);
        self.contexts_expired.increment(expired as u64);
        self.active_contexts.set(active_contexts as f64);
    }
}
