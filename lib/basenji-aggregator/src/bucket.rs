use std::collections::BTreeMap;

use basenji_context::{
    hash::{new_fast_hashmap, new_fast_hashset, FastHashMap, FastHashSet},
    Context,
};
use basenji_event::DataPoint;
use tracing::{debug, warn};

use crate::{
    aggregator::{Aggregator, AggregatorConfigurationError, AggregatorCore, InvalidInterval},
    config::AggregatorConfiguration,
    metric::{FlushContext, MetricState, MetricTypeResolver},
    sample::MetricSample,
};

/// Aggregates metrics into fixed-width time buckets.
///
/// Samples land in the bucket containing their timestamp, or the current time if they have none, where buckets are
/// aligned to multiples of the interval. A bucket is flushed as a whole once the current time has moved past its end,
/// with every point stamped at the bucket start.
///
/// ## Zero-value counters
///
/// Counters are tracked beyond the bucket they were flushed from. For every later bucket, and every interval that
/// passes with no buckets at all, a counter that wasn't sampled is flushed with a value of zero, until it goes
/// unsampled for longer than the expiry period. This keeps sparse counters continuous downstream.
///
/// Only gauges, counters, histograms, and sets are supported; other metric types are dropped.
pub struct BucketAggregator {
    core: AggregatorCore,
    interval_secs: u64,
    buckets: BTreeMap<u64, FastHashMap<Context, MetricState>>,
    last_sample_time_by_context: FastHashMap<Context, f64>,
    last_flush_cutoff: u64,
}

impl BucketAggregator {
    /// Creates a new `BucketAggregator` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the interval isn't a whole number of seconds greater than zero, or the expiry or recent point threshold is
    /// negative, an error is returned.
    pub fn from_configuration(config: &AggregatorConfiguration) -> Result<Self, AggregatorConfigurationError> {
        if !(config.interval >= 1.0 && config.interval.fract() == 0.0) {
            return InvalidInterval {
                interval: config.interval,
                reason: "bucket width must be a whole number of seconds, at least 1",
            }
            .fail();
        }

        Ok(Self {
            core: AggregatorCore::from_configuration(config, "bucket")?,
            interval_secs: config.interval as u64,
            buckets: BTreeMap::new(),
            last_sample_time_by_context: new_fast_hashmap(),
            last_flush_cutoff: 0,
        })
    }

    /// Returns the number of open buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the number of counters being tracked for zero-value reporting.
    pub fn tracked_counters(&self) -> usize {
        self.last_sample_time_by_context.len()
    }

    fn bucket_start(&self, timestamp: f64) -> u64 {
        align_to_bucket_start(timestamp, self.interval_secs)
    }
}

impl Aggregator for BucketAggregator {
    fn core(&self) -> &AggregatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregatorCore {
        &mut self.core
    }

    fn submit_metric(&mut self, sample: MetricSample<'_>, now: f64) {
        let Some(metric_type) = MetricTypeResolver::Bucketed.accept(sample.metric_type()) else {
            return;
        };

        if self.core.discard_if_too_old(&sample, now) {
            return;
        }

        let timestamp = sample.timestamp().unwrap_or(now);
        let bucket_start = self.bucket_start(timestamp);
        let context = self.core.resolve_context(&sample);

        self.buckets
            .entry(bucket_start)
            .or_insert_with(new_fast_hashmap)
            .entry(context)
            .or_insert_with(|| MetricState::new(metric_type))
            .sample(sample.value(), sample.sample_rate(), Some(timestamp), now);
    }

    fn flush(&mut self, now: f64) -> Vec<DataPoint> {
        let flush_cutoff = self.bucket_start(now);
        let expiry_cutoff = now - self.core.expiry_seconds();
        let fctx = self.core.flush_context();

        debug!(buckets = self.buckets.len(), flush_cutoff, "Flushing buckets.");

        let mut points = Vec::new();
        let mut expired = 0;
        let mut closed_any = false;

        // Buckets come out oldest first, so zero-value counters are emitted in timestamp order.
        while let Some(entry) = self.buckets.first_entry() {
            if *entry.key() >= flush_cutoff {
                break;
            }

            let (bucket_start, contexts) = entry.remove_entry();
            closed_any = true;
            debug!(bucket_start, contexts = contexts.len(), "Flushing bucket.");

            let mut sampled_counters = new_fast_hashset();
            for (context, mut metric) in contexts {
                if metric.is_expired(expiry_cutoff) {
                    warn!(%context, bucket_start, "Context in closing bucket has not been sampled recently. Expiring.");
                    self.last_sample_time_by_context.remove(&context);
                    expired += 1;
                    continue;
                }

                metric.flush(&context, bucket_start as f64, &fctx, &mut points);
                if metric.is_counter() {
                    if let Some(last_sample_time) = metric.last_sample_time() {
                        self.last_sample_time_by_context
                            .insert(context.clone(), last_sample_time);
                    }
                    sampled_counters.insert(context);
                }
            }

            expired += flush_zero_value_counters(
                &mut self.last_sample_time_by_context,
                &sampled_counters,
                bucket_start as f64,
                expiry_cutoff,
                &fctx,
                &mut points,
            );
        }

        // With no closed buckets, counters still report zero once per interval of silence.
        if !closed_any && flush_cutoff >= self.last_flush_cutoff + self.interval_secs {
            expired += flush_zero_value_counters(
                &mut self.last_sample_time_by_context,
                &new_fast_hashset(),
                (flush_cutoff - self.interval_secs) as f64,
                expiry_cutoff,
                &fctx,
                &mut points,
            );
        }

        self.last_flush_cutoff = flush_cutoff;

        let contexts = self.buckets.values().map(|bucket| bucket.len()).sum::<usize>()
            + self.last_sample_time_by_context.len();
        self.core.finish_flush(now, &points, expired, contexts, None);
        points
    }
}

/// Flushes a zero value for every tracked counter not in `sampled`, removing counters that have expired.
///
/// Returns the number of counters removed.
fn flush_zero_value_counters(
    tracked: &mut FastHashMap<Context, f64>, sampled: &FastHashSet<Context>, timestamp: f64, expiry_cutoff: f64,
    fctx: &FlushContext<'_>, points: &mut Vec<DataPoint>,
) -> usize {
    let mut expired = 0;
    let mut flushed = 0;

    tracked.retain(|context, last_sample_time| {
        if sampled.contains(context) {
            return true;
        }

        if *last_sample_time < expiry_cutoff {
            debug!(%context, "Counter has not been sampled recently. Expiring.");
            expired += 1;
            return false;
        }

        MetricState::zero_counter(*last_sample_time).flush(context, timestamp, fctx, points);
        flushed += 1;
        true
    });

    if flushed > 0 {
        debug!(flushed, timestamp, "Flushed zero-value counters.");
    }
    expired
}

fn align_to_bucket_start(timestamp: f64, bucket_width_secs: u64) -> u64 {
    let timestamp = timestamp.max(0.0) as u64;
    timestamp - (timestamp % bucket_width_secs)
}

#[cfg(test)]
mod tests {
    use basenji_event::DataPointType;
    use proptest::prelude::*;

    use super::*;
    use crate::metric::MetricType;

    const BUCKET_WIDTH_SECS: u64 = 10;
    const BUCKET_WIDTH: f64 = BUCKET_WIDTH_SECS as f64;
    const EXPIRY_SECS: f64 = 300.0;

    // Aligned with a bucket start, so `T0 + n * BUCKET_WIDTH` is always the start of the n-th bucket after it.
    const T0: f64 = 1_000_000.0;
    const FIRST_INSERT_TS: f64 = T0 + 5.0;
    const FIRST_FLUSH_TS: f64 = T0 + BUCKET_WIDTH;

    fn aggregator() -> BucketAggregator {
        BucketAggregator::from_configuration(&AggregatorConfiguration::with_defaults()).expect("valid configuration")
    }

    fn find<'a>(points: &'a [DataPoint], metric: &str) -> Vec<&'a DataPoint> {
        points.iter().filter(|p| p.metric() == metric).collect()
    }

    #[test]
    fn bucket_alignment() {
        assert_eq!(align_to_bucket_start(0.0, 10), 0);
        assert_eq!(align_to_bucket_start(9.9, 10), 0);
        assert_eq!(align_to_bucket_start(10.0, 10), 10);
        assert_eq!(align_to_bucket_start(1_234.5, 10), 1_230);
        assert_eq!(align_to_bucket_start(-5.0, 10), 0);
    }

    #[test]
    fn open_bucket_is_not_flushed() {
        let mut agg = aggregator();
        agg.increment("requests", 1.0, &[], None, FIRST_INSERT_TS);

        assert!(agg.flush(FIRST_INSERT_TS + 1.0).is_empty());
        assert_eq!(agg.bucket_count(), 1);

        let points = agg.flush(FIRST_FLUSH_TS);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].points(), &[(T0, 1.0 / BUCKET_WIDTH)]);
        assert_eq!(points[0].point_type(), DataPointType::Rate);
        assert_eq!(agg.bucket_count(), 0);
    }

    #[test]
    fn samples_are_grouped_by_bucket() {
        let mut agg = aggregator();
        agg.increment("requests", 1.0, &[], None, T0 + 1.0);
        agg.increment("requests", 2.0, &[], None, T0 + 9.0);
        agg.increment("requests", 4.0, &[], None, T0 + 10.0);

        let points = agg.flush(T0 + 2.0 * BUCKET_WIDTH);
        assert_eq!(
            points.iter().map(|p| p.points()[0]).collect::<Vec<_>>(),
            vec![(T0, 0.3), (T0 + BUCKET_WIDTH, 0.4)]
        );
    }

    #[test]
    fn timestamped_samples_use_their_own_bucket() {
        let mut agg = aggregator();
        let sample = MetricSample::new("temperature", 21.0, MetricType::Gauge).with_timestamp(Some(T0 - 25.0));
        agg.submit_metric(sample, FIRST_INSERT_TS);

        let points = agg.flush(FIRST_INSERT_TS);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].points(), &[(T0 - 30.0, 21.0)]);
    }

    #[test]
    fn gauges_are_stamped_at_bucket_start() {
        let mut agg = aggregator();
        agg.gauge("temperature", 20.0, &[], None, T0 + 3.0);
        agg.gauge("temperature", 22.0, &[], None, T0 + 7.0);

        let points = agg.flush(FIRST_FLUSH_TS);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].points(), &[(T0, 22.0)]);
        assert_eq!(points[0].point_type(), DataPointType::Gauge);
    }

    #[test]
    fn unsupported_types_are_dropped() {
        let mut agg = aggregator();
        agg.submit_packets(b"a:1|ct\nb:1|ct-c\nc:1|_dd-r\nd:1|g\ne:1|h\nf:x|s", FIRST_INSERT_TS)
            .expect("should parse");
        agg.count("g", 1.0, &[], None, FIRST_INSERT_TS);
        agg.monotonic_count("h", 1.0, &[], None, FIRST_INSERT_TS);
        agg.rate("i", 1.0, &[], None, FIRST_INSERT_TS);

        let points = agg.flush(FIRST_FLUSH_TS);
        let mut names: Vec<&str> = points.iter().map(|p| p.metric()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["d", "e.95percentile", "e.avg", "e.count", "e.max", "e.median", "f"]);
    }

    #[test]
    fn counter_zero_values_until_expiry() {
        let mut agg = aggregator();
        agg.increment("requests", 1.0, &["env:prod"], None, FIRST_INSERT_TS);

        let points = agg.flush(FIRST_FLUSH_TS);
        assert_eq!(points[0].points(), &[(T0, 0.1)]);
        assert_eq!(agg.tracked_counters(), 1);

        // One zero per interval of silence, stamped at the start of the interval that just ended.
        let mut now = FIRST_FLUSH_TS;
        loop {
            now += BUCKET_WIDTH;
            if now - EXPIRY_SECS > FIRST_INSERT_TS {
                break;
            }

            let points = agg.flush(now);
            assert_eq!(points.len(), 1, "expected a zero value at {}", now);
            assert_eq!(points[0].points(), &[(now - BUCKET_WIDTH, 0.0)]);
            assert_eq!(points[0].tags(), Some(&["env:prod".to_string()][..]));
            assert_eq!(points[0].point_type(), DataPointType::Rate);
        }

        // Past the expiry, the counter stops appearing entirely.
        assert!(agg.flush(now).is_empty());
        assert_eq!(agg.tracked_counters(), 0);
        assert!(agg.flush(now + BUCKET_WIDTH).is_empty());
    }

    #[test]
    fn zero_values_are_not_repeated_within_an_interval() {
        let mut agg = aggregator();
        agg.increment("requests", 1.0, &[], None, FIRST_INSERT_TS);
        agg.flush(FIRST_FLUSH_TS);

        let second = FIRST_FLUSH_TS + BUCKET_WIDTH;
        assert_eq!(agg.flush(second).len(), 1);
        assert!(agg.flush(second + 1.0).is_empty());
        assert!(agg.flush(second + 9.0).is_empty());
        assert_eq!(agg.flush(second + BUCKET_WIDTH).len(), 1);
    }

    #[test]
    fn zero_values_fill_buckets_without_the_counter() {
        let mut agg = aggregator();
        agg.increment("requests", 1.0, &[], None, FIRST_INSERT_TS);
        agg.gauge("temperature", 20.0, &[], None, FIRST_INSERT_TS + BUCKET_WIDTH);
        agg.increment("requests", 2.0, &[], None, FIRST_INSERT_TS + 2.0 * BUCKET_WIDTH);

        let points = agg.flush(T0 + 3.0 * BUCKET_WIDTH);
        let requests: Vec<_> = find(&points, "requests").iter().map(|p| p.points()[0]).collect();
        assert_eq!(
            requests,
            vec![(T0, 0.1), (T0 + BUCKET_WIDTH, 0.0), (T0 + 2.0 * BUCKET_WIDTH, 0.2)]
        );
        assert_eq!(find(&points, "temperature").len(), 1);
    }

    #[test]
    fn only_counters_report_zero_values() {
        let mut agg = aggregator();
        agg.gauge("temperature", 20.0, &[], None, FIRST_INSERT_TS);
        agg.histogram("latency", 1.0, &[], None, FIRST_INSERT_TS);
        agg.set("users", "alice", &[], None, FIRST_INSERT_TS);
        assert!(!agg.flush(FIRST_FLUSH_TS).is_empty());

        assert!(agg.flush(FIRST_FLUSH_TS + BUCKET_WIDTH).is_empty());
        assert_eq!(agg.tracked_counters(), 0);
    }

    #[test]
    fn expired_context_in_closing_bucket_is_dropped() {
        let mut agg = aggregator();
        agg.increment("requests", 1.0, &[], None, FIRST_INSERT_TS);

        // Flushing long after the sample was taken drops it rather than reporting it.
        assert!(agg.flush(FIRST_INSERT_TS + EXPIRY_SECS + 1.0).is_empty());
        assert_eq!(agg.bucket_count(), 0);
        assert_eq!(agg.tracked_counters(), 0);
    }

    #[test]
    fn discarded_points_never_flush() {
        let mut agg = aggregator();
        let old = MetricSample::new("requests", 1.0, MetricType::Counter).with_timestamp(Some(FIRST_INSERT_TS - 3_601.0));
        agg.submit_metric(old, FIRST_INSERT_TS);
        assert_eq!(agg.bucket_count(), 0);

        assert!(agg.flush(FIRST_FLUSH_TS).is_empty());
        assert!(agg.flush(FIRST_FLUSH_TS + BUCKET_WIDTH).is_empty());
        assert_eq!(agg.core().stats().snapshot().total_discarded_points, 1);
    }

    #[test]
    fn multiple_contexts_per_bucket() {
        let mut agg = aggregator();
        agg.submit_packets(
            b"requests:1|c|#a,b\nrequests:1|c|#b,a\nrequests:1|c|#c\nusers:x|s\nusers:y|s\nusers:x|s",
            FIRST_INSERT_TS,
        )
        .expect("should parse");

        let points = agg.flush(FIRST_FLUSH_TS);
        let requests = find(&points, "requests");
        assert_eq!(requests.len(), 2);
        let ab = requests
            .iter()
            .find(|p| p.tags() == Some(&["a".to_string(), "b".to_string()][..]))
            .expect("a,b context should be flushed");
        assert_eq!(ab.value(), 0.2);
        assert_eq!(find(&points, "users")[0].value(), 2.0);
    }

    #[test]
    fn fractional_interval_is_rejected() {
        for interval in [0.0, 0.5, 2.5, -10.0, f64::NAN] {
            let config = AggregatorConfiguration::with_defaults().with_interval(interval);
            assert!(matches!(
                BucketAggregator::from_configuration(&config),
                Err(AggregatorConfigurationError::InvalidInterval { .. })
            ));
        }
    }

    proptest! {
        #[test]
        fn counter_total_is_preserved(offsets in proptest::collection::vec(0u64..100, 1..50)) {
            let mut agg = aggregator();
            for offset in &offsets {
                agg.increment("requests", 1.0, &[], None, T0 + *offset as f64);
            }

            let points = agg.flush(T0 + 200.0);
            let total: f64 = points.iter().map(|p| p.value() * BUCKET_WIDTH).sum();
            prop_assert!((total - offsets.len() as f64).abs() < 1e-9);

            let mut timestamps: Vec<f64> = points.iter().map(DataPoint::timestamp).collect();
            let sorted = {
                let mut sorted = timestamps.clone();
                sorted.sort_by(f64::total_cmp);
                sorted
            };
            prop_assert_eq!(&timestamps, &sorted);
            timestamps.dedup();
            prop_assert_eq!(timestamps.len(), points.len());
        }
    }
}
