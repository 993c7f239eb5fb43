use std::fmt;

use basenji_codec::dogstatsd::PacketValue;
use basenji_context::{
    hash::{new_fast_hashset, FastHashSet},
    Context,
};
use basenji_event::{DataPoint, DataPointType};
use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use crate::{
    config::{HistogramConfiguration, HistogramStatistic},
    formatter::{Formatter, PointDescriptor},
};

/// Kind of metric a sample is aggregated as.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricType {
    /// Last value wins, emitted at the sample's own timestamp when it has one.
    Gauge,

    /// Last value wins, always emitted at the flush timestamp.
    BucketGauge,

    /// Sum of values, emitted as a count.
    Count,

    /// Sum of increases between successive raw counter readings, emitted as a count.
    MonotonicCount,

    /// Sum of values scaled by sample rate, emitted as a per-second rate.
    Counter,

    /// Distribution of values, emitted as summary statistics and percentiles.
    Histogram,

    /// Number of unique values, emitted as a gauge.
    Set,

    /// Per-second change between the two most recent values, emitted as a gauge.
    Rate,
}

impl MetricType {
    /// Returns the metric type for the given wire type token, if it is a known one.
    pub fn from_wire(token: &str) -> Option<Self> {
        match token {
            "g" => Some(Self::Gauge),
            "c" => Some(Self::Counter),
            "h" | "ms" => Some(Self::Histogram),
            "s" => Some(Self::Set),
            "ct" => Some(Self::Count),
            "ct-c" => Some(Self::MonotonicCount),
            "_dd-r" => Some(Self::Rate),
            _ => None,
        }
    }

    /// Returns `true` if this type accepts string values.
    pub fn accepts_strings(&self) -> bool {
        matches!(self, Self::Set)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gauge => "gauge",
            Self::BucketGauge => "bucket_gauge",
            Self::Count => "count",
            Self::MonotonicCount => "monotonic_count",
            Self::Counter => "counter",
            Self::Histogram => "histogram",
            Self::Set => "set",
            Self::Rate => "rate",
        })
    }
}

/// Maps wire type tokens and requested metric types to the types an aggregator actually supports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricTypeResolver {
    /// Every metric type is accepted.
    Full,

    /// Only gauges, counters, histograms, and sets are accepted, with gauges aggregated as bucket gauges.
    Bucketed,
}

impl MetricTypeResolver {
    /// Resolves a wire type token.
    ///
    /// Returns `None` if the token is unknown or its type isn't accepted.
    pub fn resolve(&self, token: &str) -> Option<MetricType> {
        MetricType::from_wire(token).and_then(|metric_type| self.accept(metric_type))
    }

    /// Maps a requested metric type to the type it is aggregated as.
    ///
    /// Returns `None` if the type isn't accepted.
    pub fn accept(&self, metric_type: MetricType) -> Option<MetricType> {
        match self {
            Self::Full => Some(metric_type),
            Self::Bucketed => match metric_type {
                MetricType::Gauge | MetricType::BucketGauge => Some(MetricType::BucketGauge),
                MetricType::Counter | MetricType::Histogram | MetricType::Set => Some(metric_type),
                MetricType::Count | MetricType::MonotonicCount | MetricType::Rate => None,
            },
        }
    }
}

/// A sample value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleValue<'a> {
    Integer(i64),
    Float(f64),
    String(&'a str),
}

impl SampleValue<'_> {
    /// Returns the value as a number, or `None` if it is a string.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::String(_) => None,
        }
    }
}

impl From<f64> for SampleValue<'_> {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for SampleValue<'_> {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl<'a> From<&'a str> for SampleValue<'a> {
    fn from(value: &'a str) -> Self {
        Self::String(value)
    }
}

impl<'a> From<PacketValue<'a>> for SampleValue<'a> {
    fn from(value: PacketValue<'a>) -> Self {
        match value {
            PacketValue::Integer(value) => Self::Integer(value),
            PacketValue::Float(value) => Self::Float(value),
            PacketValue::String(value) => Self::String(value),
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum SetMember {
    Number(OrderedFloat<f64>),
    String(String),
}

/// Shared inputs for flushing metrics.
pub(crate) struct FlushContext<'a> {
    pub formatter: &'a dyn Formatter,
    pub histogram: &'a HistogramConfiguration,
    pub interval: f64,
}

impl FlushContext<'_> {
    fn point(
        &self, metric: &str, context: &Context, timestamp: f64, value: f64, point_type: DataPointType,
    ) -> DataPoint {
        self.formatter.format(PointDescriptor {
            metric,
            context,
            timestamp,
            value,
            point_type,
            interval: self.interval,
        })
    }
}

enum MetricKind {
    Gauge {
        value: Option<f64>,
        timestamp: Option<f64>,
    },
    BucketGauge {
        value: Option<f64>,
    },
    Count {
        value: Option<f64>,
    },
    MonotonicCount {
        curr: Option<f64>,
        count: Option<f64>,
    },
    Counter {
        value: f64,
    },
    Histogram {
        samples: Vec<f64>,
        count: u64,
    },
    Set {
        members: FastHashSet<SetMember>,
    },
    Rate {
        samples: Vec<(i64, f64)>,
    },
}

/// Accumulated state of a single metric.
pub(crate) struct MetricState {
    last_sample_time: Option<f64>,
    kind: MetricKind,
}

impl MetricState {
    pub fn new(metric_type: MetricType) -> Self {
        let kind = match metric_type {
            MetricType::Gauge => MetricKind::Gauge {
                value: None,
                timestamp: None,
            },
            MetricType::BucketGauge => MetricKind::BucketGauge { value: None },
            MetricType::Count => MetricKind::Count { value: None },
            MetricType::MonotonicCount => MetricKind::MonotonicCount { curr: None, count: None },
            MetricType::Counter => MetricKind::Counter { value: 0.0 },
            MetricType::Histogram => MetricKind::Histogram {
                samples: Vec::new(),
                count: 0,
            },
            MetricType::Set => MetricKind::Set {
                members: new_fast_hashset(),
            },
            MetricType::Rate => MetricKind::Rate { samples: Vec::new() },
        };

        Self {
            last_sample_time: None,
            kind,
        }
    }

    /// Creates a counter that has already been sampled at `last_sample_time` but holds no value.
    pub fn zero_counter(last_sample_time: f64) -> Self {
        Self {
            last_sample_time: Some(last_sample_time),
            kind: MetricKind::Counter { value: 0.0 },
        }
    }

    /// Returns the wall-clock time of the most recent sample, if there has been one.
    pub fn last_sample_time(&self) -> Option<f64> {
        self.last_sample_time
    }

    /// Returns `true` if this metric has not been sampled since `cutoff`.
    pub fn is_expired(&self, cutoff: f64) -> bool {
        self.last_sample_time.is_none_or(|last| last < cutoff)
    }

    pub fn is_counter(&self) -> bool {
        matches!(self.kind, MetricKind::Counter { .. })
    }

    /// Adds a sample.
    ///
    /// `now` is recorded as the last sample time. String values are only accepted by sets, and are ignored by every
    /// other kind.
    pub fn sample(&mut self, value: SampleValue<'_>, sample_rate: f64, timestamp: Option<f64>, now: f64) {
        if let MetricKind::Set { members } = &mut self.kind {
            let member = match value {
                SampleValue::String(s) => SetMember::String(s.to_string()),
                SampleValue::Integer(i) => SetMember::Number(OrderedFloat(i as f64)),
                SampleValue::Float(f) => SetMember::Number(OrderedFloat(f)),
            };
            members.insert(member);
            self.last_sample_time = Some(now);
            return;
        }

        let Some(value) = value.as_f64() else {
            debug!("Ignoring string value for non-set metric.");
            return;
        };

        match &mut self.kind {
            MetricKind::Gauge {
                value: current,
                timestamp: current_ts,
            } => {
                *current = Some(value);
                *current_ts = timestamp;
            }
            MetricKind::BucketGauge { value: current } => *current = Some(value),
            MetricKind::Count { value: current } => *current = Some(current.unwrap_or(0.0) + value),
            MetricKind::MonotonicCount { curr, count } => {
                if let Some(previous) = curr.replace(value) {
                    *count = Some(count.unwrap_or(0.0) + (value - previous).max(0.0));
                }
            }
            MetricKind::Counter { value: current } => *current += value * sample_rate_multiplier(sample_rate) as f64,
            MetricKind::Histogram { samples, count } => {
                samples.push(value);
                *count += sample_rate_multiplier(sample_rate);
            }
            MetricKind::Rate { samples } => {
                let ts = timestamp.unwrap_or(now) as i64;
                samples.push((ts, value));
            }
            MetricKind::Set { .. } => {}
        }

        self.last_sample_time = Some(now);
    }

    /// Flushes accumulated state into data points, resetting it for the next interval.
    pub fn flush(&mut self, context: &Context, timestamp: f64, fctx: &FlushContext<'_>, points: &mut Vec<DataPoint>) {
        let name = context.name();
        match &mut self.kind {
            MetricKind::Gauge {
                value,
                timestamp: sample_ts,
            } => {
                if let Some(value) = value.take() {
                    let ts = sample_ts.take().unwrap_or(timestamp);
                    points.push(fctx.point(name, context, ts, value, DataPointType::Gauge));
                }
            }
            MetricKind::BucketGauge { value } => {
                if let Some(value) = value.take() {
                    points.push(fctx.point(name, context, timestamp, value, DataPointType::Gauge));
                }
            }
            MetricKind::Count { value } => {
                if let Some(value) = value.take() {
                    points.push(fctx.point(name, context, timestamp, value, DataPointType::Count));
                }
            }
            MetricKind::MonotonicCount { count, .. } => {
                // The last reading is kept so the next interval's delta starts from it.
                if let Some(count) = count.take() {
                    points.push(fctx.point(name, context, timestamp, count, DataPointType::Count));
                }
            }
            MetricKind::Counter { value } => {
                let rate = *value / fctx.interval;
                *value = 0.0;
                points.push(fctx.point(name, context, timestamp, rate, DataPointType::Rate));
            }
            MetricKind::Histogram { samples, count } => {
                if *count > 0 && !samples.is_empty() {
                    flush_histogram(context, timestamp, samples, *count, fctx, points);
                }
                samples.clear();
                *count = 0;
            }
            MetricKind::Set { members } => {
                if !members.is_empty() {
                    let cardinality = members.len() as f64;
                    points.push(fctx.point(name, context, timestamp, cardinality, DataPointType::Gauge));
                    members.clear();
                }
            }
            MetricKind::Rate { samples } => {
                if samples.len() >= 2 {
                    let (t1, v1) = samples[samples.len() - 2];
                    let (t2, v2) = samples[samples.len() - 1];
                    if let Some(rate) = compute_rate(name, (t1, v1), (t2, v2)) {
                        points.push(fctx.point(name, context, timestamp, rate, DataPointType::Gauge));
                    }

                    let keep_from = samples.len() - 1;
                    samples.drain(..keep_from);
                }
            }
        }
    }
}

/// Number of samples a single sample stands in for, given its sample rate.
fn sample_rate_multiplier(sample_rate: f64) -> u64 {
    if sample_rate > 0.0 && sample_rate <= 1.0 {
        (1.0 / sample_rate).round() as u64
    } else {
        1
    }
}

fn compute_rate(name: &str, (t1, v1): (i64, f64), (t2, v2): (i64, f64)) -> Option<f64> {
    let elapsed = t2 - t1;
    if elapsed == 0 {
        warn!(metric = name, "Rate metric has an interval of 0. Not flushing.");
        return None;
    }

    let delta = v2 - v1;
    if delta < 0.0 {
        info!(metric = name, "Rate metric has a negative delta. Counter may have been reset.");
        return None;
    }

    Some(delta / elapsed as f64)
}

fn flush_histogram(
    context: &Context, timestamp: f64, samples: &mut [f64], count: u64, fctx: &FlushContext<'_>,
    points: &mut Vec<DataPoint>,
) {
    samples.sort_unstable_by(f64::total_cmp);

    let len = samples.len();
    let sum: f64 = samples.iter().sum();
    let max_idx = len - 1;
    let median_idx = ((len as f64 / 2.0) - 1.0).round().clamp(0.0, max_idx as f64) as usize;

    let mut name = String::with_capacity(context.name().len() + 16);
    for statistic in fctx.histogram.statistics() {
        let value = match statistic {
            HistogramStatistic::Count => count as f64 / fctx.interval,
            HistogramStatistic::Sum => sum,
            HistogramStatistic::Minimum => samples[0],
            HistogramStatistic::Maximum => samples[max_idx],
            HistogramStatistic::Average => sum / len as f64,
            HistogramStatistic::Median => samples[median_idx],
            HistogramStatistic::Percentile { q, .. } => {
                let rank = (q * len as f64).round() - 1.0;
                samples[rank.clamp(0.0, max_idx as f64) as usize]
            }
        };
        let point_type = if statistic.is_rate_statistic() {
            DataPointType::Rate
        } else {
            DataPointType::Gauge
        };

        name.clear();
        name.push_str(context.name());
        name.push('.');
        name.push_str(statistic.suffix());
        points.push(fctx.point(&name, context, timestamp, value, point_type));
    }
}
