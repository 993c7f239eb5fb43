use basenji_config::{deser::CommaSeparated, deser::PermissiveBool, GenericConfiguration};
use basenji_error::GenericError;
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

const fn default_interval() -> f64 {
    10.0
}

const fn default_expiry_seconds() -> f64 {
    300.0
}

const fn default_recent_point_threshold() -> f64 {
    3600.0
}

/// A histogram statistic to calculate.
#[derive(Clone, Debug, PartialEq)]
pub enum HistogramStatistic {
    /// Number of samples, scaled by sample rate and emitted as a rate.
    Count,

    /// Sum of all samples.
    Sum,

    /// Smallest sample.
    Minimum,

    /// Largest sample.
    Maximum,

    /// Mean of all samples.
    Average,

    /// Median sample.
    Median,

    /// Nearest-rank percentile.
    Percentile {
        /// Quantile value, truncated to two decimal places.
        q: f64,

        /// Suffix to append to the metric name, such as `95percentile` for a quantile of 0.95.
        suffix: String,
    },
}

impl HistogramStatistic {
    /// Returns the suffix used for series representing this statistic.
    pub fn suffix(&self) -> &str {
        match self {
            HistogramStatistic::Count => "count",
            HistogramStatistic::Sum => "sum",
            HistogramStatistic::Minimum => "min",
            HistogramStatistic::Maximum => "max",
            HistogramStatistic::Average => "avg",
            HistogramStatistic::Median => "median",
            HistogramStatistic::Percentile { suffix, .. } => suffix,
        }
    }

    /// Returns `true` if this statistic should be represented as a rate.
    pub fn is_rate_statistic(&self) -> bool {
        matches!(self, HistogramStatistic::Count)
    }

    /// Position of this statistic in flush output. Percentiles come last.
    fn rank(&self) -> u8 {
        match self {
            HistogramStatistic::Minimum => 0,
            HistogramStatistic::Maximum => 1,
            HistogramStatistic::Median => 2,
            HistogramStatistic::Average => 3,
            HistogramStatistic::Sum => 4,
            HistogramStatistic::Count => 5,
            HistogramStatistic::Percentile { .. } => 6,
        }
    }

    fn from_aggregate(aggregate: &str) -> Option<Self> {
        match aggregate {
            "count" => Some(HistogramStatistic::Count),
            "sum" => Some(HistogramStatistic::Sum),
            "min" => Some(HistogramStatistic::Minimum),
            "max" => Some(HistogramStatistic::Maximum),
            "avg" => Some(HistogramStatistic::Average),
            "median" => Some(HistogramStatistic::Median),
            _ => None,
        }
    }

    fn from_percentile(raw: &str) -> Option<Self> {
        let quantile = raw.parse::<f64>().ok()?;
        if !(quantile > 0.0 && quantile < 1.0) {
            return None;
        }

        // The nudge keeps `0.29 * 100` from truncating to 28.
        let hundredths = (quantile * 100.0 + 1e-9).trunc() as u32;
        if hundredths == 0 {
            return None;
        }

        Some(HistogramStatistic::Percentile {
            q: f64::from(hundredths) / 100.0,
            suffix: format!("{}percentile", hundredths),
        })
    }
}

#[serde_as]
#[derive(Deserialize)]
#[serde(default)]
struct RawHistogramConfiguration {
    /// Aggregates to calculate over histograms.
    ///
    /// Available aggregates: `count`, `sum`, `min`, `max`, `avg`, and `median`. Accepts a comma-separated string or
    /// a list.
    #[serde_as(as = "CommaSeparated")]
    histogram_aggregates: Vec<String>,

    /// Percentiles to calculate over histograms, in quantile form (0.95 for the 95th percentile).
    ///
    /// Values must fall strictly between 0 and 1, and are truncated to two decimal places.
    #[serde_as(as = "CommaSeparated")]
    histogram_percentiles: Vec<String>,
}

impl Default for RawHistogramConfiguration {
    fn default() -> Self {
        Self {
            histogram_aggregates: vec!["max".into(), "median".into(), "avg".into(), "count".into()],
            histogram_percentiles: vec!["0.95".into()],
        }
    }
}

/// Histogram statistics to emit on flush.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "RawHistogramConfiguration")]
pub struct HistogramConfiguration {
    statistics: Vec<HistogramStatistic>,
}

impl HistogramConfiguration {
    /// Builds a configuration from raw aggregate and percentile strings.
    ///
    /// Unknown aggregates and percentiles that aren't numbers in `(0, 1)` are logged and dropped. Duplicates are
    /// removed. Statistics are ordered as min, max, median, avg, sum, and count, followed by percentiles in the
    /// order given.
    pub fn from_raw<A, P>(aggregates: A, percentiles: P) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let mut statistics = Vec::new();

        for aggregate in aggregates {
            let aggregate = aggregate.as_ref().trim();
            match HistogramStatistic::from_aggregate(aggregate) {
                Some(statistic) => push_unique(&mut statistics, statistic),
                None => warn!(aggregate, "Ignoring invalid histogram aggregate."),
            }
        }

        for percentile in percentiles {
            let percentile = percentile.as_ref().trim();
            match HistogramStatistic::from_percentile(percentile) {
                Some(statistic) => push_unique(&mut statistics, statistic),
                None => warn!(
                    percentile,
                    "Ignoring invalid histogram percentile. Percentiles must be numbers strictly between 0 and 1."
                ),
            }
        }

        statistics.sort_by_key(HistogramStatistic::rank);

        Self { statistics }
    }

    /// Returns the statistics to calculate, in output order.
    pub fn statistics(&self) -> &[HistogramStatistic] {
        &self.statistics
    }
}

fn push_unique(statistics: &mut Vec<HistogramStatistic>, statistic: HistogramStatistic) {
    if !statistics.contains(&statistic) {
        statistics.push(statistic);
    }
}

impl Default for HistogramConfiguration {
    fn default() -> Self {
        RawHistogramConfiguration::default().into()
    }
}

impl From<RawHistogramConfiguration> for HistogramConfiguration {
    fn from(raw: RawHistogramConfiguration) -> Self {
        Self::from_raw(raw.histogram_aggregates, raw.histogram_percentiles)
    }
}

/// Aggregator configuration.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct AggregatorConfiguration {
    /// Hostname attached to metrics, events, and service checks that don't carry their own.
    ///
    /// Defaults to no hostname.
    #[serde(default)]
    pub hostname: String,

    /// Width of aggregation buckets, in seconds.
    ///
    /// Also used as the interval when converting counters and histogram counts into rates.
    ///
    /// Defaults to 10 seconds.
    #[serde(rename = "dogstatsd_interval", default = "default_interval")]
    pub interval: f64,

    /// How long a context may go without new samples before it is removed, in seconds.
    ///
    /// Defaults to 300 seconds.
    #[serde(rename = "dogstatsd_expiry_seconds", default = "default_expiry_seconds")]
    pub expiry_seconds: f64,

    /// Maximum age of a timestamped sample, in seconds.
    ///
    /// Samples carrying a timestamp older than this are discarded.
    ///
    /// Defaults to 3600 seconds.
    #[serde(default = "default_recent_point_threshold")]
    pub recent_point_threshold: f64,

    /// Whether payloads are decoded as lossy UTF-8 before parsing.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub utf8_decoding: bool,

    /// Namespace prepended to every metric name, separated by a period.
    ///
    /// Defaults to no namespace.
    #[serde(rename = "statsd_metric_namespace", default)]
    pub namespace: Option<String>,

    /// Whether the first malformed line in a payload aborts the rest of that payload.
    ///
    /// Defaults to `false`, which skips malformed lines and keeps processing.
    #[serde_as(as = "PermissiveBool")]
    #[serde(rename = "dogstatsd_abort_on_parse_error", default)]
    pub abort_on_parse_error: bool,

    #[serde(flatten)]
    pub histogram: HistogramConfiguration,
}

impl AggregatorConfiguration {
    /// Creates a new `AggregatorConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `AggregatorConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self {
            hostname: String::new(),
            interval: default_interval(),
            expiry_seconds: default_expiry_seconds(),
            recent_point_threshold: default_recent_point_threshold(),
            utf8_decoding: false,
            namespace: None,
            abort_on_parse_error: false,
            histogram: HistogramConfiguration::default(),
        }
    }

    /// Sets the default hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the aggregation interval, in seconds.
    pub fn with_interval(mut self, interval: f64) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the context expiry, in seconds.
    pub fn with_expiry_seconds(mut self, expiry_seconds: f64) -> Self {
        self.expiry_seconds = expiry_seconds;
        self
    }

    /// Sets the maximum accepted age of timestamped samples, in seconds.
    pub fn with_recent_point_threshold(mut self, recent_point_threshold: f64) -> Self {
        self.recent_point_threshold = recent_point_threshold;
        self
    }

    /// Sets the metric namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    /// Sets the histogram statistics.
    pub fn with_histogram(mut self, histogram: HistogramConfiguration) -> Self {
        self.histogram = histogram;
        self
    }
}

#[cfg(test)]
mod tests {
    use basenji_config::ConfigurationLoader;

    use super::*;

    fn percentile(q: f64, suffix: &str) -> HistogramStatistic {
        HistogramStatistic::Percentile {
            q,
            suffix: suffix.to_string(),
        }
    }

    #[test]
    fn default_statistics() {
        let config = HistogramConfiguration::default();
        assert_eq!(
            config.statistics(),
            &[
                HistogramStatistic::Maximum,
                HistogramStatistic::Median,
                HistogramStatistic::Average,
                HistogramStatistic::Count,
                percentile(0.95, "95percentile"),
            ]
        );
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let config = HistogramConfiguration::from_raw(
            ["min", "bogus", " sum ", "min"],
            ["0.5", "1", "0", "-0.2", "abc", "1.5", "0.999", "0.29"],
        );
        assert_eq!(
            config.statistics(),
            &[
                HistogramStatistic::Minimum,
                HistogramStatistic::Sum,
                percentile(0.5, "50percentile"),
                percentile(0.99, "99percentile"),
                percentile(0.29, "29percentile"),
            ]
        );
    }

    #[test]
    fn aggregates_are_reordered() {
        let config = HistogramConfiguration::from_raw(["count", "avg", "max", "min"], ["0.9", "0.5"]);
        assert_eq!(
            config.statistics(),
            &[
                HistogramStatistic::Minimum,
                HistogramStatistic::Maximum,
                HistogramStatistic::Average,
                HistogramStatistic::Count,
                percentile(0.9, "90percentile"),
                percentile(0.5, "50percentile"),
            ]
        );
    }

    #[test]
    fn tiny_percentile_truncates_to_nothing() {
        let config = HistogramConfiguration::from_raw(Vec::<String>::new(), ["0.001"]);
        assert!(config.statistics().is_empty());
    }

    #[test]
    fn from_generic_configuration() {
        let config = ConfigurationLoader::default()
            .with_values(serde_json::json!({
                "hostname": "agent-host",
                "dogstatsd_interval": 15,
                "histogram_aggregates": "min, max",
                "histogram_percentiles": [0.5, 0.99],
                "utf8_decoding": "true",
                "statsd_metric_namespace": "app",
            }))
            .into_generic();

        let config = AggregatorConfiguration::from_configuration(&config).expect("should deserialize");
        assert_eq!(config.hostname, "agent-host");
        assert_eq!(config.interval, 15.0);
        assert_eq!(config.expiry_seconds, 300.0);
        assert_eq!(config.recent_point_threshold, 3600.0);
        assert!(config.utf8_decoding);
        assert!(!config.abort_on_parse_error);
        assert_eq!(config.namespace.as_deref(), Some("app"));
        assert_eq!(
            config.histogram.statistics(),
            &[
                HistogramStatistic::Minimum,
                HistogramStatistic::Maximum,
                percentile(0.5, "50percentile"),
                percentile(0.99, "99percentile"),
            ]
        );
    }

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = ConfigurationLoader::default().into_generic();
        let config = AggregatorConfiguration::from_configuration(&config).expect("should deserialize");
        assert_eq!(config.interval, 10.0);
        assert_eq!(config.histogram.statistics(), HistogramConfiguration::default().statistics());
    }
}
