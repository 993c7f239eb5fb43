//! DogStatsD metric aggregation.
//!
//! Two aggregators are provided. [`ContextAggregator`] keeps a single state per context and flushes everything it has
//! on every flush. [`BucketAggregator`] groups samples into fixed-width time buckets and only flushes buckets that have
//! closed, keeping sparse counters continuous by emitting zero values for them.
//!
//! Both implement [`Aggregator`], which also covers raw packet submission and the event and service check buffers.

mod aggregator;
pub use self::aggregator::{
    Aggregator, AggregatorConfigurationError, AggregatorCore, ParseFailureMode, SubmitError, SubmitOutcome,
};

mod bucket;
pub use self::bucket::BucketAggregator;

mod config;
pub use self::config::{AggregatorConfiguration, HistogramConfiguration, HistogramStatistic};

mod context;
pub use self::context::ContextAggregator;

mod formatter;
pub use self::formatter::{formatter_for_namespace, DefaultFormatter, Formatter, NamespacedFormatter, PointDescriptor};

mod metric;
pub use self::metric::{MetricType, MetricTypeResolver, SampleValue};

mod sample;
pub use self::sample::MetricSample;

mod stats;
pub use self::stats::{AggregatorStats, StatsRecorder};

mod telemetry;
