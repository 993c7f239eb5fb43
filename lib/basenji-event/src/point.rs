use std::fmt;

use serde::Serialize;

/// Type of a flushed data point, as understood by the intake.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataPointType {
    /// A point-in-time value.
    Gauge,

    /// A per-second value.
    Rate,

    /// A total over the flush interval.
    Count,
}

impl fmt::Display for DataPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gauge => "gauge",
            Self::Rate => "rate",
            Self::Count => "count",
        })
    }
}

/// A single flushed series value.
///
/// Serializes as `{"metric", "points": [[ts, value]], "tags", "host", "type", "interval"}`, with `tags` and `host`
/// set to `null` when empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataPoint {
    metric: String,
    points: Vec<(f64, f64)>,
    tags: Option<Vec<String>>,
    host: Option<String>,
    #[serde(rename = "type")]
    point_type: DataPointType,
    interval: Option<f64>,
}

impl DataPoint {
    /// Creates a data point with a single `(timestamp, value)` pair.
    pub fn new(metric: impl Into<String>, timestamp: f64, value: f64, point_type: DataPointType) -> Self {
        Self {
            metric: metric.into(),
            points: vec![(timestamp, value)],
            tags: None,
            host: None,
            point_type,
            interval: None,
        }
    }

    /// Sets the tags. An empty list is stored as no tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = if tags.is_empty() { None } else { Some(tags) };
        self
    }

    /// Sets the host. An empty host is stored as no host.
    pub fn with_host(mut self, host: Option<&str>) -> Self {
        self.host = host.filter(|h| !h.is_empty()).map(String::from);
        self
    }

    /// Sets the flush interval, in seconds.
    pub fn with_interval(mut self, interval: f64) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Returns the series name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Returns all `(timestamp, value)` pairs.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Returns the timestamp of the first point.
    pub fn timestamp(&self) -> f64 {
        self.points.first().map_or(0.0, |(ts, _)| *ts)
    }

    /// Returns the value of the first point.
    pub fn value(&self) -> f64 {
        self.points.first().map_or(0.0, |(_, v)| *v)
    }

    /// Returns the tags, if any.
    pub fn tags(&self) -> Option<&[String]> {
        self.tags.as_deref()
    }

    /// Returns the host, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns the point type.
    pub fn point_type(&self) -> DataPointType {
        self.point_type
    }

    /// Returns the flush interval, if any.
    pub fn interval(&self) -> Option<f64> {
        self.interval
    }
}
