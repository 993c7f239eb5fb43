use crate::metric::{MetricType, SampleValue};

/// A single metric sample, as submitted to an aggregator.
#[derive(Clone, Debug)]
pub struct MetricSample<'a> {
    name: &'a str,
    value: SampleValue<'a>,
    metric_type: MetricType,
    tags: Vec<&'a str>,
    hostname: Option<&'a str>,
    sample_rate: f64,
    timestamp: Option<f64>,
    source: Option<&'a str>,
}

impl<'a> MetricSample<'a> {
    /// Creates a new `MetricSample` with no tags, the aggregator's default hostname, and a sample rate of 1.
    pub fn new(name: &'a str, value: impl Into<SampleValue<'a>>, metric_type: MetricType) -> Self {
        Self {
            name,
            value: value.into(),
            metric_type,
            tags: Vec::new(),
            hostname: None,
            sample_rate: 1.0,
            timestamp: None,
            source: None,
        }
    }

    /// Sets the tags.
    ///
    /// Order and duplicates don't matter: tags are normalized when the sample is resolved to a context.
    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Sets the hostname.
    ///
    /// `None` falls back to the aggregator's hostname, while `Some("")` explicitly sends the sample without one.
    pub fn with_hostname(mut self, hostname: Option<&'a str>) -> Self {
        self.hostname = hostname;
        self
    }

    /// Sets the client-side sample rate.
    ///
    /// Rates outside of `(0, 1]` are treated as 1.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = if sample_rate > 0.0 && sample_rate <= 1.0 {
            sample_rate
        } else {
            1.0
        };
        self
    }

    /// Sets the sample's own timestamp, in seconds since the Unix epoch.
    pub fn with_timestamp(mut self, timestamp: Option<f64>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the submitter of the sample, such as a check name.
    ///
    /// Only used for diagnostics.
    pub fn with_source(mut self, source: Option<&'a str>) -> Self {
        self.source = source;
        self
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn value(&self) -> SampleValue<'a> {
        self.value
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn tags(&self) -> &[&'a str] {
        &self.tags
    }

    pub fn hostname(&self) -> Option<&'a str> {
        self.hostname
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn source(&self) -> Option<&'a str> {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let sample = MetricSample::new("requests", 1.0, MetricType::Counter);
        assert_eq!(sample.name(), "requests");
        assert_eq!(sample.value(), SampleValue::Float(1.0));
        assert!(sample.tags().is_empty());
        assert_eq!(sample.hostname(), None);
        assert_eq!(sample.sample_rate(), 1.0);
        assert_eq!(sample.timestamp(), None);
        assert_eq!(sample.source(), None);
    }

    #[test]
    fn out_of_range_sample_rate() {
        for rate in [0.0, -1.0, 1.5, f64::NAN] {
            let sample = MetricSample::new("requests", 1.0, MetricType::Counter).with_sample_rate(rate);
            assert_eq!(sample.sample_rate(), 1.0);
        }

        let sample = MetricSample::new("requests", 1.0, MetricType::Counter).with_sample_rate(0.25);
        assert_eq!(sample.sample_rate(), 0.25);
    }
}
