use basenji_context::Context;
use basenji_event::{DataPoint, DataPointType};

/// The parts of a single data point, prior to formatting.
#[derive(Clone, Copy, Debug)]
pub struct PointDescriptor<'a> {
    /// Series name, which may differ from the context name (`<name>.max` for histograms, for example).
    pub metric: &'a str,

    /// Context the point was aggregated under.
    pub context: &'a Context,

    pub timestamp: f64,
    pub value: f64,
    pub point_type: DataPointType,

    /// Aggregation interval, in seconds.
    pub interval: f64,
}

/// Turns aggregated values into output data points.
pub trait Formatter: Send + Sync {
    /// Formats a single data point.
    fn format(&self, point: PointDescriptor<'_>) -> DataPoint;
}

/// Formats data points as-is.
#[derive(Clone, Debug, Default)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn format(&self, point: PointDescriptor<'_>) -> DataPoint {
        build_point(point.metric, &point)
    }
}

/// Prepends a namespace to every metric name, as `<namespace>.<name>`.
#[derive(Clone, Debug)]
pub struct NamespacedFormatter {
    prefix: String,
}

impl NamespacedFormatter {
    /// Creates a new `NamespacedFormatter`.
    ///
    /// A trailing period on the namespace is ignored, so `app` and `app.` behave the same.
    pub fn new(namespace: impl Into<String>) -> Self {
        let mut prefix = namespace.into();
        if !prefix.ends_with('.') {
            prefix.push('.');
        }
        Self { prefix }
    }
}

impl Formatter for NamespacedFormatter {
    fn format(&self, point: PointDescriptor<'_>) -> DataPoint {
        let mut metric = String::with_capacity(self.prefix.len() + point.metric.len());
        metric.push_str(&self.prefix);
        metric.push_str(point.metric);
        build_point(metric, &point)
    }
}

/// Selects a formatter for the given namespace.
pub fn formatter_for_namespace(namespace: Option<&str>) -> Box<dyn Formatter> {
    match namespace {
        Some(ns) if !ns.is_empty() => Box::new(NamespacedFormatter::new(ns)),
        _ => Box::new(DefaultFormatter),
    }
}

fn build_point(metric: impl Into<String>, point: &PointDescriptor<'_>) -> DataPoint {
    DataPoint::new(metric, point.timestamp, point.value, point.point_type)
        .with_tags(point.context.tags().as_slice().to_vec())
        .with_host(point.context.hostname())
        .with_interval(point.interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor<'a>(metric: &'a str, context: &'a Context) -> PointDescriptor<'a> {
        PointDescriptor {
            metric,
            context,
            timestamp: 100.0,
            value: 4.0,
            point_type: DataPointType::Gauge,
            interval: 10.0,
        }
    }

    #[test]
    fn default_formatter() {
        let context = Context::new("my.metric", ["b", "a"], Some("host-a".to_string()));
        let point = DefaultFormatter.format(descriptor("my.metric.max", &context));

        assert_eq!(point.metric(), "my.metric.max");
        assert_eq!(point.points(), &[(100.0, 4.0)]);
        assert_eq!(point.tags(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(point.host(), Some("host-a"));
        assert_eq!(point.point_type(), DataPointType::Gauge);
        assert_eq!(point.interval(), Some(10.0));
    }

    #[test]
    fn untagged_context_has_no_tags() {
        let context = Context::new("my.metric", Vec::<String>::new(), None);
        let point = DefaultFormatter.format(descriptor("my.metric", &context));
        assert_eq!(point.tags(), None);
        assert_eq!(point.host(), None);
    }

    #[test]
    fn namespaced_formatter() {
        let context = Context::new("my.metric", Vec::<String>::new(), None);
        for namespace in ["app", "app."] {
            let point = NamespacedFormatter::new(namespace).format(descriptor("my.metric", &context));
            assert_eq!(point.metric(), "app.my.metric");
        }
    }

    #[test]
    fn selection_by_namespace() {
        let context = Context::new("m", Vec::<String>::new(), None);
        assert_eq!(formatter_for_namespace(None).format(descriptor("m", &context)).metric(), "m");
        assert_eq!(formatter_for_namespace(Some("")).format(descriptor("m", &context)).metric(), "m");
        assert_eq!(formatter_for_namespace(Some("ns")).format(descriptor("m", &context)).metric(), "ns.m");
    }
}
