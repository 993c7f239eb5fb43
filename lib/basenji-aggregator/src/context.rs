use std::collections::BTreeMap;

use basenji_context::{
    hash::{new_fast_hashmap, FastHashMap},
    Context,
};
use basenji_event::DataPoint;
use tracing::debug;

use crate::{
    aggregator::{Aggregator, AggregatorConfigurationError, AggregatorCore},
    config::AggregatorConfiguration,
    metric::{MetricState, MetricTypeResolver},
    sample::MetricSample,
};

/// Aggregates metrics per context, with no time bucketing.
///
/// Each context keeps a single metric that is flushed, and reset according to its type, on every flush. Contexts that
/// haven't been sampled within the expiry period are removed during flush without producing any output.
///
/// This suits callers with a natural run boundary, such as periodic checks, where every run submits and then
/// flushes. All metric types are supported.
pub struct ContextAggregator {
    core: AggregatorCore,
    metrics: FastHashMap<Context, MetricState>,
    sources: FastHashMap<Context, String>,
}

impl ContextAggregator {
    /// Creates a new `ContextAggregator` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the interval isn't a positive number, or the expiry or recent point threshold is negative, an error is
    /// returned.
    pub fn from_configuration(config: &AggregatorConfiguration) -> Result<Self, AggregatorConfigurationError> {
        Ok(Self {
            core: AggregatorCore::from_configuration(config, "context")?,
            metrics: new_fast_hashmap(),
            sources: new_fast_hashmap(),
        })
    }

    /// Returns the number of live contexts.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if there are no live contexts.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn contexts_by_source(&self) -> BTreeMap<String, usize> {
        let mut by_source = BTreeMap::new();
        for source in self.sources.values() {
            *by_source.entry(source.clone()).or_insert(0) += 1;
        }
        by_source
    }
}

impl Aggregator for ContextAggregator {
    fn core(&self) -> &AggregatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregatorCore {
        &mut self.core
    }

    fn submit_metric(&mut self, sample: MetricSample<'_>, now: f64) {
        let Some(metric_type) = MetricTypeResolver::Full.accept(sample.metric_type()) else {
            return;
        };

        let context = self.core.resolve_context(&sample);
        if let Some(source) = sample.source() {
            if self.sources.get(&context).map(String::as_str) != Some(source) {
                self.sources.insert(context.clone(), source.to_string());
            }
        }

        let metric = self
            .metrics
            .entry(context)
            .or_insert_with(|| MetricState::new(metric_type));
        if self.core.discard_if_too_old(&sample, now) {
            return;
        }

        metric.sample(sample.value(), sample.sample_rate(), sample.timestamp(), now);
    }

    fn flush(&mut self, now: f64) -> Vec<DataPoint> {
        let expiry_cutoff = now - self.core.expiry_seconds();
        let fctx = self.core.flush_context();

        let mut points = Vec::new();
        let mut expired = 0;
        self.metrics.retain(|context, metric| {
            if metric.is_expired(expiry_cutoff) {
                debug!(%context, expiry_secs = now - expiry_cutoff, "Context has not been sampled recently. Expiring.");
                expired += 1;
                false
            } else {
                metric.flush(context, now, &fctx, &mut points);
                true
            }
        });

        if expired > 0 {
            let metrics = &self.metrics;
            self.sources.retain(|context, _| metrics.contains_key(context));
        }

        let contexts = self.metrics.len();
        let contexts_by_source = self.contexts_by_source();
        self.core
            .finish_flush(now, &points, expired, contexts, Some(contexts_by_source));
        points
    }
}
