use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Aggregator volumes, for status reporting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatorStats {
    /// Number of flushes performed.
    pub flush_count: u64,

    /// Time of the most recent flush, in seconds since the Unix epoch.
    pub last_flush_time: Option<f64>,

    /// Metric packets received between the two most recent flushes.
    pub last_flush_packets: u64,

    /// Data points produced by the most recent flush.
    pub last_flush_points: usize,

    /// Events drained by the most recent event flush.
    pub last_flush_events: usize,

    /// Service checks drained by the most recent service check flush.
    pub last_flush_service_checks: usize,

    /// Contexts being tracked as of the most recent flush.
    pub contexts: usize,

    /// Tracked contexts broken down by the source that submitted them, for sources that identify themselves.
    pub contexts_by_source: BTreeMap<String, usize>,

    pub total_packets: u64,
    pub total_points: u64,
    pub total_events: u64,
    pub total_service_checks: u64,
    pub total_discarded_points: u64,
    pub total_expired_contexts: u64,
}

/// Summary of a single metric flush.
#[derive(Debug, Default)]
pub(crate) struct FlushSummary {
    pub now: f64,
    pub packets: u64,
    pub points: usize,
    pub discarded: u64,
    pub expired: usize,
    pub contexts: usize,
    pub contexts_by_source: Option<BTreeMap<String, usize>>,
}

/// Records aggregator volumes.
///
/// Shared between the aggregator, which records into it, and any number of readers, which take consistent snapshots.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<AggregatorStats>,
}

impl StatsRecorder {
    fn lock(&self) -> MutexGuard<'_, AggregatorStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the current statistics.
    pub fn snapshot(&self) -> AggregatorStats {
        self.lock().clone()
    }

    pub(crate) fn record_flush(&self, summary: FlushSummary) {
        let mut stats = self.lock();
        stats.flush_count += 1;
        stats.last_flush_time = Some(summary.now);
        stats.last_flush_packets = summary.packets;
        stats.last_flush_points = summary.points;
        stats.contexts = summary.contexts;
        if let Some(contexts_by_source) = summary.contexts_by_source {
            stats.contexts_by_source = contexts_by_source;
        }
        stats.total_packets += summary.packets;
        stats.total_points += summary.points as u64;
        stats.total_discarded_points += summary.discarded;
        stats.total_expired_contexts += summary.expired as u64;
    }

    pub(crate) fn record_events(&self, events: usize) {
        let mut stats = self.lock();
        stats.last_flush_events = events;
        stats.total_events += events as u64;
    }

    pub(crate) fn record_service_checks(&self, service_checks: usize) {
        let mut stats = self.lock();
        stats.last_flush_service_checks = service_checks;
        stats.total_service_checks += service_checks as u64;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn snapshot_accumulates() {
        let recorder = StatsRecorder::default();
        recorder.record_flush(FlushSummary {
            now: 10.0,
            packets: 3,
            points: 2,
            discarded: 1,
            expired: 0,
            contexts: 2,
            contexts_by_source: None,
        });
        recorder.record_flush(FlushSummary {
            now: 20.0,
            packets: 4,
            points: 5,
            discarded: 0,
            expired: 1,
            contexts: 1,
            contexts_by_source: Some(BTreeMap::from([("disk".to_string(), 1)])),
        });
        recorder.record_events(2);
        recorder.record_service_checks(1);

        let stats = recorder.snapshot();
        assert_eq!(stats.flush_count, 2);
        assert_eq!(stats.last_flush_time, Some(20.0));
        assert_eq!(stats.last_flush_packets, 4);
        assert_eq!(stats.last_flush_points, 5);
        assert_eq!(stats.contexts, 1);
        assert_eq!(stats.contexts_by_source.get("disk"), Some(&1));
        assert_eq!(stats.total_packets, 7);
        assert_eq!(stats.total_points, 7);
        assert_eq!(stats.total_discarded_points, 1);
        assert_eq!(stats.total_expired_contexts, 1);
        assert_eq!(stats.last_flush_events, 2);
        assert_eq!(stats.total_service_checks, 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let recorder = Arc::new(StatsRecorder::default());
        let before = recorder.snapshot();

        let writer = Arc::clone(&recorder);
        std::thread::spawn(move || writer.record_events(3))
            .join()
            .expect("writer thread should not panic");

        assert_eq!(before.total_events, 0);
        assert_eq!(recorder.snapshot().total_events, 3);
    }
}
