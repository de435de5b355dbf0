use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use serde::Serialize;

use crate::metrics::{MetricsSink, Tag};

/// Identifies one time series: a metric name plus its tags, tags kept sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    tags: Vec<Tag>,
}

impl MetricKey {
    pub fn new(name: &str, tags: &[Tag]) -> Self {
        let mut tags = tags.to_vec();
        tags.sort();
        Self { name: name.to_string(), tags }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            let tags = self.tags.iter().map(ToString::to_string).collect::<Vec<_>>();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

/// Summary of the samples recorded into one histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSnapshot {
    fn empty() -> Self {
        Self { count: 0, sum: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    #[allow(clippy::cast_precision_loss, reason = "sample counts stay far below 2^52")]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// A point-in-time copy of a registry, keyed by the rendered [`MetricKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

/// An in-memory [`MetricsSink`] that can be queried.
///
/// Series are created on first use. Counter and gauge updates are single atomic operations
/// on a sharded map entry, so workers recording concurrently do not contend on a global
/// lock.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<MetricKey, AtomicU64>,
    gauges: DashMap<MetricKey, AtomicI64>,
    histograms: DashMap<MetricKey, Mutex<HistogramSnapshot>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if it was never incremented.
    pub fn counter(&self, name: &str, tags: &[Tag]) -> u64 {
        self.counters.get(&MetricKey::new(name, tags)).map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Current value of a gauge, zero if it was never set.
    pub fn gauge(&self, name: &str, tags: &[Tag]) -> i64 {
        self.gauges.get(&MetricKey::new(name, tags)).map_or(0, |gauge| gauge.load(Ordering::Relaxed))
    }

    pub fn histogram(&self, name: &str, tags: &[Tag]) -> Option<HistogramSnapshot> {
        self.histograms
            .get(&MetricKey::new(name, tags))
            .map(|histogram| *histogram.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// All series sharing `name`, whatever their tags.
    pub fn counters_named(&self, name: &str) -> Vec<(MetricKey, u64)> {
        let mut counters = self
            .counters
            .iter()
            .filter(|entry| entry.key().name() == name)
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect::<Vec<_>>();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        counters
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_matching(|_| true)
    }

    /// Snapshot of the series whose name starts with `prefix`.
    pub fn snapshot_with_prefix(&self, prefix: &str) -> MetricsSnapshot {
        self.snapshot_matching(|name| name.starts_with(prefix))
    }

    pub fn snapshot_matching<P>(&self, predicate: P) -> MetricsSnapshot
    where
        P: Fn(&str) -> bool,
    {
        let mut snapshot = MetricsSnapshot::default();
        for entry in self.counters.iter().filter(|entry| predicate(entry.key().name())) {
            snapshot.counters.insert(entry.key().to_string(), entry.value().load(Ordering::Relaxed));
        }
        for entry in self.gauges.iter().filter(|entry| predicate(entry.key().name())) {
            snapshot.gauges.insert(entry.key().to_string(), entry.value().load(Ordering::Relaxed));
        }
        for entry in self.histograms.iter().filter(|entry| predicate(entry.key().name())) {
            let histogram = *entry.value().lock().unwrap_or_else(PoisonError::into_inner);
            snapshot.histograms.insert(entry.key().to_string(), histogram);
        }
        snapshot
    }

    fn with_gauge<F>(&self, key: MetricKey, f: F)
    where
        F: FnOnce(&AtomicI64),
    {
        // the read guard must be released before `entry` takes the shard's write lock
        if let Some(gauge) = self.gauges.get(&key) {
            f(gauge.value());
            return;
        }
        f(self.gauges.entry(key).or_default().value());
    }
}

impl MetricsSink for MetricsRegistry {
    fn increment_counter(&self, name: &str, tags: &[Tag], value: u64) {
        let key = MetricKey::new(name, tags);
        if let Some(counter) = self.counters.get(&key) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters.entry(key).or_default().fetch_add(value, Ordering::Relaxed);
    }

    fn adjust_gauge(&self, name: &str, tags: &[Tag], delta: i64) {
        self.with_gauge(MetricKey::new(name, tags), |gauge| {
            gauge.fetch_add(delta, Ordering::Relaxed);
        });
    }

    fn set_gauge(&self, name: &str, tags: &[Tag], value: i64) {
        self.with_gauge(MetricKey::new(name, tags), |gauge| gauge.store(value, Ordering::Relaxed));
    }

    fn record_histogram(&self, name: &str, tags: &[Tag], value: f64) {
        let histogram = self.histograms.entry(MetricKey::new(name, tags)).or_insert_with(|| Mutex::new(HistogramSnapshot::empty()));
        histogram.lock().unwrap_or_else(PoisonError::into_inner).record(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn tags_are_order_insensitive() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("hits", &[Tag::new("a", "1"), Tag::new("b", "2")], 1);
        registry.increment_counter("hits", &[Tag::new("b", "2"), Tag::new("a", "1")], 2);

        assert_eq!(registry.counter("hits", &[Tag::new("a", "1"), Tag::new("b", "2")]), 3);
        assert_eq!(registry.counter("hits", &[]), 0);
    }

    #[test]
    fn gauges_move_both_ways() {
        let registry = MetricsRegistry::new();
        registry.adjust_gauge("open", &[], 3);
        registry.adjust_gauge("open", &[], -1);
        assert_eq!(registry.gauge("open", &[]), 2);

        registry.set_gauge("open", &[], 10);
        assert_eq!(registry.gauge("open", &[]), 10);
    }

    #[test]
    fn histogram_summarises_samples() {
        let registry = MetricsRegistry::new();
        for value in [3.0, 1.0, 2.0] {
            registry.record_histogram("size", &[], value);
        }

        let histogram = registry.histogram("size", &[]).unwrap();
        assert_eq!(histogram.count, 3);
        assert_eq!(histogram.min, 1.0);
        assert_eq!(histogram.max, 3.0);
        assert_eq!(histogram.mean(), Some(2.0));
        assert!(registry.histogram("missing", &[]).is_none());
    }

    #[test]
    fn snapshot_filters_by_prefix() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("connections.bytes-sent", &[], 10);
        registry.increment_counter("proxy.request.received", &[], 1);
        registry.set_gauge("connections.total-connections", &[], 2);

        let snapshot = registry.snapshot_with_prefix("connections");
        assert_eq!(snapshot.counters.len(), 1);
        assert_eq!(snapshot.counters["connections.bytes-sent"], 10);
        assert_eq!(snapshot.gauges["connections.total-connections"], 2);

        let json = serde_json::to_value(&registry.snapshot()).unwrap();
        assert_eq!(json["counters"]["proxy.request.received"], 1);
    }

    #[test]
    fn rendered_key_lists_sorted_tags() {
        let key = MetricKey::new("response.status", &[Tag::new("statusCode", "503"), Tag::new("statusClass", "5xx")]);
        assert_eq!(key.to_string(), "response.status{statusClass=5xx,statusCode=503}");
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.increment_counter("hits", &[], 1);
                        registry.adjust_gauge("level", &[], 1);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.counter("hits", &[]), 8000);
        assert_eq!(registry.gauge("level", &[]), 8000);
    }
}
