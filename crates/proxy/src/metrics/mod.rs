//! The narrow interface through which the data plane records statistics.
//!
//! Metric names are hierarchical and dot separated (`prefix.metric.subpart`); tags are
//! key/value pairs attached to a single recorded sample. Two sinks are provided:
//!
//! - [`MetricsRegistry`]: keeps everything in memory and can be queried or snapshotted,
//!   which is what tests and embedded deployments use
//! - [`FacadeSink`]: forwards to whichever recorder is installed for the `metrics` crate
//!   (a Prometheus exporter, for example)
//!
//! All sinks are shared between workers and must tolerate concurrent updates.

mod facade;
mod registry;

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use facade::FacadeSink;
pub use registry::HistogramSnapshot;
pub use registry::MetricKey;
pub use registry::MetricsRegistry;
pub use registry::MetricsSnapshot;

pub trait MetricsSink: Send + Sync {
    /// Adds `value` to a monotonic counter.
    fn increment_counter(&self, name: &str, tags: &[Tag], value: u64);

    /// Moves a gauge up or down by `delta`.
    fn adjust_gauge(&self, name: &str, tags: &[Tag], delta: i64);

    fn set_gauge(&self, name: &str, tags: &[Tag], value: i64);

    /// Records one sample into a distribution.
    fn record_histogram(&self, name: &str, tags: &[Tag], value: f64);

    /// Records a duration sample, in seconds.
    fn record_duration(&self, name: &str, tags: &[Tag], duration: Duration) {
        self.record_histogram(name, tags, duration.as_secs_f64());
    }
}

/// A key/value pair attached to a recorded sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tag {
    key: Cow<'static, str>,
    value: String,
}

impl Tag {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Joins name parts with dots, skipping empty parts.
///
/// ```
/// use micro_proxy::metrics::name;
///
/// assert_eq!(name(&["proxy", "request.latency"]), "proxy.request.latency");
/// assert_eq!(name(&["", "request.latency"]), "request.latency");
/// ```
pub fn name(parts: &[&str]) -> String {
    parts.iter().filter(|part| !part.is_empty()).copied().collect::<Vec<_>>().join(".")
}
