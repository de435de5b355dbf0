use metrics::Label;

use crate::metrics::{MetricsSink, Tag};

/// Forwards every sample to the recorder installed for the `metrics` crate.
///
/// Without an installed recorder the samples are discarded, exactly like the `metrics`
/// macros themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeSink;

fn labels(tags: &[Tag]) -> Vec<Label> {
    tags.iter().map(|tag| Label::new(tag.key().to_string(), tag.value().to_string())).collect()
}

impl MetricsSink for FacadeSink {
    fn increment_counter(&self, name: &str, tags: &[Tag], value: u64) {
        metrics::counter!(name.to_string(), labels(tags)).increment(value);
    }

    #[allow(clippy::cast_precision_loss, reason = "gauge deltas are connection counts")]
    fn adjust_gauge(&self, name: &str, tags: &[Tag], delta: i64) {
        let gauge = metrics::gauge!(name.to_string(), labels(tags));
        if delta >= 0 {
            gauge.increment(delta as f64);
        } else {
            gauge.decrement(delta.unsigned_abs() as f64);
        }
    }

    #[allow(clippy::cast_precision_loss, reason = "gauge values are connection counts")]
    fn set_gauge(&self, name: &str, tags: &[Tag], value: i64) {
        metrics::gauge!(name.to_string(), labels(tags)).set(value as f64);
    }

    fn record_histogram(&self, name: &str, tags: &[Tag], value: f64) {
        metrics::histogram!(name.to_string(), labels(tags)).record(value);
    }
}
