use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use crate::metrics::{MetricsSink, Tag, name};

pub const STATUS_TAG: &str = "statusCode";
pub const STATUS_CLASS_TAG: &str = "statusClass";

pub const REQUEST_OUTSTANDING: &str = "request.outstanding";
pub const REQUEST_LATENCY: &str = "request.latency";
pub const REQUEST_RECEIVED: &str = "request.received";
pub const RESPONSE_SENT: &str = "response.sent";
pub const RESPONSE_STATUS: &str = "response.status";

pub const STATUS_CLASS_UNRECOGNISED: &str = "unrecognised";

/// Receives the lifecycle events of every request passing through the proxy.
///
/// Events arrive asynchronously and may be duplicated or race each other; implementations
/// must tolerate both.
pub trait RequestProgressListener<K>: Send + Sync {
    fn on_request(&self, request_id: K);

    fn on_complete(&self, request_id: K, status: u16);

    fn on_terminate(&self, request_id: K);
}

/// Source of the instants used to measure latency.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Maintains request statistics from lifecycle events.
///
/// Every request is registered under its correlation id when it arrives and removed when it
/// completes or terminates, whichever is reported first. Registration and removal are
/// single atomic map operations, so of several concurrent events for the same id exactly one
/// takes effect and the rest are no-ops. As a result:
/// - the `request.outstanding` gauge always equals the number of registered ids
/// - `request.latency` is recorded exactly once per request
pub struct RequestStatsCollector<K = u64>
where
    K: Eq + Hash,
{
    sink: Arc<dyn MetricsSink>,
    prefix: String,
    outstanding_name: String,
    latency_name: String,
    received_name: String,
    sent_name: String,
    status_name: String,
    ongoing: DashMap<K, Instant>,
    outstanding: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl<K> RequestStatsCollector<K>
where
    K: Eq + Hash,
{
    /// Creates a collector reporting to `sink`, with every metric name under `prefix`.
    pub fn new(sink: Arc<dyn MetricsSink>, prefix: &str) -> Self {
        Self::with_clock(sink, prefix, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Arc<dyn MetricsSink>, prefix: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            prefix: prefix.to_string(),
            outstanding_name: name(&[prefix, REQUEST_OUTSTANDING]),
            latency_name: name(&[prefix, REQUEST_LATENCY]),
            received_name: name(&[prefix, REQUEST_RECEIVED]),
            sent_name: name(&[prefix, RESPONSE_SENT]),
            status_name: name(&[prefix, RESPONSE_STATUS]),
            ongoing: DashMap::new(),
            outstanding: AtomicI64::new(0),
            clock,
        }
    }

    /// Number of requests received and not yet completed or terminated.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn on_request(&self, request_id: K) {
        let now = self.clock.now();
        let registered = match self.ongoing.entry(request_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        };

        if registered {
            self.outstanding.fetch_add(1, Ordering::AcqRel);
            self.sink.adjust_gauge(&self.outstanding_name, &[], 1);
            self.sink.increment_counter(&self.received_name, &[], 1);
        } else {
            trace!("ignored duplicate request registration");
        }
    }

    pub fn on_complete(&self, request_id: &K, status: u16) {
        if let Some((_, start)) = self.ongoing.remove(request_id) {
            self.update_response_status_counter(status);
            self.sink.increment_counter(&self.sent_name, &[], 1);
            self.finish(start);
        }
    }

    pub fn on_terminate(&self, request_id: &K) {
        if let Some((_, start)) = self.ongoing.remove(request_id) {
            self.finish(start);
        }
    }

    fn finish(&self, start: Instant) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.sink.adjust_gauge(&self.outstanding_name, &[], -1);
        self.sink.record_duration(&self.latency_name, &[], self.clock.now().saturating_duration_since(start));
    }

    fn update_response_status_counter(&self, status: u16) {
        let class = status_class(status);
        let code = if class == "5xx" { status.to_string() } else { String::new() };
        let tags = [Tag::new(STATUS_CLASS_TAG, class), Tag::new(STATUS_TAG, code)];
        self.sink.increment_counter(&self.status_name, &tags, 1);
    }
}

impl<K> RequestProgressListener<K> for RequestStatsCollector<K>
where
    K: Eq + Hash + Send + Sync,
{
    fn on_request(&self, request_id: K) {
        RequestStatsCollector::on_request(self, request_id);
    }

    fn on_complete(&self, request_id: K, status: u16) {
        RequestStatsCollector::on_complete(self, &request_id, status);
    }

    fn on_terminate(&self, request_id: K) {
        RequestStatsCollector::on_terminate(self, &request_id);
    }
}

impl<K> fmt::Debug for RequestStatsCollector<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestStatsCollector")
            .field("prefix", &self.prefix)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

/// The status class tag for a response code: `"1xx"` to `"5xx"`, or `"unrecognised"` for
/// codes outside 100..=599.
pub fn status_class(code: u16) -> &'static str {
    match code {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => STATUS_CLASS_UNRECOGNISED,
    }
}
