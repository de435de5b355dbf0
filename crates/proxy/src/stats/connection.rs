use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tracing::warn;

use crate::content::Chunk;
use crate::metrics::{MetricsSink, name};
use crate::runtime::current_worker_name;

pub const BYTES_RECEIVED: &str = "connections.bytes-received";
pub const BYTES_SENT: &str = "connections.bytes-sent";
pub const TOTAL_CONNECTIONS: &str = "connections.total-connections";

/// A message passing through the transport whose payload size may be known.
pub trait ByteCount {
    /// Number of payload bytes, `None` when the message does not expose a size.
    fn readable_bytes(&self) -> Option<usize>;
}

impl ByteCount for Bytes {
    fn readable_bytes(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl ByteCount for BytesMut {
    fn readable_bytes(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl ByteCount for Vec<u8> {
    fn readable_bytes(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl ByteCount for [u8] {
    fn readable_bytes(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl ByteCount for Chunk {
    fn readable_bytes(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// A transport message of a kind the statistics cannot size, such as a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opaque(pub &'static str);

impl ByteCount for Opaque {
    fn readable_bytes(&self) -> Option<usize> {
        None
    }
}

/// Aggregates connection lifecycle and traffic events into connection metrics.
///
/// One handler is shared by every connection of the process. Traffic counters and the total
/// connection gauge are global; registered channel counts are kept per worker, keyed by
/// [`current_worker_name`], and only ever mutated from that worker.
pub struct ConnectionStatisticsHandler {
    sink: Arc<dyn MetricsSink>,
    registered: DashMap<String, AtomicI64>,
}

impl ConnectionStatisticsHandler {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink, registered: DashMap::new() }
    }

    pub fn channel_registered(&self) {
        self.adjust_registered(1);
    }

    pub fn channel_unregistered(&self) {
        self.adjust_registered(-1);
    }

    pub fn channel_active(&self) {
        self.sink.adjust_gauge(TOTAL_CONNECTIONS, &[], 1);
    }

    pub fn channel_inactive(&self) {
        self.sink.adjust_gauge(TOTAL_CONNECTIONS, &[], -1);
    }

    pub fn channel_read<M>(&self, msg: &M)
    where
        M: ByteCount + fmt::Debug + ?Sized,
    {
        self.count_bytes(BYTES_RECEIVED, msg);
    }

    pub fn channel_write<M>(&self, msg: &M)
    where
        M: ByteCount + fmt::Debug + ?Sized,
    {
        self.count_bytes(BYTES_SENT, msg);
    }

    /// Registered channel count of `worker`, zero for workers never seen.
    pub fn registered_channels(&self, worker: &str) -> i64 {
        self.registered.get(worker).map_or(0, |count| count.load(Ordering::Relaxed))
    }

    fn count_bytes<M>(&self, metric: &str, msg: &M)
    where
        M: ByteCount + fmt::Debug + ?Sized,
    {
        match msg.readable_bytes() {
            Some(len) => self.sink.increment_counter(metric, &[], len as u64),
            None => warn!(metric, message = ?msg, "unable to count bytes of message"),
        }
    }

    #[allow(clippy::cast_precision_loss, reason = "channel counts are small")]
    fn adjust_registered(&self, delta: i64) {
        let worker = current_worker_name();
        let count = match self.registered.get(&worker) {
            Some(count) => count.fetch_add(delta, Ordering::Relaxed) + delta,
            None => self.registered.entry(worker.clone()).or_default().fetch_add(delta, Ordering::Relaxed) + delta,
        };

        self.sink.set_gauge(&name(&["connections.eventloop", &worker, "registered-channel-count"]), &[], count);
        self.sink.record_histogram(&name(&["connections.eventloop", &worker, "channels"]), &[], count as f64);
    }
}

impl fmt::Debug for ConnectionStatisticsHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStatisticsHandler").field("workers", &self.registered.len()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::runtime::set_worker_name;

    fn handler() -> (Arc<MetricsRegistry>, ConnectionStatisticsHandler) {
        let registry = Arc::new(MetricsRegistry::new());
        let handler = ConnectionStatisticsHandler::new(registry.clone());
        (registry, handler)
    }

    #[test]
    fn counts_traffic_in_both_directions() {
        let (registry, handler) = handler();

        handler.channel_read(&Bytes::from_static(b"GET / HTTP/1.1\r\n"));
        handler.channel_read(&BytesMut::from(&b"abcd"[..]));
        handler.channel_write(&Chunk::data(Bytes::from_static(b"hello")));
        handler.channel_write(&b"world"[..]);
        handler.channel_write(&vec![0u8; 10]);

        assert_eq!(registry.counter(BYTES_RECEIVED, &[]), 20);
        assert_eq!(registry.counter(BYTES_SENT, &[]), 20);
    }

    #[test]
    fn skips_messages_of_unknown_size() {
        let (registry, handler) = handler();

        handler.channel_read(&Opaque("ping"));
        handler.channel_write(&Opaque("goaway"));

        assert_eq!(registry.counter(BYTES_RECEIVED, &[]), 0);
        assert_eq!(registry.counter(BYTES_SENT, &[]), 0);
    }

    #[test]
    fn tracks_total_connections() {
        let (registry, handler) = handler();

        handler.channel_active();
        handler.channel_active();
        handler.channel_inactive();

        assert_eq!(registry.gauge(TOTAL_CONNECTIONS, &[]), 1);
    }

    #[test]
    fn registered_channels_are_kept_per_worker() {
        let registry = Arc::new(MetricsRegistry::new());
        let handler = Arc::new(ConnectionStatisticsHandler::new(registry.clone()));

        let spawn = |worker: &'static str, registrations: usize| {
            let handler = Arc::clone(&handler);
            std::thread::spawn(move || {
                set_worker_name(worker);
                for _ in 0..registrations {
                    handler.channel_registered();
                }
                handler.channel_unregistered();
            })
        };
        let first = spawn("worker-1", 3);
        let second = spawn("worker-2", 1);
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(handler.registered_channels("worker-1"), 2);
        assert_eq!(handler.registered_channels("worker-2"), 0);
        assert_eq!(registry.gauge("connections.eventloop.worker-1.registered-channel-count", &[]), 2);
        assert_eq!(registry.gauge("connections.eventloop.worker-2.registered-channel-count", &[]), 0);

        let channels = registry.histogram("connections.eventloop.worker-1.channels", &[]).unwrap();
        assert_eq!(channels.count, 4);
        assert_eq!(channels.max, 3.0);
    }

    #[test]
    fn falls_back_to_thread_name() {
        let (registry, handler) = handler();

        std::thread::Builder::new()
            .name("io-7".to_string())
            .spawn(move || handler.channel_registered())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(registry.gauge("connections.eventloop.io-7.registered-channel-count", &[]), 1);
    }
}
