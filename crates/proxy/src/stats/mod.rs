//! Request and connection statistics.
//!
//! [`RequestStatsCollector`] turns request lifecycle events into outstanding, latency and
//! status metrics; [`ConnectionStatisticsHandler`] turns transport events into traffic and
//! per-worker connection metrics. Both report to a shared [`MetricsSink`](crate::metrics::MetricsSink).

mod connection;
mod request;

pub use connection::BYTES_RECEIVED;
pub use connection::BYTES_SENT;
pub use connection::ByteCount;
pub use connection::ConnectionStatisticsHandler;
pub use connection::Opaque;
pub use connection::TOTAL_CONNECTIONS;
pub use request::Clock;
pub use request::REQUEST_LATENCY;
pub use request::REQUEST_OUTSTANDING;
pub use request::REQUEST_RECEIVED;
pub use request::RESPONSE_SENT;
pub use request::RESPONSE_STATUS;
pub use request::RequestProgressListener;
pub use request::RequestStatsCollector;
pub use request::STATUS_CLASS_TAG;
pub use request::STATUS_CLASS_UNRECOGNISED;
pub use request::STATUS_TAG;
pub use request::SystemClock;
pub use request::status_class;
