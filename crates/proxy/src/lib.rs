//! The data plane core of a reverse proxy
//!
//! This crate holds the pieces that sit between the transport and the request handling layer
//! of an HTTP reverse proxy, where bodies flow through and statistics are collected:
//!
//! # Features
//!
//! - Demand driven body streaming with transport backpressure ([`content`])
//! - Teardown of bodies nobody consumes in time ([`content::InactivityWatchdog`])
//! - Request statistics tolerant of duplicated and racing lifecycle events ([`stats`])
//! - Per-worker connection and traffic statistics ([`stats::ConnectionStatisticsHandler`])
//! - Failure to response status translation with ambiguity detection ([`status`])
//! - A small metrics facade with an in-memory registry ([`metrics`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http_body_util::BodyExt;
//! use micro_proxy::content::{Chunk, ContentProducer};
//! use micro_proxy::metrics::MetricsRegistry;
//! use micro_proxy::stats::RequestStatsCollector;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(MetricsRegistry::new());
//!     let stats = RequestStatsCollector::new(registry.clone(), "proxy");
//!     stats.on_request(1_u64);
//!
//!     // the transport delivers the body before anyone asked for it
//!     let producer = ContentProducer::builder().build().unwrap();
//!     producer.on_chunk_received(Chunk::data(Bytes::from_static(b"hello ")));
//!     producer.on_chunk_received(Chunk::last(Bytes::from_static(b"world")));
//!
//!     let body = producer.attach_body().unwrap();
//!     let bytes = body.collect().await.unwrap().to_bytes();
//!     assert_eq!(&bytes[..], b"hello world");
//!
//!     stats.on_complete(&1, 200);
//!     assert_eq!(registry.counter("proxy.response.sent", &[]), 1);
//! }
//! ```

pub mod config;
pub mod content;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod stats;
pub mod status;

mod utils;
pub(crate) use utils::ensure;
