//! Relays a few simulated request bodies through the data plane and prints the metrics.
//!
//! ```sh
//! cargo run --example relay_demo
//! ```

use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::BodyExt;
use micro_proxy::config::ProxyCoreConfig;
use micro_proxy::content::{Chunk, ContentProducer, ReadGate, StreamState, pump};
use micro_proxy::metrics::MetricsRegistry;
use micro_proxy::runtime::{Timer, Worker, set_worker_name};
use micro_proxy::stats::{ConnectionStatisticsHandler, RequestStatsCollector};
use micro_proxy::status::{ExceptionStatusMapper, error_response};
use tokio::runtime::Handle;
use tracing::{Level, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    micro_proxy::logging::init(Level::DEBUG)?;
    set_worker_name("demo-worker-0");

    let config = ProxyCoreConfig::from_json(r#"{ "content": { "high_water_mark": 4, "low_water_mark": 1, "inactivity_timeout_ms": 500 } }"#)?;
    let timer = Timer::dedicated("proxy-timer")?;
    let worker: Arc<dyn Worker> = Arc::new(Handle::current());

    let registry = Arc::new(MetricsRegistry::new());
    let requests = RequestStatsCollector::new(registry.clone(), &config.metrics.prefix);
    let connections = ConnectionStatisticsHandler::new(registry.clone());

    connections.channel_registered();
    connections.channel_active();

    // a request whose body is read by a slow handler
    requests.on_request(1_u64);
    let gate = ReadGate::new();
    let producer = ContentProducer::builder()
        .config(&config.content)
        .read_control(Arc::new(gate.clone()))
        .inactivity_timeout(timer.clone(), Arc::clone(&worker), config.content.inactivity_timeout())
        .build()?;

    let wire = futures::stream::iter(0..12).map(|i| {
        let chunk = if i == 11 { Chunk::last(format!("part-{i}")) } else { Chunk::data(format!("part-{i},")) };
        connections.channel_read(&chunk);
        Ok::<_, io::Error>(chunk)
    });

    let mut body = producer.attach_body()?;
    let handler = async {
        let mut received = Vec::new();
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame?.into_data() {
                received.extend_from_slice(&data);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, Box<dyn Error + Send + Sync>>(Bytes::from(received))
    };

    let (pumped, handled) = tokio::join!(pump(wire, &producer, &gate), handler);
    pumped?;
    let received = handled?;
    info!(size = received.len(), "handler read the whole body");

    let response = Bytes::from_static(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    connections.channel_write(&response);
    requests.on_complete(&1, 200);

    // a request whose body nobody reads
    requests.on_request(2_u64);
    let abandoned = ContentProducer::builder()
        .config(&config.content)
        .inactivity_timeout(timer.clone(), Arc::clone(&worker), config.content.inactivity_timeout())
        .build()?;
    abandoned.on_chunk_received(Chunk::data(Bytes::from_static(b"ignored")));

    tokio::time::sleep(config.content.inactivity_timeout() * 2).await;
    if let StreamState::Terminated(cause) = abandoned.state() {
        let response = error_response(ExceptionStatusMapper::global(), &cause);
        warn!(status = response.status().as_u16(), cause = %cause, "answered abandoned request");
        requests.on_complete(&2, response.status().as_u16());
    } else {
        requests.on_terminate(&2);
    }

    connections.channel_inactive();
    connections.channel_unregistered();
    timer.shutdown();

    println!("{}", serde_json::to_string_pretty(&registry.snapshot())?);
    Ok(())
}
