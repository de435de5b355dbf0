use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream;
use http::StatusCode;
use http_body_util::BodyExt;
use micro_proxy::content::{Chunk, ContentError, ContentProducer, ContentSubscriber, ReadGate, StreamState, pump};
use micro_proxy::metrics::{MetricsRegistry, Tag};
use micro_proxy::runtime::{Timer, Worker};
use micro_proxy::stats::{ConnectionStatisticsHandler, RequestStatsCollector};
use micro_proxy::status::{ExceptionStatusMapper, error_response};
use tokio::runtime::Handle;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ContentSubscriber for Recorder {
    fn on_chunk(&self, chunk: Bytes) {
        self.events.lock().unwrap().push(String::from_utf8_lossy(&chunk).into_owned());
    }

    fn on_complete(&self) {
        self.events.lock().unwrap().push("complete".to_string());
    }

    fn on_error(&self, cause: ContentError) {
        self.events.lock().unwrap().push(format!("error: {cause}"));
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition should hold eventually");
}

#[test]
fn buffered_body_is_delivered_in_order_after_late_subscription() {
    let producer = ContentProducer::builder().build().unwrap();
    producer.on_chunk_received(Chunk::data(Bytes::from_static(b"x")));
    producer.on_chunk_received(Chunk::data(Bytes::from_static(b"y")));
    producer.on_chunk_received(Chunk::data(Bytes::from_static(b"z")));
    producer.on_end_of_body();
    assert_eq!(producer.state(), StreamState::Buffering);

    let recorder = Arc::new(Recorder::default());
    producer.attach_consumer(recorder.clone()).unwrap();
    assert!(recorder.events().is_empty());

    producer.request_more(10);
    assert_eq!(recorder.events(), vec!["x", "y", "z", "complete"]);
    assert_eq!(producer.state(), StreamState::Completed);

    let counters = producer.counters();
    assert_eq!(counters.received_chunks, 3);
    assert_eq!(counters.emitted_chunks, 3);
}

#[tokio::test]
async fn slow_consumer_holds_the_transport_back() {
    let gate = ReadGate::new();
    let producer = ContentProducer::builder()
        .high_water_mark(2)
        .low_water_mark(1)
        .read_control(Arc::new(gate.clone()))
        .build()
        .unwrap();

    let mut chunks = (0..9).map(|i| Ok::<_, io::Error>(Chunk::data(Bytes::from(format!("{i}"))))).collect::<Vec<_>>();
    chunks.push(Ok(Chunk::last(Bytes::from_static(b"!"))));

    let pumping = {
        let producer = Arc::clone(&producer);
        let gate = gate.clone();
        tokio::spawn(async move { pump(stream::iter(chunks), &producer, &gate).await })
    };

    wait_until(|| !gate.is_open()).await;
    assert_eq!(producer.buffered_chunks(), 2);
    assert!(producer.reads_paused());

    let body = producer.attach_body().unwrap();
    let bytes = body.collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"012345678!");

    pumping.await.unwrap().unwrap();
    assert_eq!(producer.state(), StreamState::Completed);
    assert!(gate.is_open());
}

#[tokio::test]
async fn transport_failure_reaches_the_consumer() {
    let producer = ContentProducer::builder().build().unwrap();
    let chunks = vec![Ok(Chunk::data(Bytes::from_static(b"partial"))), Err(io::Error::other("connection reset"))];

    let result = pump(stream::iter(chunks), &producer, &ReadGate::new()).await;
    assert!(matches!(result, Err(ContentError::Transport { .. })));

    let mut body = producer.attach_body().unwrap();
    let error = body.frame().await.unwrap().unwrap_err();
    assert_eq!(error, ContentError::transport("connection reset"));
}

#[tokio::test(start_paused = true)]
async fn abandoned_body_is_torn_down_and_answered_with_408() {
    let worker: Arc<dyn Worker> = Arc::new(Handle::current());
    let producer = ContentProducer::builder()
        .inactivity_timeout(Timer::current(), worker, Duration::from_secs(2))
        .build()
        .unwrap();
    producer.on_chunk_received(Chunk::data(Bytes::from_static(b"never read")));

    tokio::time::sleep(Duration::from_secs(3)).await;

    let StreamState::Terminated(cause) = producer.state() else {
        panic!("stream should be torn down, was {:?}", producer.state());
    };
    assert!(cause.is_inactive_subscriber());

    let response = error_response(ExceptionStatusMapper::global(), &cause);
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let recorder = Arc::new(Recorder::default());
    producer.attach_consumer(recorder.clone()).unwrap();
    assert_eq!(recorder.events().len(), 1);
    assert!(recorder.events()[0].starts_with("error: no subscriber read the content stream in time"));
}

#[test]
fn request_and_connection_statistics_share_a_registry() {
    let registry = Arc::new(MetricsRegistry::new());
    let requests = RequestStatsCollector::new(registry.clone(), "proxy");
    let connections = ConnectionStatisticsHandler::new(registry.clone());

    connections.channel_active();
    connections.channel_read(&Bytes::from_static(b"GET /a HTTP/1.1\r\n\r\n"));
    requests.on_request("a");
    requests.on_request("b");
    requests.on_complete(&"a", 502);
    requests.on_terminate(&"b");
    connections.channel_write(&Bytes::from_static(b"HTTP/1.1 502 Bad Gateway\r\n\r\n"));
    connections.channel_inactive();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.gauges["proxy.request.outstanding"], 0);
    assert_eq!(snapshot.gauges["connections.total-connections"], 0);
    assert_eq!(snapshot.counters["proxy.request.received"], 2);
    assert_eq!(snapshot.counters["proxy.response.sent"], 1);
    assert_eq!(snapshot.counters["connections.bytes-received"], 19);
    assert_eq!(snapshot.counters["connections.bytes-sent"], 28);
    assert_eq!(snapshot.histograms["proxy.request.latency"].count, 2);

    let status = [Tag::new("statusClass", "5xx"), Tag::new("statusCode", "502")];
    assert_eq!(registry.counter("proxy.response.status", &status), 1);
}
