use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::content::ContentProducer;
use crate::runtime::{TimeoutHandle, Timer, Worker};

/// Reclaims a content stream whose consumer never shows up.
///
/// The watchdog wakes up on the shared [`Timer`] and looks at its producer:
/// - a finished producer disarms the watchdog for good
/// - a producer still waiting for its first subscriber is torn down with
///   [`InactiveSubscriber`](crate::content::ContentError::InactiveSubscriber) once `timeout`
///   has passed since the last transport activity, otherwise the next check is scheduled
///   for when that would happen
/// - a producer with a subscriber is checked again after a full `timeout`
///
/// The teardown itself is submitted to the producer's owning [`Worker`] rather than run on
/// the timer. The worker looks at the producer again before tearing it down, and a consumer
/// that attached in between keeps its stream.
#[derive(Clone)]
pub struct InactivityWatchdog {
    inner: Arc<WatchdogInner>,
}

struct WatchdogInner {
    producer: Weak<ContentProducer>,
    timer: Timer,
    worker: Arc<dyn Worker>,
    timeout: Duration,
    last_active: Mutex<Instant>,
    pending: Mutex<Option<TimeoutHandle>>,
    cancelled: AtomicBool,
}

impl InactivityWatchdog {
    pub(crate) fn start(producer: Weak<ContentProducer>, timer: Timer, worker: Arc<dyn Worker>, timeout: Duration) -> Self {
        let inner = Arc::new(WatchdogInner {
            producer,
            timer,
            worker,
            timeout,
            last_active: Mutex::new(Instant::now()),
            pending: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        inner.schedule(timeout);
        Self { inner }
    }

    /// Records transport activity; inactivity is measured from the latest reset.
    pub fn reset(&self) {
        *self.inner.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Disarms the watchdog permanently and drops the pending check.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}

impl std::fmt::Debug for InactivityWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InactivityWatchdog")
            .field("timeout", &self.inner.timeout)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WatchdogInner {
    fn schedule(self: &Arc<Self>, delay: Duration) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }

        let watchdog = Arc::clone(self);
        let handle = self.timer.schedule(delay, move || watchdog.check_activity());

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = Some(handle);
        // a cancel racing with this schedule may have missed the new handle
        if self.cancelled.load(Ordering::Acquire) {
            if let Some(handle) = pending.take() {
                handle.cancel();
            }
        }
    }

    fn check_activity(self: &Arc<Self>) {
        let Some(producer) = self.producer.upgrade() else {
            return;
        };

        match self.verdict(&producer) {
            Verdict::Disarmed => {}
            Verdict::RecheckIn(delay) => self.schedule(delay),
            Verdict::Expired(idle) => {
                debug!(timeout = ?self.timeout, ?idle, "no subscriber arrived in time, tearing down content stream");
                let watchdog = Arc::clone(self);
                self.worker.submit(Box::new(move || watchdog.expire(&producer)));
            }
        }
    }

    /// Runs on the owning worker. A consumer may have attached, or the transport may have
    /// delivered more, since the check on the timer, so the verdict is taken again.
    fn expire(self: &Arc<Self>, producer: &ContentProducer) {
        match self.verdict(producer) {
            Verdict::Disarmed => {}
            Verdict::RecheckIn(delay) => {
                trace!(?delay, "content stream became active before teardown, keep watching");
                self.schedule(delay);
            }
            Verdict::Expired(_) => {
                if !producer.expire_unsubscribed() {
                    trace!("subscriber attached concurrently with teardown, keep content stream");
                    self.schedule(self.timeout);
                }
            }
        }
    }

    fn verdict(&self, producer: &ContentProducer) -> Verdict {
        if self.cancelled.load(Ordering::Acquire) || producer.state().is_terminal() {
            return Verdict::Disarmed;
        }

        if !producer.is_waiting_for_subscriber() {
            return Verdict::RecheckIn(self.timeout);
        }

        let last_active = *self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = last_active + self.timeout;
        let now = Instant::now();
        if deadline > now {
            return Verdict::RecheckIn(deadline - now);
        }
        Verdict::Expired(now.duration_since(last_active))
    }
}

enum Verdict {
    Disarmed,
    RecheckIn(Duration),
    Expired(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Chunk, ContentError, ContentSubscriber, StreamCounters, StreamState};
    use crate::runtime::Task;
    use bytes::Bytes;
    use tokio::runtime::Handle;

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn watched_producer() -> Arc<ContentProducer> {
        ContentProducer::builder()
            .inactivity_timeout(Timer::current(), Arc::new(Handle::current()), TIMEOUT)
            .build()
            .expect("valid producer")
    }

    struct Discard;

    impl ContentSubscriber for Discard {
        fn on_chunk(&self, _chunk: Bytes) {}

        fn on_complete(&self) {}

        fn on_error(&self, _cause: ContentError) {}
    }

    #[tokio::test(start_paused = true)]
    async fn tears_down_stream_without_subscriber() {
        let producer = watched_producer();
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"abc")));
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"de")));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(10)).await;

        let expected = StreamCounters { received_bytes: 5, received_chunks: 2, emitted_bytes: 0, emitted_chunks: 0 };
        assert_eq!(producer.state(), StreamState::Terminated(ContentError::InactiveSubscriber(expected)));
        assert_eq!(producer.buffered_chunks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_activity_postpones_teardown() {
        let producer = watched_producer();

        tokio::time::sleep(Duration::from_millis(600)).await;
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"a")));

        // the first check at 1000ms finds 600ms of inactivity and reschedules
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(producer.state(), StreamState::Buffering);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(producer.state().is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_with_subscriber_is_never_torn_down() {
        let producer = watched_producer();
        producer.attach_consumer(Arc::new(Discard)).expect("first subscriber");

        for _ in 0..5 {
            producer.on_chunk_received(Chunk::data(Bytes::from_static(b"x")));
            producer.request_more(1);
            tokio::time::sleep(TIMEOUT).await;
        }

        tokio::time::sleep(TIMEOUT * 3).await;
        assert_eq!(producer.state(), StreamState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_stream_disarms_watchdog() {
        let producer = watched_producer();
        producer.attach_consumer(Arc::new(Discard)).expect("first subscriber");
        producer.on_end_of_body();
        assert_eq!(producer.state(), StreamState::Completed);

        let watchdog = producer.watchdog().expect("watchdog armed").clone();
        assert!(watchdog.is_cancelled());

        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(producer.state(), StreamState::Completed);
    }

    #[derive(Default)]
    struct DeferredWorker {
        tasks: Mutex<Vec<Task>>,
    }

    impl DeferredWorker {
        fn run_pending(&self) -> usize {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
            let count = tasks.len();
            for task in tasks {
                task();
            }
            count
        }
    }

    impl Worker for DeferredWorker {
        fn submit(&self, task: Task) {
            self.tasks.lock().unwrap().push(task);
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
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

    fn deferred_producer() -> (Arc<DeferredWorker>, Arc<ContentProducer>) {
        let worker = Arc::new(DeferredWorker::default());
        let producer = ContentProducer::builder()
            .inactivity_timeout(Timer::current(), worker.clone(), TIMEOUT)
            .build()
            .expect("valid producer");
        (worker, producer)
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_attaching_before_handoff_runs_keeps_stream() {
        let (worker, producer) = deferred_producer();
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"a")));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;
        assert_eq!(worker.tasks.lock().unwrap().len(), 1);

        let recorder = Arc::new(Recorder::default());
        producer.attach_consumer(recorder.clone()).expect("first subscriber");
        producer.request_more(1);
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"b")));

        assert_eq!(worker.run_pending(), 1);
        assert_eq!(producer.state(), StreamState::Streaming);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["a".to_string()]);
        assert!(!producer.watchdog().expect("watchdog armed").is_cancelled());

        tokio::time::sleep(TIMEOUT * 3).await;
        assert_eq!(worker.run_pending(), 0);
        producer.request_more(1);
        assert_eq!(producer.state(), StreamState::Streaming);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_activity_before_handoff_runs_postpones_teardown() {
        let (worker, producer) = deferred_producer();
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"a")));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;
        producer.on_chunk_received(Chunk::data(Bytes::from_static(b"b")));

        assert_eq!(worker.run_pending(), 1);
        assert_eq!(producer.state(), StreamState::Buffering);

        tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;
        assert_eq!(worker.run_pending(), 1);
        assert!(matches!(producer.state(), StreamState::Terminated(ContentError::InactiveSubscriber(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_producer_stops_checks() {
        let producer = watched_producer();
        let weak = Arc::downgrade(&producer);
        drop(producer);

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(weak.upgrade().is_none());
    }
}
