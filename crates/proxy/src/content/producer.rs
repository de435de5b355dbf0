use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::{ConfigError, ContentConfig};
use crate::content::{
    Chunk, ContentError, ContentSubscriber, IgnoreReadControl, InactivityWatchdog, ProducerBody, ReadControl, StreamCounters,
    StreamState,
};
use crate::ensure;
use crate::runtime::{Timer, Worker};

/// Arbitrates between a push-based transport and a single pull-based consumer for one
/// message body.
///
/// The transport pushes chunks with [`on_chunk_received`](Self::on_chunk_received) whenever
/// the network has them. Until a consumer attaches they are queued in arrival order. Once a
/// consumer is attached it receives one queued chunk for every unit of demand it signals
/// with [`request_more`](Self::request_more).
///
/// # Backpressure
///
/// The queue is bounded by chunk count rather than by bytes. When it reaches the high-water
/// mark the transport is told to pause reads; when delivery drains it down to the low-water
/// mark (inclusive) reads are resumed. The gap between the two marks keeps the transport from being
/// stopped and started on every chunk.
///
/// # Concurrency
///
/// The owning worker drives the transport side while the consumer may call in from its own
/// context. State changes happen in a short critical section; consumer callbacks run
/// outside of it, and only one caller at a time performs delivery. A caller that finds
/// delivery already in progress leaves its work to that caller, which re-examines the state
/// before it stops. Chunks therefore keep their order and a consumer may call back into the
/// producer from its callbacks.
pub struct ContentProducer {
    inner: Mutex<ProducerInner>,
    read_control: Arc<dyn ReadControl>,
    high_water_mark: usize,
    low_water_mark: usize,
    watchdog: Option<InactivityWatchdog>,
}

struct ProducerInner {
    state: StreamState,
    buffer: VecDeque<Bytes>,
    subscriber: Option<Arc<dyn ContentSubscriber>>,
    // stays set after the subscriber reference is released at the end of the stream
    subscribed: bool,
    demand: u64,
    end_of_body: bool,
    pending_error: Option<ContentError>,
    emitting: bool,
    reads_paused: bool,
    counters: StreamCounters,
}

enum Signal {
    Chunk(Arc<dyn ContentSubscriber>, Bytes),
    Complete(Arc<dyn ContentSubscriber>),
    Error(Arc<dyn ContentSubscriber>, ContentError),
}

struct Delivery {
    signal: Signal,
    resume_reads: bool,
}

impl ProducerInner {
    fn new() -> Self {
        Self {
            state: StreamState::AwaitingConsumer,
            buffer: VecDeque::new(),
            subscriber: None,
            subscribed: false,
            demand: 0,
            end_of_body: false,
            pending_error: None,
            emitting: false,
            reads_paused: false,
            counters: StreamCounters::default(),
        }
    }

    /// Works out the next signal for the consumer, applying its effect on the state.
    fn next_delivery(&mut self, low_water_mark: usize) -> Option<Delivery> {
        if let Some(cause) = self.pending_error.take() {
            let subscriber = self.subscriber.take()?;
            return Some(Delivery { signal: Signal::Error(subscriber, cause), resume_reads: false });
        }

        if !matches!(self.state, StreamState::Streaming) {
            return None;
        }
        let subscriber = self.subscriber.clone()?;

        if self.demand > 0 {
            if let Some(bytes) = self.buffer.pop_front() {
                self.demand -= 1;
                self.counters.record_emitted(bytes.len());

                let resume_reads = self.reads_paused && self.buffer.len() <= low_water_mark;
                if resume_reads {
                    self.reads_paused = false;
                }
                return Some(Delivery { signal: Signal::Chunk(subscriber, bytes), resume_reads });
            }
        }

        if self.buffer.is_empty() && self.end_of_body {
            self.state = StreamState::Completed;
            self.subscriber = None;
            return Some(Delivery { signal: Signal::Complete(subscriber), resume_reads: false });
        }

        None
    }
}

impl ContentProducer {
    pub fn builder() -> ContentProducerBuilder {
        ContentProducerBuilder::new()
    }

    /// Accepts a body fragment from the transport.
    ///
    /// Fragments arriving after the stream completed or was torn down are dropped: the
    /// transport may legitimately race with the consumer finishing.
    pub fn on_chunk_received(&self, chunk: Chunk) {
        let (data, last) = chunk.into_parts();

        if !data.is_empty() {
            let pause_reads = {
                let mut inner = self.lock();
                if inner.state.is_terminal() {
                    trace!(state = inner.state.name(), size = data.len(), "drop chunk received after end of stream");
                    return;
                }

                inner.counters.record_received(data.len());
                inner.buffer.push_back(data);
                if matches!(inner.state, StreamState::AwaitingConsumer) {
                    inner.state = StreamState::Buffering;
                }

                let pause_reads = !inner.reads_paused && inner.buffer.len() >= self.high_water_mark;
                if pause_reads {
                    inner.reads_paused = true;
                }
                pause_reads
            };

            self.touch();
            if pause_reads {
                debug!(high_water_mark = self.high_water_mark, "content buffer full, pause transport reads");
                self.read_control.pause_reads();
            }
        }

        if last {
            self.on_end_of_body();
        } else {
            self.drain();
        }
    }

    /// Marks that the transport will deliver no more chunks.
    ///
    /// Completion reaches the consumer only after every queued chunk has been delivered.
    pub fn on_end_of_body(&self) {
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() || inner.end_of_body {
                return;
            }
            inner.end_of_body = true;
        }

        self.touch();
        self.drain();
    }

    /// Binds the single consumer of this stream and starts delivering queued chunks as its
    /// demand allows.
    ///
    /// A stream accepts one consumer in its lifetime; any further attempt is a defect in the
    /// calling layer and fails with [`ContentError::AlreadySubscribed`]. Attaching to a stream
    /// that was already torn down succeeds and immediately reports the teardown cause.
    pub fn attach_consumer(&self, subscriber: Arc<dyn ContentSubscriber>) -> Result<(), ContentError> {
        {
            let mut inner = self.lock();
            if inner.subscribed {
                warn!(state = inner.state.name(), "rejected second subscriber for content stream");
                return Err(ContentError::AlreadySubscribed);
            }
            inner.subscribed = true;

            if let StreamState::Terminated(cause) = &inner.state {
                inner.pending_error = Some(cause.clone());
            } else {
                debug!(from = inner.state.name(), buffered = inner.buffer.len(), "subscriber attached");
                inner.state = StreamState::Streaming;
            }
            inner.subscriber = Some(subscriber);
        }

        self.drain();
        Ok(())
    }

    /// Attaches a [`ProducerBody`] as the consumer of this stream.
    pub fn attach_body(self: &Arc<Self>) -> Result<ProducerBody, ContentError> {
        ProducerBody::attach(self)
    }

    /// Grants the consumer `n` more chunks.
    pub fn request_more(&self, n: u64) {
        if n == 0 {
            return;
        }

        {
            let mut inner = self.lock();
            inner.demand = inner.demand.saturating_add(n);
        }

        self.drain();
    }

    /// Tears the stream down with `cause`, dropping any queued chunks and reporting the
    /// cause to the consumer if one is attached.
    ///
    /// Returns `false` when the stream had already completed or been torn down, in which
    /// case nothing happens.
    pub fn tear_down(&self, cause: ContentError) -> bool {
        self.terminate(|_| Some(cause))
    }

    /// Tears the stream down as an inactive subscriber, unless a consumer attached in the
    /// meantime. The check and the teardown happen under one lock, so a consumer attaching
    /// concurrently either wins and keeps the stream or receives the teardown cause.
    pub(crate) fn expire_unsubscribed(&self) -> bool {
        self.terminate(|inner| (!inner.subscribed).then(|| ContentError::inactive_subscriber(inner.counters)))
    }

    fn terminate<F>(&self, cause: F) -> bool
    where
        F: FnOnce(&ProducerInner) -> Option<ContentError>,
    {
        let (previous, counters, resume_reads, cause) = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return false;
            }
            let Some(cause) = cause(&inner) else {
                return false;
            };

            let previous = std::mem::replace(&mut inner.state, StreamState::Terminated(cause.clone()));
            inner.buffer.clear();
            inner.buffer.shrink_to_fit();
            if inner.subscriber.is_some() {
                inner.pending_error = Some(cause.clone());
            }

            // wake a paused transport so it notices the stream is gone
            let resume_reads = std::mem::take(&mut inner.reads_paused);
            (previous, inner.counters, resume_reads, cause)
        };

        if let Some(watchdog) = &self.watchdog {
            watchdog.cancel();
        }

        if cause.is_inactive_subscriber() {
            warn!(state = previous.name(), %counters, cause = %cause, "content stream torn down");
        } else {
            debug!(state = previous.name(), %counters, cause = %cause, "content stream torn down");
        }

        if resume_reads {
            self.read_control.resume_reads();
        }
        self.drain();
        true
    }

    /// True while no consumer has ever attached and the stream is still open.
    pub fn is_waiting_for_subscriber(&self) -> bool {
        let inner = self.lock();
        !inner.subscribed && matches!(inner.state, StreamState::AwaitingConsumer | StreamState::Buffering)
    }

    pub fn state(&self) -> StreamState {
        self.lock().state.clone()
    }

    pub fn counters(&self) -> StreamCounters {
        self.lock().counters
    }

    /// Number of chunks received but not yet delivered.
    pub fn buffered_chunks(&self) -> usize {
        self.lock().buffer.len()
    }

    /// True while the transport has been asked to hold back reads.
    pub fn reads_paused(&self) -> bool {
        self.lock().reads_paused
    }

    pub fn watchdog(&self) -> Option<&InactivityWatchdog> {
        self.watchdog.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, ProducerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.reset();
        }
    }

    fn drain(&self) {
        {
            let mut inner = self.lock();
            if inner.emitting {
                return;
            }
            inner.emitting = true;
        }

        // clears the flag should a subscriber callback unwind out of the loop
        let mut guard = EmittingGuard { producer: self, armed: true };

        loop {
            let delivery = {
                let mut inner = self.lock();
                match inner.next_delivery(self.low_water_mark) {
                    Some(delivery) => delivery,
                    None => {
                        inner.emitting = false;
                        guard.armed = false;
                        return;
                    }
                }
            };

            if delivery.resume_reads {
                debug!(low_water_mark = self.low_water_mark, "content buffer drained, resume transport reads");
                self.read_control.resume_reads();
            }

            match delivery.signal {
                Signal::Chunk(subscriber, bytes) => subscriber.on_chunk(bytes),
                Signal::Complete(subscriber) => {
                    if let Some(watchdog) = &self.watchdog {
                        watchdog.cancel();
                    }
                    trace!("content stream completed");
                    subscriber.on_complete();
                }
                Signal::Error(subscriber, cause) => subscriber.on_error(cause),
            }
        }
    }
}

struct EmittingGuard<'a> {
    producer: &'a ContentProducer,
    armed: bool,
}

impl Drop for EmittingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.producer.lock().emitting = false;
        }
    }
}

impl fmt::Debug for ContentProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ContentProducer")
            .field("state", &inner.state)
            .field("buffered", &inner.buffer.len())
            .field("demand", &inner.demand)
            .field("counters", &inner.counters)
            .finish_non_exhaustive()
    }
}

impl Drop for ContentProducer {
    fn drop(&mut self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.cancel();
        }
    }
}

struct WatchdogSettings {
    timer: Timer,
    worker: Arc<dyn Worker>,
    timeout: Duration,
}

/// Builder for [`ContentProducer`].
pub struct ContentProducerBuilder {
    high_water_mark: usize,
    low_water_mark: usize,
    read_control: Arc<dyn ReadControl>,
    watchdog: Option<WatchdogSettings>,
}

impl ContentProducerBuilder {
    fn new() -> Self {
        let defaults = ContentConfig::default();
        Self {
            high_water_mark: defaults.high_water_mark,
            low_water_mark: defaults.low_water_mark,
            read_control: Arc::new(IgnoreReadControl),
            watchdog: None,
        }
    }

    /// Takes the water marks from `config`.
    pub fn config(mut self, config: &ContentConfig) -> Self {
        self.high_water_mark = config.high_water_mark;
        self.low_water_mark = config.low_water_mark;
        self
    }

    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    pub fn low_water_mark(mut self, low_water_mark: usize) -> Self {
        self.low_water_mark = low_water_mark;
        self
    }

    pub fn read_control(mut self, read_control: Arc<dyn ReadControl>) -> Self {
        self.read_control = read_control;
        self
    }

    /// Arms an [`InactivityWatchdog`] that tears the stream down when no consumer shows up
    /// within `timeout` of the last transport activity.
    pub fn inactivity_timeout(mut self, timer: Timer, worker: Arc<dyn Worker>, timeout: Duration) -> Self {
        self.watchdog = Some(WatchdogSettings { timer, worker, timeout });
        self
    }

    pub fn build(self) -> Result<Arc<ContentProducer>, ConfigError> {
        ensure!(self.high_water_mark > 0, ConfigError::invalid_water_marks(self.high_water_mark, self.low_water_mark));
        ensure!(self.low_water_mark < self.high_water_mark, ConfigError::invalid_water_marks(self.high_water_mark, self.low_water_mark));
        if let Some(settings) = &self.watchdog {
            ensure!(!settings.timeout.is_zero(), ConfigError::ZeroInactivityTimeout);
        }

        let Self { high_water_mark, low_water_mark, read_control, watchdog } = self;
        Ok(Arc::new_cyclic(|producer| ContentProducer {
            inner: Mutex::new(ProducerInner::new()),
            read_control,
            high_water_mark,
            low_water_mark,
            watchdog: watchdog
                .map(|settings| InactivityWatchdog::start(producer.clone(), settings.timer, settings.worker, settings.timeout)),
        }))
    }
}

impl fmt::Debug for ContentProducerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentProducerBuilder")
            .field("high_water_mark", &self.high_water_mark)
            .field("low_water_mark", &self.low_water_mark)
            .field("watchdog", &self.watchdog.as_ref().map(|settings| settings.timeout))
            .finish_non_exhaustive()
    }
}
