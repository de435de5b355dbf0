use std::fmt::Display;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::content::{Chunk, ContentError, ContentProducer};

/// The transport's side of the backpressure loop.
///
/// A producer calls `pause_reads` once its buffer reaches the high-water mark and
/// `resume_reads` once the buffer has drained down to the low-water mark. Each crossing
/// produces exactly one call.
#[cfg_attr(test, mockall::automock)]
pub trait ReadControl: Send + Sync {
    fn pause_reads(&self);

    fn resume_reads(&self);
}

/// A transport that never pauses, for bodies already fully in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreReadControl;

impl ReadControl for IgnoreReadControl {
    fn pause_reads(&self) {}

    fn resume_reads(&self) {}
}

/// A latch a transport reader waits on before pulling more bytes off the wire.
///
/// The gate starts open. A producer built with the gate as its [`ReadControl`] closes it
/// when the consumer falls behind and reopens it once the consumer catches up.
#[derive(Debug, Clone)]
pub struct ReadGate {
    open: Arc<watch::Sender<bool>>,
}

impl ReadGate {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(true);
        Self { open: Arc::new(sender) }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Waits until reads are allowed.
    pub async fn readable(&self) {
        let mut receiver = self.open.subscribe();
        // the sender lives in `self`, so the channel can't close while we wait
        let _ = receiver.wait_for(|open| *open).await;
    }
}

impl Default for ReadGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadControl for ReadGate {
    fn pause_reads(&self) {
        self.open.send_replace(false);
    }

    fn resume_reads(&self) {
        self.open.send_replace(true);
    }
}

/// Drives `producer` from a stream of transport chunks until the body ends.
///
/// Before each read the pump waits for `gate` to be open, so a producer built with the same
/// gate holds the transport back while its consumer is slow. A stream error tears the
/// producer down with a transport error; a stream that ends without a terminal chunk is
/// treated the same way since the body was cut short.
pub async fn pump<S, E>(mut payload_stream: S, producer: &ContentProducer, gate: &ReadGate) -> Result<(), ContentError>
where
    S: Stream<Item = Result<Chunk, E>> + Unpin,
    E: Display,
{
    loop {
        gate.readable().await;

        if producer.state().is_terminal() {
            trace!("producer finished before the transport, stop pumping");
            return Ok(());
        }

        match payload_stream.next().await {
            Some(Ok(chunk)) => {
                let last = chunk.is_last();
                producer.on_chunk_received(chunk);
                if last {
                    return Ok(());
                }
            }

            Some(Err(e)) => {
                let cause = ContentError::transport(e);
                debug!(cause = %cause, "failed to read body from transport");
                producer.tear_down(cause.clone());
                return Err(cause);
            }

            None => {
                let cause = ContentError::transport("transport closed before end of body");
                debug!("transport closed before end of body");
                producer.tear_down(cause.clone());
                return Err(cause);
            }
        }
    }
}
