use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use http_body::{Body, Frame};
use tracing::trace;

use crate::content::{ContentError, ContentProducer, ContentSubscriber};

enum BodyEvent {
    Chunk(Bytes),
    Complete,
    Error(ContentError),
}

/// Forwards producer callbacks into the channel read by [`ProducerBody`].
struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<BodyEvent>,
}

impl ContentSubscriber for ChannelSubscriber {
    fn on_chunk(&self, chunk: Bytes) {
        // a closed channel means the body was dropped, the producer is torn down by its drop
        let _ = self.sender.unbounded_send(BodyEvent::Chunk(chunk));
    }

    fn on_complete(&self) {
        let _ = self.sender.unbounded_send(BodyEvent::Complete);
    }

    fn on_error(&self, cause: ContentError) {
        let _ = self.sender.unbounded_send(BodyEvent::Error(cause));
    }
}

/// A content stream exposed as an `http_body::Body`.
///
/// Each poll requests a single chunk from the producer and waits for it, so the handler
/// reading the body sets the pace; the channel between the two never holds more than one
/// chunk plus the terminal signal.
///
/// Dropping the body before it finished cancels the producer, which releases any buffered
/// chunks and lets the transport stop reading.
pub struct ProducerBody {
    producer: Arc<ContentProducer>,
    events: mpsc::UnboundedReceiver<BodyEvent>,
    in_flight: bool,
    done: bool,
}

impl ProducerBody {
    pub(crate) fn attach(producer: &Arc<ContentProducer>) -> Result<Self, ContentError> {
        let (sender, events) = mpsc::unbounded();
        producer.attach_consumer(Arc::new(ChannelSubscriber { sender }))?;
        Ok(Self { producer: Arc::clone(producer), events, in_flight: false, done: false })
    }
}

impl std::fmt::Debug for ProducerBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerBody").field("in_flight", &self.in_flight).field("done", &self.done).finish_non_exhaustive()
    }
}

impl Body for ProducerBody {
    type Data = Bytes;
    type Error = ContentError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if !this.in_flight {
            this.in_flight = true;
            this.producer.request_more(1);
        }

        match ready!(this.events.poll_next_unpin(cx)) {
            Some(BodyEvent::Chunk(bytes)) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Some(BodyEvent::Complete) => {
                this.done = true;
                Poll::Ready(None)
            }
            Some(BodyEvent::Error(cause)) => {
                this.done = true;
                Poll::Ready(Some(Err(cause)))
            }
            None => {
                this.done = true;
                Poll::Ready(Some(Err(ContentError::cancelled("content producer went away"))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

impl Drop for ProducerBody {
    fn drop(&mut self) {
        if !self.done && self.producer.tear_down(ContentError::cancelled("body dropped before end of stream")) {
            trace!("body dropped before end of stream, producer cancelled");
        }
    }
}
