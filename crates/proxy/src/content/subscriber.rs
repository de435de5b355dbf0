use bytes::Bytes;

use crate::content::ContentError;

/// The pull-based recipient of a content stream.
///
/// A subscriber is attached to at most one [`ContentProducer`](crate::content::ContentProducer)
/// and receives chunks only after signalling demand through
/// [`request_more`](crate::content::ContentProducer::request_more). Exactly one of
/// `on_complete` and `on_error` ends the stream.
///
/// Callbacks are never invoked while the producer holds its internal lock, so calling back
/// into the producer (typically `request_more`) from inside a callback is fine.
pub trait ContentSubscriber: Send + Sync {
    fn on_chunk(&self, chunk: Bytes);

    fn on_complete(&self);

    fn on_error(&self, cause: ContentError);
}
