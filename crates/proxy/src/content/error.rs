use std::fmt;

use thiserror::Error;

/// Byte and chunk tallies for a single content stream.
///
/// The counters only ever grow while the stream is alive. They are reported when a stream
/// is torn down abnormally so that a stalled request can be diagnosed afterwards.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StreamCounters {
    pub received_bytes: u64,
    pub received_chunks: u64,
    pub emitted_bytes: u64,
    pub emitted_chunks: u64,
}

impl StreamCounters {
    pub(crate) fn record_received(&mut self, len: usize) {
        self.received_bytes += len as u64;
        self.received_chunks += 1;
    }

    pub(crate) fn record_emitted(&mut self, len: usize) {
        self.emitted_bytes += len as u64;
        self.emitted_chunks += 1;
    }
}

impl fmt::Display for StreamCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "receivedBytes={}, receivedChunks={}, emittedBytes={}, emittedChunks={}",
            self.received_bytes, self.received_chunks, self.emitted_bytes, self.emitted_chunks
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("content stream already has a subscriber")]
    AlreadySubscribed,

    #[error("no subscriber read the content stream in time: {0}")]
    InactiveSubscriber(StreamCounters),

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("content stream cancelled: {reason}")]
    Cancelled { reason: String },
}

impl ContentError {
    pub fn inactive_subscriber(counters: StreamCounters) -> Self {
        Self::InactiveSubscriber(counters)
    }

    pub fn transport<S: ToString>(str: S) -> Self {
        Self::Transport { reason: str.to_string() }
    }

    pub fn cancelled<S: ToString>(str: S) -> Self {
        Self::Cancelled { reason: str.to_string() }
    }

    pub fn is_inactive_subscriber(&self) -> bool {
        matches!(self, Self::InactiveSubscriber(_))
    }
}
