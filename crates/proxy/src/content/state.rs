use crate::content::ContentError;

/// Lifecycle of a single content stream.
///
/// ```text
/// AwaitingConsumer ──chunk──▶ Buffering
///        │                        │
///        └────────attach──────────┴──▶ Streaming ──eob + drained──▶ Completed
///
/// any non-terminal state ──tear_down──▶ Terminated
/// ```
///
/// `Completed` and `Terminated` are terminal: once entered, the state never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// No consumer attached and nothing received yet
    AwaitingConsumer,
    /// Chunks received and queued, no consumer attached yet
    Buffering,
    /// A consumer is attached and receives chunks as its demand allows
    Streaming,
    /// End of body delivered to the consumer
    Completed,
    /// Torn down by an error, timeout or cancellation
    Terminated(ContentError),
}

impl StreamState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Terminated(_))
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamState::Completed)
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(self, StreamState::Terminated(_))
    }

    /// Returns the teardown cause if the stream was terminated
    pub fn cause(&self) -> Option<&ContentError> {
        match self {
            StreamState::Terminated(cause) => Some(cause),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            StreamState::AwaitingConsumer => "awaiting_consumer",
            StreamState::Buffering => "buffering",
            StreamState::Streaming => "streaming",
            StreamState::Completed => "completed",
            StreamState::Terminated(_) => "terminated",
        }
    }
}
