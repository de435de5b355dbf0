//! Message body streaming between the transport and the application.
//!
//! The transport pushes body fragments whenever the network delivers them, while the
//! application pulls them only when it is ready. This module reconciles the two without
//! unbounded buffering:
//!
//! - [`ContentProducer`]: the per-body state machine. Queues chunks until a consumer
//!   attaches, delivers them against the consumer's demand, and pauses/resumes the
//!   transport through [`ReadControl`] around its high and low water marks
//! - [`ContentSubscriber`]: the callback interface of the single consumer
//! - [`ProducerBody`]: a consumer exposed as `http_body::Body`
//! - [`InactivityWatchdog`]: tears a stream down when no consumer arrives in time
//! - [`ReadGate`] and [`pump`]: the transport side of the backpressure loop
//!
//! # Lifecycle
//!
//! Every stream ends in exactly one terminal [`StreamState`]: `Completed` once the consumer
//! has seen the end of the body, or `Terminated` when it was torn down by a transport
//! error, a cancelled consumer or the watchdog. Nothing is delivered after either.

mod body;
mod chunk;
mod error;
mod flow;
mod producer;
mod state;
mod subscriber;
mod watchdog;

pub use body::ProducerBody;
pub use chunk::Chunk;
pub use error::ContentError;
pub use error::StreamCounters;
#[cfg(test)]
pub(crate) use flow::MockReadControl;
pub use flow::IgnoreReadControl;
pub use flow::ReadControl;
pub use flow::ReadGate;
pub use flow::pump;
pub use producer::ContentProducer;
pub use producer::ContentProducerBuilder;
pub use state::StreamState;
pub use subscriber::ContentSubscriber;
pub use watchdog::InactivityWatchdog;
