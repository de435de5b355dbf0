//! Scheduling primitives shared by every stream in the process.
//!
//! - [`Timer`]: a process-wide service for cancellable one-shot callbacks, created once at
//!   startup and handed to whoever needs it
//! - [`Worker`]: the owning execution context of a connection, used to hand off work that
//!   must not run on the caller's thread
//! - [`current_worker_name`]: identity of the calling worker for per-worker statistics

mod timer;
mod worker;

pub use timer::TimeoutHandle;
pub use timer::Timer;
pub use worker::InlineWorker;
pub use worker::Task;
pub use worker::Worker;
pub use worker::current_worker_name;
pub use worker::set_worker_name;
