use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// A process-wide scheduling service for one-shot delayed callbacks.
///
/// Scheduling is backed by tokio's hierarchical timer wheel, so thousands of concurrent
/// streams can each hold a pending timeout without an OS timer per stream. A `Timer` is
/// cheap to clone; all clones share the same underlying runtime.
///
/// Two flavours exist:
/// - [`Timer::from_handle`] schedules onto an existing runtime (useful in tests with a
///   paused clock, or when the proxy already owns a runtime dedicated to housekeeping)
/// - [`Timer::dedicated`] starts its own single-threaded runtime on a named thread which
///   lives until [`Timer::shutdown`] is called or the last clone is dropped
#[derive(Debug, Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

#[derive(Debug)]
struct TimerInner {
    handle: Handle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Timer {
    pub fn from_handle(handle: Handle) -> Self {
        Self { inner: Arc::new(TimerInner { handle, shutdown: Mutex::new(None) }) }
    }

    /// Creates a timer on the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// Starts a timer running on its own thread.
    pub fn dedicated(thread_name: &str) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let name = thread_name.to_string();
        std::thread::Builder::new().name(name.clone()).spawn(move || {
            runtime.block_on(async move {
                // a dropped sender means every timer clone is gone, stop either way
                let _ = shutdown_receiver.await;
            });
            debug!(thread = %name, "timer thread stopped");
        })?;

        info!(thread = thread_name, "started timer thread");
        Ok(Self { inner: Arc::new(TimerInner { handle, shutdown: Mutex::new(Some(shutdown_sender)) }) })
    }

    /// Runs `task` once after `delay`, unless the returned handle is cancelled first.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimeoutHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let join_handle = self.inner.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });

        TimeoutHandle { abort: join_handle.abort_handle() }
    }

    /// Stops a dedicated timer thread; pending callbacks never run afterwards.
    ///
    /// Has no effect on timers created from an existing runtime handle.
    pub fn shutdown(&self) {
        let sender = self.inner.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

/// A cancellable reference to a scheduled callback.
#[derive(Debug)]
pub struct TimeoutHandle {
    abort: AbortHandle,
}

impl TimeoutHandle {
    /// Prevents the callback from running if it has not started yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
