use std::cell::RefCell;
use std::sync::Arc;

use tokio::runtime::Handle;

/// A unit of continuation work handed to a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The execution context that owns a connection and the content streams on it.
///
/// Anything that must mutate a stream from outside its owning worker (for example the
/// inactivity watchdog, whose checks run on the timer) submits the mutation here instead of
/// performing it in place, so the stream only ever sees one writer.
pub trait Worker: Send + Sync {
    fn submit(&self, task: Task);
}

impl Worker for Handle {
    fn submit(&self, task: Task) {
        self.spawn(async move { task() });
    }
}

/// Runs submitted tasks immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineWorker;

impl Worker for InlineWorker {
    fn submit(&self, task: Task) {
        task();
    }
}

thread_local! {
    static WORKER_NAME: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

/// Names the calling thread for per-worker accounting.
///
/// tokio names every worker thread of a runtime alike, so runtimes that want distinct
/// per-worker statistics call this from `on_thread_start` (or use `thread_name_fn`).
pub fn set_worker_name(name: &str) {
    WORKER_NAME.with(|cell| *cell.borrow_mut() = Some(Arc::from(name)));
}

/// Identity of the calling execution context: the registered worker name, else the OS
/// thread name, else the thread id.
pub fn current_worker_name() -> String {
    if let Some(name) = WORKER_NAME.with(|cell| cell.borrow().clone()) {
        return name.to_string();
    }

    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}
