//! Background tasks with cooperative cancellation.
//!
//! Long-running steps (directory walks, session loads, regression calls) run
//! on a worker thread. Each task has a caller-chosen id; starting a task with
//! an id that is already running cancels the previous one first.

use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Cancellation flag checked by workers between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct RunningTask {
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

/// Runs id-keyed background tasks.
#[derive(Default)]
pub struct TaskRunner {
    tasks: HashMap<String, RunningTask>,
}

impl TaskRunner {
    /// Creates a runner without tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `work` on a worker thread and calls `on_done` with its result
    /// unless the task was cancelled in the meantime.
    ///
    /// A task already running under `id` is cancelled first.
    pub fn spawn<T, W, D>(&mut self, id: &str, work: W, on_done: D)
    where
        T: Send + 'static,
        W: FnOnce(&CancelFlag) -> T + Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        self.cancel(id);
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let task_id = id.to_string();
        let handle = thread::spawn(move || {
            let result = work(&flag);
            if flag.is_cancelled() {
                debug!("task {task_id} cancelled, dropping result");
            } else {
                on_done(result);
            }
        });
        self.tasks
            .insert(id.to_string(), RunningTask { cancel, handle });
    }

    /// Cancels the task running under `id`, if any. Returns whether one was found.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a task with `id` has been started and not yet joined or cancelled.
    #[must_use]
    pub fn is_running(&self, id: &str) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Blocks until the task under `id` has finished.
    ///
    /// Returns false if no such task exists or the worker panicked.
    pub fn wait(&mut self, id: &str) -> bool {
        self.tasks
            .remove(id)
            .is_some_and(|task| task.handle.join().is_ok())
    }

    /// Cancels all tasks.
    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel.cancel();
        }
    }
}
