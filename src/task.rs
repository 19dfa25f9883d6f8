//! Task representation and panic-contained execution.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A unit of work submitted to an executor.
///
/// Runs exactly once on the executor's worker thread. The `wakes_up` marker
/// controls whether submitting this task posts a wakeup to a blocked worker;
/// loops that block on an external event source use [`Task::without_wakeup`]
/// for tasks whose arrival is already observed by that source.
pub struct Task {
    f: Box<dyn FnOnce() + Send + 'static>,
    wakes_up: bool,
}

impl Task {
    /// Wrap a callable as a task.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            f: Box::new(f),
            wakes_up: true,
        }
    }

    /// Wrap a callable that should not wake a blocked worker on submission.
    pub fn without_wakeup(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            f: Box::new(f),
            wakes_up: false,
        }
    }

    /// Whether submission of this task should post a wakeup.
    #[inline]
    pub fn wakes_up(&self) -> bool {
        self.wakes_up
    }

    /// Execute the task, consuming it.
    pub fn run(self) {
        (self.f)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("wakes_up", &self.wakes_up)
            .finish_non_exhaustive()
    }
}

/// Run a task, containing any panic.
///
/// A panicking task must never take down the worker loop; the payload is
/// logged and dropped.
pub(crate) fn safe_execute(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
        tracing::warn!(panic = panic_message(&payload), "task panicked");
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
