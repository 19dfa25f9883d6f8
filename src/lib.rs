//! Single-threaded serial task executor with delayed scheduling and two-phase
//! graceful shutdown.
//!
//! Each [`SingleThreadExecutor`] owns exactly one worker thread, spawned
//! lazily by the first off-worker submission. Producers on arbitrary threads
//! hand tasks across a bounded MPSC queue; the worker interleaves them with
//! due tasks from a time-ordered schedule queue and is flushed out of blocking
//! waits by a wakeup signal. Teardown is two-phase: a graceful request keeps
//! the worker draining until a quiet period passes with no task activity (or
//! a hard timeout fires), then shutdown hooks and cleanup run and the
//! termination future completes.
//!
//! High-level flow:
//! 1) `execute` enqueues and, off-worker, lazily starts the worker.
//! 2) The loop drains via `take_task` / `run_all_tasks`, migrating due
//!    scheduled tasks into the task queue before each pass.
//! 3) `shutdown_gracefully` advances the lifecycle; the worker confirms
//!    shutdown once the quiet period elapses, runs hooks, and terminates.
//!
//! [`ExecutorGroup`] distributes pinned work across a fixed array of
//! executors with a round-robin chooser (bitmask for power-of-two sizes).
//!
//! ```
//! use std::time::Duration;
//! use taskloop::{ExecutorConfig, SingleThreadExecutor, Task};
//!
//! let executor = SingleThreadExecutor::new(ExecutorConfig::default());
//! executor.execute(Task::new(|| println!("runs on the worker"))).unwrap();
//! executor
//!     .shutdown_gracefully(Duration::from_millis(50), Duration::from_secs(5))
//!     .wait()
//!     .unwrap();
//! ```

use std::sync::OnceLock;

pub mod chooser;
pub mod executor;
pub mod group;
mod lifecycle;
pub mod queue;
pub mod reject;
pub mod scheduled;
pub mod spawn;
pub mod task;
pub mod termination;

pub use chooser::RoundRobinChooser;
pub use executor::{
    DefaultEventLoop, EventLoop, ExecutorConfig, ShutdownHookHandle, SingleThreadExecutor,
    ThreadProperties, MIN_TASK_QUEUE_CAPACITY,
};
pub use group::ExecutorGroup;
pub use queue::{Dequeued, PendingTaskQueue, TaskQueue};
pub use reject::{backoff, reject, RejectedExecutionError, RejectionPolicy};
pub use scheduled::ScheduleQueue;
pub use spawn::ThreadPerTaskSpawner;
pub use task::Task;
pub use termination::{TerminationError, TerminationFuture};

/// Environment variable supplying the default task-queue capacity.
pub const MAX_PENDING_TASKS_ENV: &str = "TASKLOOP_MAX_PENDING_TASKS";

/// Default task-queue capacity: `TASKLOOP_MAX_PENDING_TASKS` when set and
/// parsable, otherwise effectively unbounded. Parsed once per process.
/// Construction still clamps to [`MIN_TASK_QUEUE_CAPACITY`].
pub fn default_max_pending_tasks() -> usize {
    static CAP: OnceLock<usize> = OnceLock::new();
    *CAP.get_or_init(|| {
        std::env::var(MAX_PENDING_TASKS_ENV)
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .map(|cap| cap.max(MIN_TASK_QUEUE_CAPACITY))
            .unwrap_or(usize::MAX)
    })
}
