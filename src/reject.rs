//! Submission rejection: error type and pluggable policies.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::executor::SingleThreadExecutor;
use crate::task::Task;

/// Why a submission could not be accepted.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RejectedExecutionError {
    /// The executor is shut down; no new tasks are accepted.
    #[error("event executor terminated")]
    Terminated,

    /// The task queue is at capacity and the rejection policy declined the task.
    #[error("task queue full (capacity {capacity})")]
    QueueFull {
        /// The queue's configured capacity.
        capacity: usize,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    SpawnFailed(#[source] io::Error),
}

/// Policy invoked when the task queue refuses a task.
///
/// The policy may retry the enqueue (returning the new ticket) or decline the
/// task with an error that propagates to the submitter.
pub trait RejectionPolicy: Send + Sync {
    fn rejected(
        &self,
        task: Task,
        executor: &SingleThreadExecutor,
    ) -> Result<u64, RejectedExecutionError>;
}

/// Policy that declines the task outright.
#[derive(Debug, Default)]
pub struct RejectAlways;

impl RejectionPolicy for RejectAlways {
    fn rejected(
        &self,
        _task: Task,
        executor: &SingleThreadExecutor,
    ) -> Result<u64, RejectedExecutionError> {
        Err(RejectedExecutionError::QueueFull {
            capacity: executor.max_pending_tasks(),
        })
    }
}

/// Policy that sleeps and retries the enqueue a fixed number of times.
///
/// Never retries on the worker thread itself: blocking there would stall the
/// only consumer of the queue it is waiting on.
#[derive(Debug)]
pub struct Backoff {
    retries: usize,
    delay: Duration,
}

impl RejectionPolicy for Backoff {
    fn rejected(
        &self,
        mut task: Task,
        executor: &SingleThreadExecutor,
    ) -> Result<u64, RejectedExecutionError> {
        if !executor.in_event_loop() {
            for _ in 0..self.retries {
                thread::sleep(self.delay);
                match executor.try_offer(task) {
                    Ok(ticket) => return Ok(ticket),
                    Err(back) => task = back,
                }
            }
        }
        Err(RejectedExecutionError::QueueFull {
            capacity: executor.max_pending_tasks(),
        })
    }
}

/// Stock policy: decline the task.
pub fn reject() -> Arc<dyn RejectionPolicy> {
    Arc::new(RejectAlways)
}

/// Stock policy: retry `retries` times, sleeping `delay` between attempts.
///
/// # Panics
///
/// Panics if `retries` is 0 or `delay` is zero.
pub fn backoff(retries: usize, delay: Duration) -> Arc<dyn RejectionPolicy> {
    assert!(retries > 0, "retries must be > 0");
    assert!(delay > Duration::ZERO, "delay must be > 0");
    Arc::new(Backoff { retries, delay })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        let terminated = RejectedExecutionError::Terminated;
        assert_eq!(terminated.to_string(), "event executor terminated");

        let full = RejectedExecutionError::QueueFull { capacity: 16 };
        assert_eq!(full.to_string(), "task queue full (capacity 16)");
    }

    #[test]
    #[should_panic(expected = "retries must be > 0")]
    fn backoff_rejects_zero_retries() {
        let _ = backoff(0, Duration::from_millis(1));
    }

    #[test]
    #[should_panic(expected = "delay must be > 0")]
    fn backoff_rejects_zero_delay() {
        let _ = backoff(3, Duration::ZERO);
    }
}
