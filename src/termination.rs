//! Termination signalling: a once-completed latch shared by all observers.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why an executor terminated abnormally.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminationError {
    /// The shutdown path had to start a worker and the spawn failed, so the
    /// executor went straight to TERMINATED without running cleanup.
    #[error("worker thread could not be started: {message}")]
    SpawnFailed {
        /// Stringified spawn failure.
        message: String,
    },
}

struct FutureInner {
    result: Mutex<Option<Result<(), TerminationError>>>,
    cv: Condvar,
}

impl FutureInner {
    fn lock(&self) -> MutexGuard<'_, Option<Result<(), TerminationError>>> {
        self.result.lock().expect("termination mutex poisoned")
    }
}

/// Completes exactly once, when the executor reaches TERMINATED (or when a
/// shutdown-triggered worker spawn fails). Cloneable; every clone observes the
/// same completion.
#[derive(Clone)]
pub struct TerminationFuture {
    inner: Arc<FutureInner>,
}

impl TerminationFuture {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                result: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    /// Whether the future has completed (successfully or not).
    pub fn is_complete(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Block until completion.
    pub fn wait(&self) -> Result<(), TerminationError> {
        let mut guard = self.inner.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self
                .inner
                .cv
                .wait(guard)
                .expect("termination mutex poisoned");
        }
    }

    /// Block up to `timeout`. `None` means the wait timed out.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), TerminationError>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (g, _res) = self
                .inner
                .cv
                .wait_timeout(guard, deadline - now)
                .expect("termination mutex poisoned");
            guard = g;
        }
    }

    /// Complete successfully. First completion wins; later calls are no-ops.
    pub(crate) fn complete(&self) -> bool {
        self.set(Ok(()))
    }

    /// Complete with a failure. First completion wins; later calls are no-ops.
    pub(crate) fn fail(&self, err: TerminationError) -> bool {
        self.set(Err(err))
    }

    fn set(&self, result: Result<(), TerminationError>) -> bool {
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(result);
        drop(guard);
        self.inner.cv.notify_all();
        true
    }
}

impl std::fmt::Debug for TerminationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationFuture")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Internal single-shot gate used for blocking on a submitted task.
pub(crate) struct Latch {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn open(&self) {
        let mut open = self.open.lock().expect("latch mutex poisoned");
        *open = true;
        drop(open);
        self.cv.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut open = self.open.lock().expect("latch mutex poisoned");
        while !*open {
            open = self.cv.wait(open).expect("latch mutex poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completes_exactly_once() {
        let f = TerminationFuture::new();
        assert!(!f.is_complete());
        assert!(f.complete());
        assert!(!f.complete());
        assert!(!f.fail(TerminationError::SpawnFailed {
            message: "late".into()
        }));
        assert_eq!(f.wait(), Ok(()));
    }

    #[test]
    fn failure_sticks() {
        let f = TerminationFuture::new();
        let err = TerminationError::SpawnFailed {
            message: "no threads".into(),
        };
        assert!(f.fail(err.clone()));
        assert_eq!(f.wait(), Err(err));
    }

    #[test]
    fn wait_timeout_expires() {
        let f = TerminationFuture::new();
        assert!(f.wait_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn clones_observe_completion() {
        let f = TerminationFuture::new();
        let f2 = f.clone();
        let waiter = thread::spawn(move || f2.wait());
        thread::sleep(Duration::from_millis(30));
        f.complete();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn latch_releases_waiters() {
        let latch = Arc::new(Latch::new());
        let l2 = Arc::clone(&latch);
        let waiter = thread::spawn(move || l2.wait());
        thread::sleep(Duration::from_millis(20));
        latch.open();
        waiter.join().unwrap();
    }
}
