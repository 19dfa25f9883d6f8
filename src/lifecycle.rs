//! Lifecycle state word and CAS transition helpers.
//!
//! The executor's lifecycle is a single atomic `u32` holding one of five
//! states. States are strictly ordered and only ever increase:
//!
//! ```text
//!   NOT_STARTED(1) < STARTED(2) < SHUTTING_DOWN(3) < SHUTDOWN(4) < TERMINATED(5)
//! ```
//!
//! Every transition is a CAS with an explicit set of legal source states, so
//! concurrent submitters and shutdown callers race safely: the loser of a CAS
//! re-reads and re-decides. No observer ever sees the state go backward, with
//! one deliberate exception: a failed worker spawn reverts STARTED back to
//! NOT_STARTED so a later submission can retry (the worker never existed, so
//! nothing observed STARTED meaningfully).

use std::sync::atomic::{AtomicU32, Ordering};

/// Initial state. No worker thread exists yet.
pub(crate) const ST_NOT_STARTED: u32 = 1;
/// A worker thread has been (or is being) spawned.
pub(crate) const ST_STARTED: u32 = 2;
/// Graceful shutdown requested; tasks still accepted and run.
pub(crate) const ST_SHUTTING_DOWN: u32 = 3;
/// Hard shutdown; new tasks are rejected.
pub(crate) const ST_SHUTDOWN: u32 = 4;
/// Worker exited and cleanup ran.
pub(crate) const ST_TERMINATED: u32 = 5;

/// Atomic lifecycle state word.
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU32);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU32::new(ST_NOT_STARTED))
    }

    #[inline]
    pub(crate) fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Single CAS attempt; `true` when the transition was applied.
    #[inline]
    pub(crate) fn cas(&self, old: u32, new: u32) -> bool {
        self.0
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditional store. Used only for the spawn-failure revert and the
    /// final TERMINATED store, where the caller already owns the transition.
    #[inline]
    pub(crate) fn set(&self, state: u32) {
        self.0.store(state, Ordering::Release);
    }

    /// Raise the state to at least `target`, leaving higher states untouched.
    ///
    /// Used on the worker-exit path to ensure SHUTTING_DOWN even when the
    /// loop returned without any shutdown call.
    pub(crate) fn advance_to_at_least(&self, target: u32) {
        let mut old = self.get();
        loop {
            if old >= target {
                return;
            }
            match self
                .0
                .compare_exchange_weak(old, target, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }
}
