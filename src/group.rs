//! Fixed group of executors behind a round-robin chooser.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chooser::RoundRobinChooser;
use crate::executor::{DefaultEventLoop, ExecutorConfig, SingleThreadExecutor};
use crate::reject;
use crate::spawn::ThreadPerTaskSpawner;
use crate::termination::TerminationFuture;

/// A fixed, non-empty array of [`SingleThreadExecutor`]s with round-robin
/// assignment.
///
/// Callers pin work to one executor by holding on to the handle returned by
/// [`next`](Self::next); successive `next` calls distribute across the group.
pub struct ExecutorGroup {
    children: Arc<[SingleThreadExecutor]>,
    chooser: RoundRobinChooser<SingleThreadExecutor>,
}

impl ExecutorGroup {
    /// Create a group of `n` default-loop executors sharing one spawner.
    /// Child executors are named `{name}-{i}`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn new(n: usize, config: ExecutorConfig) -> Self {
        assert!(n > 0, "executor group must not be empty");
        config.validate();
        let spawner = Arc::new(ThreadPerTaskSpawner::new(config.name.clone()));
        Self::with_factory(n, |i| {
            SingleThreadExecutor::with_parts(
                ExecutorConfig {
                    name: format!("{}-{}", config.name, i),
                    ..config.clone()
                },
                Arc::clone(&spawner),
                reject::reject(),
                Box::new(DefaultEventLoop),
            )
        })
    }

    /// Create a group from a per-slot factory.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn with_factory(n: usize, factory: impl FnMut(usize) -> SingleThreadExecutor) -> Self {
        assert!(n > 0, "executor group must not be empty");
        let children: Arc<[SingleThreadExecutor]> = (0..n).map(factory).collect();
        let chooser = RoundRobinChooser::new(Arc::clone(&children));
        Self { children, chooser }
    }

    /// The next executor, round-robin.
    pub fn next(&self) -> &SingleThreadExecutor {
        self.chooser.next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SingleThreadExecutor> {
        self.children.iter()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Initiate graceful shutdown on every child; returns their termination
    /// futures in slot order.
    pub fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> Vec<TerminationFuture> {
        self.children
            .iter()
            .map(|child| child.shutdown_gracefully(quiet_period, timeout))
            .collect()
    }

    /// Block up to `timeout` until every child terminated; returns whether
    /// the whole group is terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for child in self.children.iter() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            child.await_termination(deadline - now);
        }
        self.is_terminated()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.children.iter().all(|c| c.is_shutting_down())
    }

    pub fn is_terminated(&self) -> bool {
        self.children.iter().all(|c| c.is_terminated())
    }
}
