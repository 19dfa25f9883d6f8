//! Thread-per-task spawner: one fresh OS thread per submitted callable.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Launches each callable on its own named OS thread.
///
/// Thread names are `{prefix}-{n}` with `n` increasing per spawn, so a group
/// of executors sharing one spawner gets distinguishable worker names.
#[derive(Debug)]
pub struct ThreadPerTaskSpawner {
    prefix: String,
    next_id: AtomicUsize,
}

impl ThreadPerTaskSpawner {
    /// # Panics
    ///
    /// Panics if `prefix` is empty.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        assert!(!prefix.is_empty(), "thread name prefix must not be empty");
        Self {
            prefix,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Start a fresh thread running `f`. The thread is detached; callers that
    /// need completion signalling arrange it inside `f`.
    pub fn spawn(&self, f: impl FnOnce() + Send + 'static) -> io::Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("{}-{}", self.prefix, id))
            .spawn(f)
            .map(|_| ())
    }
}

impl Default for ThreadPerTaskSpawner {
    fn default() -> Self {
        Self::new("taskloop-worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn spawns_fresh_named_threads() {
        let spawner = ThreadPerTaskSpawner::new("spawn-test");
        let (tx, rx) = mpsc::channel();

        for _ in 0..2 {
            let tx = tx.clone();
            spawner
                .spawn(move || {
                    let name = thread::current().name().map(str::to_owned);
                    tx.send(name).unwrap();
                })
                .unwrap();
        }

        let mut names: Vec<String> = (0..2).map(|_| rx.recv().unwrap().unwrap()).collect();
        names.sort();
        assert_eq!(names, vec!["spawn-test-0", "spawn-test-1"]);
    }

    #[test]
    #[should_panic(expected = "thread name prefix must not be empty")]
    fn empty_prefix_is_rejected() {
        let _ = ThreadPerTaskSpawner::new("");
    }
}
