//! Bounded blocking MPSC task queue.
//!
//! # Design
//!
//! Mutex + Condvar rather than a lock-free ring:
//!
//! - Producers are arbitrary submitter threads at task-submission rates
//!   (thousands/sec), not per-chunk hot-path rates. Lock hold times are a
//!   handful of `VecDeque` operations.
//! - The consumer needs blocking `take` with timeout and arbitrary `remove`,
//!   which channels and rings do not offer.
//! - The condvar provides efficient blocking with no spin-wait and no subtle
//!   memory-ordering obligations.
//!
//! # Wakeup sentinel
//!
//! A blocked `take` is flushed by posting a wakeup. Wakeups are carried
//! out-of-band as a coalesced flag next to the entries, so they can never be
//! observed as tasks, never consume queue capacity, and never inflate `len`.
//! Blocking dequeues prefer a real task and surface a pending wakeup as
//! [`Dequeued::Wakeup`] only when no task is queued. Wakeup is idempotent:
//! posting twice before the consumer looks is one wakeup.
//!
//! # Tickets
//!
//! `offer` stamps each accepted task with a monotonically increasing ticket.
//! The submission path uses the ticket to revoke a task that slipped into the
//! queue just as the executor reached SHUTDOWN.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::task::Task;

/// Result of a blocking dequeue.
#[derive(Debug)]
pub enum Dequeued {
    /// A real task.
    Task(Task),
    /// A wakeup was pending; the caller re-decides (typically by checking the
    /// executor's shutdown state).
    Wakeup,
}

/// Queue contract consumed by the executor.
///
/// Implementations must be multi-producer / single-consumer safe: any thread
/// may `offer`, `offer_wakeup`, and `remove`; only the worker dequeues.
/// Supply a custom implementation through
/// [`SingleThreadExecutor::with_queue_factory`](crate::SingleThreadExecutor::with_queue_factory)
/// when the stock mutex-based queue does not fit (for example a loop that
/// never blocks on the queue).
pub trait PendingTaskQueue: Send + Sync + 'static {
    /// Non-blocking enqueue. Returns the task's ticket, or the task itself
    /// when the queue is full.
    fn offer(&self, task: Task) -> Result<u64, Task>;

    /// Post an out-of-band wakeup, flushing a blocked dequeue. Must be cheap
    /// and idempotent.
    fn offer_wakeup(&self);

    /// Non-blocking dequeue of the next task.
    fn poll_task(&self) -> Option<Task>;

    /// Block until a task or a wakeup is available.
    fn take(&self) -> Dequeued;

    /// Block up to `timeout` for a task or wakeup. `None` means the wait
    /// timed out.
    fn poll_timeout(&self, timeout: Duration) -> Option<Dequeued>;

    /// Remove a still-queued task by its ticket. `true` when it was removed.
    fn remove(&self, ticket: u64) -> bool;

    /// Number of queued tasks. Wakeups are not counted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner {
    entries: VecDeque<(u64, Task)>,
    /// Coalesced out-of-band wakeup signal.
    wakeup_pending: bool,
    next_ticket: u64,
}

/// Bounded FIFO shared between submitter threads and the single worker.
pub struct TaskQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "task queue capacity must be > 0");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                wakeup_pending: false,
                next_ticket: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Tasks never run under this lock, so poisoning cannot originate here.
        self.inner.lock().expect("task queue mutex poisoned")
    }

    /// Non-blocking enqueue. Returns the task's ticket, or the task itself
    /// when the queue is full.
    pub fn offer(&self, task: Task) -> Result<u64, Task> {
        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            return Err(task);
        }
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.entries.push_back((ticket, task));
        drop(inner);
        self.not_empty.notify_one();
        Ok(ticket)
    }

    /// Post a wakeup, flushing a blocked consumer. Idempotent and cheap;
    /// consumes no queue capacity.
    pub fn offer_wakeup(&self) {
        let mut inner = self.lock();
        inner.wakeup_pending = true;
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Non-blocking dequeue of the next task. Pending wakeups are left alone;
    /// they are only consumed by the blocking dequeues.
    pub fn poll_task(&self) -> Option<Task> {
        self.lock().entries.pop_front().map(|(_, task)| task)
    }

    /// Block until a task or a wakeup is available. A queued task wins over a
    /// pending wakeup.
    pub fn take(&self) -> Dequeued {
        let mut inner = self.lock();
        loop {
            if let Some((_, task)) = inner.entries.pop_front() {
                return Dequeued::Task(task);
            }
            if inner.wakeup_pending {
                inner.wakeup_pending = false;
                return Dequeued::Wakeup;
            }
            inner = self
                .not_empty
                .wait(inner)
                .expect("task queue mutex poisoned");
        }
    }

    /// Block up to `timeout` for a task or wakeup. `None` means the wait
    /// timed out.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Dequeued> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some((_, task)) = inner.entries.pop_front() {
                return Some(Dequeued::Task(task));
            }
            if inner.wakeup_pending {
                inner.wakeup_pending = false;
                return Some(Dequeued::Wakeup);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _res) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .expect("task queue mutex poisoned");
            inner = guard;
        }
    }

    /// Remove a still-queued task by its ticket. `true` when it was removed.
    pub fn remove(&self, ticket: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(t, _)| *t != ticket);
        inner.entries.len() != before
    }

    /// Number of queued tasks. Wakeups are not counted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl PendingTaskQueue for TaskQueue {
    fn offer(&self, task: Task) -> Result<u64, Task> {
        TaskQueue::offer(self, task)
    }

    fn offer_wakeup(&self) {
        TaskQueue::offer_wakeup(self)
    }

    fn poll_task(&self) -> Option<Task> {
        TaskQueue::poll_task(self)
    }

    fn take(&self) -> Dequeued {
        TaskQueue::take(self)
    }

    fn poll_timeout(&self, timeout: Duration) -> Option<Dequeued> {
        TaskQueue::poll_timeout(self, timeout)
    }

    fn remove(&self, ticket: u64) -> bool {
        TaskQueue::remove(self, ticket)
    }

    fn len(&self) -> usize {
        TaskQueue::len(self)
    }

    fn is_empty(&self) -> bool {
        TaskQueue::is_empty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn noop() -> Task {
        Task::new(|| {})
    }

    #[test]
    fn offer_then_poll_is_fifo() {
        let q = TaskQueue::new(8);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            q.offer(Task::new(move || order.lock().unwrap().push(i)))
                .unwrap();
        }
        while let Some(task) = q.poll_task() {
            task.run();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn offer_full_returns_task() {
        let q = TaskQueue::new(2);
        q.offer(noop()).unwrap();
        q.offer(noop()).unwrap();
        assert!(q.offer(noop()).is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn wakeups_do_not_consume_capacity_or_count() {
        let q = TaskQueue::new(2);
        q.offer_wakeup();
        q.offer_wakeup();
        assert_eq!(q.len(), 0);
        assert!(q.is_empty());

        // Capacity is still fully available for real tasks.
        q.offer(noop()).unwrap();
        q.offer(noop()).unwrap();
        assert!(q.offer(noop()).is_err());
    }

    #[test]
    fn poll_task_never_surfaces_wakeups() {
        let q = TaskQueue::new(8);
        q.offer_wakeup();
        assert!(q.poll_task().is_none());
        q.offer(noop()).unwrap();
        assert!(q.poll_task().is_some());
        assert!(q.poll_task().is_none());
    }

    #[test]
    fn take_prefers_task_over_pending_wakeup() {
        let q = TaskQueue::new(8);
        q.offer_wakeup();
        q.offer(noop()).unwrap();
        assert!(matches!(q.take(), Dequeued::Task(_)));
        assert!(matches!(q.take(), Dequeued::Wakeup));
    }

    #[test]
    fn take_blocks_until_offer() {
        let q = Arc::new(TaskQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = thread::spawn(move || matches!(q2.take(), Dequeued::Task(_)));
        thread::sleep(Duration::from_millis(50));
        q.offer(noop()).unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn take_returns_wakeup_when_flushed() {
        let q = Arc::new(TaskQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = thread::spawn(move || matches!(q2.take(), Dequeued::Wakeup));
        thread::sleep(Duration::from_millis(50));
        q.offer_wakeup();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn poll_timeout_times_out_when_empty() {
        let q = TaskQueue::new(4);
        let start = Instant::now();
        assert!(q.poll_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn poll_timeout_sees_late_offer() {
        let q = Arc::new(TaskQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = thread::spawn(move || q2.poll_timeout(Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(50));
        q.offer(noop()).unwrap();
        assert!(matches!(waiter.join().unwrap(), Some(Dequeued::Task(_))));
    }

    #[test]
    fn remove_by_ticket() {
        let q = TaskQueue::new(8);
        let a = q.offer(noop()).unwrap();
        let b = q.offer(noop()).unwrap();
        assert_ne!(a, b);

        assert!(q.remove(a));
        assert!(!q.remove(a));
        assert_eq!(q.len(), 1);
        assert!(q.remove(b));
        assert!(q.is_empty());
    }

    /// Multiple producers, single consumer: nothing lost, per-producer FIFO.
    #[test]
    fn mpsc_no_loss_and_per_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 200;

        let q = Arc::new(TaskQueue::new(PRODUCERS * PER_PRODUCER));
        let seen = Arc::new(Mutex::new(vec![Vec::new(); PRODUCERS]));
        let executed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let q = Arc::clone(&q);
            let seen = Arc::clone(&seen);
            let executed = Arc::clone(&executed);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let seen = Arc::clone(&seen);
                    let executed = Arc::clone(&executed);
                    q.offer(Task::new(move || {
                        seen.lock().unwrap()[p].push(i);
                        executed.fetch_add(1, Ordering::Relaxed);
                    }))
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        while let Some(task) = q.poll_task() {
            task.run();
        }

        assert_eq!(executed.load(Ordering::Relaxed), PRODUCERS * PER_PRODUCER);
        let seen = seen.lock().unwrap();
        for per in seen.iter() {
            let expected: Vec<usize> = (0..PER_PRODUCER).collect();
            assert_eq!(per, &expected);
        }
    }
}
