//! Time-ordered queue of delayed tasks.
//!
//! Min-heap keyed by deadline with a sequence-number tie-break so tasks
//! scheduled for the same instant run in schedule order. Deadlines are
//! monotonic nanoseconds on the owning executor's clock.
//!
//! Accessed only by the worker thread; the executor wraps it in a mutex for
//! type-level safety, but the lock is uncontended by construction.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::task::Task;

/// Fallback delay reported when no delayed task exists, bounding how long a
/// loop sleeps between schedule-queue checks.
pub(crate) const SCHEDULE_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// A delayed task with its deadline and stable schedule order.
#[derive(Debug)]
pub struct ScheduledTask {
    deadline_nanos: u64,
    seq: u64,
    task: Task,
}

impl ScheduledTask {
    /// Deadline on the executor's monotonic clock.
    #[inline]
    pub fn deadline_nanos(&self) -> u64 {
        self.deadline_nanos
    }

    pub(crate) fn into_task(self) -> Task {
        self.task
    }

    /// Split into the schedule slot (deadline + order) and the task, so a
    /// failed handoff can be re-joined without losing the task's position.
    pub(crate) fn split(self) -> (ScheduleSlot, Task) {
        (
            ScheduleSlot {
                deadline_nanos: self.deadline_nanos,
                seq: self.seq,
            },
            self.task,
        )
    }
}

/// Deadline and schedule order detached from a popped task.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScheduleSlot {
    deadline_nanos: u64,
    seq: u64,
}

impl ScheduleSlot {
    pub(crate) fn rejoin(self, task: Task) -> ScheduledTask {
        ScheduledTask {
            deadline_nanos: self.deadline_nanos,
            seq: self.seq,
            task,
        }
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_nanos == other.deadline_nanos && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline_nanos
            .cmp(&other.deadline_nanos)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of delayed tasks keyed by deadline.
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    heap: BinaryHeap<Reverse<ScheduledTask>>,
    next_seq: u64,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task to run at `deadline_nanos`.
    pub fn push(&mut self, deadline_nanos: u64, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledTask {
            deadline_nanos,
            seq,
            task,
        }));
    }

    /// Re-insert a task popped by [`poll_due`](Self::poll_due) whose handoff
    /// failed. The original sequence number is kept so its order is stable.
    pub fn add_back(&mut self, task: ScheduledTask) {
        self.heap.push(Reverse(task));
    }

    /// Deadline of the earliest task, if any.
    pub fn peek_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(t)| t.deadline_nanos)
    }

    /// Pop the earliest task if its deadline is at or before `now`.
    pub fn poll_due(&mut self, now_nanos: u64) -> Option<ScheduledTask> {
        match self.heap.peek() {
            Some(Reverse(t)) if t.deadline_nanos <= now_nanos => {
                self.heap.pop().map(|Reverse(t)| t)
            }
            _ => None,
        }
    }

    /// Time until the earliest deadline, or [`SCHEDULE_PURGE_INTERVAL`] when
    /// the queue is empty. Due tasks report zero.
    pub fn next_delay(&self, now_nanos: u64) -> Duration {
        match self.peek_deadline() {
            Some(deadline) => Duration::from_nanos(deadline.saturating_sub(now_nanos)),
            None => SCHEDULE_PURGE_INTERVAL,
        }
    }

    /// Drop every scheduled task.
    pub fn cancel_all(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
