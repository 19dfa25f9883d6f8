//! Single-threaded serial task executor.
//!
//! # Architecture
//!
//! ```text
//!   Producer threads                          Worker thread (one, lazy)
//!        │                                          │
//!        │ execute(task)                            │ EventLoop::run()
//!        ▼                                          ▼
//!   ┌─────────────┐   offer / wakeup    ┌───────────────────────────┐
//!   │  TaskQueue  │◄────────────────────│ take_task / poll_task     │
//!   │ (bounded    │────────────────────►│ run_all_tasks             │
//!   │  MPSC FIFO) │                     │ fetch_from_schedule_queue │
//!   └─────────────┘                     └─────────────┬─────────────┘
//!        ▲                                            │
//!        │ due tasks migrate                          │
//!   ┌────┴──────────┐                                 ▼
//!   │ ScheduleQueue │                     confirm_shutdown loop
//!   │ (worker-only) │                     cleanup → TERMINATED
//!   └───────────────┘                     → TerminationFuture
//! ```
//!
//! The worker thread is spawned by the first off-worker submission and is the
//! sole consumer of the task queue, the sole user of the schedule queue, and
//! the sole mutator of shutdown hooks and the execution timestamps.
//!
//! # Correctness invariants
//!
//! - **One worker ever**: the NOT_STARTED→STARTED CAS admits a single spawn;
//!   a failed spawn reverts so a later submission can retry.
//! - **Monotonic lifecycle**: state only increases (see [`crate::lifecycle`]).
//! - **No lost scheduled tasks**: a due task is either handed to the task
//!   queue or pushed back to the schedule queue.
//! - **Sentinel invisibility**: the wakeup signal travels out-of-band next to
//!   the queue entries and can never reach user code.
//! - **Termination completes once**, after cleanup ran (or after a
//!   shutdown-path spawn failure, as a failed future).

use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, Thread, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};

use crate::lifecycle::{
    Lifecycle, ST_NOT_STARTED, ST_SHUTDOWN, ST_SHUTTING_DOWN, ST_STARTED, ST_TERMINATED,
};
use crate::queue::{Dequeued, PendingTaskQueue, TaskQueue};
use crate::reject::{self, RejectedExecutionError, RejectionPolicy};
use crate::scheduled::ScheduleQueue;
use crate::spawn::ThreadPerTaskSpawner;
use crate::task::{panic_message, safe_execute, Task};
use crate::termination::{Latch, TerminationError, TerminationFuture};

/// Lower bound applied to any requested task-queue capacity.
pub const MIN_TASK_QUEUE_CAPACITY: usize = 16;

/// Tasks executed between clock reads in [`SingleThreadExecutor::run_all_tasks_for`].
/// Reading the monotonic clock is comparatively expensive.
const RUNS_PER_TIME_CHECK: u64 = 64;

/// How long the worker parks per quiet-period iteration before re-checking
/// for late task arrivals.
const QUIET_PERIOD_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Configuration
// ============================================================================

/// Executor construction options.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Worker thread name (also the spawner prefix for [`SingleThreadExecutor::new`]).
    pub name: String,

    /// `true` when the loop's own blocking dequeue observes every enqueue, so
    /// submission does not need to post a wakeup sentinel. Loops that block on
    /// an external event source set this to `false`.
    pub add_task_wakes_up: bool,

    /// Task queue capacity. Clamped to at least [`MIN_TASK_QUEUE_CAPACITY`].
    /// The default comes from the `TASKLOOP_MAX_PENDING_TASKS` environment
    /// variable, or effectively unbounded when unset.
    pub max_pending_tasks: usize,
}

impl ExecutorConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(!self.name.is_empty(), "executor name must not be empty");
        assert!(self.max_pending_tasks > 0, "max_pending_tasks must be > 0");
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "taskloop".to_string(),
            add_task_wakes_up: true,
            max_pending_tasks: crate::default_max_pending_tasks(),
        }
    }
}

// ============================================================================
// EventLoop contract
// ============================================================================

/// The worker's main loop and its lifecycle hooks.
///
/// `run` owns the worker: it must drain tasks using the executor's helpers
/// and, once [`SingleThreadExecutor::is_shutting_down`] holds, keep calling
/// [`SingleThreadExecutor::confirm_shutdown`] until it returns `true` before
/// returning. A loop that returns without doing so is logged as buggy and the
/// worker-exit path runs the confirmation itself.
pub trait EventLoop: Send + 'static {
    /// The main loop. Runs once, on the worker thread.
    fn run(&mut self, executor: &SingleThreadExecutor);

    /// Called exactly once after the confirmation loop finishes, before the
    /// executor reaches TERMINATED.
    fn cleanup(&mut self, executor: &SingleThreadExecutor) {
        let _ = executor;
    }

    /// Called after every drain pass of [`SingleThreadExecutor::run_all_tasks`]
    /// and [`SingleThreadExecutor::run_all_tasks_for`].
    fn after_running_all_tasks(&mut self, executor: &SingleThreadExecutor) {
        let _ = executor;
    }
}

/// Stock loop: block for the next task, run it, repeat until shutdown
/// confirms.
#[derive(Debug, Default)]
pub struct DefaultEventLoop;

impl EventLoop for DefaultEventLoop {
    fn run(&mut self, executor: &SingleThreadExecutor) {
        loop {
            if let Some(task) = executor.take_task() {
                safe_execute(task);
                executor.update_last_execution_time();
            }
            if executor.confirm_shutdown(self) {
                break;
            }
        }
    }
}

// ============================================================================
// Thread properties
// ============================================================================

/// Point-in-time snapshot of the worker thread, captured once on the first
/// [`SingleThreadExecutor::thread_properties`] call.
#[derive(Clone, Debug)]
pub struct ThreadProperties {
    name: Option<String>,
    id: ThreadId,
    alive: bool,
    interrupted: bool,
}

impl ThreadProperties {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Whether the worker had not yet terminated at capture time.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Worker interrupt status at capture time.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }
}

/// Handle for removing a previously added shutdown hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownHookHandle(u64);

type Hook = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Shared state
// ============================================================================

struct Shared {
    name: String,
    add_task_wakes_up: bool,
    max_pending_tasks: usize,

    task_queue: Box<dyn PendingTaskQueue>,
    /// Worker-only by discipline; the mutex exists for type-level safety and
    /// is uncontended.
    schedule_queue: Mutex<ScheduleQueue>,
    lifecycle: Lifecycle,

    spawner: Arc<ThreadPerTaskSpawner>,
    rejection: Arc<dyn RejectionPolicy>,
    /// Taken by the worker at bootstrap.
    event_loop: Mutex<Option<Box<dyn EventLoop>>>,

    /// Set once by the worker as its first action.
    worker: OnceLock<Thread>,
    /// Sticky interrupt status; readable before the worker exists.
    interrupted: AtomicBool,
    /// Locked only by the worker, for quiet-period parking.
    parker: Mutex<Parker>,
    unparker: Unparker,

    /// Origin of the executor's monotonic clock.
    origin: Instant,
    /// Nanos of the most recent task execution. Worker-only writes.
    last_execution_time: AtomicU64,
    /// Nanos when `confirm_shutdown` first ran; 0 = unset. Worker-only writes.
    graceful_start_time: AtomicU64,
    /// Recorded by the successful shutdown_gracefully CAS winner.
    quiet_period_nanos: AtomicU64,
    shutdown_timeout_nanos: AtomicU64,

    /// Insertion-ordered shutdown hooks. Worker-only mutation by discipline.
    hooks: Mutex<Vec<(u64, Hook)>>,
    next_hook_id: AtomicU64,

    termination: TerminationFuture,
    thread_properties: OnceLock<ThreadProperties>,
}

impl Shared {
    fn schedule_queue(&self) -> MutexGuard<'_, ScheduleQueue> {
        self.schedule_queue.lock().expect("schedule queue mutex poisoned")
    }

    fn hooks(&self) -> MutexGuard<'_, Vec<(u64, Hook)>> {
        self.hooks.lock().expect("shutdown hooks mutex poisoned")
    }
}

// ============================================================================
// SingleThreadExecutor
// ============================================================================

/// Serial executor owning (at most) one worker thread.
///
/// Cloneable handle; all clones refer to the same executor. Tasks submitted
/// by any thread run serialized on the worker, interleaved with delayed tasks
/// from the schedule queue. Teardown is two-phase: a graceful request moves
/// the lifecycle to SHUTTING_DOWN, and the worker confirms shutdown once a
/// quiet period without task activity elapses (or the hard timeout fires).
#[derive(Clone)]
pub struct SingleThreadExecutor {
    shared: Arc<Shared>,
}

impl SingleThreadExecutor {
    /// Create an executor running the [`DefaultEventLoop`] with the stock
    /// reject-on-full policy and a dedicated thread-per-task spawner.
    pub fn new(config: ExecutorConfig) -> Self {
        let spawner = Arc::new(ThreadPerTaskSpawner::new(config.name.clone()));
        Self::with_parts(config, spawner, reject::reject(), Box::new(DefaultEventLoop))
    }

    /// Create an executor from explicit parts, with the stock [`TaskQueue`].
    pub fn with_parts(
        config: ExecutorConfig,
        spawner: Arc<ThreadPerTaskSpawner>,
        rejection: Arc<dyn RejectionPolicy>,
        event_loop: Box<dyn EventLoop>,
    ) -> Self {
        Self::with_queue_factory(config, spawner, rejection, event_loop, |capacity| {
            Box::new(TaskQueue::new(capacity))
        })
    }

    /// Create an executor with a custom pending-task queue. The factory
    /// receives the clamped capacity; loops that never block on the queue can
    /// substitute an implementation without blocking support overhead.
    pub fn with_queue_factory(
        config: ExecutorConfig,
        spawner: Arc<ThreadPerTaskSpawner>,
        rejection: Arc<dyn RejectionPolicy>,
        event_loop: Box<dyn EventLoop>,
        new_task_queue: impl FnOnce(usize) -> Box<dyn PendingTaskQueue>,
    ) -> Self {
        config.validate();
        let max_pending_tasks = config.max_pending_tasks.max(MIN_TASK_QUEUE_CAPACITY);
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        Self {
            shared: Arc::new(Shared {
                name: config.name,
                add_task_wakes_up: config.add_task_wakes_up,
                max_pending_tasks,
                task_queue: new_task_queue(max_pending_tasks),
                schedule_queue: Mutex::new(ScheduleQueue::new()),
                lifecycle: Lifecycle::new(),
                spawner,
                rejection,
                event_loop: Mutex::new(Some(event_loop)),
                worker: OnceLock::new(),
                interrupted: AtomicBool::new(false),
                parker: Mutex::new(parker),
                unparker,
                origin: Instant::now(),
                last_execution_time: AtomicU64::new(0),
                graceful_start_time: AtomicU64::new(0),
                quiet_period_nanos: AtomicU64::new(0),
                shutdown_timeout_nanos: AtomicU64::new(0),
                hooks: Mutex::new(Vec::new()),
                next_hook_id: AtomicU64::new(0),
                termination: TerminationFuture::new(),
                thread_properties: OnceLock::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether `thread` is this executor's worker.
    pub fn in_event_loop_thread(&self, thread: ThreadId) -> bool {
        self.shared.worker.get().map_or(false, |w| w.id() == thread)
    }

    /// Whether the calling thread is this executor's worker.
    pub fn in_event_loop(&self) -> bool {
        self.in_event_loop_thread(thread::current().id())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.lifecycle.get() >= ST_SHUTTING_DOWN
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lifecycle.get() >= ST_SHUTDOWN
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.lifecycle.get() == ST_TERMINATED
    }

    /// Number of queued entries awaiting the worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.task_queue.len()
    }

    /// Configured (clamped) task queue capacity.
    pub fn max_pending_tasks(&self) -> usize {
        self.shared.max_pending_tasks
    }

    /// Whether the task queue holds entries. Worker-only.
    pub fn has_tasks(&self) -> bool {
        assert!(self.in_event_loop(), "has_tasks must run on the worker");
        !self.shared.task_queue.is_empty()
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Nanoseconds on this executor's monotonic clock.
    #[inline]
    fn monotonic_nanos(&self) -> u64 {
        self.shared.origin.elapsed().as_nanos() as u64
    }

    /// Record "a task just executed" for quiet-period accounting. The drain
    /// helpers call this automatically; loops that take tasks manually via
    /// [`take_task`](Self::take_task) call it after each execution.
    pub fn update_last_execution_time(&self) {
        self.shared
            .last_execution_time
            .store(self.monotonic_nanos(), Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Fire-and-forget submission.
    ///
    /// Spawns the worker on the first off-worker submission. Posts a wakeup
    /// sentinel when the loop does not self-wake (`add_task_wakes_up == false`
    /// and the task carries the wakeup marker).
    ///
    /// # Errors
    ///
    /// [`RejectedExecutionError::Terminated`] once shut down,
    /// [`RejectedExecutionError::QueueFull`] when the queue is full and the
    /// rejection policy declines, [`RejectedExecutionError::SpawnFailed`] when
    /// the worker could not be started (the task is removed again).
    pub fn execute(&self, task: Task) -> Result<(), RejectedExecutionError> {
        let in_event_loop = self.in_event_loop();
        let wakes_up = task.wakes_up();

        let ticket = self.add_task(task)?;

        if !in_event_loop {
            if let Err(spawn_err) = self.start_worker() {
                self.shared.task_queue.remove(ticket);
                return Err(spawn_err);
            }
            // The executor may have reached SHUTDOWN between the offer and the
            // start; revoke the task if it is still queued.
            if self.is_shutdown() && self.shared.task_queue.remove(ticket) {
                return Err(RejectedExecutionError::Terminated);
            }
        }

        if !self.shared.add_task_wakes_up && wakes_up {
            self.wakeup(in_event_loop);
        }
        Ok(())
    }

    /// Enqueue a task to run after `delay`.
    ///
    /// On the worker the schedule queue is updated directly; from any other
    /// thread the insert is routed through [`execute`](Self::execute) so the
    /// worker remains the queue's only user.
    pub fn schedule(&self, task: Task, delay: Duration) -> Result<(), RejectedExecutionError> {
        let deadline = self
            .monotonic_nanos()
            .saturating_add(delay.as_nanos() as u64);
        if self.in_event_loop() {
            self.shared.schedule_queue().push(deadline, task);
            Ok(())
        } else {
            let this = self.clone();
            self.execute(Task::new(move || {
                this.shared.schedule_queue().push(deadline, task);
            }))
        }
    }

    fn add_task(&self, task: Task) -> Result<u64, RejectedExecutionError> {
        if self.is_shutdown() {
            return Err(RejectedExecutionError::Terminated);
        }
        match self.shared.task_queue.offer(task) {
            Ok(ticket) => Ok(ticket),
            Err(task) => self.shared.rejection.rejected(task, self),
        }
    }

    /// Raw non-blocking enqueue, bypassing the rejection policy. Intended for
    /// [`RejectionPolicy`] implementations that retry.
    pub fn try_offer(&self, task: Task) -> Result<u64, Task> {
        self.shared.task_queue.offer(task)
    }

    /// Remove a still-queued task by the ticket `try_offer` returned.
    pub fn remove_task(&self, ticket: u64) -> bool {
        self.shared.task_queue.remove(ticket)
    }

    /// Unblock the worker. Posting is skipped on the worker itself unless the
    /// executor is in its quiet period, where the confirmation loop needs to
    /// re-observe the queue.
    fn wakeup(&self, in_event_loop: bool) {
        if !in_event_loop || self.shared.lifecycle.get() == ST_SHUTTING_DOWN {
            self.shared.task_queue.offer_wakeup();
        }
    }

    // ------------------------------------------------------------------
    // Worker bootstrap
    // ------------------------------------------------------------------

    fn start_worker(&self) -> Result<(), RejectedExecutionError> {
        if self.shared.lifecycle.get() == ST_NOT_STARTED
            && self.shared.lifecycle.cas(ST_NOT_STARTED, ST_STARTED)
        {
            if let Err(err) = self.spawn_worker() {
                // Revert so a later submission can retry the spawn.
                self.shared.lifecycle.set(ST_NOT_STARTED);
                return Err(RejectedExecutionError::SpawnFailed(err));
            }
        }
        Ok(())
    }

    fn spawn_worker(&self) -> io::Result<()> {
        assert!(
            self.shared.worker.get().is_none(),
            "worker thread already started"
        );
        let this = self.clone();
        self.shared.spawner.spawn(move || this.worker_main())
    }

    /// Body of the worker thread.
    fn worker_main(&self) {
        let _ = self.shared.worker.set(thread::current());
        // An interrupt requested before the thread existed is already visible
        // through the sticky flag; nothing to re-apply here.
        self.update_last_execution_time();

        let mut event_loop = self
            .shared
            .event_loop
            .lock()
            .expect("event loop mutex poisoned")
            .take()
            .expect("event loop already taken");

        let run_result = catch_unwind(AssertUnwindSafe(|| event_loop.run(self)));
        if let Err(payload) = &run_result {
            tracing::warn!(
                executor = %self.shared.name,
                panic = panic_message(payload),
                "unexpected panic from event loop"
            );
        }

        // Ensure at least SHUTTING_DOWN even when the loop returned without
        // any shutdown call.
        self.shared.lifecycle.advance_to_at_least(ST_SHUTTING_DOWN);

        if run_result.is_ok() && self.shared.graceful_start_time.load(Ordering::Acquire) == 0 {
            tracing::error!(
                executor = %self.shared.name,
                "buggy EventLoop implementation: confirm_shutdown() must be \
                 called before run() returns"
            );
        }

        // Run remaining tasks and shutdown hooks until confirmation.
        let confirm = catch_unwind(AssertUnwindSafe(|| loop {
            if self.confirm_shutdown(&mut *event_loop) {
                break;
            }
        }));
        if let Err(payload) = confirm {
            tracing::warn!(
                executor = %self.shared.name,
                panic = panic_message(&payload),
                "shutdown confirmation panicked"
            );
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| event_loop.cleanup(self))) {
            tracing::warn!(
                executor = %self.shared.name,
                panic = panic_message(&payload),
                "event loop cleanup panicked"
            );
        }

        self.shared.lifecycle.set(ST_TERMINATED);
        let pending = self.shared.task_queue.len();
        if pending != 0 {
            tracing::warn!(
                executor = %self.shared.name,
                pending,
                "event executor terminated with non-empty task queue"
            );
        }
        self.shared.termination.complete();
    }

    // ------------------------------------------------------------------
    // Run-loop helpers (worker-only)
    // ------------------------------------------------------------------

    /// Non-blocking dequeue of the next real task.
    pub fn poll_task(&self) -> Option<Task> {
        assert!(self.in_event_loop(), "poll_task must run on the worker");
        self.shared.task_queue.poll_task()
    }

    /// Blocking dequeue cooperating with the schedule queue.
    ///
    /// Blocks until a task is available or a wakeup arrives; bounded by the
    /// earliest scheduled deadline, whose due tasks are migrated into the task
    /// queue. `None` signals a wakeup; the caller re-decides (typically by
    /// checking [`is_shutting_down`](Self::is_shutting_down)).
    pub fn take_task(&self) -> Option<Task> {
        assert!(self.in_event_loop(), "take_task must run on the worker");
        loop {
            let next_deadline = self.shared.schedule_queue().peek_deadline();
            match next_deadline {
                None => {
                    return match self.shared.task_queue.take() {
                        Dequeued::Task(task) => Some(task),
                        Dequeued::Wakeup => None,
                    };
                }
                Some(deadline) => {
                    let delay = deadline.saturating_sub(self.monotonic_nanos());
                    if delay > 0 {
                        match self.shared.task_queue.poll_timeout(Duration::from_nanos(delay)) {
                            Some(Dequeued::Task(task)) => return Some(task),
                            Some(Dequeued::Wakeup) => return None,
                            None => {} // deadline reached; fall through
                        }
                    }
                    // Migrate due work now; otherwise a task queue that never
                    // drains to empty would starve the schedule queue forever.
                    self.fetch_from_schedule_queue();
                    if let Some(task) = self.shared.task_queue.poll_task() {
                        return Some(task);
                    }
                }
            }
        }
    }

    /// Move every due scheduled task into the task queue.
    ///
    /// Returns `false` when the task queue filled up mid-transfer; the task
    /// that did not fit went back to the schedule queue, so no scheduled task
    /// is ever lost.
    pub fn fetch_from_schedule_queue(&self) -> bool {
        assert!(
            self.in_event_loop(),
            "fetch_from_schedule_queue must run on the worker"
        );
        let now = self.monotonic_nanos();
        let mut schedule = self.shared.schedule_queue();
        while let Some(due) = schedule.poll_due(now) {
            let (slot, task) = due.split();
            if let Err(task) = self.shared.task_queue.offer(task) {
                schedule.add_back(slot.rejoin(task));
                return false;
            }
        }
        true
    }

    /// Drain the task queue cooperatively, migrating due scheduled tasks
    /// before each pass. Returns whether at least one task ran.
    pub fn run_all_tasks(&self, event_loop: &mut dyn EventLoop) -> bool {
        assert!(self.in_event_loop(), "run_all_tasks must run on the worker");
        let mut ran_at_least_one = false;
        loop {
            let fetched_all = self.fetch_from_schedule_queue();
            if self.run_all_tasks_from_queue() {
                ran_at_least_one = true;
            }
            // Keep processing until every due scheduled task made it across.
            if fetched_all {
                break;
            }
        }
        if ran_at_least_one {
            self.update_last_execution_time();
        }
        event_loop.after_running_all_tasks(self);
        ran_at_least_one
    }

    fn run_all_tasks_from_queue(&self) -> bool {
        let Some(mut task) = self.shared.task_queue.poll_task() else {
            return false;
        };
        loop {
            safe_execute(task);
            match self.shared.task_queue.poll_task() {
                Some(next) => task = next,
                None => return true,
            }
        }
    }

    /// Like [`run_all_tasks`](Self::run_all_tasks), but stops once `budget`
    /// has elapsed. The clock is sampled every [`RUNS_PER_TIME_CHECK`] tasks.
    pub fn run_all_tasks_for(&self, event_loop: &mut dyn EventLoop, budget: Duration) -> bool {
        assert!(
            self.in_event_loop(),
            "run_all_tasks_for must run on the worker"
        );
        self.fetch_from_schedule_queue();
        let Some(mut task) = self.shared.task_queue.poll_task() else {
            event_loop.after_running_all_tasks(self);
            return false;
        };

        let deadline = self
            .monotonic_nanos()
            .saturating_add(budget.as_nanos() as u64);
        let mut run_tasks: u64 = 0;
        let last_execution_time;
        loop {
            safe_execute(task);
            run_tasks += 1;

            if run_tasks & (RUNS_PER_TIME_CHECK - 1) == 0 {
                let now = self.monotonic_nanos();
                if now >= deadline {
                    last_execution_time = now;
                    break;
                }
            }

            match self.shared.task_queue.poll_task() {
                Some(next) => task = next,
                None => {
                    last_execution_time = self.monotonic_nanos();
                    break;
                }
            }
        }

        event_loop.after_running_all_tasks(self);
        self.shared
            .last_execution_time
            .store(last_execution_time, Ordering::Release);
        true
    }

    /// Time until the next scheduled deadline, or the 1 s purge interval when
    /// none exists. Worker-only.
    pub fn next_schedule_delay(&self) -> Duration {
        assert!(
            self.in_event_loop(),
            "next_schedule_delay must run on the worker"
        );
        let now = self.monotonic_nanos();
        self.shared.schedule_queue().next_delay(now)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Initiate two-phase graceful shutdown and return the termination future.
    ///
    /// The worker keeps running tasks until `quiet_period` elapses with no
    /// task activity, or until `timeout` caps the wait. Already-shutting-down
    /// executors return the existing future unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `timeout < quiet_period`.
    pub fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> TerminationFuture {
        assert!(
            timeout >= quiet_period,
            "timeout ({timeout:?}) must be >= quiet_period ({quiet_period:?})"
        );

        if self.is_shutting_down() {
            return self.termination_future();
        }

        let in_event_loop = self.in_event_loop();
        let mut wakeup;
        let old_state;
        loop {
            if self.is_shutting_down() {
                return self.termination_future();
            }
            wakeup = true;
            let observed = self.shared.lifecycle.get();
            let new_state = if in_event_loop {
                ST_SHUTTING_DOWN
            } else {
                match observed {
                    ST_NOT_STARTED | ST_STARTED => ST_SHUTTING_DOWN,
                    other => {
                        wakeup = false;
                        other
                    }
                }
            };
            if self.shared.lifecycle.cas(observed, new_state) {
                old_state = observed;
                break;
            }
        }
        self.shared
            .quiet_period_nanos
            .store(quiet_period.as_nanos() as u64, Ordering::Release);
        self.shared
            .shutdown_timeout_nanos
            .store(timeout.as_nanos() as u64, Ordering::Release);

        if old_state == ST_NOT_STARTED {
            // The worker must still run so it can observe the state and
            // perform cleanup.
            if let Err(err) = self.spawn_worker() {
                self.shared.lifecycle.set(ST_TERMINATED);
                self.shared.termination.fail(TerminationError::SpawnFailed {
                    message: err.to_string(),
                });
                return self.termination_future();
            }
        }

        if wakeup {
            self.wakeup(in_event_loop);
        }
        self.termination_future()
    }

    /// Abrupt shutdown: pending tasks may never run.
    #[deprecated(note = "use shutdown_gracefully")]
    pub fn shutdown(&self) {
        if self.is_shutdown() {
            return;
        }

        let in_event_loop = self.in_event_loop();
        let mut wakeup;
        let old_state;
        loop {
            if self.is_shutdown() {
                return;
            }
            wakeup = true;
            let observed = self.shared.lifecycle.get();
            let new_state = if in_event_loop {
                ST_SHUTDOWN
            } else {
                match observed {
                    ST_NOT_STARTED | ST_STARTED | ST_SHUTTING_DOWN => ST_SHUTDOWN,
                    other => {
                        wakeup = false;
                        other
                    }
                }
            };
            if self.shared.lifecycle.cas(observed, new_state) {
                old_state = observed;
                break;
            }
        }

        if old_state == ST_NOT_STARTED {
            if let Err(err) = self.spawn_worker() {
                self.shared.lifecycle.set(ST_TERMINATED);
                self.shared.termination.fail(TerminationError::SpawnFailed {
                    message: err.to_string(),
                });
                return;
            }
        }

        if wakeup {
            self.wakeup(in_event_loop);
        }
    }

    /// One confirmation pass of the shutdown protocol. Worker-only once
    /// shutdown has been requested; returns `false` before that.
    ///
    /// Returns `true` when the worker may stop: the executor is hard-shutdown
    /// with no work left, the quiet period elapsed with no task activity, or
    /// the hard timeout fired.
    pub fn confirm_shutdown(&self, event_loop: &mut dyn EventLoop) -> bool {
        if !self.is_shutting_down() {
            return false;
        }
        assert!(
            self.in_event_loop(),
            "confirm_shutdown must be invoked from the event loop"
        );

        self.shared.schedule_queue().cancel_all();

        if self.shared.graceful_start_time.load(Ordering::Acquire) == 0 {
            // 0 doubles as "unset"; clamp the first real timestamp away from it.
            self.shared
                .graceful_start_time
                .store(self.monotonic_nanos().max(1), Ordering::Release);
        }

        if self.run_all_tasks(event_loop) || self.run_shutdown_hooks() {
            if self.is_shutdown() {
                // Hard shutdown - no new tasks anymore.
                return true;
            }
            // Work arrived; restart the quiet window, or finish immediately
            // when no quiet period was requested.
            if self.shared.quiet_period_nanos.load(Ordering::Acquire) == 0 {
                return true;
            }
            self.wakeup(true);
            return false;
        }

        let now = self.monotonic_nanos();
        let start = self.shared.graceful_start_time.load(Ordering::Acquire);
        let timeout = self.shared.shutdown_timeout_nanos.load(Ordering::Acquire);
        if self.is_shutdown() || now.saturating_sub(start) > timeout {
            return true;
        }

        let last = self.shared.last_execution_time.load(Ordering::Acquire);
        let quiet = self.shared.quiet_period_nanos.load(Ordering::Acquire);
        if now.saturating_sub(last) <= quiet {
            // Still inside the quiet window; check for late arrivals every
            // poll interval. The park is cut short by interrupt_worker.
            self.wakeup(true);
            let parker = self.shared.parker.lock().expect("parker mutex poisoned");
            parker.park_timeout(QUIET_PERIOD_POLL);
            return false;
        }

        // No task ran for a full quiet period - safe to shut down.
        true
    }

    /// Run and drain shutdown hooks. Hooks may add further hooks; the pass
    /// loops until the live set stays empty.
    fn run_shutdown_hooks(&self) -> bool {
        let mut ran = false;
        loop {
            let snapshot: Vec<(u64, Hook)> = {
                let mut hooks = self.shared.hooks();
                if hooks.is_empty() {
                    break;
                }
                hooks.drain(..).collect()
            };
            for (_, hook) in snapshot {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
                    tracing::warn!(
                        executor = %self.shared.name,
                        panic = panic_message(&payload),
                        "shutdown hook panicked"
                    );
                }
                ran = true;
            }
        }
        if ran {
            self.update_last_execution_time();
        }
        ran
    }

    // ------------------------------------------------------------------
    // Shutdown hooks
    // ------------------------------------------------------------------

    /// Register a hook to run during shutdown confirmation. Off-worker calls
    /// are applied via a submitted task so the worker stays the sole mutator.
    pub fn add_shutdown_hook(
        &self,
        hook: impl FnOnce() + Send + 'static,
    ) -> Result<ShutdownHookHandle, RejectedExecutionError> {
        let id = self.shared.next_hook_id.fetch_add(1, Ordering::Relaxed);
        let entry: Hook = Box::new(hook);
        if self.in_event_loop() {
            self.shared.hooks().push((id, entry));
        } else {
            let this = self.clone();
            self.execute(Task::new(move || {
                this.shared.hooks().push((id, entry));
            }))?;
        }
        Ok(ShutdownHookHandle(id))
    }

    /// Remove a previously added hook.
    pub fn remove_shutdown_hook(
        &self,
        handle: ShutdownHookHandle,
    ) -> Result<(), RejectedExecutionError> {
        if self.in_event_loop() {
            self.shared.hooks().retain(|(id, _)| *id != handle.0);
            Ok(())
        } else {
            let this = self.clone();
            self.execute(Task::new(move || {
                this.shared.hooks().retain(|(id, _)| *id != handle.0);
            }))
        }
    }

    // ------------------------------------------------------------------
    // Interrupt and thread properties
    // ------------------------------------------------------------------

    /// Set the worker's sticky interrupt status and flush its blocking waits.
    /// Callable before the worker exists; the flag is observed at bootstrap.
    pub fn interrupt_worker(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
        if self.shared.worker.get().is_some() {
            self.shared.task_queue.offer_wakeup();
            self.shared.unparker.unpark();
        }
    }

    /// The worker's sticky interrupt status.
    pub fn is_worker_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::Acquire)
    }

    /// Clear and return the interrupt status. Worker-only.
    pub fn clear_worker_interrupt(&self) -> bool {
        assert!(
            self.in_event_loop(),
            "clear_worker_interrupt must run on the worker"
        );
        self.shared.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Snapshot of the worker thread, starting it first if necessary (by
    /// submitting a no-op task and blocking until it runs). Captured once;
    /// later calls return the stored snapshot.
    pub fn thread_properties(&self) -> Result<ThreadProperties, RejectedExecutionError> {
        if let Some(props) = self.shared.thread_properties.get() {
            return Ok(props.clone());
        }

        if self.shared.worker.get().is_none() {
            assert!(
                !self.in_event_loop(),
                "worker handle must exist on the worker thread"
            );
            let latch = Arc::new(Latch::new());
            let opened = Arc::clone(&latch);
            self.execute(Task::new(move || opened.open()))?;
            latch.wait();
        }

        let worker = self
            .shared
            .worker
            .get()
            .expect("worker exists after the no-op task ran");
        let props = ThreadProperties {
            name: worker.name().map(str::to_owned),
            id: worker.id(),
            alive: !self.is_terminated(),
            interrupted: self.is_worker_interrupted(),
        };
        // First writer wins; everyone returns the stored snapshot.
        let _ = self.shared.thread_properties.set(props);
        Ok(self
            .shared
            .thread_properties
            .get()
            .expect("thread properties just stored")
            .clone())
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Future completing when the worker has exited and cleanup ran.
    pub fn termination_future(&self) -> TerminationFuture {
        self.shared.termination.clone()
    }

    /// Block up to `timeout` for termination; returns whether the executor
    /// is terminated.
    ///
    /// # Panics
    ///
    /// Panics when called from the worker: it cannot await its own exit.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        assert!(
            !self.in_event_loop(),
            "cannot await termination from the event loop"
        );
        let _ = self.shared.termination.wait_timeout(timeout);
        self.is_terminated()
    }
}

impl fmt::Debug for SingleThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleThreadExecutor")
            .field("name", &self.shared.name)
            .field("state", &self.shared.lifecycle.get())
            .field("pending_tasks", &self.shared.task_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn config(name: &str) -> ExecutorConfig {
        ExecutorConfig {
            name: name.to_string(),
            add_task_wakes_up: false,
            max_pending_tasks: 16,
        }
    }

    #[test]
    fn lazy_start_spawns_exactly_one_worker() {
        let ex = SingleThreadExecutor::new(config("lazy"));
        assert!(ex.shared.worker.get().is_none());

        let (tx, rx) = mpsc::channel();
        ex.execute(Task::new(move || tx.send("ok").unwrap())).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "ok");
        assert!(ex.shared.worker.get().is_some());

        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let ex = SingleThreadExecutor::new(config("order"));
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..64 {
            let order = Arc::clone(&order);
            ex.execute(Task::new(move || order.lock().unwrap().push(i)))
                .unwrap();
        }
        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));

        let got = order.lock().unwrap().clone();
        assert_eq!(got, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn execute_after_shutdown_is_rejected() {
        let ex = SingleThreadExecutor::new(config("closed"));
        ex.execute(Task::new(|| {})).unwrap();
        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));

        let err = ex.execute(Task::new(|| {})).unwrap_err();
        assert!(matches!(err, RejectedExecutionError::Terminated));
    }

    #[test]
    fn rejection_policy_sees_overflow_task_once() {
        struct Counting(AtomicUsize);
        impl RejectionPolicy for Counting {
            fn rejected(
                &self,
                _task: Task,
                executor: &SingleThreadExecutor,
            ) -> Result<u64, RejectedExecutionError> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Err(RejectedExecutionError::QueueFull {
                    capacity: executor.max_pending_tasks(),
                })
            }
        }

        let policy = Arc::new(Counting(AtomicUsize::new(0)));
        let spawner = Arc::new(ThreadPerTaskSpawner::new("reject"));
        let ex = SingleThreadExecutor::with_parts(
            config("reject"),
            spawner,
            Arc::clone(&policy) as Arc<dyn RejectionPolicy>,
            Box::new(DefaultEventLoop),
        );

        // Gate the worker on a latch so the queue stays full.
        let gate = Arc::new(Latch::new());
        let g = Arc::clone(&gate);
        ex.execute(Task::new(move || g.wait())).unwrap();

        // Wait for the worker to pull the gate task off the queue.
        let deadline = Instant::now() + Duration::from_secs(2);
        while ex.pending_tasks() > 0 {
            assert!(Instant::now() < deadline, "worker never picked up gate task");
            thread::yield_now();
        }

        for _ in 0..16 {
            ex.execute(Task::new(|| {})).unwrap();
        }
        let err = ex.execute(Task::new(|| {})).unwrap_err();
        assert!(matches!(err, RejectedExecutionError::QueueFull { capacity: 16 }));
        assert_eq!(policy.0.load(Ordering::Relaxed), 1);

        gate.open();
        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn capacity_is_clamped_to_minimum() {
        let ex = SingleThreadExecutor::new(ExecutorConfig {
            max_pending_tasks: 1,
            ..config("clamp")
        });
        assert_eq!(ex.max_pending_tasks(), MIN_TASK_QUEUE_CAPACITY);
    }

    #[test]
    fn scheduled_task_runs_after_delay() {
        let ex = SingleThreadExecutor::new(config("sched"));
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        ex.schedule(
            Task::new(move || tx.send(start.elapsed()).unwrap()),
            Duration::from_millis(80),
        )
        .unwrap();

        let elapsed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(elapsed >= Duration::from_millis(80), "ran early: {elapsed:?}");

        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn scheduled_tasks_interleave_with_submissions() {
        let ex = SingleThreadExecutor::new(config("interleave"));
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        ex.schedule(
            Task::new(move || o.lock().unwrap().push("scheduled")),
            Duration::from_millis(60),
        )
        .unwrap();
        let o = Arc::clone(&order);
        ex.execute(Task::new(move || o.lock().unwrap().push("immediate")))
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));

        assert_eq!(*order.lock().unwrap(), vec!["immediate", "scheduled"]);
    }

    #[test]
    fn interrupt_before_start_is_visible_to_worker() {
        struct Observing {
            saw_interrupt: mpsc::Sender<bool>,
        }
        impl EventLoop for Observing {
            fn run(&mut self, ex: &SingleThreadExecutor) {
                let _ = self.saw_interrupt.send(ex.is_worker_interrupted());
                loop {
                    if let Some(task) = ex.take_task() {
                        safe_execute(task);
                        ex.update_last_execution_time();
                    }
                    if ex.confirm_shutdown(self) {
                        break;
                    }
                }
            }
        }

        let (tx, rx) = mpsc::channel();
        let spawner = Arc::new(ThreadPerTaskSpawner::new("interrupt"));
        let ex = SingleThreadExecutor::with_parts(
            config("interrupt"),
            spawner,
            reject::reject(),
            Box::new(Observing { saw_interrupt: tx }),
        );

        ex.interrupt_worker();
        ex.execute(Task::new(|| {})).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let ex = SingleThreadExecutor::new(config("panic"));
        ex.execute(Task::new(|| panic!("intentional test panic")))
            .unwrap();

        let (tx, rx) = mpsc::channel();
        ex.execute(Task::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn abrupt_shutdown_from_not_started_terminates() {
        let ex = SingleThreadExecutor::new(config("abrupt"));
        // Never started: the shutdown path must still spawn the worker so it
        // can observe SHUTDOWN and clean up.
        #[allow(deprecated)]
        ex.shutdown();
        assert!(ex.is_shutdown());
        assert!(ex.await_termination(Duration::from_secs(5)));
        assert!(ex.is_terminated());
    }

    #[test]
    fn termination_future_completes_exactly_once() {
        let ex = SingleThreadExecutor::new(config("future"));
        ex.execute(Task::new(|| {})).unwrap();

        let f1 = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        let f2 = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));

        assert_eq!(f1.wait(), Ok(()));
        assert_eq!(f2.wait(), Ok(()));
        assert!(ex.is_terminated());
    }

    #[test]
    fn thread_properties_start_the_worker_when_needed() {
        let ex = SingleThreadExecutor::new(config("props"));
        assert!(ex.shared.worker.get().is_none());

        let props = ex.thread_properties().unwrap();
        assert!(props.name().unwrap().starts_with("props-"));
        assert!(props.is_alive());
        assert!(!props.is_interrupted());

        // Stored once: the same snapshot comes back.
        let again = ex.thread_properties().unwrap();
        assert_eq!(again.id(), props.id());

        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn in_event_loop_is_true_only_on_worker() {
        let ex = SingleThreadExecutor::new(config("identity"));
        assert!(!ex.in_event_loop());

        let (tx, rx) = mpsc::channel();
        let probe = ex.clone();
        ex.execute(Task::new(move || tx.send(probe.in_event_loop()).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

        let _ = ex.shutdown_gracefully(Duration::ZERO, Duration::from_secs(2));
        assert!(ex.await_termination(Duration::from_secs(5)));
    }
}
