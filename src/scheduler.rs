//! The scheduler: worker pool, main-thread queue, and continuation routing.
//!
//! A [`Scheduler`] owns N background workers (one [`WorkQueue`] each, for
//! stealing), exactly one main-thread queue, and a timer thread. Spawning a
//! task runs its first step synchronously on the calling thread; every
//! suspension after that routes the continuation to the queue its
//! [`SuspensionPoint`] names. The main queue is drained only by
//! [`update`](Scheduler::update), called once per frame tick from the thread
//! that constructed the scheduler.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::queue::{WorkItem, WorkQueue};
use crate::suspend::{Continuation, Step, SuspensionPoint, TaskPriority, ThreadAffinity};
use crate::task::{Task, TaskCore};
use crate::timer::TimerThread;
use crate::worker::Worker;

// Lifecycle states. Transitions are one-way.
const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const STOPPED: u8 = 2;

/// The queues continuations are routed into: one per worker plus the main
/// queue. Background submissions round-robin across workers; priority picks
/// the placement within the chosen queue.
pub(crate) struct QueueSet {
    pub(crate) main: WorkQueue,
    pub(crate) workers: Vec<WorkQueue>,
    next_worker: AtomicUsize,
}

impl QueueSet {
    pub(crate) fn new(worker_count: usize) -> Self {
        Self {
            main: WorkQueue::new(),
            workers: (0..worker_count).map(|_| WorkQueue::new()).collect(),
            next_worker: AtomicUsize::new(0),
        }
    }

    pub(crate) fn enqueue(&self, affinity: ThreadAffinity, priority: TaskPriority, item: WorkItem) {
        match affinity {
            ThreadAffinity::Main => self.main.push(priority, item),
            ThreadAffinity::Background => {
                let index =
                    self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
                self.workers[index].push(priority, item);
            }
        }
    }
}

struct Shared {
    queues: Arc<QueueSet>,
    timer: Arc<TimerThread>,
    main_thread: ThreadId,
}

/// Re-enters the drive loop for a task resumed by an awaited dependency.
///
/// Handed to the registration closure of [`Step::Await`]; carries the
/// affinity that was active at the point of awaiting so the resumption lands
/// on the same kind of thread.
pub struct ResumeHandle<T> {
    shared: Arc<Shared>,
    core: Arc<TaskCore<T>>,
    affinity: ThreadAffinity,
}

impl<T: Clone + Send + 'static> ResumeHandle<T> {
    /// The thread kind that was active when the await was reached.
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Continue the suspended computation with `step`.
    pub fn resume(self, step: Step<T>) {
        drive(&self.shared, &self.core, step, self.affinity);
    }
}

/// Package a continuation as a work item that re-enters the drive loop on
/// the queue kind it is pushed to.
fn resume_item<T: Clone + Send + 'static>(
    shared: &Arc<Shared>,
    core: &Arc<TaskCore<T>>,
    continuation: Continuation<T>,
    target: ThreadAffinity,
) -> WorkItem {
    let shared = Arc::clone(shared);
    let core = Arc::clone(core);
    Box::new(move || drive(&shared, &core, continuation(), target))
}

/// Run a computation's steps until it completes or hands off a continuation.
///
/// Satisfied suspension points (zero delay, main switch already on main) are
/// run through synchronously without any thread handoff. Every triggered
/// suspension hands over exactly one continuation.
fn drive<T: Clone + Send + 'static>(
    shared: &Arc<Shared>,
    core: &Arc<TaskCore<T>>,
    mut step: Step<T>,
    affinity: ThreadAffinity,
) {
    loop {
        match step {
            Step::Complete(value) => {
                // Waiters resume in FIFO registration order, each on the
                // affinity recorded when it awaited.
                for (waiter_affinity, item) in core.complete(value) {
                    shared
                        .queues
                        .enqueue(waiter_affinity, TaskPriority::Normal, item);
                }
                return;
            }
            Step::Suspend(point, continuation) => {
                if point.is_ready(affinity) {
                    step = continuation();
                    continue;
                }
                match point {
                    SuspensionPoint::ToMain => {
                        let item = resume_item(shared, core, continuation, ThreadAffinity::Main);
                        shared
                            .queues
                            .enqueue(ThreadAffinity::Main, TaskPriority::Normal, item);
                    }
                    SuspensionPoint::ToBackground(priority) => {
                        let item =
                            resume_item(shared, core, continuation, ThreadAffinity::Background);
                        shared
                            .queues
                            .enqueue(ThreadAffinity::Background, priority, item);
                    }
                    SuspensionPoint::Delay {
                        duration,
                        affinity: target,
                    } => {
                        let item = resume_item(shared, core, continuation, target);
                        shared.timer.register(Instant::now() + duration, target, item);
                    }
                    SuspensionPoint::YieldNow => {
                        let item = resume_item(shared, core, continuation, affinity);
                        shared.queues.enqueue(affinity, TaskPriority::Normal, item);
                    }
                }
                return;
            }
            Step::Await(register) => {
                register(ResumeHandle {
                    shared: Arc::clone(shared),
                    core: Arc::clone(core),
                    affinity,
                });
                return;
            }
        }
    }
}

/// Cooperative/parallel task scheduler.
///
/// Lives from construction to [`shutdown`](Scheduler::shutdown); no task or
/// work item outlives it. The constructing thread becomes the main thread.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
    lifecycle: AtomicU8,
    worker_count: usize,
}

impl Scheduler {
    /// Spawn `worker_count` background workers plus the timer thread and
    /// capture the calling thread as the main thread. A count of zero means
    /// one worker per CPU core.
    pub fn new(worker_count: usize) -> Result<Self, SchedulerError> {
        let count = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        let queues = Arc::new(QueueSet::new(count));
        let timer = TimerThread::new();
        timer.start(Arc::clone(&queues))?;

        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            match Worker::spawn(id, Arc::clone(&queues)) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    // Unwind the partial pool before reporting the failure.
                    timer.stop();
                    for queue in &queues.workers {
                        queue.stop();
                    }
                    drop(workers);
                    return Err(err);
                }
            }
        }

        debug!(workers = count, "scheduler started");

        Ok(Self {
            shared: Arc::new(Shared {
                queues,
                timer,
                main_thread: thread::current().id(),
            }),
            workers: Mutex::new(workers),
            lifecycle: AtomicU8::new(RUNNING),
            worker_count: count,
        })
    }

    /// Number of background workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether the scheduler is accepting new tasks.
    pub fn is_running(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == RUNNING
    }

    fn current_affinity(&self) -> ThreadAffinity {
        if thread::current().id() == self.shared.main_thread {
            ThreadAffinity::Main
        } else {
            ThreadAffinity::Background
        }
    }

    /// Start a suspendable computation and return its handle immediately.
    ///
    /// The first step runs synchronously on the calling thread up to its
    /// first unsatisfied suspension point.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler has shut down.
    pub fn spawn<T: Clone + Send + 'static>(
        &self,
        computation: impl FnOnce() -> Step<T>,
    ) -> Task<T> {
        assert!(
            self.is_running(),
            "spawn on a scheduler that has shut down"
        );

        let core = Arc::new(TaskCore::new());
        drive(
            &self.shared,
            &core,
            computation(),
            self.current_affinity(),
        );
        Task::new(core)
    }

    /// Start `f` on the background pool at `priority` and return the handle.
    pub fn spawn_background<T: Clone + Send + 'static>(
        &self,
        priority: TaskPriority,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Task<T> {
        self.spawn(move || Step::background(priority, move || Step::done(f())))
    }

    /// Drain the main-thread queue for this frame tick.
    ///
    /// Runs at most the number of items that were queued when the call was
    /// made, so work that re-enqueues itself onto the main queue (a main
    /// thread yield) waits for the next tick. Returns the number of items
    /// run.
    ///
    /// # Panics
    ///
    /// Panics when called from any thread other than the main thread.
    pub fn update(&self) -> usize {
        assert_eq!(
            thread::current().id(),
            self.shared.main_thread,
            "Scheduler::update called off the main thread"
        );

        let budget = self.shared.queues.main.len();
        let mut ran = 0;
        for _ in 0..budget {
            match self.shared.queues.main.try_pop() {
                Some(item) => {
                    item();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Stop all queues, let workers drain their remaining ready items, join
    /// every worker and the timer thread, then discard whatever is left on
    /// the main queue. Idempotent; in-flight items always finish.
    pub fn shutdown(&self) {
        if self
            .lifecycle
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.shared.timer.stop();

        for queue in &self.shared.queues.workers {
            queue.stop();
        }
        for worker in self.workers.lock().iter_mut() {
            worker.join();
        }

        self.shared.queues.main.stop();
        let mut discarded = 0;
        while self.shared.queues.main.try_pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "discarded main-thread work items at shutdown");
        }

        self.lifecycle.store(STOPPED, Ordering::Release);
        debug!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::Duration;

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new(4).unwrap();
        assert_eq!(scheduler.worker_count(), 4);
        assert!(scheduler.is_running());
        scheduler.shutdown();
    }

    #[test]
    fn test_zero_workers_defaults_to_cpu_count() {
        let scheduler = Scheduler::new(0).unwrap();
        assert_eq!(scheduler.worker_count(), num_cpus::get());
    }

    #[test]
    fn test_spawn_without_suspension_completes_synchronously() {
        let scheduler = Scheduler::new(1).unwrap();
        let task = scheduler.spawn(|| Step::done(42));
        assert_eq!(task.try_result(), Some(42));
    }

    #[test]
    fn test_zero_delay_fast_path_no_handoff() {
        let scheduler = Scheduler::new(1).unwrap();
        let spawning = thread::current().id();

        let task = scheduler.spawn(move || {
            Step::delay(Duration::ZERO, ThreadAffinity::Background, move || {
                Step::done(thread::current().id() == spawning)
            })
        });

        // Complete before spawn even returned: no thread handoff occurred.
        assert_eq!(task.try_result(), Some(true));
    }

    #[test]
    fn test_to_main_on_main_runs_inline() {
        let scheduler = Scheduler::new(1).unwrap();
        let task = scheduler.spawn(|| Step::to_main(|| Step::done(7)));
        assert_eq!(task.try_result(), Some(7));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let scheduler = Scheduler::new(2).unwrap();
        scheduler.shutdown();
        assert!(!scheduler.is_running());
        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }

    #[test]
    #[should_panic(expected = "spawn on a scheduler that has shut down")]
    fn test_spawn_after_shutdown_panics() {
        let scheduler = Scheduler::new(1).unwrap();
        scheduler.shutdown();
        let _ = scheduler.spawn(|| Step::done(()));
    }

    #[test]
    fn test_update_off_main_panics() {
        let scheduler = Scheduler::new(1).unwrap();

        thread::scope(|scope| {
            let result = scope
                .spawn(|| catch_unwind(AssertUnwindSafe(|| scheduler.update())).is_err())
                .join()
                .unwrap();
            assert!(result);
        });
    }

    #[test]
    fn test_update_returns_items_run() {
        let scheduler = Scheduler::new(1).unwrap();
        assert_eq!(scheduler.update(), 0);

        let task = scheduler.spawn(|| Step::yield_now(|| Step::done(1)));
        assert!(!task.is_complete());
        assert_eq!(scheduler.update(), 1);
        assert_eq!(task.try_result(), Some(1));
    }
}
