//! Thread affinity, task priority, and the suspension-point family.
//!
//! A suspendable computation is a sequence of synchronous steps separated by
//! [`SuspensionPoint`] values: each step runs to its next suspension point on
//! whichever thread resumed it, then hands exactly one continuation back to
//! the scheduler. [`Step`] is the state-machine encoding of that contract.

use std::time::Duration;

use crate::scheduler::ResumeHandle;

/// Which category of thread a work item or resumed continuation must run on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ThreadAffinity {
    /// The single designated main thread, drained once per frame tick.
    Main,
    /// Any thread of the background worker pool.
    Background,
}

/// Ordered priority for background work.
///
/// Priority selects where a background item lands in its queue; it never
/// preempts an item that is already executing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Runs after all Normal and High work queued alongside it.
    Low,
    /// Default tier.
    Normal,
    /// Runs before all Normal and Low work queued alongside it.
    High,
}

/// The next scheduling action requested by a suspended computation.
///
/// Immutable once constructed and consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspensionPoint {
    /// Switch to the main thread. Ready immediately only if the requesting
    /// code is already running on the main thread.
    ToMain,

    /// Switch to the background pool at the given priority. Always suspends.
    ToBackground(TaskPriority),

    /// Sleep for `duration`, then resume on the queue matching `affinity`.
    /// Ready immediately if the duration is zero.
    Delay {
        /// How long to sleep.
        duration: Duration,
        /// Where the continuation resumes after the sleep.
        affinity: ThreadAffinity,
    },

    /// Give other ready work a turn, then resume on the same kind of queue.
    /// On the main thread this means the next frame tick.
    YieldNow,
}

impl SuspensionPoint {
    /// Whether the suspension is already satisfied and the continuation can
    /// run synchronously, with no thread handoff at all.
    pub fn is_ready(&self, current: ThreadAffinity) -> bool {
        match self {
            SuspensionPoint::ToMain => current == ThreadAffinity::Main,
            SuspensionPoint::ToBackground(_) => false,
            SuspensionPoint::Delay { duration, .. } => duration.is_zero(),
            SuspensionPoint::YieldNow => false,
        }
    }
}

/// The rest of a suspended computation, run once when its suspension point
/// releases it.
pub type Continuation<T> = Box<dyn FnOnce() -> Step<T> + Send + 'static>;

/// One step of a suspendable computation producing a `T`.
pub enum Step<T> {
    /// The computation finished with a value.
    Complete(T),

    /// The computation pauses; the scheduler places the continuation
    /// according to the suspension point.
    Suspend(SuspensionPoint, Continuation<T>),

    /// The computation waits on another task; the closure registers the
    /// continuation on that task's waiter list (see [`crate::Task::then`]).
    Await(Box<dyn FnOnce(ResumeHandle<T>) + Send + 'static>),
}

impl<T> Step<T> {
    /// Finish with `value`.
    pub fn done(value: T) -> Self {
        Step::Complete(value)
    }

    /// Suspend at `point` and continue with `next`.
    pub fn suspend(point: SuspensionPoint, next: impl FnOnce() -> Step<T> + Send + 'static) -> Self {
        Step::Suspend(point, Box::new(next))
    }

    /// Continue on the main thread.
    pub fn to_main(next: impl FnOnce() -> Step<T> + Send + 'static) -> Self {
        Self::suspend(SuspensionPoint::ToMain, next)
    }

    /// Continue on the background pool at `priority`.
    pub fn background(
        priority: TaskPriority,
        next: impl FnOnce() -> Step<T> + Send + 'static,
    ) -> Self {
        Self::suspend(SuspensionPoint::ToBackground(priority), next)
    }

    /// Continue on `affinity` after sleeping for `duration`.
    pub fn delay(
        duration: Duration,
        affinity: ThreadAffinity,
        next: impl FnOnce() -> Step<T> + Send + 'static,
    ) -> Self {
        Self::suspend(SuspensionPoint::Delay { duration, affinity }, next)
    }

    /// Yield once, giving other ready work a turn.
    pub fn yield_now(next: impl FnOnce() -> Step<T> + Send + 'static) -> Self {
        Self::suspend(SuspensionPoint::YieldNow, next)
    }
}
