//! Task handles over single-assignment result cells.
//!
//! A [`Task<T>`] is shared between its creator and any awaiters. The result
//! is written at most once; the completion flag is released after the write
//! and acquired by readers, so every awaiter that observes completion also
//! observes the value. Waiting continuations are notified in FIFO
//! registration order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::queue::WorkItem;
use crate::scheduler::ResumeHandle;
use crate::suspend::{Step, ThreadAffinity};

type WaiterFn<T> = Box<dyn FnOnce(T) + Send + 'static>;

struct CoreState<T> {
    result: Option<T>,
    waiters: Vec<(ThreadAffinity, WaiterFn<T>)>,
}

pub(crate) struct TaskCore<T> {
    state: Mutex<CoreState<T>>,
    done: Condvar,
    completed: AtomicBool,
}

impl<T: Clone + Send + 'static> TaskCore<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CoreState {
                result: None,
                waiters: Vec::new(),
            }),
            done: Condvar::new(),
            completed: AtomicBool::new(false),
        }
    }

    /// Store the result and collect the registered waiters, each bound to a
    /// clone of the value and paired with the affinity it must resume on.
    ///
    /// Completing twice is a programming error and panics.
    pub(crate) fn complete(&self, value: T) -> Vec<(ThreadAffinity, WorkItem)> {
        let mut state = self.state.lock();
        assert!(state.result.is_none(), "task completed twice");

        let waiters = std::mem::take(&mut state.waiters);
        state.result = Some(value.clone());
        self.completed.store(true, Ordering::Release);
        self.done.notify_all();
        drop(state);

        waiters
            .into_iter()
            .map(|(affinity, resume)| {
                let value = value.clone();
                let item: WorkItem = Box::new(move || resume(value));
                (affinity, item)
            })
            .collect()
    }

    /// Register a waiter, or hand back the value and the untouched waiter if
    /// the task already completed (the caller then runs it synchronously).
    pub(crate) fn register(
        &self,
        affinity: ThreadAffinity,
        resume: WaiterFn<T>,
    ) -> Result<(), (T, WaiterFn<T>)> {
        let mut state = self.state.lock();
        match &state.result {
            Some(value) => Err((value.clone(), resume)),
            None => {
                state.waiters.push((affinity, resume));
                Ok(())
            }
        }
    }
}

/// Handle to an in-flight suspendable computation producing a `T`.
///
/// Cloning the handle shares the same underlying result cell.
pub struct Task<T> {
    pub(crate) core: Arc<TaskCore<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    pub(crate) fn new(core: Arc<TaskCore<T>>) -> Self {
        Self { core }
    }

    /// Whether the task has completed.
    pub fn is_complete(&self) -> bool {
        self.core.completed.load(Ordering::Acquire)
    }

    /// The result, if the task has completed.
    pub fn try_result(&self) -> Option<T> {
        if !self.is_complete() {
            return None;
        }
        self.core.state.lock().result.clone()
    }

    /// Block the calling thread until the task completes.
    ///
    /// For external (non-task) threads only; a suspendable computation awaits
    /// with [`then`](Task::then) instead. Waiting on main-thread-affine work
    /// from the main thread itself will deadlock, since nothing is left to
    /// drain the main queue.
    pub fn wait(&self) -> T {
        let mut state = self.core.state.lock();
        while state.result.is_none() {
            self.core.done.wait(&mut state);
        }
        state.result.clone().expect("checked above")
    }

    /// Like [`wait`](Task::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.core.state.lock();
        if state.result.is_none() {
            self.core.done.wait_for(&mut state, timeout);
        }
        state.result.clone()
    }

    /// Await this task from within another suspendable computation.
    ///
    /// Suspends the current computation until this task completes, then runs
    /// `resume` with the result on the thread kind that was active at the
    /// point of awaiting. If this task is already complete, `resume` runs
    /// synchronously on the current thread with no handoff.
    pub fn then<U: Clone + Send + 'static>(
        &self,
        resume: impl FnOnce(T) -> Step<U> + Send + 'static,
    ) -> Step<U> {
        let dep = Arc::clone(&self.core);
        Step::Await(Box::new(move |handle: ResumeHandle<U>| {
            let affinity = handle.affinity();
            let waiter: WaiterFn<T> = Box::new(move |value| handle.resume(resume(value)));
            if let Err((value, waiter)) = dep.register(affinity, waiter) {
                // Dependency already completed: no-suspend fast path.
                waiter(value);
            }
        }))
    }
}
