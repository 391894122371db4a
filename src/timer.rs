//! Timer thread servicing delayed continuations.
//!
//! Instead of polling, a dedicated thread waits on a min-heap of deadlines
//! using condvar timeouts; arming an earlier deadline wakes it so it can
//! re-shorten its wait. On expiry the armed work item is enqueued onto the
//! queue matching the affinity the delay requested — the timer never runs
//! continuations itself.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::SchedulerError;
use crate::queue::WorkItem;
use crate::scheduler::QueueSet;
use crate::suspend::{TaskPriority, ThreadAffinity};

struct DelayEntry {
    deadline: Instant,
    /// Breaks deadline ties so entries armed first fire first.
    seq: u64,
    affinity: ThreadAffinity,
    item: WorkItem,
}

// Reverse ordering turns std's max-heap into a min-heap on (deadline, seq).
impl Ord for DelayEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for DelayEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayEntry {}

struct TimerState {
    pending: BinaryHeap<DelayEntry>,
}

/// Dedicated waiter thread for `Delay` suspension points.
pub(crate) struct TimerThread {
    state: Mutex<TimerState>,
    notify: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                pending: BinaryHeap::new(),
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            handle: Mutex::new(None),
        })
    }

    /// Start the timer thread. Expired entries are pushed onto `queues`.
    pub(crate) fn start(self: &Arc<Self>, queues: Arc<QueueSet>) -> Result<(), SchedulerError> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("tickwork-timer".to_string())
            .spawn(move || timer.run_loop(queues))
            .map_err(|source| SchedulerError::Spawn {
                name: "timer",
                source,
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timer thread and discard whatever delays are still pending.
    pub(crate) fn stop(&self) {
        {
            // Set the flag under the lock so the loop cannot miss the wake
            // between its shutdown check and its wait.
            let state = self.state.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
            self.notify.notify_one();
            if !state.pending.is_empty() {
                debug!(pending = state.pending.len(), "discarding pending delays");
            }
        }

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Arm `item` to be enqueued onto the `affinity` queue at `deadline`.
    pub(crate) fn register(&self, deadline: Instant, affinity: ThreadAffinity, item: WorkItem) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let mut state = self.state.lock();
        state.pending.push(DelayEntry {
            deadline,
            seq,
            affinity,
            item,
        });
        // The new entry may be earlier than the wait currently in progress.
        self.notify.notify_one();
    }

    fn run_loop(&self, queues: Arc<QueueSet>) {
        loop {
            let mut state = self.state.lock();
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            while let Some(entry) = state.pending.peek() {
                if entry.deadline > now {
                    break;
                }
                let entry = state.pending.pop().expect("peeked entry");
                queues.enqueue(entry.affinity, TaskPriority::Normal, entry.item);
            }

            match state.pending.peek() {
                Some(next) => {
                    let now = Instant::now();
                    if next.deadline > now {
                        let timeout = next.deadline - now;
                        self.notify.wait_for(&mut state, timeout);
                    }
                }
                None => {
                    self.notify.wait(&mut state);
                }
            }
        }

        debug!("timer thread stopped");
    }

    /// Best-effort count of delays still pending.
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}
