//! Thread-safe queue of ready-to-run work items.
//!
//! One physical queue with priority-ordered insertion: three FIFO tiers
//! (High/Normal/Low) behind a single mutex. `pop` takes from the head of the
//! highest non-empty tier; `try_steal` takes from the tail of the lowest
//! non-empty tier, so steals and pops touch opposite ends on both axes and an
//! idle sibling relieves the owner of the work it would reach last.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::suspend::TaskPriority;

/// A single-shot, no-argument unit of runnable code. Run once, discard.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

const TIER_COUNT: usize = 3;

fn tier(priority: TaskPriority) -> usize {
    match priority {
        TaskPriority::High => 0,
        TaskPriority::Normal => 1,
        TaskPriority::Low => 2,
    }
}

struct QueueState {
    tiers: [VecDeque<WorkItem>; TIER_COUNT],
}

impl QueueState {
    fn pop_front(&mut self) -> Option<WorkItem> {
        self.tiers.iter_mut().find_map(|t| t.pop_front())
    }

    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }
}

/// Double-ended, priority-tiered queue of [`WorkItem`]s with a stop signal.
///
/// Pushes after [`stop`](WorkQueue::stop) are accepted and remain drainable;
/// whatever is left when the queue is dropped is discarded with it.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    stopped: AtomicBool,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tiers: Default::default(),
            }),
            ready: Condvar::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Append `item` to the tail of its priority tier and wake one thread
    /// blocked on [`pop`](WorkQueue::pop).
    pub fn push(&self, priority: TaskPriority, item: WorkItem) {
        let mut state = self.state.lock();
        state.tiers[tier(priority)].push_back(item);
        self.ready.notify_one();
    }

    /// Block until an item is available or the queue is stopped with nothing
    /// left. Returns `None` only in the stopped-and-empty case.
    pub fn pop(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.pop_front() {
                return Some(item);
            }
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Like [`pop`](WorkQueue::pop) but gives up after `timeout`. Returns
    /// `None` on timeout as well as in the stopped-and-empty case; callers
    /// distinguish the two via [`is_stopped`](WorkQueue::is_stopped).
    pub fn pop_timeout(&self, timeout: Duration) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.pop_front() {
                return Some(item);
            }
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            if self.ready.wait_for(&mut state, timeout).timed_out() {
                return state.pop_front();
            }
        }
    }

    /// Non-blocking pop from the head of the highest non-empty tier.
    pub fn try_pop(&self) -> Option<WorkItem> {
        self.state.lock().pop_front()
    }

    /// Non-blocking removal from the tail of the lowest non-empty tier — the
    /// opposite end of the one [`pop`](WorkQueue::pop) serves.
    pub fn try_steal(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        state.tiers.iter_mut().rev().find_map(|t| t.pop_back())
    }

    /// Mark the queue stopped and wake every blocked waiter.
    pub fn stop(&self) {
        // Set the flag under the lock so it cannot slip between a waiter's
        // emptiness check and its wait.
        let _state = self.state.lock();
        self.stopped.store(true, Ordering::Release);
        self.ready.notify_all();
    }

    /// Whether [`stop`](WorkQueue::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Best-effort item count; may be stale by the time it returns.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Best-effort emptiness check; may be stale by the time it returns.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn marker(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> WorkItem {
        let log = Arc::clone(log);
        Box::new(move || log.lock().push(id))
    }

    fn run(item: Option<WorkItem>) {
        item.expect("expected an item")();
    }

    #[test]
    fn test_fifo_within_one_priority() {
        let queue = WorkQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for id in 0..5 {
            queue.push(TaskPriority::Normal, marker(&log, id));
        }
        for _ in 0..5 {
            run(queue.try_pop());
        }

        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_high_priority_pops_first() {
        let queue = WorkQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.push(TaskPriority::Low, marker(&log, 1));
        queue.push(TaskPriority::Low, marker(&log, 2));
        queue.push(TaskPriority::High, marker(&log, 3));
        queue.push(TaskPriority::Normal, marker(&log, 4));

        for _ in 0..4 {
            run(queue.try_pop());
        }

        assert_eq!(*log.lock(), vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_steal_takes_opposite_end() {
        let queue = WorkQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.push(TaskPriority::Normal, marker(&log, 1));
        queue.push(TaskPriority::Normal, marker(&log, 2));
        queue.push(TaskPriority::Normal, marker(&log, 3));

        run(queue.try_steal()); // tail
        run(queue.try_pop()); // head

        assert_eq!(*log.lock(), vec![3, 1]);
    }

    #[test]
    fn test_steal_prefers_lowest_tier() {
        let queue = WorkQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.push(TaskPriority::High, marker(&log, 1));
        queue.push(TaskPriority::Low, marker(&log, 2));

        run(queue.try_steal());
        run(queue.try_pop());

        assert_eq!(*log.lock(), vec![2, 1]);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(WorkQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let popper = {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let item = queue.pop().expect("queue was not stopped");
                item();
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        queue.push(TaskPriority::Normal, Box::new(|| {}));
        popper.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_wakes_blocked_pop() {
        let queue = Arc::new(WorkQueue::new());

        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().is_none())
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();

        assert!(popper.join().unwrap());
    }

    #[test]
    fn test_pop_drains_remaining_items_after_stop() {
        let queue = WorkQueue::new();
        queue.push(TaskPriority::Normal, Box::new(|| {}));
        queue.stop();

        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_after_stop_is_drainable() {
        let queue = WorkQueue::new();
        queue.stop();
        queue.push(TaskPriority::Normal, Box::new(|| {}));

        assert_eq!(queue.len(), 1);
        assert!(queue.try_pop().is_some());
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_pop_timeout_returns_none_on_timeout() {
        let queue = WorkQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
        assert!(!queue.is_stopped());
    }

    #[test]
    fn test_len_and_empty() {
        let queue = WorkQueue::new();
        assert!(queue.is_empty());

        queue.push(TaskPriority::Low, Box::new(|| {}));
        queue.push(TaskPriority::High, Box::new(|| {}));
        assert_eq!(queue.len(), 2);

        queue.try_pop();
        assert_eq!(queue.len(), 1);
    }
}
