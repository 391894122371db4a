//! Background worker threads.
//!
//! Each worker blocks on its own queue and, when that runs dry, steals from
//! a random sibling's tail. A dequeued item runs synchronously to its next
//! suspension point or completion. The worker exits once its queue is
//! stopped and nothing remains to drain anywhere.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::SchedulerError;
use crate::queue::WorkItem;
use crate::scheduler::QueueSet;

/// How long an idle worker parks on its own queue before retrying steals.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);

pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn worker `id`, pulling from `queues.workers[id]`.
    pub(crate) fn spawn(id: usize, queues: Arc<QueueSet>) -> Result<Self, SchedulerError> {
        let handle = thread::Builder::new()
            .name(format!("tickwork-worker-{id}"))
            .spawn(move || Self::run_loop(id, queues))
            .map_err(|source| SchedulerError::Spawn {
                name: "worker",
                source,
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Join the worker thread. The worker's queue must already be stopped,
    /// otherwise this blocks until it is.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!(worker = self.id, "worker stopped");
        }
    }

    fn run_loop(id: usize, queues: Arc<QueueSet>) {
        debug!(worker = id, "worker started");
        let own = &queues.workers[id];

        loop {
            let item = match own.try_pop() {
                Some(item) => item,
                None => match Self::steal(&queues, id) {
                    Some(item) => item,
                    None => match own.pop_timeout(PARK_TIMEOUT) {
                        Some(item) => item,
                        None if own.is_stopped() => {
                            // Stopped and drained locally; relieve siblings of
                            // their leftovers, then exit.
                            match Self::steal(&queues, id) {
                                Some(item) => item,
                                None => break,
                            }
                        }
                        None => continue,
                    },
                },
            };

            item();
        }
    }

    /// Steal from a sibling queue, starting at a random victim.
    fn steal(queues: &QueueSet, own: usize) -> Option<WorkItem> {
        let count = queues.workers.len();
        if count <= 1 {
            return None;
        }

        let start = rand::thread_rng().gen_range(0..count);
        for offset in 0..count {
            let victim = (start + offset) % count;
            if victim == own {
                continue;
            }
            if let Some(item) = queues.workers[victim].try_steal() {
                return Some(item);
            }
        }
        None
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspend::TaskPriority;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_item(counter: &Arc<AtomicUsize>) -> WorkItem {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn stop_all(queues: &QueueSet) {
        for queue in &queues.workers {
            queue.stop();
        }
    }

    #[test]
    fn test_worker_runs_own_queue() {
        let queues = Arc::new(QueueSet::new(1));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            queues.workers[0].push(TaskPriority::Normal, counter_item(&counter));
        }

        let mut worker = Worker::spawn(0, Arc::clone(&queues)).unwrap();
        thread::sleep(Duration::from_millis(100));
        stop_all(&queues);
        worker.join();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_worker_steals_from_sibling() {
        let queues = Arc::new(QueueSet::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        // Work sits on queue 1; only worker 0 is running.
        for _ in 0..3 {
            queues.workers[1].push(TaskPriority::Normal, counter_item(&counter));
        }

        let mut worker = Worker::spawn(0, Arc::clone(&queues)).unwrap();
        thread::sleep(Duration::from_millis(100));
        stop_all(&queues);
        worker.join();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_worker_drains_before_exit() {
        let queues = Arc::new(QueueSet::new(1));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            queues.workers[0].push(TaskPriority::Normal, counter_item(&counter));
        }

        // Stop before the worker even starts: it must still drain everything.
        stop_all(&queues);
        let mut worker = Worker::spawn(0, Arc::clone(&queues)).unwrap();
        worker.join();

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
