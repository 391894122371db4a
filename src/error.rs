//! Fatal scheduler initialization errors.
//!
//! Only unrecoverable setup failures are modeled here. Contract violations
//! (double-completing a task, draining the main queue off the main thread,
//! spawning after shutdown) panic instead, and operational failures inside a
//! work item travel as part of the task's result value.

/// Errors that can occur while bringing the scheduler up.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// An OS thread for a worker or the timer could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Name of the thread that failed to start.
        name: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
