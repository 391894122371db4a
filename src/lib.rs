//! tickwork — a frame-tick task scheduler.
//!
//! A single-process execution engine for suspendable units of work that
//! migrate between one designated main thread and a pool of background
//! worker threads:
//! - **Queues**: thread-safe priority-tiered work queues with blocking pop
//!   and tail stealing (`queue` module)
//! - **Suspension points**: main-thread switch, background switch with
//!   priority, delay, and yield (`suspend` module)
//! - **Tasks**: awaitable handles over single-assignment results (`task`
//!   module)
//! - **Scheduler**: the worker pool, timer thread, and per-tick main-queue
//!   drain (`scheduler` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use tickwork::{Scheduler, Step, TaskPriority};
//!
//! let scheduler = Scheduler::new(0)?; // one worker per core
//!
//! let task = scheduler.spawn(|| {
//!     Step::background(TaskPriority::Normal, || {
//!         let loaded = load_assets();
//!         Step::to_main(move || Step::done(install(loaded)))
//!     })
//! });
//!
//! while !task.is_complete() {
//!     scheduler.update(); // once per frame, on the main thread
//! }
//! scheduler.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Fatal initialization errors.
pub mod error;

/// Optional process-wide accessor for the composition root.
pub mod global;

/// Work queues: priority tiers, blocking pop, tail stealing, stop signal.
pub mod queue;

/// The scheduler: worker pool, routing, and the per-tick drain.
pub mod scheduler;

/// Thread affinity, priorities, and the suspension-point family.
pub mod suspend;

/// Awaitable task handles.
pub mod task;

mod timer;
mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::SchedulerError;
pub use queue::{WorkItem, WorkQueue};
pub use scheduler::{ResumeHandle, Scheduler};
pub use suspend::{Continuation, Step, SuspensionPoint, TaskPriority, ThreadAffinity};
pub use task::Task;
