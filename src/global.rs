//! Optional process-wide accessor for the application composition root.
//!
//! The scheduler is an explicit instance passed to collaborators; this
//! module only exists for the outermost bootstrap code that owns process
//! lifetime and wants `global::get()` ergonomics instead of threading the
//! instance everywhere.

use once_cell::sync::OnceCell;

use crate::scheduler::Scheduler;

static GLOBAL: OnceCell<Scheduler> = OnceCell::new();

/// Install `scheduler` as the process-wide instance.
///
/// Returns the scheduler back if one was already installed.
pub fn install(scheduler: Scheduler) -> Result<(), Scheduler> {
    GLOBAL.set(scheduler)
}

/// The installed scheduler, if any.
pub fn try_get() -> Option<&'static Scheduler> {
    GLOBAL.get()
}

/// The installed scheduler.
///
/// # Panics
///
/// Panics if [`install`] has not been called.
pub fn get() -> &'static Scheduler {
    GLOBAL
        .get()
        .expect("no scheduler installed; call global::install first")
}
