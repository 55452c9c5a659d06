//! One-shot startup work latches.
//!
//! The shell constructs one [`StartupWorkCoordinator`] for the lifetime of the
//! process and shares it (by reference or `Arc`) with whatever launches
//! startup work. Claims are atomic, so concurrent launchers race safely and
//! exactly one wins.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Guards cold-start work so each task runs once, and decides whether a
/// foreground reopen should trigger a lighter resync.
#[derive(Debug, Default)]
pub struct StartupWorkCoordinator {
    deferred_work_claimed: AtomicBool,
    migration_claimed: AtomicBool,
    deferred_work_completed: AtomicBool,
}

impl StartupWorkCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` to the first caller only.
    pub fn claim_deferred_startup_work(&self) -> bool {
        let claimed = claim(&self.deferred_work_claimed);
        debug!(claimed, "deferred startup work claim");
        claimed
    }

    /// Returns `true` to the first caller only.
    pub fn claim_startup_migration(&self) -> bool {
        let claimed = claim(&self.migration_claimed);
        debug!(claimed, "startup migration claim");
        claimed
    }

    pub fn mark_deferred_startup_work_completed(&self) {
        self.deferred_work_completed.store(true, Ordering::Release);
    }

    /// A foreground reopen may resync once the cold-start work has finished,
    /// but never in the middle of an active session.
    pub fn should_schedule_foreground_resync(&self, has_active_session_in_progress: bool) -> bool {
        self.deferred_work_completed.load(Ordering::Acquire) && !has_active_session_in_progress
    }
}

fn claim(latch: &AtomicBool) -> bool {
    latch
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}
