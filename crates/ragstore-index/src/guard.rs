//! Single-flight guard for compaction.
//!
//! At most one compaction runs at a time. A second caller does not wait; it
//! gets `None` and reports that no compaction happened.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether a compaction is in progress.
#[derive(Debug, Default)]
pub struct CompactionGuard {
    running: AtomicBool,
}

impl CompactionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard, or `None` if a compaction already holds it.
    pub fn try_acquire(&self) -> Option<CompactionRun<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CompactionRun {
                flag: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// RAII claim on a [`CompactionGuard`]; released on drop, including unwinds.
#[derive(Debug)]
pub struct CompactionRun<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CompactionRun<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
