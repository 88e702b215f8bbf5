// Hybrid Logical Clock for last-write-wins ordering

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use ticketline_core::port::TimeProvider;

/// Per-process hybrid logical clock.
///
/// States are `millis * 1000 + counter`: they follow wall time, never repeat,
/// and never go backwards even when wall time does. Observed remote states
/// push the clock forward so a local write always supersedes what this
/// process has already seen.
pub struct HybridClock {
    time_provider: Arc<dyn TimeProvider>,
    last: AtomicI64,
}

impl HybridClock {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            last: AtomicI64::new(0),
        }
    }

    /// Next state for a local write
    pub fn tick(&self) -> i64 {
        let physical = self.time_provider.now_millis().saturating_mul(1000);
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = physical.max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Merge a state seen in the store
    pub fn observe(&self, state: i64) {
        self.last.fetch_max(state, Ordering::SeqCst);
    }
}
