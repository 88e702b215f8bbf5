// Queue service configuration

use super::constants::{
    DEFAULT_DISPATCH_TIMEOUT, DEFAULT_EXPIRY_TICK, DEFAULT_MAX_ALLOCATION_ATTEMPTS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the allocator, expiry scheduler and dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bound of the compare-and-retry loop in take
    pub max_allocation_attempts: u32,
    pub expiry_tick: Duration,
    pub dispatch_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_allocation_attempts: DEFAULT_MAX_ALLOCATION_ATTEMPTS,
            expiry_tick: DEFAULT_EXPIRY_TICK,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

impl QueueConfig {
    pub fn with_max_allocation_attempts(mut self, attempts: u32) -> Self {
        self.max_allocation_attempts = attempts.max(1);
        self
    }

    pub fn with_expiry_tick(mut self, tick: Duration) -> Self {
        self.expiry_tick = tick;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }
}
