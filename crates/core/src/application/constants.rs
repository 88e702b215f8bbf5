// Queue protocol constants (ADR: No magic values)
use std::time::Duration;

/// Attempts of the take saga before giving up with an allocation conflict
pub const DEFAULT_MAX_ALLOCATION_ATTEMPTS: u32 = 5;

/// Expiry sweep period per location (60s)
pub const DEFAULT_EXPIRY_TICK: Duration = Duration::from_secs(60);

/// Upper bound for one notification delivery (10s)
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Creator name stored when the manager has no display name
pub const DEFAULT_CREATOR_NAME: &str = "Anonymous";

/// First number handed out by a new location
pub const FIRST_TICKET_NUMBER: u64 = 1;
