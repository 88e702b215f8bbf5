// Queue Entry Domain Model

use super::identity::Identity;
use serde::{Deserialize, Serialize};

/// Ticket number within one location's sequence (starts at 1)
pub type TicketNumber = u64;

/// One claimed ticket and its state.
///
/// Lifecycle: created on take, flipped to served by an explicit serve or by
/// auto-expiry, tombstoned on relinquish. Served and removed entries are
/// terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub number: TicketNumber,
    pub holder: Identity,
    /// Creation time (epoch ms)
    pub timestamp: i64,
    pub served: bool,
    pub served_at: Option<i64>,
}

impl QueueEntry {
    /// Create a waiting entry with explicit timestamp
    pub fn new(number: TicketNumber, holder: Identity, timestamp: i64) -> Self {
        Self {
            number,
            holder,
            timestamp,
            served: false,
            served_at: None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        !self.served
    }

    pub fn is_held_by(&self, identity: &Identity) -> bool {
        &self.holder == identity
    }

    /// Milliseconds the entry has been waiting at `now_millis`
    pub fn elapsed_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.timestamp)
    }

    /// True once a waiting entry has waited at least `auto_serve_minutes`.
    ///
    /// Entries without a creation time never expire; a zero setting disables
    /// expiry.
    pub fn is_expired(&self, now_millis: i64, auto_serve_minutes: u32) -> bool {
        if self.served || auto_serve_minutes == 0 || self.timestamp <= 0 {
            return false;
        }
        self.elapsed_millis(now_millis) >= i64::from(auto_serve_minutes) * 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    #[test]
    fn test_expiry_threshold_is_inclusive() {
        let entry = QueueEntry::new(1, Identity::new("h"), 1_000);
        assert!(!entry.is_expired(1_000 + 5 * MINUTE - 1, 5));
        assert!(entry.is_expired(1_000 + 5 * MINUTE, 5));
    }

    #[test]
    fn test_expiry_disabled_or_served() {
        let mut entry = QueueEntry::new(1, Identity::new("h"), 1_000);
        assert!(!entry.is_expired(1_000 + 100 * MINUTE, 0));

        entry.served = true;
        assert!(!entry.is_expired(1_000 + 100 * MINUTE, 5));
    }

    #[test]
    fn test_entry_without_timestamp_never_expires() {
        let entry = QueueEntry::new(1, Identity::new("h"), 0);
        assert!(!entry.is_expired(i64::MAX / 2, 1));
    }
}
