// Location Domain Model

use super::error::{DomainError, Result};
use super::identity::Identity;
use super::queue::{QueueEntry, TicketNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location identifier
pub type LocationId = String;

pub const MAX_NAME_LEN: usize = 120;

/// Upper bound for the auto-serve setting (one week)
pub const MAX_AUTO_SERVE_MINUTES: u32 = 7 * 24 * 60;

/// A queue instance with its own ticket sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    /// Next number to hand out
    pub current_number: TicketNumber,
    pub created_at: i64,
    /// Manager identity
    pub created_by: Identity,
    pub creator_name: String,
    pub last_served_number: TicketNumber,
    /// Minutes before a waiting entry is auto-served (0 = disabled)
    pub auto_serve_time: u32,
    /// Live entries keyed by number; tombstoned entries are absent
    pub queue: BTreeMap<TicketNumber, QueueEntry>,
}

impl Location {
    pub fn is_managed_by(&self, identity: &Identity) -> bool {
        &self.created_by == identity
    }

    pub fn auto_serve_enabled(&self) -> bool {
        self.auto_serve_time > 0
    }

    pub fn entry(&self, number: TicketNumber) -> Option<&QueueEntry> {
        self.queue.get(&number)
    }

    /// Waiting entries in ascending number order
    pub fn waiting_entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.queue.values().filter(|e| e.is_waiting())
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting_entries().count()
    }

    /// Entries whose wait reached the auto-serve threshold at `now_millis`
    pub fn expired_entries(&self, now_millis: i64) -> Vec<TicketNumber> {
        self.waiting_entries()
            .filter(|e| e.is_expired(now_millis, self.auto_serve_time))
            .map(|e| e.number)
            .collect()
    }

    /// Number of waiting entries ahead of `number`
    pub fn waiting_ahead_of(&self, number: TicketNumber) -> usize {
        self.queue
            .range(..number)
            .filter(|(_, e)| e.is_waiting())
            .count()
    }

    /// First number at or after `current_number` with no live entry.
    ///
    /// Normally equals `current_number`; differs only when the counter lags
    /// behind entries written by a concurrent taker. `None` once the number
    /// space is exhausted, including when the counter could not move past
    /// the candidate.
    pub fn next_free_number(&self) -> Option<TicketNumber> {
        let mut candidate = self.current_number.max(1);
        while self.queue.contains_key(&candidate) {
            candidate = candidate.checked_add(1)?;
        }
        candidate.checked_add(1).map(|_| candidate)
    }
}

/// Validate and normalise a location name
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::EmptyLocationName);
    }
    let len = trimmed.chars().count();
    if len > MAX_NAME_LEN {
        return Err(DomainError::LocationNameTooLong(len));
    }
    Ok(trimmed.to_string())
}

pub fn validate_auto_serve_time(minutes: u32) -> Result<u32> {
    if minutes > MAX_AUTO_SERVE_MINUTES {
        return Err(DomainError::AutoServeTimeOutOfRange(minutes));
    }
    Ok(minutes)
}
