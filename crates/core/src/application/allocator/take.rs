// Take Use Case (saga with compare-and-retry)

use super::TicketAllocator;
use crate::application::registry::entry_record;
use crate::domain::layout::{self, field};
use crate::domain::{DomainError, Identity, QueueEntry, StorePath, TicketNumber};
use crate::error::{AppError, Result};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

enum Attempt {
    Claimed(TicketNumber),
    /// Another holder ended up owning the number we wrote
    Lost(TicketNumber),
}

/// Execute the take saga for `holder`
///
/// Writes, in order: reservation index, queue entry, counter. A failed write
/// compensates the writes before it. The entry slot is re-read right before
/// the entry write and again after the counter is acknowledged; if another
/// holder owns it at either point the reservation is cleared and the whole
/// saga retries, up to `max_allocation_attempts`.
pub(super) async fn execute(
    alloc: &TicketAllocator,
    location_id: &str,
    holder: &Identity,
) -> Result<TicketNumber> {
    let max_attempts = alloc.config.max_allocation_attempts.max(1);

    for attempt in 1..=max_attempts {
        match attempt_once(alloc, location_id, holder).await? {
            Attempt::Claimed(number) => {
                info!(
                    location_id,
                    number,
                    holder = holder.short(),
                    attempt,
                    "Ticket taken"
                );
                return Ok(number);
            }
            Attempt::Lost(number) => {
                warn!(
                    location_id,
                    number,
                    holder = holder.short(),
                    attempt,
                    "duplicate ticket detected, retrying"
                );
            }
        }
    }

    error!(
        location_id,
        holder = holder.short(),
        attempts = max_attempts,
        "Ticket allocation gave up"
    );
    Err(AppError::AllocationConflict {
        location_id: location_id.to_string(),
        attempts: max_attempts,
    })
}

async fn attempt_once(
    alloc: &TicketAllocator,
    location_id: &str,
    holder: &Identity,
) -> Result<Attempt> {
    let location = alloc.registry.get_location(location_id).await?;

    if let Some(reserved) = alloc.registry.reservation(holder, location_id).await? {
        let active = location
            .entry(reserved)
            .is_some_and(|e| e.is_waiting() && e.is_held_by(holder));
        if active {
            return Err(AppError::AlreadyQueued {
                location_id: location_id.to_string(),
                number: reserved,
            });
        }
        // dangling index from a crashed relinquish, a served ticket or a lost race
        debug!(location_id, number = reserved, "Overwriting stale reservation");
    }

    let number = location
        .next_free_number()
        .ok_or_else(|| DomainError::TicketSequenceExhausted(location_id.to_string()))?;
    let entry = QueueEntry::new(number, holder.clone(), alloc.time_provider.now_millis());

    let reservation = layout::reservation(holder, location_id);
    let entry_path = layout::queue_entry(location_id, number);
    let counter = layout::location_field(location_id, field::CURRENT_NUMBER);

    // 1. reservation index; nothing to undo yet
    alloc
        .store
        .put(&reservation, json!(number))
        .await
        .map_err(|e| {
            warn!(location_id, number, error = %e, "Reservation write failed");
            AppError::from_write(e)
        })?;

    // 2. queue entry, unless a taker working from a newer snapshot got there first
    let occupant = match alloc.registry.entry(location_id, number).await {
        Ok(occupant) => occupant,
        Err(e) => {
            warn!(location_id, number, error = %e, "Entry slot read failed, compensating");
            clear(alloc, &reservation, location_id, number).await;
            return Err(e);
        }
    };
    if occupant.is_some_and(|e| !e.is_held_by(holder)) {
        clear(alloc, &reservation, location_id, number).await;
        return Ok(Attempt::Lost(number));
    }
    if let Err(e) = alloc.store.put(&entry_path, entry_record(&entry)).await {
        warn!(location_id, number, error = %e, "Queue entry write failed, compensating");
        clear(alloc, &reservation, location_id, number).await;
        return Err(AppError::from_write(e));
    }

    // 3. counter
    if let Err(e) = alloc.store.put(&counter, json!(number + 1)).await {
        warn!(location_id, number, error = %e, "Counter write failed, compensating");
        clear_entry_if_owned(alloc, location_id, number, holder).await;
        clear(alloc, &reservation, location_id, number).await;
        return Err(AppError::from_write(e));
    }

    // 4. read-after-write verification
    let written = alloc
        .registry
        .entry(location_id, number)
        .await
        .map_err(|e| indeterminate(location_id, number, e))?;
    if !written.is_some_and(|e| e.is_held_by(holder)) {
        clear(alloc, &reservation, location_id, number).await;
        return Ok(Attempt::Lost(number));
    }

    let observed = alloc
        .registry
        .current_number(location_id)
        .await
        .map_err(|e| indeterminate(location_id, number, e))?;
    if observed < number + 1 {
        // a lagging writer moved the counter back; the entry is ours regardless
        debug!(location_id, number, observed, "Repairing counter");
        if let Err(e) = alloc.store.put(&counter, json!(number + 1)).await {
            warn!(location_id, number, error = %e, "Counter repair failed");
        }
    }

    Ok(Attempt::Claimed(number))
}

fn indeterminate(location_id: &str, number: TicketNumber, err: AppError) -> AppError {
    AppError::Indeterminate(format!(
        "ticket {number} at location {location_id} written but not verified: {err}"
    ))
}

/// Tombstone a path as a compensation; failures are logged, not returned
async fn clear(alloc: &TicketAllocator, path: &StorePath, location_id: &str, number: TicketNumber) {
    if let Err(e) = alloc.store.put(path, Value::Null).await {
        error!(
            location_id,
            number,
            path = %path,
            error = %e,
            "Compensation failed, record left inconsistent"
        );
    }
}

/// Remove the entry only while it still belongs to `holder`
async fn clear_entry_if_owned(
    alloc: &TicketAllocator,
    location_id: &str,
    number: TicketNumber,
    holder: &Identity,
) {
    match alloc.registry.entry(location_id, number).await {
        Ok(Some(entry)) if entry.is_held_by(holder) && entry.is_waiting() => {
            let path = layout::queue_entry(location_id, number);
            clear(alloc, &path, location_id, number).await;
        }
        Ok(_) => {
            debug!(location_id, number, "Entry no longer ours, leaving it");
        }
        Err(e) => {
            error!(location_id, number, error = %e, "Could not read entry for compensation");
        }
    }
}
