// Relinquish Use Case

use super::TicketAllocator;
use crate::domain::{layout, Identity, TicketNumber};
use crate::error::{AppError, Result};
use serde_json::Value;
use tracing::info;

/// Tombstone the holder's entry, then clear the reservation index.
///
/// A crash between the two writes leaves a reservation that points at a
/// removed entry, which take treats as stale.
pub(super) async fn execute(
    alloc: &TicketAllocator,
    location_id: &str,
    holder: &Identity,
) -> Result<Option<TicketNumber>> {
    let Some(number) = alloc.registry.reservation(holder, location_id).await? else {
        return Ok(None);
    };

    let entry = alloc.registry.entry(location_id, number).await?;
    if entry.is_some_and(|e| e.is_held_by(holder) && e.is_waiting()) {
        alloc
            .store
            .put(&layout::queue_entry(location_id, number), Value::Null)
            .await
            .map_err(AppError::from_write)?;
    }

    alloc
        .store
        .put(&layout::reservation(holder, location_id), Value::Null)
        .await
        .map_err(AppError::from_write)?;

    info!(
        location_id,
        number,
        holder = holder.short(),
        "Ticket relinquished"
    );
    Ok(Some(number))
}
