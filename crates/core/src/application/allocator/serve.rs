// Serve Use Case

use super::TicketAllocator;
use crate::domain::layout::{self, field};
use crate::domain::{DomainError, StorePath, TicketNumber};
use crate::error::{AppError, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServeOutcome {
    Served { served_at: i64 },
    /// Entry was already served; nothing written, nobody notified
    AlreadyServed,
}

pub(super) async fn execute(
    alloc: &TicketAllocator,
    location_id: &str,
    number: TicketNumber,
) -> Result<ServeOutcome> {
    if number == 0 {
        return Err(DomainError::InvalidTicketNumber(number).into());
    }

    let entry = alloc
        .registry
        .entry(location_id, number)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {number} at location {location_id}")))?;
    if entry.served {
        debug!(location_id, number, "Already served");
        return Ok(ServeOutcome::AlreadyServed);
    }

    let served_at = alloc.time_provider.now_millis();
    let entry_path = layout::queue_entry(location_id, number);
    alloc
        .store
        .put(&entry_path, served_patch(true, Some(served_at)))
        .await
        .map_err(AppError::from_write)?;

    if let Err(e) = advance_last_served(alloc, location_id, number).await {
        warn!(location_id, number, error = %e, "Advancing last served failed, compensating");
        if let Err(undo) = alloc.store.put(&entry_path, served_patch(false, None)).await {
            error!(
                location_id,
                number,
                error = %undo,
                "Compensation failed, entry left served"
            );
        }
        return Err(e);
    }

    info!(location_id, number, "Ticket served");

    let outcome = alloc.dispatcher.notify(location_id, number).await;
    debug!(location_id, number, ?outcome, "Dispatch finished");

    Ok(ServeOutcome::Served { served_at })
}

async fn advance_last_served(
    alloc: &TicketAllocator,
    location_id: &str,
    number: TicketNumber,
) -> Result<()> {
    let path = layout::location_field(location_id, field::LAST_SERVED_NUMBER);
    let last = alloc.registry.last_served_number(location_id).await?;
    if number > last {
        alloc
            .store
            .put(&path, json!(number))
            .await
            .map_err(AppError::from_write)?;
        repair_last_served(alloc, location_id, &path).await;
    }
    Ok(())
}

/// The write above is a blind overwrite, so a slower concurrent serve can
/// land a lower number after ours. Move the field forward to the highest
/// served entry; failures are logged, not returned.
async fn repair_last_served(alloc: &TicketAllocator, location_id: &str, path: &StorePath) {
    let location = match alloc.registry.get_location(location_id).await {
        Ok(location) => location,
        Err(e) => {
            warn!(location_id, error = %e, "Could not re-read location after serve");
            return;
        }
    };
    let highest = location
        .queue
        .values()
        .filter(|e| e.served)
        .map(|e| e.number)
        .max()
        .unwrap_or(0);
    if location.last_served_number < highest {
        debug!(
            location_id,
            observed = location.last_served_number,
            highest,
            "Repairing last served"
        );
        if let Err(e) = alloc.store.put(path, json!(highest)).await {
            warn!(location_id, highest, error = %e, "Last served repair failed");
        }
    }
}

fn served_patch(served: bool, served_at: Option<i64>) -> Value {
    let mut patch = Map::new();
    patch.insert(field::SERVED.into(), json!(served));
    patch.insert(
        field::SERVED_AT.into(),
        served_at.map_or(Value::Null, |t| json!(t)),
    );
    Value::Object(patch)
}
