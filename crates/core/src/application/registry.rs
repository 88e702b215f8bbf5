// Location Registry - CRUD over location records
//
// Store records may be partially initialised or carry legacy shapes; every
// value read from the store is decoded and default-filled here, never at the
// call sites.

use super::constants::{DEFAULT_CREATOR_NAME, FIRST_TICKET_NUMBER};
use super::profile::ProfileService;
use crate::domain::layout::{self, field};
use crate::domain::location::{validate_auto_serve_time, validate_name};
use crate::domain::{Identity, Location, LocationId, QueueEntry, TicketNumber};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, IdentityProvider, ReplicatedStore, TimeProvider};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct LocationRegistry {
    store: Arc<dyn ReplicatedStore>,
    identity: Arc<dyn IdentityProvider>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    profile: Arc<ProfileService>,
}

impl LocationRegistry {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        identity: Arc<dyn IdentityProvider>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        profile: Arc<ProfileService>,
    ) -> Self {
        Self {
            store,
            identity,
            id_provider,
            time_provider,
            profile,
        }
    }

    /// Create a location managed by the current identity
    pub async fn create_location(
        &self,
        name: &str,
        auto_serve_time: Option<u32>,
    ) -> Result<LocationId> {
        let manager = super::require_identity(self.identity.as_ref())?;
        let name = validate_name(name)?;
        let auto_serve_time = validate_auto_serve_time(auto_serve_time.unwrap_or(0))?;

        let creator_name = self
            .profile
            .display_name(&manager)
            .await?
            .unwrap_or_else(|| DEFAULT_CREATOR_NAME.to_string());

        let location_id = self.id_provider.generate_id();
        let mut record = Map::new();
        record.insert(field::NAME.into(), json!(name));
        record.insert(field::CURRENT_NUMBER.into(), json!(FIRST_TICKET_NUMBER));
        record.insert(
            field::CREATED_AT.into(),
            json!(self.time_provider.now_millis()),
        );
        record.insert(field::CREATED_BY.into(), json!(manager.public_id));
        record.insert(field::CREATOR_NAME.into(), json!(creator_name));
        record.insert(field::LAST_SERVED_NUMBER.into(), json!(0));
        record.insert(field::AUTO_SERVE_TIME.into(), json!(auto_serve_time));

        self.store
            .put(&layout::location(&location_id), Value::Object(record))
            .await
            .map_err(AppError::from_write)?;
        self.store
            .put(
                &layout::managed_locations(&manager).child(&location_id),
                Value::String(location_id.clone()),
            )
            .await
            .map_err(AppError::from_write)?;

        info!(
            location_id = %location_id,
            manager = manager.short(),
            auto_serve_time,
            "Location created"
        );
        Ok(location_id)
    }

    /// Location snapshot, `None` when absent
    pub async fn find_location(&self, location_id: &str) -> Result<Option<Location>> {
        let node = self
            .store
            .once(&layout::location(location_id))
            .await
            .map_err(AppError::from_read)?;
        Ok(node.and_then(|v| decode_location(location_id, &v)))
    }

    pub async fn get_location(&self, location_id: &str) -> Result<Location> {
        self.find_location(location_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Location {location_id}")))
    }

    /// Fresh read of a single queue entry
    pub async fn entry(
        &self,
        location_id: &str,
        number: TicketNumber,
    ) -> Result<Option<QueueEntry>> {
        let node = self
            .store
            .once(&layout::queue_entry(location_id, number))
            .await
            .map_err(AppError::from_read)?;
        Ok(node.and_then(|v| decode_entry(number, &v)))
    }

    /// Ticket number recorded in `holder`'s reservation index
    pub async fn reservation(
        &self,
        holder: &Identity,
        location_id: &str,
    ) -> Result<Option<TicketNumber>> {
        let node = self
            .store
            .once(&layout::reservation(holder, location_id))
            .await
            .map_err(AppError::from_read)?;
        Ok(node.as_ref().and_then(decode_number))
    }

    pub async fn current_number(&self, location_id: &str) -> Result<TicketNumber> {
        self.counter(location_id, field::CURRENT_NUMBER, FIRST_TICKET_NUMBER)
            .await
    }

    pub async fn last_served_number(&self, location_id: &str) -> Result<TicketNumber> {
        self.counter(location_id, field::LAST_SERVED_NUMBER, 0).await
    }

    async fn counter(
        &self,
        location_id: &str,
        name: &str,
        default: TicketNumber,
    ) -> Result<TicketNumber> {
        let node = self
            .store
            .once(&layout::location_field(location_id, name))
            .await
            .map_err(AppError::from_read)?;
        Ok(node.as_ref().and_then(decode_number).unwrap_or(default))
    }

    /// Load `location_id` and check the current identity manages it
    pub async fn require_manager(&self, location_id: &str) -> Result<(Identity, Location)> {
        let me = super::require_identity(self.identity.as_ref())?;
        let location = self.get_location(location_id).await?;
        if !location.is_managed_by(&me) {
            return Err(AppError::Unauthorized(format!(
                "{} does not manage location {location_id}",
                me.short()
            )));
        }
        Ok((me, location))
    }

    /// Rename a location (manager only)
    pub async fn update_name(&self, location_id: &str, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        self.require_manager(location_id).await?;
        self.store
            .put(
                &layout::location_field(location_id, field::NAME),
                Value::String(name),
            )
            .await
            .map_err(AppError::from_write)?;
        debug!(location_id, "Location renamed");
        Ok(())
    }

    /// Change the auto-serve threshold (manager only); 0 disables expiry
    pub async fn update_auto_serve_time(&self, location_id: &str, minutes: u32) -> Result<()> {
        let minutes = validate_auto_serve_time(minutes)?;
        self.require_manager(location_id).await?;
        self.store
            .put(
                &layout::location_field(location_id, field::AUTO_SERVE_TIME),
                json!(minutes),
            )
            .await
            .map_err(AppError::from_write)?;
        info!(location_id, minutes, "Auto-serve time updated");
        Ok(())
    }

    /// Ids of the locations created by `manager`
    pub async fn managed_locations(&self, manager: &Identity) -> Result<Vec<LocationId>> {
        let node = self
            .store
            .once(&layout::managed_locations(manager))
            .await
            .map_err(AppError::from_read)?;
        let Some(Value::Object(index)) = node else {
            return Ok(Vec::new());
        };
        Ok(index
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(id, _)| id)
            .collect())
    }

    /// Locations managed by the current identity
    pub async fn my_locations(&self) -> Result<Vec<Location>> {
        let me = super::require_identity(self.identity.as_ref())?;
        let mut locations = Vec::new();
        for id in self.managed_locations(&me).await? {
            if let Some(location) = self.find_location(&id).await? {
                locations.push(location);
            }
        }
        locations.sort_by_key(|l| l.created_at);
        Ok(locations)
    }

    /// Every location in the shared space, oldest first
    pub async fn all_locations(&self) -> Result<Vec<Location>> {
        let node = self
            .store
            .once(&layout::all_locations())
            .await
            .map_err(AppError::from_read)?;
        let Some(Value::Object(records)) = node else {
            return Ok(Vec::new());
        };
        let mut locations: Vec<Location> = records
            .iter()
            .filter_map(|(id, v)| decode_location(id, v))
            .collect();
        locations.sort_by_key(|l| l.created_at);
        Ok(locations)
    }

    /// Every live entry of a location, ascending by number (manager only)
    pub async fn queue_entries(&self, location_id: &str) -> Result<Vec<QueueEntry>> {
        let (_, location) = self.require_manager(location_id).await?;
        Ok(location.queue.into_values().collect())
    }
}

// ============================================================================
// Record decoding (default-fill boundary)
// ============================================================================

/// Accept numbers stored as JSON numbers or numeric strings
pub(crate) fn decode_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn decode_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode a queue entry node; `None` for tombstones and non-record values
pub(crate) fn decode_entry(key: TicketNumber, value: &Value) -> Option<QueueEntry> {
    let Value::Object(fields) = value else {
        return None;
    };
    let number = fields
        .get(field::NUMBER)
        .and_then(decode_number)
        .unwrap_or(key);
    Some(QueueEntry {
        number,
        holder: Identity::new(decode_string(fields.get(field::HOLDER)).unwrap_or_default()),
        timestamp: decode_i64(fields.get(field::TIMESTAMP)).unwrap_or(0),
        served: decode_bool(fields.get(field::SERVED)),
        served_at: decode_i64(fields.get(field::SERVED_AT)),
    })
}

fn decode_queue(value: Option<&Value>) -> BTreeMap<TicketNumber, QueueEntry> {
    let Some(Value::Object(entries)) = value else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(key, v)| {
            let number: TicketNumber = key.parse().ok()?;
            decode_entry(number, v).map(|e| (number, e))
        })
        .collect()
}

/// Decode a location node, filling absent fields with their defaults
pub(crate) fn decode_location(location_id: &str, value: &Value) -> Option<Location> {
    let Value::Object(fields) = value else {
        return None;
    };
    let number = |name: &str| fields.get(name).and_then(decode_number);

    Some(Location {
        id: location_id.to_string(),
        name: decode_string(fields.get(field::NAME)).unwrap_or_default(),
        current_number: number(field::CURRENT_NUMBER).unwrap_or(FIRST_TICKET_NUMBER),
        created_at: decode_i64(fields.get(field::CREATED_AT)).unwrap_or(0),
        created_by: Identity::new(decode_string(fields.get(field::CREATED_BY)).unwrap_or_default()),
        creator_name: decode_string(fields.get(field::CREATOR_NAME))
            .unwrap_or_else(|| DEFAULT_CREATOR_NAME.to_string()),
        last_served_number: number(field::LAST_SERVED_NUMBER).unwrap_or(0),
        auto_serve_time: number(field::AUTO_SERVE_TIME)
            .map(|m| u32::try_from(m).unwrap_or(u32::MAX))
            .unwrap_or(0),
        queue: decode_queue(fields.get(field::QUEUE)),
    })
}

/// Store record for a new waiting entry
pub(crate) fn entry_record(entry: &QueueEntry) -> Value {
    let mut fields = Map::new();
    fields.insert(field::NUMBER.into(), json!(entry.number));
    fields.insert(field::HOLDER.into(), json!(entry.holder.public_id));
    fields.insert(field::TIMESTAMP.into(), json!(entry.timestamp));
    fields.insert(field::SERVED.into(), json!(entry.served));
    if let Some(served_at) = entry.served_at {
        fields.insert(field::SERVED_AT.into(), json!(served_at));
    }
    Value::Object(fields)
}
