//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use serde::{Deserialize, Serialize};
use ticketline_core::application::{ServeOutcome, SweepReport};
use ticketline_core::domain::{Location, TicketNumber};

/// identity.bind.v1
#[derive(Debug, Deserialize)]
pub struct BindIdentityRequest {
    pub public_id: String,
}

/// identity.show.v1 / identity.bind.v1 / identity.leave.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub public_id: Option<String>,
    pub display_name: Option<String>,
}

/// profile.set_name.v1
#[derive(Debug, Deserialize)]
pub struct SetNameRequest {
    pub name: String,
}

/// push.register.v1
#[derive(Debug, Deserialize)]
pub struct RegisterEndpointRequest {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// location.create.v1
#[derive(Debug, Deserialize)]
pub struct CreateLocationRequest {
    pub name: String,
    #[serde(default)]
    pub auto_serve_time: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateLocationResponse {
    pub location_id: String,
}

/// Any method addressing one location
#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub location_id: String,
}

/// location.rename.v1
#[derive(Debug, Deserialize)]
pub struct RenameLocationRequest {
    pub location_id: String,
    pub name: String,
}

/// location.set_auto_serve.v1
#[derive(Debug, Deserialize)]
pub struct SetAutoServeRequest {
    pub location_id: String,
    pub minutes: u32,
}

/// location.list.v1
#[derive(Debug, Default, Deserialize)]
pub struct ListLocationsRequest {
    /// Only locations managed by the bound identity
    #[serde(default)]
    pub mine: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationSummary {
    pub location_id: String,
    pub name: String,
    pub creator_name: String,
    pub created_at: i64,
    pub current_number: TicketNumber,
    pub last_served_number: TicketNumber,
    pub waiting: usize,
    pub auto_serve_time: u32,
    pub managed_by_me: bool,
}

impl LocationSummary {
    pub fn from_location(location: &Location, managed_by_me: bool) -> Self {
        Self {
            location_id: location.id.clone(),
            name: location.name.clone(),
            creator_name: location.creator_name.clone(),
            created_at: location.created_at,
            current_number: location.current_number,
            last_served_number: location.last_served_number,
            waiting: location.waiting_count(),
            auto_serve_time: location.auto_serve_time,
            managed_by_me,
        }
    }
}

/// ticket.take.v1
#[derive(Debug, Clone, Serialize)]
pub struct TakeResponse {
    pub location_id: String,
    pub number: TicketNumber,
}

/// ticket.relinquish.v1
#[derive(Debug, Clone, Serialize)]
pub struct RelinquishResponse {
    pub location_id: String,
    /// `None` when the caller held no ticket
    pub number: Option<TicketNumber>,
}

/// ticket.serve.v1
#[derive(Debug, Deserialize)]
pub struct ServeRequest {
    pub location_id: String,
    pub number: TicketNumber,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServeResponse {
    pub location_id: String,
    pub number: TicketNumber,
    #[serde(flatten)]
    pub outcome: ServeOutcome,
}

/// expiry.start.v1 / expiry.stop.v1
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryResponse {
    pub location_id: String,
    pub running: bool,
}

/// expiry.sweep.v1
#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub location_id: String,
    #[serde(flatten)]
    pub report: SweepReport,
}
