// Store Graph Layout
//
// Every path the protocol reads or writes is built here. Field names keep the
// wire names already present in shared stores.

use super::graph::StorePath;
use super::identity::Identity;
use super::queue::TicketNumber;

pub const LOCATIONS_ROOT: &str = "locations";
pub const LOCATIONS_DATA: &str = "data";

pub mod field {
    pub const NAME: &str = "name";
    pub const CURRENT_NUMBER: &str = "currentNumber";
    pub const CREATED_AT: &str = "createdAt";
    pub const CREATED_BY: &str = "createdBy";
    pub const CREATOR_NAME: &str = "creatorName";
    pub const LAST_SERVED_NUMBER: &str = "lastServedNumber";
    pub const AUTO_SERVE_TIME: &str = "autoServeTime";
    pub const QUEUE: &str = "queue";

    pub const NUMBER: &str = "number";
    pub const HOLDER: &str = "userId";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SERVED: &str = "served";
    pub const SERVED_AT: &str = "servedAt";
}

/// `locations/data`
pub fn all_locations() -> StorePath {
    StorePath::root(LOCATIONS_ROOT).child(LOCATIONS_DATA)
}

/// `locations/data/{id}`
pub fn location(location_id: &str) -> StorePath {
    all_locations().child(location_id)
}

pub fn location_field(location_id: &str, name: &str) -> StorePath {
    location(location_id).child(name)
}

/// `locations/data/{id}/queue/{n}`
pub fn queue_entry(location_id: &str, number: TicketNumber) -> StorePath {
    location(location_id).child(field::QUEUE).child(number)
}

/// Private namespace of an identity: `~{publicId}`
pub fn user_root(identity: &Identity) -> StorePath {
    StorePath::root(format!("~{}", identity.public_id))
}

/// Reservation index entry: `~{publicId}/myNumbers/{id}`
pub fn reservation(holder: &Identity, location_id: &str) -> StorePath {
    user_root(holder).child("myNumbers").child(location_id)
}

/// Locations created by a manager: `~{publicId}/locations`
pub fn managed_locations(manager: &Identity) -> StorePath {
    user_root(manager).child("locations")
}

pub fn display_name(identity: &Identity) -> StorePath {
    user_root(identity).child("profile").child("name")
}

/// Notification endpoint descriptor: `~{publicId}/pushSubscription`
pub fn push_endpoint(identity: &Identity) -> StorePath {
    user_root(identity).child("pushSubscription")
}
