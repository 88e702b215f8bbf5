// Domain Layer - Pure business logic and entities

pub mod error;
pub mod graph;
pub mod identity;
pub mod layout;
pub mod location;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use graph::{LeafWrite, StorePath};
pub use identity::Identity;
pub use location::{Location, LocationId};
pub use queue::{QueueEntry, TicketNumber};
