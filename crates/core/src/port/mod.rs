// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod identity;
pub mod notification;
pub mod replicated_store;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use identity::{IdentityProvider, SessionIdentity};
pub use notification::{DeliveryError, EndpointDescriptor, NotificationTransport, PushMessage};
pub use replicated_store::{
    NodeRef, ReplicatedStore, StoreError, StoreExt, StoreResult, StoreSubscription,
    SubscriptionId, WatchRegistry,
};
pub use time_provider::{SystemTimeProvider, TimeProvider};
