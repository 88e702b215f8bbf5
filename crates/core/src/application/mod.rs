// Application Layer - Use Cases and Business Logic

pub mod allocator;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod expiry;
pub mod feed;
pub mod profile;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use allocator::{ServeOutcome, TicketAllocator};
pub use cancel::{cancel_channel, CancelSender, CancelToken};
pub use config::QueueConfig;
pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use expiry::{ExpiryScheduler, SweepReport};
pub use feed::{
    ChangeFeed, FeedObserver, FeedSubscription, LocationWatch, QueueView, ReservationWatch,
    TicketTracker,
};
pub use profile::ProfileService;
pub use registry::LocationRegistry;

use crate::domain::Identity;
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, IdentityProvider, NotificationTransport, ReplicatedStore, TimeProvider,
};
use std::sync::Arc;

pub(crate) fn require_identity(provider: &dyn IdentityProvider) -> Result<Identity> {
    provider
        .current_identity()
        .ok_or(AppError::NotAuthenticated)
}

/// External collaborators one client needs
#[derive(Clone)]
pub struct QueueDeps {
    pub store: Arc<dyn ReplicatedStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub transport: Arc<dyn NotificationTransport>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
}

/// Every queue use case wired against one set of collaborators
pub struct QueueServices {
    pub registry: Arc<LocationRegistry>,
    pub profile: Arc<ProfileService>,
    pub allocator: Arc<TicketAllocator>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub expiry: Arc<ExpiryScheduler>,
    pub feed: Arc<ChangeFeed>,
    pub config: QueueConfig,
}

impl QueueServices {
    pub fn new(deps: QueueDeps, config: QueueConfig) -> Self {
        let profile = Arc::new(ProfileService::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.identity),
        ));
        let registry = Arc::new(LocationRegistry::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.identity),
            Arc::clone(&deps.id_provider),
            Arc::clone(&deps.time_provider),
            Arc::clone(&profile),
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&profile),
            Arc::clone(&deps.transport),
            config.dispatch_timeout,
        ));
        let allocator = Arc::new(TicketAllocator::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.identity),
            Arc::clone(&deps.time_provider),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            config.clone(),
        ));
        let expiry = Arc::new(ExpiryScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&allocator),
            Arc::clone(&deps.time_provider),
            config.expiry_tick,
        ));
        let feed = Arc::new(ChangeFeed::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.identity),
        ));

        Self {
            registry,
            profile,
            allocator,
            dispatcher,
            expiry,
            feed,
            config,
        }
    }
}
