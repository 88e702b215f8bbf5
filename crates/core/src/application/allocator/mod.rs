// Ticket Allocator - take / relinquish / serve transitions
//
// No transition is atomic in the store. Each one is a saga of individually
// acknowledged writes with compensations for the writes already made, and
// take verifies its claim by re-reading before declaring success.

mod relinquish;
mod serve;
mod take;

#[cfg(test)]
mod allocator_test;

pub use serve::ServeOutcome;

use super::cancel::CancelToken;
use super::config::QueueConfig;
use super::dispatcher::NotificationDispatcher;
use super::registry::LocationRegistry;
use crate::domain::{Identity, TicketNumber};
use crate::error::{AppError, Result};
use crate::port::{IdentityProvider, ReplicatedStore, TimeProvider};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

pub struct TicketAllocator {
    store: Arc<dyn ReplicatedStore>,
    identity: Arc<dyn IdentityProvider>,
    time_provider: Arc<dyn TimeProvider>,
    registry: Arc<LocationRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    config: QueueConfig,
}

impl TicketAllocator {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        identity: Arc<dyn IdentityProvider>,
        time_provider: Arc<dyn TimeProvider>,
        registry: Arc<LocationRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            identity,
            time_provider,
            registry,
            dispatcher,
            config,
        }
    }

    /// Claim the next number at `location_id` for the current identity
    pub async fn take_number(&self, location_id: &str) -> Result<TicketNumber> {
        let holder = self.current_identity()?;
        take::execute(self, location_id, &holder).await
    }

    /// Give up the current identity's ticket; `None` when it held none
    pub async fn relinquish_number(&self, location_id: &str) -> Result<Option<TicketNumber>> {
        let holder = self.current_identity()?;
        relinquish::execute(self, location_id, &holder).await
    }

    /// Mark `number` served (manager only) and notify the next holder
    pub async fn mark_served(&self, location_id: &str, number: TicketNumber) -> Result<ServeOutcome> {
        self.registry.require_manager(location_id).await?;
        self.serve(location_id, number).await
    }

    /// Serve without the manager check; callers have already done it
    pub(crate) async fn serve(&self, location_id: &str, number: TicketNumber) -> Result<ServeOutcome> {
        serve::execute(self, location_id, number).await
    }

    /// [`take_number`](Self::take_number) that stops waiting when `cancel` fires.
    ///
    /// The saga keeps running on its own task; an abandoned call reports
    /// `Indeterminate` and the caller re-queries its reservation.
    pub async fn take_number_until(
        self: &Arc<Self>,
        location_id: &str,
        cancel: CancelToken,
    ) -> Result<TicketNumber> {
        let this = Arc::clone(self);
        let id = location_id.to_string();
        detach_until(
            "take",
            location_id,
            cancel,
            async move { this.take_number(&id).await },
        )
        .await
    }

    pub async fn relinquish_number_until(
        self: &Arc<Self>,
        location_id: &str,
        cancel: CancelToken,
    ) -> Result<Option<TicketNumber>> {
        let this = Arc::clone(self);
        let id = location_id.to_string();
        detach_until(
            "relinquish",
            location_id,
            cancel,
            async move { this.relinquish_number(&id).await },
        )
        .await
    }

    fn current_identity(&self) -> Result<Identity> {
        super::require_identity(self.identity.as_ref())
    }
}

async fn detach_until<T, F>(
    operation: &'static str,
    location_id: &str,
    cancel: CancelToken,
    saga: F,
) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let mut task = tokio::spawn(saga);
    tokio::select! {
        joined = &mut task => {
            joined.map_err(|e| AppError::Internal(format!("{operation} task failed: {e}")))?
        }
        _ = cancel.cancelled() => {
            warn!(location_id, operation, "Caller abandoned operation, saga continues in background");
            Err(AppError::Indeterminate(format!(
                "{operation} at location {location_id} was abandoned before acknowledgement"
            )))
        }
    }
}
