// Notification Dispatcher
//
// After a serve, tells the holder of the following number that their turn is
// close. Delivery is best effort: every failure ends up as an outcome value
// and is logged, never propagated to the serve that triggered it.

use super::profile::ProfileService;
use super::registry::LocationRegistry;
use crate::domain::TicketNumber;
use crate::port::{NotificationTransport, PushMessage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum DispatchOutcome {
    NoNextEntry,
    NextAlreadyServed,
    NoEndpoint,
    Delivered,
    Failed(String),
    TimedOut,
}

impl DispatchOutcome {
    /// True when the transport was actually invoked
    pub fn attempted(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Delivered | DispatchOutcome::Failed(_) | DispatchOutcome::TimedOut
        )
    }
}

pub struct NotificationDispatcher {
    registry: Arc<LocationRegistry>,
    profile: Arc<ProfileService>,
    transport: Arc<dyn NotificationTransport>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<LocationRegistry>,
        profile: Arc<ProfileService>,
        transport: Arc<dyn NotificationTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            profile,
            transport,
            timeout,
        }
    }

    /// Notify the holder of `just_served + 1`, if waiting and reachable
    pub async fn notify(&self, location_id: &str, just_served: TicketNumber) -> DispatchOutcome {
        let Some(next) = just_served.checked_add(1) else {
            return DispatchOutcome::NoNextEntry;
        };

        let entry = match self.registry.entry(location_id, next).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return DispatchOutcome::NoNextEntry,
            Err(e) => {
                warn!(location_id, number = next, error = %e, "Could not read next entry");
                return DispatchOutcome::Failed(e.to_string());
            }
        };
        if entry.served {
            return DispatchOutcome::NextAlreadyServed;
        }

        let endpoint = match self.profile.endpoint_of(&entry.holder).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                debug!(location_id, number = next, "Next holder has no endpoint");
                return DispatchOutcome::NoEndpoint;
            }
            Err(e) => {
                warn!(location_id, number = next, error = %e, "Could not read endpoint");
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        let message = PushMessage::almost_your_turn(just_served);
        match tokio::time::timeout(self.timeout, self.transport.deliver(&endpoint, &message)).await
        {
            Ok(Ok(())) => {
                info!(
                    location_id,
                    number = next,
                    holder = entry.holder.short(),
                    "Next holder notified"
                );
                DispatchOutcome::Delivered
            }
            Ok(Err(e)) => {
                warn!(location_id, number = next, error = %e, "Notification delivery failed");
                DispatchOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    location_id,
                    number = next,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Notification delivery timed out"
                );
                DispatchOutcome::TimedOut
            }
        }
    }
}
