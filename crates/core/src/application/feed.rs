// Change Feed - live location and reservation snapshots
//
// Every store callback is a complete snapshot of the watched node. Derived
// state (queue position, now serving, ...) is recomputed from the latest
// snapshots only, so duplicated or reordered deliveries converge to the same
// view.

use super::registry::{decode_location, decode_number};
use crate::domain::{layout, Identity, Location, LocationId, TicketNumber};
use crate::error::{AppError, Result};
use crate::port::{IdentityProvider, ReplicatedStore, StoreSubscription};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Live Location snapshots; unsubscribes on drop
pub struct LocationWatch {
    location_id: LocationId,
    sub: StoreSubscription,
    store: Arc<dyn ReplicatedStore>,
}

impl LocationWatch {
    /// Next snapshot; `Some(None)` while the location does not exist,
    /// `None` once the subscription ended
    pub async fn next(&mut self) -> Option<Option<Location>> {
        let snapshot = self.sub.next().await?;
        Some(snapshot.and_then(|v| decode_location(&self.location_id, &v)))
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.store.off(self.sub.id());
    }
}

/// Live snapshots of one holder's reservation; unsubscribes on drop
pub struct ReservationWatch {
    sub: StoreSubscription,
    store: Arc<dyn ReplicatedStore>,
}

impl ReservationWatch {
    pub async fn next(&mut self) -> Option<Option<TicketNumber>> {
        let snapshot = self.sub.next().await?;
        Some(snapshot.as_ref().and_then(decode_number))
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ReservationWatch {
    fn drop(&mut self) {
        self.store.off(self.sub.id());
    }
}

/// Queue state as one holder sees it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueView {
    pub location_id: LocationId,
    pub exists: bool,
    pub name: String,
    /// Last served number
    pub now_serving: TicketNumber,
    pub next_number: TicketNumber,
    pub waiting: usize,
    pub auto_serve_time: u32,
    pub my_number: Option<TicketNumber>,
    /// Unserved entries ahead of mine
    pub my_position: Option<usize>,
    pub my_ticket_served: bool,
}

impl QueueView {
    pub fn compute(
        location_id: &str,
        location: Option<&Location>,
        reservation: Option<TicketNumber>,
        holder: Option<&Identity>,
    ) -> Self {
        let Some(location) = location else {
            return Self {
                location_id: location_id.to_string(),
                my_number: reservation,
                ..Self::default()
            };
        };

        let mine = reservation.filter(|n| match (location.entry(*n), holder) {
            (Some(entry), Some(holder)) => entry.is_held_by(holder),
            // not replicated yet, or tombstoned while the index catches up
            (None, _) => true,
            (Some(_), None) => true,
        });
        let my_entry = mine.and_then(|n| location.entry(n));
        let my_ticket_served = my_entry.is_some_and(|e| e.served);
        let my_position = my_entry
            .filter(|e| e.is_waiting())
            .map(|e| location.waiting_ahead_of(e.number));

        Self {
            location_id: location.id.clone(),
            exists: true,
            name: location.name.clone(),
            now_serving: location.last_served_number,
            next_number: location.current_number,
            waiting: location.waiting_count(),
            auto_serve_time: location.auto_serve_time,
            my_number: mine,
            my_position,
            my_ticket_served,
        }
    }
}

/// Latest snapshots for one holder at one location
pub struct TicketTracker {
    location_id: LocationId,
    holder: Option<Identity>,
    location: Option<Location>,
    reservation: Option<TicketNumber>,
}

impl TicketTracker {
    pub fn new(location_id: impl Into<LocationId>, holder: Option<Identity>) -> Self {
        Self {
            location_id: location_id.into(),
            holder,
            location: None,
            reservation: None,
        }
    }

    pub fn apply_location(&mut self, snapshot: Option<Location>) -> QueueView {
        self.location = snapshot;
        self.view()
    }

    pub fn apply_reservation(&mut self, snapshot: Option<TicketNumber>) -> QueueView {
        self.reservation = snapshot;
        self.view()
    }

    pub fn view(&self) -> QueueView {
        QueueView::compute(
            &self.location_id,
            self.location.as_ref(),
            self.reservation,
            self.holder.as_ref(),
        )
    }
}

/// Receives recomputed views
pub trait FeedObserver: Send + Sync {
    fn on_view(&self, view: QueueView);
}

/// Running observer pump; stops and releases its store watchers on drop
pub struct FeedSubscription {
    task: JoinHandle<()>,
}

impl FeedSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ChangeFeed {
    store: Arc<dyn ReplicatedStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn ReplicatedStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    /// Subscribe to a location's full subtree
    pub async fn watch_location(&self, location_id: &str) -> Result<LocationWatch> {
        let sub = self
            .store
            .on(&layout::location(location_id))
            .await
            .map_err(AppError::from_read)?;
        Ok(LocationWatch {
            location_id: location_id.to_string(),
            sub,
            store: Arc::clone(&self.store),
        })
    }

    pub async fn watch_reservation(
        &self,
        holder: &Identity,
        location_id: &str,
    ) -> Result<ReservationWatch> {
        let sub = self
            .store
            .on(&layout::reservation(holder, location_id))
            .await
            .map_err(AppError::from_read)?;
        Ok(ReservationWatch {
            sub,
            store: Arc::clone(&self.store),
        })
    }

    /// One-shot view for the current identity
    pub async fn current_view(&self, location_id: &str) -> Result<QueueView> {
        let holder = self.identity.current_identity();
        let location = self
            .store
            .once(&layout::location(location_id))
            .await
            .map_err(AppError::from_read)?
            .and_then(|v| decode_location(location_id, &v));
        let reservation = match &holder {
            Some(holder) => self
                .store
                .once(&layout::reservation(holder, location_id))
                .await
                .map_err(AppError::from_read)?
                .as_ref()
                .and_then(decode_number),
            None => None,
        };
        Ok(QueueView::compute(
            location_id,
            location.as_ref(),
            reservation,
            holder.as_ref(),
        ))
    }

    /// Push a recomputed [`QueueView`] to `observer` after every snapshot.
    ///
    /// Uses the identity bound at subscription time; without one only the
    /// location part of the view is tracked. Identical consecutive views are
    /// delivered once.
    pub async fn subscribe(
        &self,
        location_id: &str,
        observer: Arc<dyn FeedObserver>,
    ) -> Result<FeedSubscription> {
        let holder = self.identity.current_identity();
        let mut location = self.watch_location(location_id).await?;
        let mut reservation = match &holder {
            Some(holder) => Some(self.watch_reservation(holder, location_id).await?),
            None => None,
        };

        let mut tracker = TicketTracker::new(location_id, holder);
        let id = location_id.to_string();
        let task = tokio::spawn(async move {
            let mut last: Option<QueueView> = None;
            loop {
                let view = tokio::select! {
                    snapshot = location.next() => match snapshot {
                        Some(snapshot) => tracker.apply_location(snapshot),
                        None => break,
                    },
                    snapshot = next_reservation(&mut reservation) => match snapshot {
                        Some(snapshot) => tracker.apply_reservation(snapshot),
                        None => break,
                    },
                };
                if last.as_ref() != Some(&view) {
                    observer.on_view(view.clone());
                    last = Some(view);
                }
            }
            debug!(location_id = %id, "Feed subscription ended");
        });

        Ok(FeedSubscription { task })
    }
}

async fn next_reservation(
    watch: &mut Option<ReservationWatch>,
) -> Option<Option<TicketNumber>> {
    match watch {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}
