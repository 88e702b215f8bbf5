// Expiry Scheduler
//
// One periodic sweep per location that promotes waiting entries older than
// the location's auto-serve threshold to served. Timers live in a registry
// keyed by location id with an explicit start/stop lifecycle.

use super::allocator::{ServeOutcome, TicketAllocator};
use super::cancel::{cancel_channel, CancelSender};
use super::registry::LocationRegistry;
use crate::domain::{LocationId, TicketNumber};
use crate::error::{AppError, Result};
use crate::port::TimeProvider;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of one sweep over a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepReport {
    /// A sweep for the same location was still running
    Skipped,
    /// Auto-serve is switched off for the location
    Disabled,
    Completed {
        served: Vec<TicketNumber>,
        failed: Vec<TicketNumber>,
    },
}

struct Timer {
    cancel: CancelSender,
    task: JoinHandle<()>,
}

pub struct ExpiryScheduler {
    registry: Arc<LocationRegistry>,
    allocator: Arc<TicketAllocator>,
    time_provider: Arc<dyn TimeProvider>,
    period: Duration,
    timers: Mutex<HashMap<LocationId, Timer>>,
    in_flight: Mutex<HashSet<LocationId>>,
}

impl ExpiryScheduler {
    pub fn new(
        registry: Arc<LocationRegistry>,
        allocator: Arc<TicketAllocator>,
        time_provider: Arc<dyn TimeProvider>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            allocator,
            time_provider,
            period,
            timers: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Start the periodic sweep for a location managed by the current identity.
    ///
    /// Starting an already running timer is a no-op.
    pub async fn start(self: &Arc<Self>, location_id: &str) -> Result<()> {
        let (_, location) = self.registry.require_manager(location_id).await?;
        if !location.auto_serve_enabled() {
            return Err(AppError::Validation(
                "Auto-serve is not enabled for this location".to_string(),
            ));
        }

        let mut timers = self.timers();
        if timers.get(location_id).is_some_and(|t| !t.task.is_finished()) {
            return Ok(());
        }

        let (cancel, token) = cancel_channel();
        let scheduler = Arc::downgrade(self);
        let id = location_id.to_string();
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(scheduler) = Weak::upgrade(&scheduler) else {
                            break;
                        };
                        scheduler.run_tick(&id).await;
                    }
                }
            }
            debug!(location_id = %id, "Expiry timer stopped");
        });

        timers.insert(location_id.to_string(), Timer { cancel, task });
        info!(
            location_id,
            period_secs = period.as_secs(),
            auto_serve_time = location.auto_serve_time,
            "Expiry timer started"
        );
        Ok(())
    }

    /// Stop a location's timer; a sweep already running finishes first
    pub fn stop(&self, location_id: &str) -> bool {
        let Some(timer) = self.timers().remove(location_id) else {
            return false;
        };
        timer.cancel.cancel();
        info!(location_id, "Expiry timer stop requested");
        true
    }

    pub fn stop_all(&self) {
        let drained: Vec<(LocationId, Timer)> = self.timers().drain().collect();
        for (_, timer) in &drained {
            timer.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "All expiry timers stopped");
        }
    }

    pub fn is_running(&self, location_id: &str) -> bool {
        self.timers()
            .get(location_id)
            .is_some_and(|t| !t.task.is_finished())
    }

    pub fn running(&self) -> Vec<LocationId> {
        let mut ids: Vec<LocationId> = self
            .timers()
            .iter()
            .filter(|(_, t)| !t.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Serve every expired entry of a location once.
    ///
    /// The location is re-read on every sweep, so a changed auto-serve setting
    /// applies from the next sweep on. At most one sweep per location runs at
    /// a time; an overlapping call returns [`SweepReport::Skipped`].
    pub async fn sweep(&self, location_id: &str) -> Result<SweepReport> {
        let Some(_guard) = InFlight::acquire(&self.in_flight, location_id) else {
            debug!(location_id, "Previous sweep still running, skipping");
            return Ok(SweepReport::Skipped);
        };

        let (_, location) = self.registry.require_manager(location_id).await?;
        if !location.auto_serve_enabled() {
            return Ok(SweepReport::Disabled);
        }

        let now = self.time_provider.now_millis();
        let mut served = Vec::new();
        let mut failed = Vec::new();
        for number in location.expired_entries(now) {
            match self.allocator.serve(location_id, number).await {
                Ok(ServeOutcome::Served { .. }) => served.push(number),
                Ok(ServeOutcome::AlreadyServed) => {}
                // relinquished since the snapshot
                Err(AppError::NotFound(_)) => {}
                Err(e) => {
                    warn!(location_id, number, error = %e, "Auto-serve failed");
                    failed.push(number);
                }
            }
        }

        if !served.is_empty() {
            info!(location_id, served = ?served, "Expired tickets auto-served");
        }
        Ok(SweepReport::Completed { served, failed })
    }

    async fn run_tick(&self, location_id: &str) {
        match self.sweep(location_id).await {
            Ok(report) => debug!(location_id, ?report, "Expiry tick"),
            Err(e) => error!(location_id, error = %e, "Expiry tick failed"),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<LocationId, Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Marks a location as being swept until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<LocationId>>,
    location_id: LocationId,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<LocationId>>, location_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location_id.to_string());
        inserted.then(|| Self {
            set,
            location_id: location_id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.location_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::Harness;

    #[tokio::test]
    async fn test_sweep_serves_only_expired_entries() {
        let h = Harness::new();
        let id = h.location_managed_by("manager", 5).await;
        h.take_as("old", &id).await;
        h.clock.advance_minutes(3);
        h.take_as("young", &id).await;
        h.clock.advance_minutes(2);

        h.act_as("manager");
        let report = h.services.expiry.sweep(&id).await.unwrap();
        assert_eq!(
            report,
            SweepReport::Completed {
                served: vec![1],
                failed: vec![]
            }
        );
        let location = h.services.registry.get_location(&id).await.unwrap();
        assert!(location.entry(1).unwrap().served);
        assert!(!location.entry(2).unwrap().served);
        assert_eq!(location.last_served_number, 1);
    }

    #[tokio::test]
    async fn test_repeated_sweeps_never_unserve() {
        let h = Harness::new();
        let id = h.location_managed_by("manager", 1).await;
        h.take_as("alice", &id).await;
        h.clock.advance_minutes(1);

        h.act_as("manager");
        h.services.expiry.sweep(&id).await.unwrap();
        let first = h.services.registry.entry(&id, 1).await.unwrap().unwrap();

        for _ in 0..3 {
            h.clock.advance_minutes(10);
            let report = h.services.expiry.sweep(&id).await.unwrap();
            assert_eq!(
                report,
                SweepReport::Completed {
                    served: vec![],
                    failed: vec![]
                }
            );
        }

        let later = h.services.registry.entry(&id, 1).await.unwrap().unwrap();
        assert!(later.served);
        assert_eq!(later.served_at, first.served_at);
    }

    #[tokio::test]
    async fn test_sweep_rereads_setting() {
        let h = Harness::new();
        let id = h.location_managed_by("manager", 30).await;
        h.take_as("alice", &id).await;
        h.clock.advance_minutes(10);

        h.act_as("manager");
        let report = h.services.expiry.sweep(&id).await.unwrap();
        assert!(matches!(report, SweepReport::Completed { ref served, .. } if served.is_empty()));

        h.services.registry.update_auto_serve_time(&id, 5).await.unwrap();
        let report = h.services.expiry.sweep(&id).await.unwrap();
        assert!(matches!(report, SweepReport::Completed { ref served, .. } if served == &vec![1]));

        h.services.registry.update_auto_serve_time(&id, 0).await.unwrap();
        assert_eq!(
            h.services.expiry.sweep(&id).await.unwrap(),
            SweepReport::Disabled
        );
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let h = Harness::new();
        let id = h.location_managed_by("manager", 5).await;

        let _held = InFlight::acquire(&h.services.expiry.in_flight, &id).unwrap();
        assert_eq!(
            h.services.expiry.sweep(&id).await.unwrap(),
            SweepReport::Skipped
        );
        drop(_held);
        assert_ne!(
            h.services.expiry.sweep(&id).await.unwrap(),
            SweepReport::Skipped
        );
    }

    #[tokio::test]
    async fn test_start_requires_auto_serve_and_manager() {
        let h = Harness::new();
        let disabled = h.location_managed_by("manager", 0).await;
        let err = h.services.expiry.start(&disabled).await.unwrap_err();
        assert_eq!(
            err,
            AppError::Validation("Auto-serve is not enabled for this location".to_string())
        );

        let enabled = h.location_managed_by("manager", 5).await;
        h.act_as("someone");
        assert!(matches!(
            h.services.expiry.start(&enabled).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(!h.services.expiry.is_running(&enabled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_sweeps_each_period_until_stopped() {
        let h = Harness::new();
        let id = h.location_managed_by("manager", 1).await;
        h.take_as("alice", &id).await;
        h.act_as("manager");

        h.services.expiry.start(&id).await.unwrap();
        h.services.expiry.start(&id).await.unwrap();
        assert_eq!(h.services.expiry.running(), vec![id.clone()]);

        h.clock.advance_minutes(2);
        tokio::time::sleep(h.services.config.expiry_tick + Duration::from_secs(1)).await;
        assert!(h.services.registry.entry(&id, 1).await.unwrap().unwrap().served);

        assert!(h.services.expiry.stop(&id));
        assert!(!h.services.expiry.stop(&id));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!h.services.expiry.is_running(&id));
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let h = Harness::new();
        let a = h.location_managed_by("manager", 5).await;
        let b = h.location_managed_by("manager", 5).await;
        h.services.expiry.start(&a).await.unwrap();
        h.services.expiry.start(&b).await.unwrap();
        assert_eq!(h.services.expiry.running().len(), 2);

        h.services.expiry.stop_all();
        assert!(h.services.expiry.running().is_empty());
    }
}
