// Change poller - cross-process subscription delivery

use crate::store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use ticketline_core::application::CancelToken;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

impl SqliteStore {
    /// Poll for rows written by other processes every `every` until `cancel`.
    ///
    /// Local puts notify watchers directly; the poller is what makes another
    /// client's writes show up in this process's subscriptions.
    pub fn spawn_change_poller(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = every.as_millis() as u64, "Store change poller started");
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = store.poll_changes().await {
                            warn!(error = %e, "Store change poll failed");
                        }
                    }
                }
            }
            info!("Store change poller stopped");
        })
    }
}
