// Caller-side cancellation token

use std::time::Duration;
use tokio::sync::watch;

/// Signal that a caller stopped waiting for an operation.
///
/// Cancelling never interrupts a saga; the operation finishes its writes and
/// compensations on its own task and the caller is told the outcome is
/// indeterminate.
#[derive(Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Token cancelled once `after` has elapsed (needs a tokio runtime)
    pub fn cancel_after(after: Duration) -> Self {
        let (sender, token) = cancel_channel();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sender.cancel();
        });
        token
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancelled; stays pending if the sender is gone
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

pub struct CancelSender {
    tx: watch::Sender<bool>,
}

impl CancelSender {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancel_channel() -> (CancelSender, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSender { tx }, CancelToken { rx: Some(rx) })
}
