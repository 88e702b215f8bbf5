// Replicated Store Port (Interface)
//
// Eventually-consistent key/value graph. Every put is acknowledged on its own;
// there is no multi-path transaction. Concurrent writes to one leaf resolve by
// last-write-wins.

use crate::domain::StorePath;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

/// Store-level errors (never exposed past the application boundary)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("write rejected at {path}: {reason}")]
    WriteRejected { path: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed value at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type SubscriptionId = u64;

/// Live subscription to one node.
///
/// The first [`next`](Self::next) yields the snapshot at subscription time;
/// later calls yield the full node after each converged mutation. Snapshots
/// may coalesce, so consumers must treat each one as complete state. Ends
/// once the store drops the watcher (see [`ReplicatedStore::off`]).
pub struct StoreSubscription {
    id: SubscriptionId,
    path: StorePath,
    rx: watch::Receiver<Option<Value>>,
    primed: bool,
}

impl StoreSubscription {
    pub fn new(id: SubscriptionId, path: StorePath, rx: watch::Receiver<Option<Value>>) -> Self {
        Self {
            id,
            path,
            rx,
            primed: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Wait for the next snapshot (`None` once unsubscribed)
    pub async fn next(&mut self) -> Option<Option<Value>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Replicated key/value graph
#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    /// Write `value` at `path`; returns once the write is acknowledged
    async fn put(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// One-shot read of the node at `path`
    async fn once(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    /// Live subscription to the node at `path` and everything below it
    async fn on(&self, path: &StorePath) -> StoreResult<StoreSubscription>;

    /// Drop a subscription; unknown ids are ignored
    fn off(&self, id: SubscriptionId);
}

/// Chainable reference to a node (`store.get("a").get("b")`)
#[derive(Clone)]
pub struct NodeRef {
    store: Arc<dyn ReplicatedStore>,
    path: StorePath,
}

impl NodeRef {
    pub fn get(&self, segment: impl ToString) -> NodeRef {
        NodeRef {
            store: Arc::clone(&self.store),
            path: self.path.child(segment),
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub async fn put(&self, value: Value) -> StoreResult<()> {
        self.store.put(&self.path, value).await
    }

    pub async fn once(&self) -> StoreResult<Option<Value>> {
        self.store.once(&self.path).await
    }

    pub async fn on(&self) -> StoreResult<StoreSubscription> {
        self.store.on(&self.path).await
    }
}

/// Entry point for building node references from a shared store
pub trait StoreExt {
    fn get(&self, segment: impl ToString) -> NodeRef;
    fn node(&self, path: StorePath) -> NodeRef;
}

impl StoreExt for Arc<dyn ReplicatedStore> {
    fn get(&self, segment: impl ToString) -> NodeRef {
        self.node(StorePath::root(segment.to_string()))
    }

    fn node(&self, path: StorePath) -> NodeRef {
        NodeRef {
            store: Arc::clone(self),
            path,
        }
    }
}

// ============================================================================
// Watcher fan-out shared by adapters
// ============================================================================

struct Watcher {
    path: StorePath,
    tx: watch::Sender<Option<Value>>,
}

/// Registry of live subscriptions.
///
/// Adapters register watchers on `on`, ask which watchers a set of changed
/// paths touches, re-read those nodes and publish the new snapshots.
#[derive(Default)]
pub struct WatchRegistry {
    watchers: Mutex<HashMap<SubscriptionId, Watcher>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: StorePath, initial: Option<Value>) -> StoreSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(initial);
        self.lock().insert(
            id,
            Watcher {
                path: path.clone(),
                tx,
            },
        );
        StoreSubscription::new(id, path, rx)
    }

    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Watchers whose node overlaps any of `changed`
    pub fn affected(&self, changed: &[StorePath]) -> Vec<(SubscriptionId, StorePath)> {
        let mut watchers = self.lock();
        // subscriptions whose receiver was dropped without `off`
        watchers.retain(|_, w| !w.tx.is_closed());
        watchers
            .iter()
            .filter(|(_, w)| changed.iter().any(|p| p.overlaps(&w.path)))
            .map(|(id, w)| (*id, w.path.clone()))
            .collect()
    }

    /// Publish a snapshot; identical snapshots are not re-delivered
    pub fn publish(&self, id: SubscriptionId, snapshot: Option<Value>) {
        if let Some(watcher) = self.lock().get(&id) {
            watcher.tx.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Watcher>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::graph::{assemble, flatten};
    use std::collections::BTreeMap;

    struct FailureRule {
        prefix: StorePath,
        remaining: usize,
    }

    struct HoldRule {
        prefix: StorePath,
        remaining: usize,
        gate: Arc<PutHold>,
    }

    /// Parks matching puts until released
    #[derive(Default)]
    pub struct PutHold {
        reached: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl PutHold {
        /// Resolves once a held put is parked
        pub async fn reached(&self) {
            self.reached.notified().await;
        }

        pub fn release(&self) {
            self.release.notify_one();
        }
    }

    /// In-memory store with arrival-order last-write-wins.
    ///
    /// `with_yield` makes every operation yield to the scheduler first, so
    /// concurrent callers interleave step by step.
    #[derive(Default)]
    pub struct InMemoryStore {
        cells: Mutex<BTreeMap<StorePath, Option<Value>>>,
        watchers: WatchRegistry,
        failures: Mutex<Vec<FailureRule>>,
        holds: Mutex<Vec<HoldRule>>,
        puts: AtomicU64,
        yield_between_ops: bool,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_yield() -> Self {
            Self {
                yield_between_ops: true,
                ..Self::default()
            }
        }

        /// Reject the next `times` puts at or below `prefix`
        pub fn fail_puts_under(&self, prefix: StorePath, times: usize) {
            self.failures.lock().unwrap().push(FailureRule {
                prefix,
                remaining: times,
            });
        }

        /// Park the next `times` puts at or below `prefix` until the
        /// returned hold is released
        pub fn hold_puts_under(&self, prefix: StorePath, times: usize) -> Arc<PutHold> {
            let gate = Arc::new(PutHold::default());
            self.holds.lock().unwrap().push(HoldRule {
                prefix,
                remaining: times,
                gate: gate.clone(),
            });
            gate
        }

        /// Acknowledged puts so far
        pub fn put_count(&self) -> u64 {
            self.puts.load(Ordering::SeqCst)
        }

        pub fn watcher_count(&self) -> usize {
            self.watchers.len()
        }

        fn should_fail(&self, path: &StorePath) -> bool {
            let mut rules = self.failures.lock().unwrap();
            let hit = rules
                .iter_mut()
                .find(|r| r.remaining > 0 && r.prefix.contains(path));
            match hit {
                Some(rule) => {
                    rule.remaining -= 1;
                    true
                }
                None => false,
            }
        }

        fn take_hold(&self, path: &StorePath) -> Option<Arc<PutHold>> {
            let mut rules = self.holds.lock().unwrap();
            let rule = rules
                .iter_mut()
                .find(|r| r.remaining > 0 && r.prefix.contains(path))?;
            rule.remaining -= 1;
            Some(rule.gate.clone())
        }

        fn read(&self, path: &StorePath) -> Option<Value> {
            let cells = self.cells.lock().unwrap();
            let leaves = cells
                .range(path.clone()..)
                .take_while(|(p, _)| path.contains(p))
                .filter_map(|(p, v)| v.clone().map(|v| (p.clone(), v)));
            assemble(path, leaves)
        }

        async fn pace(&self) {
            if self.yield_between_ops {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl ReplicatedStore for InMemoryStore {
        async fn put(&self, path: &StorePath, value: Value) -> StoreResult<()> {
            self.pace().await;
            if let Some(gate) = self.take_hold(path) {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
            if self.should_fail(path) {
                return Err(StoreError::WriteRejected {
                    path: path.to_string(),
                    reason: "injected failure".to_string(),
                });
            }

            let writes = flatten(path, value);
            let changed: Vec<StorePath> = writes.iter().map(|w| w.path.clone()).collect();
            {
                let mut cells = self.cells.lock().unwrap();
                for write in writes {
                    if write.clear_descendants {
                        let below: Vec<StorePath> = cells
                            .range(write.path.clone()..)
                            .take_while(|(p, _)| write.path.contains(p))
                            .filter(|(p, _)| **p != write.path)
                            .map(|(p, _)| p.clone())
                            .collect();
                        for p in below {
                            cells.insert(p, None);
                        }
                    }
                    cells.insert(write.path, write.value);
                }
            }
            self.puts.fetch_add(1, Ordering::SeqCst);

            for (id, watched) in self.watchers.affected(&changed) {
                self.watchers.publish(id, self.read(&watched));
            }
            Ok(())
        }

        async fn once(&self, path: &StorePath) -> StoreResult<Option<Value>> {
            self.pace().await;
            Ok(self.read(path))
        }

        async fn on(&self, path: &StorePath) -> StoreResult<StoreSubscription> {
            Ok(self.watchers.register(path.clone(), self.read(path)))
        }

        fn off(&self, id: SubscriptionId) {
            self.watchers.unregister(id);
        }
    }
}
