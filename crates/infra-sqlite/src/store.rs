// SQLite ReplicatedStore Implementation
//
// Every leaf of the graph is one row. A put flattens its value into leaf
// writes and applies them in one transaction stamped with a single hybrid
// clock state; each leaf keeps whichever write carries the higher state.

use crate::clock::HybridClock;
use crate::connection::create_pool;
use crate::migration::run_migrations;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use ticketline_core::domain::graph::{assemble, flatten};
use ticketline_core::domain::StorePath;
use ticketline_core::port::{
    ReplicatedStore, StoreError, StoreResult, StoreSubscription, SubscriptionId, TimeProvider,
    WatchRegistry,
};
use tracing::{debug, warn};

// Helper to convert sqlx::Error to StoreError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // SQLite result codes: https://www.sqlite.org/rescode.html
            Some("5") | Some("517") => StoreError::Unavailable(format!(
                "Database locked (SQLITE_BUSY): {}",
                db_err.message()
            )),
            Some("13") => StoreError::Unavailable(format!("Database full: {}", db_err.message())),
            Some(code) => StoreError::Unavailable(format!(
                "Database error [{}]: {}",
                code,
                db_err.message()
            )),
            None => StoreError::Unavailable(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::PoolTimedOut => StoreError::Unavailable("Connection pool timed out".into()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

fn write_rejected(path: &StorePath, err: sqlx::Error) -> StoreError {
    StoreError::WriteRejected {
        path: path.to_string(),
        reason: map_sqlx_error(err).to_string(),
    }
}

/// Bounds of the rows strictly below `path`: `[p/, p0)`
fn descendant_range(path: &StorePath) -> (String, String) {
    let base = path.to_string();
    (format!("{base}/"), format!("{base}0"))
}

pub struct SqliteStore {
    pool: SqlitePool,
    clock: HybridClock,
    watchers: WatchRegistry,
    /// Highest revision already republished to watchers
    last_seen_rev: AtomicI64,
}

impl SqliteStore {
    pub async fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> StoreResult<Self> {
        let rev: i64 = sqlx::query_scalar("SELECT rev FROM graph_revision WHERE id = 1")
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_error)?;
        let max_state: Option<i64> = sqlx::query_scalar("SELECT MAX(state) FROM graph_nodes")
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_error)?;

        let clock = HybridClock::new(time_provider);
        if let Some(state) = max_state {
            clock.observe(state);
        }

        Ok(Self {
            pool,
            clock,
            watchers: WatchRegistry::new(),
            last_seen_rev: AtomicI64::new(rev),
        })
    }

    /// Open (creating if needed) and migrate the database at `database_url`
    pub async fn connect(
        database_url: &str,
        time_provider: Arc<dyn TimeProvider>,
    ) -> StoreResult<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Self::new(pool, time_provider).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let (lower, upper) = descendant_range(path);
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT path, value FROM graph_nodes
            WHERE (path = ? OR (path >= ? AND path < ?)) AND value IS NOT NULL
            "#,
        )
        .bind(path.to_string())
        .bind(&lower)
        .bind(&upper)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut leaves = Vec::with_capacity(rows.len());
        for (raw_path, raw_value) in rows {
            let value = serde_json::from_str(&raw_value).map_err(|e| StoreError::Malformed {
                path: raw_path.clone(),
                reason: e.to_string(),
            })?;
            leaves.push((StorePath::parse(&raw_path), value));
        }
        Ok(assemble(path, leaves))
    }

    /// Re-read and republish every watched node overlapping `changed`
    async fn publish(&self, changed: &[StorePath]) {
        for (id, watched) in self.watchers.affected(changed) {
            match self.read(&watched).await {
                Ok(snapshot) => self.watchers.publish(id, snapshot),
                Err(e) => warn!(path = %watched, error = %e, "Could not refresh subscription"),
            }
        }
    }

    /// Republish rows written since the last poll, including other processes'
    ///
    /// Returns the number of changed rows seen.
    pub async fn poll_changes(&self) -> StoreResult<usize> {
        let since = self.last_seen_rev.load(Ordering::SeqCst);
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT path, state, rev FROM graph_nodes WHERE rev > ? ORDER BY rev",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(max_rev) = rows.iter().map(|(_, _, rev)| *rev).max() else {
            return Ok(0);
        };
        if let Some(max_state) = rows.iter().map(|(_, state, _)| *state).max() {
            self.clock.observe(max_state);
        }
        self.last_seen_rev.fetch_max(max_rev, Ordering::SeqCst);

        let changed: Vec<StorePath> = rows
            .iter()
            .map(|(path, _, _)| StorePath::parse(path))
            .collect();
        self.publish(&changed).await;

        debug!(rows = rows.len(), revision = max_rev, "Store changes polled");
        Ok(rows.len())
    }
}

#[async_trait]
impl ReplicatedStore for SqliteStore {
    async fn put(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let writes = flatten(path, value);
        if writes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(|e| write_rejected(path, e))?;
        let rev: i64 = sqlx::query_scalar(
            "UPDATE graph_revision SET rev = rev + 1 WHERE id = 1 RETURNING rev",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_rejected(path, e))?;

        // a write supersedes everything it can see under its path
        let (lower, upper) = descendant_range(path);
        let seen: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(state) FROM graph_nodes WHERE path = ? OR (path >= ? AND path < ?)",
        )
        .bind(path.to_string())
        .bind(&lower)
        .bind(&upper)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_rejected(path, e))?;
        if let Some(seen) = seen {
            self.clock.observe(seen);
        }
        let state = self.clock.tick();

        for write in &writes {
            if write.clear_descendants {
                let (lower, upper) = descendant_range(&write.path);
                sqlx::query(
                    r#"
                    UPDATE graph_nodes SET value = NULL, state = ?, rev = ?
                    WHERE path >= ? AND path < ? AND state < ?
                    "#,
                )
                .bind(state)
                .bind(rev)
                .bind(&lower)
                .bind(&upper)
                .bind(state)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_rejected(&write.path, e))?;
            }

            let encoded = write.value.as_ref().map(Value::to_string);
            sqlx::query(
                r#"
                INSERT INTO graph_nodes (path, value, state, rev) VALUES (?, ?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    value = excluded.value, state = excluded.state, rev = excluded.rev
                WHERE excluded.state > graph_nodes.state
                   OR (excluded.state = graph_nodes.state
                       AND COALESCE(excluded.value, '') > COALESCE(graph_nodes.value, ''))
                "#,
            )
            .bind(write.path.to_string())
            .bind(&encoded)
            .bind(state)
            .bind(rev)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_rejected(&write.path, e))?;
        }

        tx.commit().await.map_err(|e| write_rejected(path, e))?;

        let changed: Vec<StorePath> = writes.into_iter().map(|w| w.path).collect();
        self.publish(&changed).await;
        Ok(())
    }

    async fn once(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.read(path).await
    }

    async fn on(&self, path: &StorePath) -> StoreResult<StoreSubscription> {
        let initial = self.read(path).await?;
        Ok(self.watchers.register(path.clone(), initial))
    }

    fn off(&self, id: SubscriptionId) {
        self.watchers.unregister(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_url;
    use serde_json::json;
    use std::path::PathBuf;
    use ticketline_core::port::time_provider::mocks::ManualClock;
    use ticketline_core::port::SystemTimeProvider;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("ticketline-{}.db", uuid::Uuid::new_v4()))
    }

    async fn open(path: &PathBuf) -> SqliteStore {
        SqliteStore::connect(&database_url(path), Arc::new(SystemTimeProvider))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_merge_and_once() {
        let path = temp_db();
        let store = open(&path).await;
        let node = StorePath::parse("locations/data/loc");

        store
            .put(&node, json!({"name": "Bakery", "currentNumber": 1}))
            .await
            .unwrap();
        store
            .put(&node.child("currentNumber"), json!(2))
            .await
            .unwrap();

        assert_eq!(
            store.once(&node).await.unwrap(),
            Some(json!({"name": "Bakery", "currentNumber": 2}))
        );
        assert_eq!(
            store.once(&node.child("name")).await.unwrap(),
            Some(json!("Bakery"))
        );
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_null_tombstones_descendants() {
        let path = temp_db();
        let store = open(&path).await;
        let entry = StorePath::parse("loc/queue/1");

        store
            .put(&entry, json!({"number": 1, "userId": "alice"}))
            .await
            .unwrap();
        store.put(&entry, Value::Null).await.unwrap();
        assert_eq!(store.once(&entry).await.unwrap(), None);

        // a later write at the same path revives it
        store
            .put(&entry, json!({"number": 1, "userId": "bob"}))
            .await
            .unwrap();
        assert_eq!(
            store.once(&entry).await.unwrap(),
            Some(json!({"number": 1, "userId": "bob"}))
        );
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_prefix_sibling_is_not_a_descendant() {
        let path = temp_db();
        let store = open(&path).await;

        store
            .put(&StorePath::parse("loc/queue/1"), json!(1))
            .await
            .unwrap();
        store
            .put(&StorePath::parse("loc/queue/10"), json!(10))
            .await
            .unwrap();
        store
            .put(&StorePath::parse("loc/queue/1"), Value::Null)
            .await
            .unwrap();

        assert_eq!(
            store.once(&StorePath::parse("loc/queue")).await.unwrap(),
            Some(json!({"10": 10}))
        );
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_overwrite_wins_despite_lagging_clock() {
        let path = temp_db();
        let late = Arc::new(ManualClock::at(2_000));
        let early = Arc::new(ManualClock::at(1_000));
        let url = database_url(&path);
        let a = SqliteStore::connect(&url, late).await.unwrap();
        let b = SqliteStore::connect(&url, early).await.unwrap();
        let leaf = StorePath::parse("loc/name");

        a.put(&leaf, json!("from a")).await.unwrap();
        // b's wall clock is behind, but the write sees a's state first
        b.put(&leaf, json!("from b")).await.unwrap();
        assert_eq!(a.once(&leaf).await.unwrap(), Some(json!("from b")));

        let state: i64 = sqlx::query_scalar("SELECT state FROM graph_nodes WHERE path = ?")
            .bind("loc/name")
            .fetch_one(a.pool())
            .await
            .unwrap();
        assert!(state > 2_000_000);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_local_put_notifies_subscriber() {
        let path = temp_db();
        let store = open(&path).await;
        let node = StorePath::parse("loc");

        let mut sub = store.on(&node).await.unwrap();
        assert_eq!(sub.next().await, Some(None));

        store.put(&node.child("name"), json!("Deli")).await.unwrap();
        assert_eq!(sub.next().await, Some(Some(json!({"name": "Deli"}))));

        store.off(sub.id());
        assert_eq!(sub.next().await, None);
        assert_eq!(store.watcher_count(), 0);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_poll_delivers_other_process_writes() {
        let path = temp_db();
        let writer = open(&path).await;
        let reader = open(&path).await;
        let node = StorePath::parse("loc/currentNumber");

        let mut sub = reader.on(&node).await.unwrap();
        assert_eq!(sub.next().await, Some(None));

        writer.put(&node, json!(7)).await.unwrap();
        assert_eq!(reader.poll_changes().await.unwrap(), 1);
        assert_eq!(sub.next().await, Some(Some(json!(7))));

        // nothing new
        assert_eq!(reader.poll_changes().await.unwrap(), 0);
        let _ = std::fs::remove_file(path);
    }
}
