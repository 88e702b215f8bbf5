// Migration Runner

use crate::store::map_sqlx_error;
use sqlx::SqlitePool;
use ticketline_core::port::StoreResult;
use tracing::info;

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?
            .unwrap_or(0)
    } else {
        0
    };

    if current_version < 1 {
        info!("Applying migration 001: graph nodes");
        apply_migration(pool, include_str!("../migrations/001_graph_nodes.sql")).await?;
    }

    info!(schema_version = 1, "Store schema ready");
    Ok(())
}

/// Apply one migration file inside a transaction
async fn apply_migration(pool: &SqlitePool, sql: &str) -> StoreResult<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
    }

    tx.commit().await.map_err(map_sqlx_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, database_url};

    #[tokio::test]
    async fn test_run_migrations_twice() {
        let path = std::env::temp_dir().join(format!("ticketline-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&database_url(&path)).await.unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let rev: i64 = sqlx::query_scalar("SELECT rev FROM graph_revision WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rev, 0);
        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(versions, 1);

        pool.close().await;
        let _ = std::fs::remove_file(path);
    }
}
