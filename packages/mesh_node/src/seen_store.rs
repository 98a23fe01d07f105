//! SQLite-backed [`SeenStore`], so a restarted node keeps dropping replays
//! it has already routed.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use mesh_core::{MeshError, SeenStore};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

#[derive(Clone)]
pub struct SqliteSeenStore {
    pool: SqlitePool,
}

impl SqliteSeenStore {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        Self::connect(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        info!("Opening seen store: {}", url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(url)
            .await
            .with_context(|| format!("Failed to connect to database: {}", url))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private database; lives as long as the single pooled connection.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn len(&self) -> anyhow::Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seen (
            id TEXT PRIMARY KEY NOT NULL,
            first_seen INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create seen table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_seen_first_seen ON seen(first_seen)")
        .execute(pool)
        .await
        .context("Failed to create seen index")?;

    Ok(())
}

fn store_err(e: sqlx::Error) -> MeshError {
    MeshError::Store(e.to_string())
}

#[async_trait]
impl SeenStore for SqliteSeenStore {
    async fn load(&self) -> mesh_core::Result<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT id, first_seen FROM seen")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, ts)| (id, ts.max(0) as u64))
            .collect())
    }

    async fn save(&self, id: &str, first_seen: u64) -> mesh_core::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO seen (id, first_seen) VALUES (?, ?)")
            .bind(id)
            .bind(first_seen as i64)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn prune(&self, expire_before: u64) -> mesh_core::Result<()> {
        sqlx::query("DELETE FROM seen WHERE first_seen < ?")
            .bind(expire_before as i64)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::{Disposition, MeshRouter, Message};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn save_keeps_first_timestamp() {
        let store = SqliteSeenStore::in_memory().await.unwrap();
        store.save("a", 10).await.unwrap();
        store.save("a", 20).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded["a"], 10);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_drops_entries_before_cutoff() {
        let store = SqliteSeenStore::in_memory().await.unwrap();
        store.save("old", 10).await.unwrap();
        store.save("edge", 50).await.unwrap();
        store.save("new", 100).await.unwrap();
        store.prune(50).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert!(!loaded.contains_key("old"));
        assert!(loaded.contains_key("edge"));
        assert!(loaded.contains_key("new"));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("seen.db");
        {
            let store = SqliteSeenStore::open(&path).await.unwrap();
            store.save("persisted", 42).await.unwrap();
        }
        let store = SqliteSeenStore::open(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap().get("persisted"), Some(&42));
    }

    #[tokio::test]
    async fn restored_router_drops_replay() {
        let store = Arc::new(SqliteSeenStore::in_memory().await.unwrap());
        let first = MeshRouter::builder("A").store(store.clone()).build();
        let mut msg = Message::chat(1, "hi");
        msg.id = "replayed".into();
        assert!(matches!(first.ingress(msg.clone()), Disposition::Routed { .. }));

        // Save is fire-and-forget; give it a moment to land.
        for _ in 0..50 {
            if store.len().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let second = MeshRouter::builder("A").store(store).build();
        assert_eq!(second.restore().await.unwrap(), 1);
        assert_eq!(second.ingress(msg), Disposition::Duplicate);
    }
}
