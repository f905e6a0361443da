use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

use watering_schedule::MemoryStore;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/plant-care/plant-care.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to ":memory:" opens its own empty database.
        let in_memory = db_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Key-value records
    // ----------------------------

    pub async fn load_all(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM kv ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("load_all failed")?;
        Ok(rows)
    }

    /// Everything persisted so far, as the in-memory store the planner works on.
    pub async fn load_store(&self) -> Result<MemoryStore> {
        Ok(MemoryStore::from_entries(self.load_all().await?))
    }

    #[cfg(test)]
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("get failed key={key}"))?;
        Ok(row.map(|(v,)| v))
    }

    /// Write a batch of changes in one transaction: `Some` upserts, `None`
    /// deletes.
    pub async fn persist(&self, changes: &[(String, Option<String>)]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let mut tx = self.pool.begin().await.context("persist: begin failed")?;
        for (key, value) in changes {
            match value {
                Some(v) => {
                    sqlx::query(
                        r#"
                        INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
                        ON CONFLICT(key) DO UPDATE SET
                          value=excluded.value,
                          updated_at=excluded.updated_at
                        "#,
                    )
                    .bind(key)
                    .bind(v)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("upsert failed key={key}"))?;
                }
                None => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("delete failed key={key}"))?;
                }
            }
        }
        tx.commit().await.context("persist: commit failed")?;

        tracing::debug!(changes = changes.len(), "records persisted");
        Ok(())
    }

    /// Flush whatever the store changed since the last flush. On failure the
    /// keys stay dirty and go out with the next flush.
    pub async fn persist_dirty(&self, store: &mut MemoryStore) -> Result<()> {
        let changes = store.drain_dirty();
        if let Err(e) = self.persist(&changes).await {
            tracing::warn!(changes = changes.len(), "flush failed, keeping records dirty");
            store.mark_dirty(changes.into_iter().map(|(key, _)| key));
            return Err(e);
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use watering_schedule::KeyValueStore;

    async fn memory_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn persist_upserts_and_deletes() {
        let db = memory_db().await;

        db.persist(&[
            ("a".into(), Some("1".into())),
            ("b".into(), Some("2".into())),
        ])
        .await
        .unwrap();
        db.persist(&[("a".into(), Some("10".into())), ("b".into(), None)])
            .await
            .unwrap();

        assert_eq!(db.load_all().await.unwrap(), vec![("a".to_string(), "10".to_string())]);
        assert_eq!(db.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn dirty_store_round_trips() {
        let db = memory_db().await;

        let mut store = MemoryStore::new();
        store.set("watering_p1", r#"[{"date":"2024-01-04","time":"08:00"}]"#.into());
        store.set("myPlants", "[]".into());
        db.persist_dirty(&mut store).await.unwrap();
        assert!(store.drain_dirty().is_empty());

        store.remove("myPlants");
        db.persist_dirty(&mut store).await.unwrap();

        let reloaded = db.load_store().await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("watering_p1").is_some());
        assert!(reloaded.get("myPlants").is_none());
    }

    #[tokio::test]
    async fn failed_flush_is_retried_by_the_next_one() {
        let db = memory_db().await;
        let mut store = MemoryStore::new();

        sqlx::query("ALTER TABLE kv RENAME TO kv_offline")
            .execute(&db.pool)
            .await
            .unwrap();
        store.set("watering_p1", r#"[{"date":"2024-01-12","time":"08:00"}]"#.into());
        assert!(db.persist_dirty(&mut store).await.is_err());

        sqlx::query("ALTER TABLE kv_offline RENAME TO kv")
            .execute(&db.pool)
            .await
            .unwrap();
        store.set("myPlants", "[]".into());
        db.persist_dirty(&mut store).await.unwrap();

        assert!(db.get("watering_p1").await.unwrap().is_some());
        assert_eq!(db.get("myPlants").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let db = memory_db().await;
        db.persist(&[]).await.unwrap();
        assert!(db.load_all().await.unwrap().is_empty());
    }
}
