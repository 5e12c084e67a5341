//! Image record store.
//!
//! Durable records live in SQLite, keyed by `identity`, so each distinct
//! image is admitted at most once across runs. A bounded in-memory working
//! set mirrors the most recently added records for fast similarity queries.
//!
//! - [`ImageStore::find_similar`] scans the working set only.
//! - [`ImageStore::get_all`] reads the durable table and sees every record,
//!   including those evicted from the working set.
//!
//! Every operation except [`ImageStore::load`] fails with
//! [`ImgdupError::NotLoaded`] until the store has been loaded.

mod working_set;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{ImgdupError, Result};
use crate::signature::{are_similar, Signed};
use working_set::WorkingSet;

/// Default database file when none is configured.
pub const DEFAULT_DB_PATH: &str = "imgdup.db";

/// Default working-set capacity.
pub const DEFAULT_MAX_WORKING_SET_SIZE: usize = 10_000;

const SELECT_COLUMNS: &str = "identity, signature, source_message_id, source_chat_id, author_id, \
     byte_size, width, height, captured_at, added_at, provenance, external_link";

/// One distinct image observed in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub identity: String,
    pub signature: String,
    pub source_message_id: i64,
    pub source_chat_id: String,
    pub author_id: Option<String>,
    pub byte_size: i64,
    pub width: i64,
    pub height: i64,
    /// Origin timestamp in unix seconds.
    pub captured_at: Option<i64>,
    /// Ingestion time, RFC 3339 UTC with microseconds.
    pub added_at: String,
    pub provenance: String,
    pub external_link: Option<String>,
}

impl ImageRecord {
    /// Record with the given identity and signature, stamped with the current time.
    pub fn new(identity: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            signature: signature.into(),
            source_message_id: 0,
            source_chat_id: String::new(),
            author_id: None,
            byte_size: 0,
            width: 0,
            height: 0,
            captured_at: None,
            added_at: now_timestamp(),
            provenance: String::new(),
            external_link: None,
        }
    }
}

impl Signed for ImageRecord {
    fn signature(&self) -> &str {
        &self.signature
    }
}

/// Current time in the format stored in `added_at`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Where and how the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    pub max_working_set_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_DB_PATH)),
            max_working_set_size: DEFAULT_MAX_WORKING_SET_SIZE,
        }
    }
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>, max_working_set_size: usize) -> Self {
        Self {
            path: Some(path.into()),
            max_working_set_size,
        }
    }

    pub fn in_memory(max_working_set_size: usize) -> Self {
        Self {
            path: None,
            max_working_set_size,
        }
    }
}

struct Loaded {
    pool: SqlitePool,
    working_set: WorkingSet,
}

/// SQLite-backed record store with a bounded working set.
pub struct ImageStore {
    config: StoreConfig,
    state: RwLock<Option<Loaded>>,
}

impl ImageStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the database, apply migrations and fill the working set with the
    /// most recently added records. Loading twice is a no-op.
    #[instrument(level = "info", skip(self), fields(path = ?self.config.path))]
    pub async fn load(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.is_some() {
            debug!("Store already loaded");
            return Ok(());
        }

        let pool = self.connect().await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let rows: Vec<ImageRecord> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM image_records ORDER BY added_at, rowid"
        ))
        .fetch_all(&pool)
        .await?;

        let total = rows.len();
        let mut working_set = WorkingSet::new(self.config.max_working_set_size);
        let skip = total.saturating_sub(self.config.max_working_set_size);
        for record in rows.into_iter().skip(skip) {
            working_set.admit(record);
        }

        info!(
            records = total,
            working_set = working_set.len(),
            "Image store loaded"
        );
        *state = Some(Loaded { pool, working_set });
        Ok(())
    }

    async fn connect(&self) -> Result<SqlitePool> {
        match &self.config.path {
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal);
                Ok(SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await?)
            }
            None => {
                // A single connection that never idles out keeps the in-memory
                // database alive for the lifetime of the pool.
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
                Ok(SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None::<Duration>)
                    .max_lifetime(None::<Duration>)
                    .connect_with(options)
                    .await?)
            }
        }
    }

    /// Admit a record.
    ///
    /// Returns `false` without touching anything when the identity is already
    /// stored. Otherwise the record is written durably and added to the
    /// working set, evicting the oldest in-memory entries past capacity.
    pub async fn add(&self, record: ImageRecord) -> Result<bool> {
        let mut guard = self.state.write().await;
        let loaded = guard.as_mut().ok_or(ImgdupError::NotLoaded)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO image_records
                (identity, signature, source_message_id, source_chat_id, author_id,
                 byte_size, width, height, captured_at, added_at, provenance, external_link)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.identity)
        .bind(&record.signature)
        .bind(record.source_message_id)
        .bind(&record.source_chat_id)
        .bind(&record.author_id)
        .bind(record.byte_size)
        .bind(record.width)
        .bind(record.height)
        .bind(record.captured_at)
        .bind(&record.added_at)
        .bind(&record.provenance)
        .bind(&record.external_link)
        .execute(&loaded.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(identity = %record.identity, "Duplicate identity, not admitted");
            return Ok(false);
        }

        let identity = record.identity.clone();
        let evicted = loaded.working_set.admit(record);
        debug!(%identity, evicted, "Record admitted");
        Ok(true)
    }

    /// Whether a record with this identity is stored durably.
    pub async fn contains(&self, identity: &str) -> Result<bool> {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM image_records WHERE identity = ?")
                .bind(identity)
                .fetch_optional(&loaded.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Working-set records whose signature satisfies `matches(signature, candidate)`.
    pub async fn find_similar<F>(&self, signature: &str, matches: F) -> Result<Vec<ImageRecord>>
    where
        F: Fn(&str, &str) -> bool,
    {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        Ok(loaded
            .working_set
            .iter()
            .filter(|r| matches(signature, &r.signature))
            .cloned()
            .collect())
    }

    /// Working-set records within `threshold_percent` of `signature`.
    pub async fn find_within(
        &self,
        signature: &str,
        threshold_percent: u32,
    ) -> Result<Vec<ImageRecord>> {
        self.find_similar(signature, |a, b| {
            are_similar(a, b, threshold_percent).unwrap_or(false)
        })
        .await
    }

    /// Every durable record, in ingestion order.
    pub async fn get_all(&self) -> Result<Vec<ImageRecord>> {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        Ok(sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM image_records ORDER BY added_at, rowid"
        ))
        .fetch_all(&loaded.pool)
        .await?)
    }

    /// Durable records carrying the given provenance tag, in ingestion order.
    pub async fn get_all_by_provenance(&self, provenance: &str) -> Result<Vec<ImageRecord>> {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        Ok(sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM image_records WHERE provenance = ? ORDER BY added_at, rowid"
        ))
        .bind(provenance)
        .fetch_all(&loaded.pool)
        .await?)
    }

    /// Delete a record durably and from the working set.
    pub async fn remove(&self, identity: &str) -> Result<bool> {
        let mut guard = self.state.write().await;
        let loaded = guard.as_mut().ok_or(ImgdupError::NotLoaded)?;
        let result = sqlx::query("DELETE FROM image_records WHERE identity = ?")
            .bind(identity)
            .execute(&loaded.pool)
            .await?;
        loaded.working_set.remove(identity);
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record. Returns how many durable rows were removed.
    pub async fn clear(&self) -> Result<u64> {
        let mut guard = self.state.write().await;
        let loaded = guard.as_mut().ok_or(ImgdupError::NotLoaded)?;
        let result = sqlx::query("DELETE FROM image_records")
            .execute(&loaded.pool)
            .await?;
        loaded.working_set.clear();
        info!(removed = result.rows_affected(), "Image store cleared");
        Ok(result.rows_affected())
    }

    /// Number of durable records.
    pub async fn count(&self) -> Result<i64> {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM image_records")
            .fetch_one(&loaded.pool)
            .await?)
    }

    /// Number of records currently held in memory.
    pub async fn working_set_len(&self) -> Result<usize> {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        Ok(loaded.working_set.len())
    }

    /// Checkpoint the write-ahead log into the main database file.
    pub async fn flush(&self) -> Result<()> {
        let guard = self.state.read().await;
        let loaded = guard.as_ref().ok_or(ImgdupError::NotLoaded)?;
        if self.config.path.is_some() {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&loaded.pool)
                .await?;
            debug!("WAL checkpointed");
        }
        Ok(())
    }

    /// Release the database handle. The store must be loaded again before reuse.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        let loaded = guard.take().ok_or(ImgdupError::NotLoaded)?;
        loaded.pool.close().await;
        info!("Image store closed");
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loaded_store(max: usize) -> ImageStore {
        let store = ImageStore::new(StoreConfig::in_memory(max));
        store.load().await.unwrap();
        store
    }

    fn record(identity: &str, signature: &str) -> ImageRecord {
        let mut r = ImageRecord::new(identity, signature);
        r.provenance = "mock/download".into();
        r.captured_at = Some(1_700_000_000);
        r
    }

    #[tokio::test]
    async fn test_not_loaded() {
        let store = ImageStore::new(StoreConfig::in_memory(10));
        assert!(matches!(
            store.add(record("a", "aaaa")).await,
            Err(ImgdupError::NotLoaded)
        ));
        assert!(matches!(store.get_all().await, Err(ImgdupError::NotLoaded)));
        assert!(matches!(
            store.find_within("aaaa", 10).await,
            Err(ImgdupError::NotLoaded)
        ));
        assert!(matches!(store.remove("a").await, Err(ImgdupError::NotLoaded)));
        assert!(matches!(store.clear().await, Err(ImgdupError::NotLoaded)));
        assert!(matches!(store.close().await, Err(ImgdupError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = loaded_store(10).await;

        assert!(store.add(record("a", "aaaa")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(!store.add(record("a", "bbbb")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.working_set_len().await.unwrap(), 1);

        // The first admission wins.
        assert_eq!(store.get_all().await.unwrap()[0].signature, "aaaa");
    }

    #[tokio::test]
    async fn test_eviction_keeps_durable_records() {
        let store = loaded_store(3).await;
        for i in 0..5 {
            store.add(record(&format!("id-{i}"), "abcd")).await.unwrap();
        }

        assert_eq!(store.working_set_len().await.unwrap(), 3);
        assert_eq!(store.get_all().await.unwrap().len(), 5);

        let similar = store.find_within("abcd", 0).await.unwrap();
        let ids: Vec<&str> = similar.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["id-2", "id-3", "id-4"]);
    }

    #[tokio::test]
    async fn test_find_similar_with_custom_match() {
        let store = loaded_store(10).await;
        store.add(record("a", "aaaa")).await.unwrap();
        store.add(record("b", "aaab")).await.unwrap();
        store.add(record("c", "ffff")).await.unwrap();

        let within_25 = store.find_within("aaaa", 25).await.unwrap();
        assert_eq!(within_25.len(), 2);

        let exact = store.find_similar("ffff", |a, b| a == b).await.unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].identity, "c");
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = loaded_store(10).await;
        store.add(record("a", "aaaa")).await.unwrap();
        store.add(record("b", "bbbb")).await.unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert!(!store.contains("a").await.unwrap());
        assert!(store.contains("b").await.unwrap());
        assert_eq!(store.working_set_len().await.unwrap(), 1);

        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.working_set_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_filter_by_provenance() {
        let store = loaded_store(10).await;
        store.add(record("a", "aaaa")).await.unwrap();
        let mut other = record("b", "aaaa");
        other.provenance = "bot/lightweight".into();
        store.add(other).await.unwrap();

        let download = store.get_all_by_provenance("mock/download").await.unwrap();
        assert_eq!(download.len(), 1);
        assert_eq!(download[0].identity, "a");
    }

    #[tokio::test]
    async fn test_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let store = ImageStore::new(StoreConfig::file(&path, 2));
        store.load().await.unwrap();
        for i in 0..3 {
            store.add(record(&format!("id-{i}"), "abcd")).await.unwrap();
        }
        store.flush().await.unwrap();
        store.close().await.unwrap();
        assert!(!store.is_loaded().await);

        let reopened = ImageStore::new(StoreConfig::file(&path, 2));
        reopened.load().await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 3);
        assert_eq!(reopened.working_set_len().await.unwrap(), 2);

        // Identity dedup holds across runs.
        assert!(!reopened.add(record("id-0", "abcd")).await.unwrap());
    }
}
