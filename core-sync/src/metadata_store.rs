//! # Sync Metadata Store
//!
//! Durable record of the last successfully synced state per path.
//!
//! The engine reads every entry at scan time and writes an entry only after
//! the corresponding transfer has fully succeeded, so a crash mid-run leaves
//! the store describing the last state both sides agreed on.
//!
//! Two implementations are provided:
//! - [`SqliteMetadataStore`]: one row per path in a SQLite table
//! - [`InMemoryMetadataStore`]: a map behind a lock, for tests and ephemeral
//!   sessions

use crate::error::{Result, SyncError};
use crate::model::SyncMetadataEntry;
use async_trait::async_trait;
use bridge_traits::storage::ContentHash;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait SyncMetadataStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<SyncMetadataEntry>>;

    /// Insert or replace the entry for `entry.path`.
    async fn put(&self, entry: &SyncMetadataEntry) -> Result<()>;

    /// Remove the entry for `path`. Missing entries are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn all_entries(&self) -> Result<Vec<SyncMetadataEntry>>;

    /// Drop every entry; the next run treats both sides as new.
    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_metadata (
        path TEXT PRIMARY KEY NOT NULL,
        content_hash TEXT NOT NULL,
        remote_revision TEXT NOT NULL,
        synced_at INTEGER NOT NULL
    )
"#;

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct MetadataRow {
    path: String,
    content_hash: String,
    remote_revision: String,
    synced_at: i64,
}

impl From<MetadataRow> for SyncMetadataEntry {
    fn from(row: MetadataRow) -> Self {
        SyncMetadataEntry {
            path: row.path,
            last_synced_hash: ContentHash::from_hex(row.content_hash),
            last_synced_remote_revision: row.remote_revision,
            last_synced_at: row.synced_at,
        }
    }
}

fn db_error(e: sqlx::Error) -> SyncError {
    SyncError::Database(e.to_string())
}

impl SqliteMetadataStore {
    /// Wrap an existing pool. Call [`initialize`](Self::initialize) before
    /// first use if the table may not exist yet.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a database file and ensure the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening sync metadata database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to open sync metadata database");
                db_error(e)
            })?;

        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Fresh in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_error)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        debug!("Sync metadata schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SyncMetadataStore for SqliteMetadataStore {
    async fn get(&self, path: &str) -> Result<Option<SyncMetadataEntry>> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT path, content_hash, remote_revision, synced_at
            FROM sync_metadata
            WHERE path = ?
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(SyncMetadataEntry::from))
    }

    async fn put(&self, entry: &SyncMetadataEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (path, content_hash, remote_revision, synced_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                remote_revision = excluded.remote_revision,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&entry.path)
        .bind(entry.last_synced_hash.as_str())
        .bind(&entry.last_synced_remote_revision)
        .bind(entry.last_synced_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_metadata WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<SyncMetadataEntry>> {
        let rows = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT path, content_hash, remote_revision, synced_at
            FROM sync_metadata
            ORDER BY path
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(SyncMetadataEntry::from).collect())
    }

    async fn clear(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM sync_metadata")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        info!(removed = result.rows_affected(), "Cleared sync metadata");
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_metadata")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Default)]
pub struct InMemoryMetadataStore {
    entries: RwLock<BTreeMap<String, SyncMetadataEntry>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncMetadataStore for InMemoryMetadataStore {
    async fn get(&self, path: &str) -> Result<Option<SyncMetadataEntry>> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn put(&self, entry: &SyncMetadataEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.path.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.entries.write().await.remove(path);
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<SyncMetadataEntry>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
