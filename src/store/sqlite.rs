//! SQLite backend (sqlx, WAL mode)
//!
//! Add/delete are SQL statements; search fetches candidate rows in rowid
//! order (insertion order) and scores them in Rust, so tie-breaking
//! matches the snapshot backend exactly. Embeddings are stored as
//! little-endian f32 BLOBs.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use super::{
    check_dimension, rank_entries, ScoredEntry, SearchParams, StoreError, StoreMetadata,
    StoreStats, VectorEntry, VectorStore,
};
use crate::chunker::Chunk;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    filepath TEXT NOT NULL,
    repository TEXT,
    embedding BLOB NOT NULL,
    chunk TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_filepath ON entries(filepath);
CREATE INDEX IF NOT EXISTS idx_entries_repository ON entries(repository);
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

/// sqlx-backed vector store
pub struct SqliteStore {
    pool: SqlitePool,
    model: String,
    dimension: usize,
    initialized: AtomicBool,
    /// Set when the on-disk index disagrees with configuration
    read_only: AtomicBool,
    indexed: Mutex<Option<(String, usize)>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` with connection pooling
    pub async fn open(path: &Path, model: &str, dimension: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Forward slashes for URL compatibility on Windows
        let path_str = path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{path_str}?mode=rwc");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // WAL mode: concurrent reads, single writer
                    sqlx::query("PRAGMA journal_mode = WAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000")
                        .execute(&mut *conn)
                        .await?;
                    // NORMAL sync is safe with WAL
                    sqlx::query("PRAGMA synchronous = NORMAL")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await?;

        tracing::info!(path = %path.display(), "Database connected");

        Ok(Self {
            pool,
            model: model.to_string(),
            dimension,
            initialized: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            indexed: Mutex::new(None),
        })
    }

    fn check_ready(&self) -> Result<(), StoreError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        self.check_ready()?;
        if self.read_only.load(Ordering::Acquire) {
            let indexed = self
                .indexed
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone();
            let (indexed_model, indexed_dimension) =
                indexed.unwrap_or_else(|| (String::new(), 0));
            return Err(StoreError::ReindexRequired {
                indexed_model,
                indexed_dimension,
                configured_model: self.model.clone(),
                configured_dimension: self.dimension,
            });
        }
        Ok(())
    }

    async fn meta_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM metadata WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn meta_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO metadata (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_updated_at(&self) -> Result<(), StoreError> {
        self.meta_set("updated_at", &chrono::Utc::now().to_rfc3339())
            .await
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<VectorEntry, StoreError> {
        let id: String = row.try_get("id")?;
        let repository: Option<String> = row.try_get("repository")?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        let chunk_json: String = row.try_get("chunk")?;
        let embedding: Vec<f32> = bytemuck::pod_collect_to_vec(&blob);
        let chunk: Chunk = serde_json::from_str(&chunk_json)?;
        Ok(VectorEntry {
            id,
            embedding,
            chunk,
            repository,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn init(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if stmt.is_empty() {
                continue;
            }
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        // Mark initialized before the metadata reads below
        self.initialized.store(true, Ordering::Release);

        match (self.meta_get("model").await?, self.meta_get("dimension").await?) {
            (Some(model), Some(dim)) => {
                let dimension: usize = dim.parse().unwrap_or(0);
                if model != self.model || dimension != self.dimension {
                    tracing::warn!(
                        indexed_model = %model,
                        indexed_dimension = dimension,
                        configured_model = %self.model,
                        configured_dimension = self.dimension,
                        "Reindex required: index disagrees with configuration, refusing writes"
                    );
                    *self.indexed.lock().unwrap_or_else(|p| p.into_inner()) =
                        Some((model, dimension));
                    self.read_only.store(true, Ordering::Release);
                }
            }
            _ => {
                let now = chrono::Utc::now().to_rfc3339();
                self.meta_set("model", &self.model).await?;
                self.meta_set("dimension", &self.dimension.to_string()).await?;
                self.meta_set("created_at", &now).await?;
                self.meta_set("updated_at", &now).await?;
                tracing::info!(model = %self.model, dimension = self.dimension, "Schema initialized");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        self.pool.close().await;
        Ok(())
    }

    async fn add(&self, entries: Vec<VectorEntry>) -> Result<(), StoreError> {
        self.check_writable()?;
        for entry in &entries {
            check_dimension(self.dimension, entry.embedding.len())?;
        }

        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            let blob: Vec<u8> = bytemuck::cast_slice(&entry.embedding).to_vec();
            let chunk_json = serde_json::to_string(&entry.chunk)?;
            sqlx::query(
                "INSERT INTO entries (id, filepath, repository, embedding, chunk)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     filepath = excluded.filepath,
                     repository = excluded.repository,
                     embedding = excluded.embedding,
                     chunk = excluded.chunk",
            )
            .bind(&entry.id)
            .bind(&entry.chunk.file)
            .bind(&entry.repository)
            .bind(blob)
            .bind(chunk_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_updated_at().await
    }

    async fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        self.check_ready()?;
        check_dimension(self.dimension, query.len())?;

        let rows = match &params.repository {
            Some(repo) => {
                sqlx::query("SELECT id, repository, embedding, chunk FROM entries WHERE repository = ?1 ORDER BY rowid")
                    .bind(repo)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id, repository, embedding, chunk FROM entries ORDER BY rowid")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(Self::row_to_entry(row)?);
        }
        // Repository filter already applied in SQL; rank handles the rest
        let scoped = SearchParams {
            repository: None,
            ..params.clone()
        };
        Ok(rank_entries(query, entries.into_iter(), &scoped))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut removed = 0usize;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM entries WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        if removed > 0 {
            self.touch_updated_at().await?;
        }
        Ok(removed)
    }

    async fn delete_by_filepath(&self, path: &str) -> Result<usize, StoreError> {
        self.check_writable()?;
        let result = sqlx::query("DELETE FROM entries WHERE filepath = ?1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() as usize;
        if removed > 0 {
            self.touch_updated_at().await?;
        }
        Ok(removed)
    }

    async fn delete_by_repository(&self, repository: &str) -> Result<usize, StoreError> {
        self.check_writable()?;
        let result = sqlx::query("DELETE FROM entries WHERE repository = ?1")
            .bind(repository)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() as usize;
        if removed > 0 {
            self.touch_updated_at().await?;
        }
        Ok(removed)
    }

    async fn get_by_filepath(&self, path: &str) -> Result<Vec<VectorEntry>, StoreError> {
        self.check_ready()?;
        let rows = sqlx::query(
            "SELECT id, repository, embedding, chunk FROM entries WHERE filepath = ?1 ORDER BY rowid",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        self.check_ready()?;
        let rows = sqlx::query("SELECT chunk FROM entries ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_json: String = row.try_get("chunk")?;
            chunks.push(serde_json::from_str(&chunk_json)?);
        }
        Ok(chunks)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.check_ready()?;
        let (total_entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        let (total_files,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT filepath) FROM entries")
                .fetch_one(&self.pool)
                .await?;

        let metadata = StoreMetadata {
            dimension: self
                .meta_get("dimension")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.dimension),
            model: self.meta_get("model").await?.unwrap_or_else(|| self.model.clone()),
            created_at: self.meta_get("created_at").await?.unwrap_or_default(),
            updated_at: self.meta_get("updated_at").await?.unwrap_or_default(),
        };

        Ok(StoreStats {
            total_entries: total_entries as usize,
            total_files: total_files as usize,
            metadata,
            store_type: self.store_type(),
        })
    }

    fn store_type(&self) -> &'static str {
        "sqlite"
    }
}
