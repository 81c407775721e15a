//! Vector storage for chunk embeddings
//!
//! Two interchangeable backends behind one async trait:
//!
//! - `json` — single-file snapshot loaded fully into memory, saved
//!   atomically on close and after mutation batches
//! - `sqlite` — sqlx-backed table (WAL mode); add/delete are SQL
//!   statements, scoring happens in Rust over fetched rows
//!
//! Backend selection is configuration-time (see [`crate::config`]).

mod json;
mod sqlite;

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::Chunk;
use crate::math::cosine_similarity;

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Operation invoked before `init()` succeeded
    #[error("store not initialized")]
    NotInitialized,
    /// Vector length differs from the store dimension
    #[error("dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Persisted index disagrees with the configured model/dimension;
    /// reads are allowed, writes are refused until the index is rebuilt
    #[error("reindex required: index was built with '{indexed_model}' ({indexed_dimension} dims), configuration wants '{configured_model}' ({configured_dimension} dims)")]
    ReindexRequired {
        indexed_model: String,
        indexed_dimension: usize,
        configured_model: String,
        configured_dimension: usize,
    },
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// One stored row: a chunk with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Chunk id (`"<filepath>:<start>-<end>"`)
    pub id: String,
    /// Embedding vector; length equals the store dimension
    pub embedding: Vec<f32>,
    /// The chunk itself
    pub chunk: Chunk,
    /// Repository namespace, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Store-level metadata persisted alongside entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub dimension: usize,
    pub model: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    /// RFC 3339 timestamp of the last completed mutation
    pub updated_at: String,
}

impl StoreMetadata {
    pub(crate) fn fresh(model: &str, dimension: usize) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            dimension,
            model: model.to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Metadata plus row counts, as returned by `stats()`
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_files: usize,
    pub metadata: StoreMetadata,
    pub store_type: &'static str,
}

/// Options for a similarity search
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Number of results to return; 0 yields an empty result
    pub top_k: usize,
    /// Minimum score, applied before top-k truncation
    pub min_score: f32,
    /// Restrict to one repository namespace
    pub repository: Option<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.0,
            repository: None,
        }
    }
}

/// A search hit with its cosine similarity score
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: VectorEntry,
    pub score: f32,
}

/// Persistent similarity index over [`VectorEntry`] rows.
///
/// After any completed `add`, a subsequent `search` reflects the update.
/// `close()` guarantees durability of all prior mutations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Load or create the backing storage
    async fn init(&self) -> Result<(), StoreError>;

    /// Flush and release the backing storage
    async fn close(&self) -> Result<(), StoreError>;

    /// Upsert entries by id
    async fn add(&self, entries: Vec<VectorEntry>) -> Result<(), StoreError>;

    /// Top-k cosine search, sorted by score descending with ties stable in
    /// insertion order
    async fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<ScoredEntry>, StoreError>;

    /// Delete by id; returns the number of rows removed
    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Delete every entry of a file; returns the number of rows removed
    async fn delete_by_filepath(&self, path: &str) -> Result<usize, StoreError>;

    /// Delete every entry of a repository namespace (repository drop)
    async fn delete_by_repository(&self, repository: &str) -> Result<usize, StoreError>;

    /// All entries of a file, in insertion order
    async fn get_by_filepath(&self, path: &str) -> Result<Vec<VectorEntry>, StoreError>;

    /// Every stored chunk (the graph is rebuilt from these at startup)
    async fn all_chunks(&self) -> Result<Vec<Chunk>, StoreError>;

    /// Metadata and row counts
    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Backend tag for status reporting ("json" or "sqlite")
    fn store_type(&self) -> &'static str;
}

/// Score candidates (already in insertion order), apply the min-score
/// filter, stable-sort by score descending, truncate to top-k.
pub(crate) fn rank_entries(
    query: &[f32],
    candidates: impl Iterator<Item = VectorEntry>,
    params: &SearchParams,
) -> Vec<ScoredEntry> {
    if params.top_k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<ScoredEntry> = candidates
        .filter(|e| {
            params.repository.is_none() || e.repository == params.repository
        })
        .map(|entry| ScoredEntry {
            score: cosine_similarity(query, &entry.embedding),
            entry,
        })
        .filter(|s| s.score >= params.min_score)
        .collect();
    // Stable sort keeps insertion order among equal scores
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(params.top_k);
    scored
}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::DimensionMismatch { expected, actual });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_util::entry;
    use super::*;

    #[test]
    fn rank_applies_min_score_before_truncation() {
        let entries = vec![entry("a.ts", 1, 4, 0), entry("b.ts", 1, 4, 1), entry("c.ts", 1, 4, 2)];
        let query = vec![1.0, 0.0, 0.0, 0.0];
        let params = SearchParams {
            top_k: 2,
            min_score: 0.5,
            repository: None,
        };
        let hits = rank_entries(&query, entries.into_iter(), &params);
        // Only the exact match clears min_score; truncation happens after
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.chunk.file, "a.ts");
    }

    #[test]
    fn rank_zero_top_k_is_empty() {
        let entries = vec![entry("a.ts", 1, 4, 0)];
        let params = SearchParams {
            top_k: 0,
            ..Default::default()
        };
        assert!(rank_entries(&[1.0, 0.0, 0.0, 0.0], entries.into_iter(), &params).is_empty());
    }

    #[test]
    fn rank_ties_stay_in_insertion_order() {
        // Two identical vectors: equal scores, insertion order preserved
        let mut first = entry("first.ts", 1, 4, 0);
        let mut second = entry("second.ts", 1, 4, 0);
        first.embedding = vec![0.5, 0.5, 0.0, 0.0];
        second.embedding = vec![0.5, 0.5, 0.0, 0.0];
        let hits = rank_entries(
            &[0.5, 0.5, 0.0, 0.0],
            vec![first, second].into_iter(),
            &SearchParams::default(),
        );
        assert_eq!(hits[0].entry.chunk.file, "first.ts");
        assert_eq!(hits[1].entry.chunk.file, "second.ts");
    }

    #[test]
    fn rank_repository_scope() {
        let mut a = entry("a.ts", 1, 4, 0);
        a.repository = Some("alpha".into());
        let mut b = entry("b.ts", 1, 4, 0);
        b.repository = Some("beta".into());
        let params = SearchParams {
            repository: Some("beta".into()),
            ..Default::default()
        };
        let hits = rank_entries(&[1.0, 0.0, 0.0, 0.0], vec![a, b].into_iter(), &params);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.chunk.file, "b.ts");
    }
}
