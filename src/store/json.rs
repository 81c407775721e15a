//! Single-file JSON snapshot backend
//!
//! The whole index lives in memory behind an `RwLock`; the snapshot
//! document `{entries, dimension, metadata}` is written atomically
//! (temp file + rename) on close and after every mutation batch.
//! Scan search is the intended shape at this backend's scale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    check_dimension, rank_entries, ScoredEntry, SearchParams, StoreError, StoreMetadata,
    StoreStats, VectorEntry, VectorStore,
};
use crate::chunker::Chunk;

/// Persisted snapshot document
#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<VectorEntry>,
    dimension: usize,
    metadata: SnapshotMetadata,
}

#[derive(Serialize, Deserialize, Clone)]
struct SnapshotMetadata {
    created_at: String,
    updated_at: String,
    model: String,
}

enum Phase {
    Uninitialized,
    Ready,
    /// Loaded snapshot disagrees with configuration; reads work, writes
    /// fail with `ReindexRequired`
    ReadOnly {
        indexed_model: String,
        indexed_dimension: usize,
    },
}

struct Inner {
    phase: Phase,
    entries: Vec<VectorEntry>,
    by_id: HashMap<String, usize>,
    metadata: StoreMetadata,
    dirty: bool,
}

/// In-memory vector store persisted as a single JSON snapshot
pub struct JsonFileStore {
    path: PathBuf,
    model: String,
    dimension: usize,
    inner: RwLock<Inner>,
}

impl JsonFileStore {
    /// Create a handle for the snapshot at `path`; call `init()` to load it
    pub fn new(path: impl Into<PathBuf>, model: &str, dimension: usize) -> Self {
        Self {
            path: path.into(),
            model: model.to_string(),
            dimension,
            inner: RwLock::new(Inner {
                phase: Phase::Uninitialized,
                entries: Vec::new(),
                by_id: HashMap::new(),
                metadata: StoreMetadata::fresh(model, dimension),
                dirty: false,
            }),
        }
    }

    fn writable_error(&self, inner: &Inner) -> Option<StoreError> {
        match &inner.phase {
            Phase::Uninitialized => Some(StoreError::NotInitialized),
            Phase::ReadOnly {
                indexed_model,
                indexed_dimension,
            } => Some(StoreError::ReindexRequired {
                indexed_model: indexed_model.clone(),
                indexed_dimension: *indexed_dimension,
                configured_model: self.model.clone(),
                configured_dimension: self.dimension,
            }),
            Phase::Ready => None,
        }
    }

    fn save_locked(&self, inner: &mut Inner) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            entries: inner.entries.clone(),
            dimension: inner.metadata.dimension,
            metadata: SnapshotMetadata {
                created_at: inner.metadata.created_at.clone(),
                updated_at: inner.metadata.updated_at.clone(),
                model: inner.metadata.model.clone(),
            },
        };
        let body = serde_json::to_vec(&snapshot)?;
        write_atomic(&self.path, &body)?;
        inner.dirty = false;
        tracing::debug!(path = %self.path.display(), entries = snapshot.entries.len(), "Snapshot saved");
        Ok(())
    }
}

/// Write via a sibling temp file and rename, so readers never observe a
/// partially written snapshot.
fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl VectorStore for JsonFileStore {
    async fn init(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        let snapshot = match std::fs::read(&self.path) {
            Ok(bytes) => Some(serde_json::from_slice::<Snapshot>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match snapshot {
            None => {
                inner.entries.clear();
                inner.by_id.clear();
                inner.metadata = StoreMetadata::fresh(&self.model, self.dimension);
                inner.phase = Phase::Ready;
                tracing::info!(path = %self.path.display(), "No snapshot found, starting empty");
            }
            Some(snap) => {
                let mismatch =
                    snap.dimension != self.dimension || snap.metadata.model != self.model;
                inner.by_id = snap
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (e.id.clone(), i))
                    .collect();
                inner.metadata = StoreMetadata {
                    dimension: snap.dimension,
                    model: snap.metadata.model.clone(),
                    created_at: snap.metadata.created_at,
                    updated_at: snap.metadata.updated_at,
                };
                inner.entries = snap.entries;
                if mismatch {
                    let indexed_model = inner.metadata.model.clone();
                    let indexed_dimension = inner.metadata.dimension;
                    tracing::warn!(
                        indexed_model = %indexed_model,
                        indexed_dimension,
                        configured_model = %self.model,
                        configured_dimension = self.dimension,
                        "Reindex required: snapshot disagrees with configuration, refusing writes"
                    );
                    inner.phase = Phase::ReadOnly {
                        indexed_model,
                        indexed_dimension,
                    };
                } else {
                    inner.phase = Phase::Ready;
                    tracing::info!(
                        path = %self.path.display(),
                        entries = inner.entries.len(),
                        "Snapshot loaded"
                    );
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if matches!(inner.phase, Phase::Ready) && inner.dirty {
            self.save_locked(&mut inner)?;
        }
        Ok(())
    }

    async fn add(&self, entries: Vec<VectorEntry>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(err) = self.writable_error(&inner) {
            return Err(err);
        }
        for entry in &entries {
            check_dimension(self.dimension, entry.embedding.len())?;
        }
        for entry in entries {
            let existing = inner.by_id.get(&entry.id).copied();
            match existing {
                // Upsert in place keeps the original insertion position
                Some(idx) => inner.entries[idx] = entry,
                None => {
                    let idx = inner.entries.len();
                    inner.by_id.insert(entry.id.clone(), idx);
                    inner.entries.push(entry);
                }
            }
        }
        inner.metadata.updated_at = chrono::Utc::now().to_rfc3339();
        inner.dirty = true;
        self.save_locked(&mut inner)
    }

    async fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        let inner = self.inner.read().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            return Err(StoreError::NotInitialized);
        }
        check_dimension(inner.metadata.dimension, query.len())?;
        Ok(rank_entries(query, inner.entries.iter().cloned(), params))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(err) = self.writable_error(&inner) {
            return Err(err);
        }
        let doomed: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = inner.entries.len();
        inner.entries.retain(|e| !doomed.contains(e.id.as_str()));
        let removed = before - inner.entries.len();
        if removed > 0 {
            let rebuilt: HashMap<String, usize> = inner
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.id.clone(), i))
                .collect();
            inner.by_id = rebuilt;
            inner.metadata.updated_at = chrono::Utc::now().to_rfc3339();
            inner.dirty = true;
            self.save_locked(&mut inner)?;
        }
        Ok(removed)
    }

    async fn delete_by_filepath(&self, path: &str) -> Result<usize, StoreError> {
        let ids: Vec<String> = {
            let inner = self.inner.read().await;
            if matches!(inner.phase, Phase::Uninitialized) {
                return Err(StoreError::NotInitialized);
            }
            inner
                .entries
                .iter()
                .filter(|e| e.chunk.file == path)
                .map(|e| e.id.clone())
                .collect()
        };
        self.delete(&ids).await
    }

    async fn delete_by_repository(&self, repository: &str) -> Result<usize, StoreError> {
        let ids: Vec<String> = {
            let inner = self.inner.read().await;
            if matches!(inner.phase, Phase::Uninitialized) {
                return Err(StoreError::NotInitialized);
            }
            inner
                .entries
                .iter()
                .filter(|e| e.repository.as_deref() == Some(repository))
                .map(|e| e.id.clone())
                .collect()
        };
        self.delete(&ids).await
    }

    async fn get_by_filepath(&self, path: &str) -> Result<Vec<VectorEntry>, StoreError> {
        let inner = self.inner.read().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            return Err(StoreError::NotInitialized);
        }
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.chunk.file == path)
            .cloned()
            .collect())
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        let inner = self.inner.read().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            return Err(StoreError::NotInitialized);
        }
        Ok(inner.entries.iter().map(|e| e.chunk.clone()).collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.read().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            return Err(StoreError::NotInitialized);
        }
        let files: std::collections::HashSet<&str> =
            inner.entries.iter().map(|e| e.chunk.file.as_str()).collect();
        Ok(StoreStats {
            total_entries: inner.entries.len(),
            total_files: files.len(),
            metadata: inner.metadata.clone(),
            store_type: self.store_type(),
        })
    }

    fn store_type(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::entry;
    use super::*;

    const DIM: usize = 4;

    fn store_at(dir: &Path) -> JsonFileStore {
        JsonFileStore::new(dir.join("index.json"), "test-embed", DIM)
    }

    #[tokio::test]
    async fn not_initialized_guard() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_at(dir.path());
        let err = store.add(vec![entry("a.ts", 1, DIM, 0)]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
        let err = store.search(&[0.0; DIM], &SearchParams::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
    }

    #[tokio::test]
    async fn add_then_search_reflects_update() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_at(dir.path());
        store.init().await.unwrap();

        store
            .add(vec![entry("a.ts", 1, DIM, 0), entry("b.ts", 1, DIM, 1)])
            .await
            .unwrap();

        let hits = store
            .search(&[0.0, 1.0, 0.0, 0.0], &SearchParams::default())
            .await
            .unwrap();
        assert_eq!(hits[0].entry.chunk.file, "b.ts");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_at(dir.path());
        store.init().await.unwrap();

        let e = entry("a.ts", 1, DIM, 0);
        store.add(vec![e.clone()]).await.unwrap();
        store.add(vec![e.clone()]).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        let by_file = store.get_by_filepath("a.ts").await.unwrap();
        assert_eq!(by_file.len(), 1);
        assert_eq!(by_file[0].id, e.id);
    }

    #[tokio::test]
    async fn dimension_mismatch_on_add_and_search() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_at(dir.path());
        store.init().await.unwrap();

        let mut bad = entry("a.ts", 1, DIM, 0);
        bad.embedding = vec![0.0; DIM + 1];
        let err = store.add(vec![bad]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 4, actual: 5 }
        ));

        let err = store
            .search(&vec![0.0; DIM * 2], &SearchParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let entries = vec![entry("a.ts", 1, DIM, 0), entry("b.ts", 4, DIM, 1)];
        {
            let store = store_at(dir.path());
            store.init().await.unwrap();
            store.add(entries.clone()).await.unwrap();
            store.close().await.unwrap();
        }

        let store = store_at(dir.path());
        store.init().await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_entries, entries.len());

        for e in &entries {
            let hits = store
                .search(
                    &e.embedding,
                    &SearchParams {
                        top_k: 1,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(hits[0].entry.id, e.id);
        }
    }

    #[tokio::test]
    async fn delete_by_filepath_clears_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_at(dir.path());
        store.init().await.unwrap();

        store
            .add(vec![
                entry("a.ts", 1, DIM, 0),
                entry("a.ts", 10, DIM, 1),
                entry("b.ts", 1, DIM, 2),
            ])
            .await
            .unwrap();

        let removed = store.delete_by_filepath("a.ts").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_by_filepath("a.ts").await.unwrap().is_empty());
        assert_eq!(store.get_by_filepath("b.ts").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn model_mismatch_refuses_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = store_at(dir.path());
            store.init().await.unwrap();
            store.add(vec![entry("a.ts", 1, DIM, 0)]).await.unwrap();
            store.close().await.unwrap();
        }

        // Reopen with a different configured model
        let store = JsonFileStore::new(dir.path().join("index.json"), "other-embed", DIM);
        store.init().await.unwrap();

        // Reads still work
        assert_eq!(store.stats().await.unwrap().total_entries, 1);
        // Writes are refused
        let err = store.add(vec![entry("b.ts", 1, DIM, 1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::ReindexRequired { .. }));
    }

    #[tokio::test]
    async fn absent_file_initializes_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_at(dir.path());
        store.init().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_entries, 0);
    }
}
