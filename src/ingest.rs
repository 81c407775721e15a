//! Repository ingestion
//!
//! Walks a code tree (gitignore-aware), chunks files in parallel, embeds
//! the chunk contents in bulk, and replaces each file's entries in the
//! store: delete-by-filepath then add, the file being the re-ingest unit.
//!
//! Ingestion holds an exclusive per-repository writer lock; concurrent
//! readers observe either the pre- or post-ingest snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::{Chunk, Chunker, ChunkerError};
use crate::provider::{EmbeddingError, EmbeddingProvider};
use crate::store::{StoreError, VectorEntry, VectorStore};

/// Maximum file size to index (1MB)
const MAX_FILE_SIZE: u64 = 1_048_576;

/// What to do with a file the chunker cannot parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseFallback {
    /// Skip the file, counting it in the report
    #[default]
    Skip,
    /// Index the file as a single unstructured chunk
    WholeFile,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters from one ingest run
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub parse_failures: usize,
    pub chunks_indexed: usize,
}

enum FileOutcome {
    Parsed(Vec<Chunk>),
    ParseFailed(Option<Chunk>),
    Unreadable,
}

/// Drives the ingest data flow: chunker → embeddings → store.
pub struct Ingestor {
    chunker: Chunker,
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    parse_fallback: ParseFallback,
    locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        parse_fallback: ParseFallback,
    ) -> Self {
        Self {
            chunker,
            embeddings,
            store,
            parse_fallback,
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Ingest (or re-ingest) every supported file under `root`.
    pub async fn ingest_repository(
        &self,
        root: &Path,
        repository: Option<&str>,
    ) -> Result<IngestReport, IngestError> {
        let root = dunce::canonicalize(root)?;
        let extensions = self.chunker.supported_extensions();
        let files = enumerate_files(&root, &extensions)?;

        let mut report = IngestReport {
            files_seen: files.len(),
            ..Default::default()
        };

        // Parse in parallel; chunking is CPU-bound and pure
        let fallback = self.parse_fallback;
        let outcomes: Vec<(String, FileOutcome)> = files
            .par_iter()
            .map(|rel| {
                let display_path = rel.to_string_lossy().replace('\\', "/");
                let content = match std::fs::read_to_string(root.join(rel)) {
                    Ok(c) => c.replace("\r\n", "\n"),
                    Err(e) => {
                        tracing::warn!(file = %display_path, error = %e, "Skipping unreadable file");
                        return (display_path, FileOutcome::Unreadable);
                    }
                };
                match self.chunker.parse_file(&display_path, &content) {
                    Ok(chunks) => (display_path, FileOutcome::Parsed(chunks)),
                    Err(ChunkerError::Parse { .. }) => {
                        tracing::warn!(file = %display_path, "Parse failed");
                        let fallback_chunk = match fallback {
                            ParseFallback::WholeFile => {
                                self.chunker.whole_file_chunk(&display_path, &content)
                            }
                            ParseFallback::Skip => None,
                        };
                        (display_path, FileOutcome::ParseFailed(fallback_chunk))
                    }
                    Err(e) => {
                        // Query/grammar failures are bugs, not file problems
                        tracing::error!(file = %display_path, error = %e, "Chunker error");
                        (display_path, FileOutcome::Unreadable)
                    }
                }
            })
            .collect();

        // Collect the per-file chunk sets, tallying the report
        let mut per_file: Vec<(String, Vec<Chunk>)> = Vec::new();
        for (file, outcome) in outcomes {
            match outcome {
                FileOutcome::Parsed(chunks) => {
                    report.files_indexed += 1;
                    report.chunks_indexed += chunks.len();
                    per_file.push((file, chunks));
                }
                FileOutcome::ParseFailed(fallback_chunk) => {
                    report.parse_failures += 1;
                    match fallback_chunk {
                        Some(chunk) => {
                            report.files_indexed += 1;
                            report.chunks_indexed += 1;
                            per_file.push((file, vec![chunk]));
                        }
                        None => {
                            report.files_skipped += 1;
                            // Stale entries of a now-unparseable file still go
                            per_file.push((file, Vec::new()));
                        }
                    }
                }
                FileOutcome::Unreadable => {
                    report.files_skipped += 1;
                }
            }
        }

        // Exclusive writer lock for the mutation phase
        let _guard = self.repo_lock(repository).await;

        // Bulk-embed all chunk contents; the provider batches internally
        let texts: Vec<String> = per_file
            .iter()
            .flat_map(|(_, chunks)| chunks.iter().map(|c| c.content.clone()))
            .collect();
        let embeddings = self.embeddings.embed(&texts).await?;

        let mut vectors = embeddings.into_iter();
        for (file, chunks) in per_file {
            self.store.delete_by_filepath(&file).await?;
            if chunks.is_empty() {
                continue;
            }
            let entries: Vec<VectorEntry> = chunks
                .into_iter()
                .map(|chunk| VectorEntry {
                    id: chunk.id.clone(),
                    embedding: vectors.next().unwrap_or_default(),
                    chunk,
                    repository: repository.map(str::to_string),
                })
                .collect();
            self.store.add(entries).await?;
        }

        tracing::info!(
            files = report.files_seen,
            indexed = report.files_indexed,
            chunks = report.chunks_indexed,
            parse_failures = report.parse_failures,
            "Ingest complete"
        );
        Ok(report)
    }

    /// Remove every entry of a repository namespace.
    pub async fn drop_repository(&self, repository: &str) -> Result<usize, IngestError> {
        let _guard = self.repo_lock(Some(repository)).await;
        Ok(self.store.delete_by_repository(repository).await?)
    }

    async fn repo_lock(&self, repository: Option<&str>) -> tokio::sync::OwnedMutexGuard<()> {
        let key = repository.unwrap_or("<default>").to_string();
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Enumerate indexable files under `root`: respects .gitignore, skips
/// hidden files and files over 1MB, returns root-relative paths.
pub fn enumerate_files(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, IngestError> {
    use ignore::WalkBuilder;

    let walker = WalkBuilder::new(root).follow_links(false).build();
    let mut files: Vec<PathBuf> = walker
        .filter_map(|entry| {
            entry
                .map_err(|e| tracing::debug!(error = %e, "Walk entry failed"))
                .ok()
        })
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| {
            e.metadata()
                .map(|m| m.len() <= MAX_FILE_SIZE)
                .unwrap_or(false)
        })
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .map_err(|_| {
                    tracing::warn!(path = %e.path().display(), "Path outside root, skipping")
                })
                .ok()
        })
        .collect();
    files.sort();

    tracing::info!(file_count = files.len(), "File enumeration complete");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, SearchParams};
    use async_trait::async_trait;

    const DIM: usize = 8;

    /// Deterministic offline embeddings: token hashes bucketed into a
    /// fixed-dimension vector.
    struct StaticEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for StaticEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; DIM];
                    for token in t.split(|c: char| !c.is_alphanumeric()) {
                        if token.is_empty() {
                            continue;
                        }
                        let h = token
                            .bytes()
                            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                        v[h % DIM] += 1.0;
                    }
                    v
                })
                .collect())
        }
        fn dimension(&self) -> usize {
            DIM
        }
        fn model(&self) -> &str {
            "static-test"
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn ingestor(store: Arc<dyn VectorStore>, fallback: ParseFallback) -> Ingestor {
        Ingestor::new(
            Chunker::new().unwrap(),
            Arc::new(StaticEmbeddings),
            store,
            fallback,
        )
    }

    #[tokio::test]
    async fn ingest_indexes_supported_files() {
        let repo = tempfile::TempDir::new().unwrap();
        write(
            repo.path(),
            "src/auth.ts",
            "export function login(user: string) {\n  return user;\n}\n",
        );
        write(repo.path(), "README.md", "# not code\n");

        let data = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(JsonFileStore::new(
            data.path().join("index.json"),
            "static-test",
            DIM,
        ));
        store.init().await.unwrap();

        let ing = ingestor(store.clone(), ParseFallback::Skip);
        let report = ing.ingest_repository(repo.path(), Some("demo")).await.unwrap();

        assert_eq!(report.files_seen, 1, "markdown has no registered language");
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.chunks_indexed, 1);

        let entries = store.get_by_filepath("src/auth.ts").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repository.as_deref(), Some("demo"));
        assert_eq!(entries[0].embedding.len(), DIM);
    }

    #[tokio::test]
    async fn reingest_replaces_per_file() {
        let repo = tempfile::TempDir::new().unwrap();
        write(
            repo.path(),
            "src/m.ts",
            "export function alpha() { return 1; }\nexport function beta() { return 2; }\nexport function gamma() { return 3; }\n",
        );

        let data = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(JsonFileStore::new(
            data.path().join("index.json"),
            "static-test",
            DIM,
        ));
        store.init().await.unwrap();
        let ing = ingestor(store.clone(), ParseFallback::Skip);

        ing.ingest_repository(repo.path(), None).await.unwrap();
        assert_eq!(store.get_by_filepath("src/m.ts").await.unwrap().len(), 3);

        // Two chunks now, one renamed
        write(
            repo.path(),
            "src/m.ts",
            "export function alpha() { return 1; }\nexport function delta() { return 4; }\n",
        );
        ing.ingest_repository(repo.path(), None).await.unwrap();

        let entries = store.get_by_filepath("src/m.ts").await.unwrap();
        assert_eq!(entries.len(), 2);
        let names: Vec<&str> = entries
            .iter()
            .filter_map(|e| e.chunk.name.as_deref())
            .collect();
        assert!(names.contains(&"alpha"));
        assert!(names.contains(&"delta"));
        assert!(!names.contains(&"beta"));

        // The removed chunks are gone from search results entirely
        let probe = StaticEmbeddings.embed(&["beta".to_string()]).await.unwrap();
        let hits = store
            .search(
                &probe[0],
                &SearchParams {
                    top_k: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(hits
            .iter()
            .all(|h| h.entry.chunk.name.as_deref() != Some("beta")));
    }

    #[tokio::test]
    async fn parse_failure_policy_skip_vs_whole_file() {
        let repo = tempfile::TempDir::new().unwrap();
        write(repo.path(), "src/broken.ts", "function ((( {\nmore broken text\n");

        let data = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(JsonFileStore::new(
            data.path().join("index.json"),
            "static-test",
            DIM,
        ));
        store.init().await.unwrap();

        let ing = ingestor(store.clone(), ParseFallback::Skip);
        let report = ing.ingest_repository(repo.path(), None).await.unwrap();
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.files_skipped, 1);
        assert!(store.get_by_filepath("src/broken.ts").await.unwrap().is_empty());

        let ing = ingestor(store.clone(), ParseFallback::WholeFile);
        let report = ing.ingest_repository(repo.path(), None).await.unwrap();
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.chunks_indexed, 1);
        let entries = store.get_by_filepath("src/broken.ts").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chunk.node_type, crate::language::NodeType::Other);
    }

    #[tokio::test]
    async fn drop_repository_clears_namespace() {
        let repo = tempfile::TempDir::new().unwrap();
        write(
            repo.path(),
            "src/a.ts",
            "export function keep() { return 1; }\n",
        );

        let data = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(JsonFileStore::new(
            data.path().join("index.json"),
            "static-test",
            DIM,
        ));
        store.init().await.unwrap();
        let ing = ingestor(store.clone(), ParseFallback::Skip);

        ing.ingest_repository(repo.path(), Some("doomed")).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_entries, 1);

        let removed = ing.drop_repository("doomed").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.stats().await.unwrap().total_entries, 0);
    }

    #[test]
    fn enumerate_skips_large_and_foreign_files() {
        let repo = tempfile::TempDir::new().unwrap();
        write(repo.path(), "src/ok.ts", "export function ok() { return 1; }\n");
        write(repo.path(), "notes.txt", "plain text\n");
        std::fs::write(repo.path().join("big.ts"), "x".repeat((MAX_FILE_SIZE + 1) as usize))
            .unwrap();

        let files = enumerate_files(repo.path(), &["ts"]).unwrap();
        assert_eq!(files, vec![PathBuf::from("src/ok.ts")]);
    }
}
