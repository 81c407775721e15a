//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::{harness_from_repo, StaticEmbeddings};
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use quarry::{
    ChatMessage, ChatOptions, ChatStream, Chunker, DependencyGraph, EmbeddingError,
    EmbeddingProvider, Ingestor, JsonFileStore, LlmError, LlmProvider, ParseFallback, Reranker,
    ScoredEntry, SearchParams, SearchPipeline, StoreError, StoreStats, VectorEntry, VectorStore,
};

/// Keyword vocabulary for the deterministic test embedding: one
/// dimension per word, counted by exact token match. Chunks without any
/// vocabulary word embed to the zero vector and score 0 everywhere.
const WORDS: &[&str] = &[
    "login", "logout", "session", "create", "helper", "render", "auth", "token", "user",
    "widget", "total", "config",
];

pub const DIM: usize = WORDS.len();

/// Deterministic offline embeddings: token counts over a fixed
/// vocabulary. No network, no model.
pub struct StaticEmbeddings;

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let token = token.to_lowercase();
        if let Some(idx) = WORDS.iter().position(|w| *w == token) {
            v[idx] += 1.0;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for StaticEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
    fn dimension(&self) -> usize {
        DIM
    }
    fn model(&self) -> &str {
        "static-test"
    }
}

/// An embedding provider that lies about its dimension, for driving the
/// store's dimension guard through the pipeline.
pub struct MismatchedEmbeddings;

#[async_trait]
impl EmbeddingProvider for MismatchedEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.5; DIM * 2]).collect())
    }
    fn dimension(&self) -> usize {
        DIM * 2
    }
    fn model(&self) -> &str {
        "mismatched-test"
    }
}

/// An LLM that always returns the same canned reply.
pub struct ScriptedLlm {
    pub reply: String,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }
    async fn stream(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<ChatStream, LlmError> {
        Err(LlmError::UpstreamRefused("no stream in tests".into()))
    }
    fn model(&self) -> &str {
        "scripted-test"
    }
}

/// Store wrapper that delays `search`, for cancellation tests.
pub struct SlowSearchStore {
    pub inner: Arc<dyn VectorStore>,
    pub delay: std::time::Duration,
}

#[async_trait]
impl VectorStore for SlowSearchStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
    async fn add(&self, entries: Vec<VectorEntry>) -> Result<(), StoreError> {
        self.inner.add(entries).await
    }
    async fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query, params).await
    }
    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.inner.delete(ids).await
    }
    async fn delete_by_filepath(&self, path: &str) -> Result<usize, StoreError> {
        self.inner.delete_by_filepath(path).await
    }
    async fn delete_by_repository(&self, repository: &str) -> Result<usize, StoreError> {
        self.inner.delete_by_repository(repository).await
    }
    async fn get_by_filepath(&self, path: &str) -> Result<Vec<VectorEntry>, StoreError> {
        self.inner.get_by_filepath(path).await
    }
    async fn all_chunks(&self) -> Result<Vec<quarry::Chunk>, StoreError> {
        self.inner.all_chunks().await
    }
    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }
    fn store_type(&self) -> &'static str {
        self.inner.store_type()
    }
}

/// A pipeline over a freshly ingested fixture repository.
pub struct TestHarness {
    pub pipeline: SearchPipeline,
    pub store: Arc<dyn VectorStore>,
    _data: TempDir,
}

/// Ingest `repo` into a temp JSON store and wire a pipeline around it.
/// `embeddings` drives both ingest and queries; `llm` backs the judge
/// reranker when given.
pub async fn harness_from_repo(
    repo: &Path,
    embeddings: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    wrap_slow_search: Option<std::time::Duration>,
) -> TestHarness {
    let data = TempDir::new().expect("temp dir");
    let store: Arc<dyn VectorStore> = Arc::new(JsonFileStore::new(
        data.path().join("index.json"),
        "static-test",
        DIM,
    ));
    store.init().await.expect("store init");

    let ingestor = Ingestor::new(
        Chunker::new().expect("chunker"),
        Arc::new(StaticEmbeddings),
        store.clone(),
        ParseFallback::Skip,
    );
    ingestor
        .ingest_repository(repo, None)
        .await
        .expect("ingest fixture");

    let chunks = store.all_chunks().await.expect("chunks");
    let graph = Arc::new(tokio::sync::RwLock::new(Arc::new(DependencyGraph::build(
        &chunks,
    ))));

    let query_store: Arc<dyn VectorStore> = match wrap_slow_search {
        Some(delay) => Arc::new(SlowSearchStore {
            inner: store.clone(),
            delay,
        }),
        None => store.clone(),
    };

    let pipeline = SearchPipeline::new(
        embeddings,
        query_store,
        graph,
        Reranker::new(None, llm),
    );

    TestHarness {
        pipeline,
        store,
        _data: data,
    }
}

/// Write the fixture repository used by the end-to-end scenarios.
pub fn write_fixture_repo(dir: &Path) {
    write(
        dir,
        "src/auth.ts",
        r#"import { createSession } from './session';

export function login(user: string, password: string) {
  const session = createSession(user);
  return password.length > 0 ? session : null;
}

export function logout(id: string) {
  return id.length > 0;
}
"#,
    );
    write(
        dir,
        "src/session.ts",
        r#"export function createSession(owner: string) {
  return { owner, expires: Date.now() + 3600 };
}
"#,
    );
    write(
        dir,
        "src/a.ts",
        r#"import { helper } from './b';

export function computeTotal(values: number[]) {
  const total = values.map((v) => helper(v)).reduce((x, y) => x + y, 0);
  return total;
}
"#,
    );
    write(
        dir,
        "src/b.ts",
        r#"export function helper(value: number) {
  return value * 2;
}
"#,
    );
}

pub fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Build a store entry whose embedding comes from [`embed_text`] over
/// its content.
pub fn make_entry(file: &str, line: u32, name: &str, content: &str) -> VectorEntry {
    let id = quarry::Chunk::make_id(file, line, line + 2);
    VectorEntry {
        id: id.clone(),
        embedding: embed_text(content),
        chunk: quarry::Chunk {
            id,
            file: file.to_string(),
            language: quarry::Language::TypeScript,
            node_type: quarry::NodeType::Function,
            name: Some(name.to_string()),
            content: content.to_string(),
            line_start: line,
            line_end: line + 2,
            imports: vec![],
            exports: vec![name.to_string()],
            types: vec![],
        },
        repository: None,
    }
}
