//! Process-scoped engine state
//!
//! Store handles and the loaded dependency graph live as lazily
//! initialized singletons. `init_index` returns whichever backends are
//! configured; `get_status` reports readiness. The graph is immutable
//! during serving: re-ingest rebuilds it and swaps the owning reference
//! atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::config::{Config, EmbeddingBackend, LlmBackend, StoreBackend};
use crate::graph::DependencyGraph;
use crate::ingest::{IngestReport, Ingestor};
use crate::pipeline::{PipelineFailure, SearchPipeline, SearchRequest, SearchResponse};
use crate::provider::{
    AnthropicChat, EmbeddingProvider, LlmProvider, OllamaEmbeddings, OpenAiChat,
    OpenAiEmbeddings,
};
use crate::reranker::Reranker;
use crate::store::{JsonFileStore, SqliteStore, StoreError, VectorStore};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Initialized store backends. After a successful [`init_index`] at
/// least one is present; a caller finding neither reports unavailability.
#[derive(Clone, Default)]
pub struct Backends {
    pub json_store: Option<Arc<JsonFileStore>>,
    pub sqlite_store: Option<Arc<SqliteStore>>,
}

impl Backends {
    /// The configured backend as a trait object
    pub fn primary(&self) -> Option<Arc<dyn VectorStore>> {
        if let Some(store) = &self.sqlite_store {
            return Some(store.clone() as Arc<dyn VectorStore>);
        }
        self.json_store
            .as_ref()
            .map(|store| store.clone() as Arc<dyn VectorStore>)
    }
}

/// Engine status, shaped for the HTTP surface's status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub ready: bool,
    pub indexed: bool,
    pub total_chunks: usize,
    pub embedding_model: String,
    pub store_type: String,
    pub llm: LlmInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmInfo {
    pub provider: String,
    pub model: String,
}

/// Everything a consumer needs for serving queries and ingesting code:
/// providers, the configured store, the loaded graph, and the pipeline.
pub struct Engine {
    config: Config,
    project_root: PathBuf,
    backends: Backends,
    store: Arc<dyn VectorStore>,
    graph: Arc<RwLock<Arc<DependencyGraph>>>,
    pipeline: SearchPipeline,
    ingestor: Ingestor,
}

impl Engine {
    /// Initialize providers and the configured store backend, then
    /// rebuild the dependency graph from persisted chunks.
    pub async fn init(project_root: &Path, config: Config) -> anyhow::Result<Self> {
        let embeddings = embedding_provider(&config)?;
        let llm = llm_provider(&config)?;

        let index_dir = config.index_dir(project_root);
        let mut backends = Backends::default();
        let store: Arc<dyn VectorStore> = match config.store.backend {
            StoreBackend::Json => {
                let store = Arc::new(JsonFileStore::new(
                    index_dir.join("index.json"),
                    &config.embedding.model,
                    config.embedding.dimension,
                ));
                store.init().await?;
                backends.json_store = Some(store.clone());
                store
            }
            StoreBackend::Sqlite => {
                let store = Arc::new(
                    SqliteStore::open(
                        &index_dir.join("index.db"),
                        &config.embedding.model,
                        config.embedding.dimension,
                    )
                    .await?,
                );
                store.init().await?;
                backends.sqlite_store = Some(store.clone());
                store
            }
        };

        let chunks = store.all_chunks().await?;
        let graph = Arc::new(RwLock::new(Arc::new(DependencyGraph::build(&chunks))));

        let reranker = Reranker::new(None, Some(llm));
        let pipeline =
            SearchPipeline::new(embeddings.clone(), store.clone(), graph.clone(), reranker);
        let ingestor = Ingestor::new(
            Chunker::new()?,
            embeddings,
            store.clone(),
            config.ingest.parse_fallback,
        );

        Ok(Self {
            config,
            project_root: project_root.to_path_buf(),
            backends,
            store,
            graph,
            pipeline,
            ingestor,
        })
    }

    /// Run one query through the retrieval pipeline.
    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, PipelineFailure> {
        self.pipeline.search(request, cancel).await
    }

    /// Run one query with a deadline, expressed as cancellation.
    pub async fn search_with_timeout(
        &self,
        request: &SearchRequest,
        timeout: Duration,
    ) -> Result<SearchResponse, PipelineFailure> {
        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        });
        let result = self.pipeline.search(request, &cancel).await;
        timer.abort();
        result
    }

    /// Ingest a code tree and reload the graph.
    pub async fn ingest(
        &self,
        root: &Path,
        repository: Option<&str>,
    ) -> anyhow::Result<IngestReport> {
        let report = self.ingestor.ingest_repository(root, repository).await?;
        self.reload_graph().await?;
        Ok(report)
    }

    /// Drop a repository namespace and reload the graph.
    pub async fn drop_repository(&self, repository: &str) -> anyhow::Result<usize> {
        let removed = self.ingestor.drop_repository(repository).await?;
        self.reload_graph().await?;
        Ok(removed)
    }

    /// Rebuild the dependency graph from persisted chunks and swap the
    /// owning reference.
    pub async fn reload_graph(&self) -> Result<(), StoreError> {
        let chunks = self.store.all_chunks().await?;
        let rebuilt = Arc::new(DependencyGraph::build(&chunks));
        *self.graph.write().await = rebuilt;
        Ok(())
    }

    pub async fn status(&self) -> Status {
        let stats = self.store.stats().await.ok();
        let provider = match self.config.llm.provider {
            LlmBackend::Openai => "openai",
            LlmBackend::Anthropic => "anthropic",
        };
        Status {
            ready: stats.is_some(),
            indexed: stats.as_ref().map(|s| s.total_entries > 0).unwrap_or(false),
            total_chunks: stats.as_ref().map(|s| s.total_entries).unwrap_or(0),
            embedding_model: self.config.embedding.model.clone(),
            store_type: self.store.store_type().to_string(),
            llm: LlmInfo {
                provider: provider.to_string(),
                model: self.config.llm.model.clone(),
            },
        }
    }

    /// Flush the store.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

fn embedding_provider(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let cfg = &config.embedding;
    match cfg.provider {
        EmbeddingBackend::Openai => {
            let key = read_key(&cfg.api_key_env);
            let base = cfg.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Ok(Arc::new(OpenAiEmbeddings::new(
                base,
                key,
                &cfg.model,
                cfg.dimension,
            )?))
        }
        EmbeddingBackend::Ollama => Ok(Arc::new(OllamaEmbeddings::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            cfg.dimension,
        )?)),
    }
}

fn llm_provider(config: &Config) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let cfg = &config.llm;
    match cfg.provider {
        LlmBackend::Openai => {
            let key = read_key(&cfg.api_key_env);
            let base = cfg.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Ok(Arc::new(OpenAiChat::new(base, key, &cfg.model)?))
        }
        LlmBackend::Anthropic => {
            let key = read_key(&cfg.api_key_env).unwrap_or_default();
            Ok(Arc::new(AnthropicChat::new(
                cfg.base_url.as_deref(),
                key,
                &cfg.model,
            )?))
        }
    }
}

fn read_key(env_name: &str) -> Option<String> {
    let key = std::env::var(env_name).ok().filter(|k| !k.is_empty());
    if key.is_none() {
        tracing::warn!(env = env_name, "API key environment variable not set");
    }
    key
}

// ---- process-scoped singletons ----

static ENGINE: tokio::sync::OnceCell<Engine> = tokio::sync::OnceCell::const_new();

/// The process-wide engine, initialized on first use.
pub async fn engine(project_root: &Path, config: Config) -> anyhow::Result<&'static Engine> {
    ENGINE
        .get_or_try_init(|| async { Engine::init(project_root, config).await })
        .await
}

/// Initialize the configured store backends and return them. At least
/// one backend is present on success.
pub async fn init_index(
    project_root: &Path,
    config: Config,
) -> anyhow::Result<&'static Backends> {
    Ok(engine(project_root, config).await?.backends())
}

/// Status of the process-wide engine; `None` before `init_index`.
pub async fn get_status() -> Option<Status> {
    match ENGINE.get() {
        Some(engine) => Some(engine.status().await),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_initializes_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::init(dir.path(), Config::default()).await.unwrap();

        assert!(engine.backends().json_store.is_some());
        assert!(engine.backends().sqlite_store.is_none());
        assert!(engine.backends().primary().is_some());

        let status = engine.status().await;
        assert!(status.ready);
        assert!(!status.indexed);
        assert_eq!(status.store_type, "json");
        assert_eq!(status.llm.provider, "openai");
    }

    #[tokio::test]
    async fn engine_with_sqlite_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            store: crate::config::StoreConfig {
                backend: StoreBackend::Sqlite,
                ..Default::default()
            },
            ..Default::default()
        };
        let engine = Engine::init(dir.path(), config).await.unwrap();
        assert!(engine.backends().sqlite_store.is_some());
        assert_eq!(engine.status().await.store_type, "sqlite");
        engine.close().await.unwrap();
    }
}
