//! Configuration file support
//!
//! Configuration is loaded from `quarry.toml` in the project root, or
//! from `~/.config/quarry/config.toml` when the project has none. Every
//! section and field has a default, so partial files work. Parse errors
//! are logged and ignored rather than fatal.
//!
//! API keys never appear in configuration: only the *name* of the
//! environment variable holding one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ingest::ParseFallback;
use crate::pipeline::{QueryOptions, RerankerKind};

/// Name of the per-project configuration file
pub const CONFIG_FILE: &str = "quarry.toml";

/// Default index directory inside the project root
pub const INDEX_DIR: &str = ".quarry";

/// Vector store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

/// Embedding provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Openai,
    Ollama,
}

/// LLM provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Openai,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Index directory, relative to the project root
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: PathBuf::from(INDEX_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    /// Override for local OpenAI-compatible servers
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Openai,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmBackend,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmBackend::Openai,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub top_k: usize,
    pub reranker: RerankerKind,
    pub rerank_top_k: usize,
    pub expand_graph: bool,
    pub max_hops: usize,
    pub max_expanded_chunks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let defaults = QueryOptions::default();
        Self {
            top_k: defaults.top_k,
            reranker: defaults.reranker,
            rerank_top_k: defaults.rerank_top_k,
            expand_graph: defaults.expand_graph,
            max_hops: defaults.max_hops,
            max_expanded_chunks: defaults.max_expanded_chunks,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub parse_fallback: ParseFallback,
}

/// Root configuration
///
/// # Example
///
/// ```toml
/// # quarry.toml
/// [store]
/// backend = "sqlite"
///
/// [embedding]
/// provider = "ollama"
/// model = "nomic-embed-text"
/// dimension = 768
///
/// [llm]
/// provider = "anthropic"
/// model = "claude-3-5-haiku-latest"
/// api_key_env = "ANTHROPIC_API_KEY"
///
/// [pipeline]
/// reranker = "llm"
/// max_hops = 1
///
/// [ingest]
/// parse_fallback = "whole-file"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Load configuration for a project: `quarry.toml` in the root wins,
    /// then the user config file, then built-in defaults.
    pub fn load(project_root: &Path) -> Self {
        if let Some(config) = Self::load_file(&project_root.join(CONFIG_FILE)) {
            return config;
        }
        if let Some(config) = dirs::config_dir()
            .map(|d| d.join("quarry/config.toml"))
            .and_then(|p| Self::load_file(&p))
        {
            return config;
        }
        Self::default()
    }

    fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                return None;
            }
        };
        match toml::from_str::<Self>(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "Loaded config");
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Absolute index directory for a project root
    pub fn index_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.store.path)
    }

    /// Per-query defaults from the `[pipeline]` section
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            top_k: self.pipeline.top_k,
            reranker: self.pipeline.reranker,
            rerank_top_k: self.pipeline.rerank_top_k,
            expand_graph: self.pipeline.expand_graph,
            max_hops: self.pipeline.max_hops,
            max_expanded_chunks: self.pipeline.max_expanded_chunks,
        }
    }
}
