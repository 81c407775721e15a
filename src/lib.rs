//! # quarry: retrieval-augmented question answering over code
//!
//! Ingests a code tree, decomposes files into structural chunks with
//! tree-sitter, embeds them, and persists them with their import/type/call
//! relationships. A query flows through three stages (vector search,
//! dependency-graph expansion, reranking) and comes back as a ranked,
//! citation-ready chunk set.
//!
//! ## Quick start
//!
//! ```no_run
//! use quarry::{Chunker, JsonFileStore, SearchParams, VectorEntry, VectorStore};
//!
//! # async fn example(embed: impl Fn(&str) -> Vec<f32>) -> anyhow::Result<()> {
//! let chunker = Chunker::new()?;
//! let store = JsonFileStore::new(".quarry/index.json", "text-embedding-3-small", 1536);
//! store.init().await?;
//!
//! let source = std::fs::read_to_string("src/auth.ts")?;
//! let chunks = chunker.parse_file("src/auth.ts", &source)?;
//! let entries: Vec<VectorEntry> = chunks
//!     .into_iter()
//!     .map(|chunk| VectorEntry {
//!         id: chunk.id.clone(),
//!         embedding: embed(&chunk.content),
//!         chunk,
//!         repository: None,
//!     })
//!     .collect();
//! store.add(entries).await?;
//!
//! let hits = store.search(&embed("how does login work"), &SearchParams::default()).await?;
//! for hit in hits {
//!     println!("{} ({:.3})", hit.entry.id, hit.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! For the full three-stage flow use [`pipeline::SearchPipeline`] (or the
//! process-scoped [`runtime::Engine`], which wires providers, store, and
//! graph from configuration).

pub mod chunker;
pub mod cli;
pub mod config;
pub mod graph;
pub mod ingest;
pub mod language;
pub mod math;
pub mod pipeline;
pub mod provider;
pub mod reranker;
pub mod runtime;
pub mod store;

pub use chunker::{Chunk, Chunker, ChunkerError};
pub use config::Config;
pub use graph::{DependencyGraph, EdgeKind, ExpandOptions};
pub use ingest::{IngestError, IngestReport, Ingestor, ParseFallback};
pub use language::{Language, NodeType};
pub use pipeline::{
    PipelineError, PipelineFailure, QueryOptions, RerankerKind, SearchPipeline, SearchRequest,
    SearchResponse, StageKind, StageOutcome, StageTrace,
};
pub use provider::{
    AnthropicChat, ChatMessage, ChatOptions, ChatStream, EmbeddingError, EmbeddingProvider,
    LlmError, LlmProvider, OllamaEmbeddings, OpenAiChat, OpenAiEmbeddings, Role,
};
pub use reranker::{CandidateScorer, RerankMode, Reranker, ScoredChunk};
pub use runtime::{engine, get_status, init_index, Backends, Engine, Status};
pub use store::{
    JsonFileStore, ScoredEntry, SearchParams, SqliteStore, StoreError, StoreMetadata, StoreStats,
    VectorEntry, VectorStore,
};
