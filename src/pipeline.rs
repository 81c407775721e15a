//! Staged retrieval pipeline
//!
//! `search` runs: embed query → vector search → graph expansion
//! (optional) → rerank (optional). Stages execute sequentially; each
//! records a count, duration, and outcome in the stage trace. On a stage
//! failure the pipeline short-circuits, returning the originating error,
//! the partial trace, and the last completed stage's chunks. Cancellation
//! is honored at stage boundaries and at provider suspension points.
//!
//! Queries are read-only: a canceled or failed search mutates nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::graph::{DependencyGraph, ExpandOptions};
use crate::provider::{EmbeddingError, EmbeddingProvider};
use crate::reranker::{Reranker, RerankMode, ScoredChunk};
use crate::store::{SearchParams, StoreError, VectorStore};

/// Reranker selection, as exposed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerKind {
    /// Cross-encoder scoring
    Bge,
    /// LLM judge
    Llm,
    #[default]
    None,
}

impl std::str::FromStr for RerankerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bge" => Ok(RerankerKind::Bge),
            "llm" => Ok(RerankerKind::Llm),
            "none" => Ok(RerankerKind::None),
            other => Err(format!(
                "Invalid reranker '{other}'. Valid: bge, llm, none"
            )),
        }
    }
}

/// Per-query options. Out-of-range values are clamped; hard rejection
/// belongs to the HTTP boundary.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Vector search top-k (1..=50)
    pub top_k: usize,
    pub reranker: RerankerKind,
    /// Result size after reranking (when a reranker runs)
    pub rerank_top_k: usize,
    pub expand_graph: bool,
    /// Graph hop budget (0..=5)
    pub max_hops: usize,
    /// Budget of chunks added by expansion (1..=100)
    pub max_expanded_chunks: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            reranker: RerankerKind::None,
            rerank_top_k: 5,
            expand_graph: true,
            max_hops: 2,
            max_expanded_chunks: 15,
        }
    }
}

impl QueryOptions {
    fn clamped(&self) -> Self {
        Self {
            top_k: self.top_k.clamp(1, 50),
            reranker: self.reranker,
            rerank_top_k: self.rerank_top_k.max(1),
            expand_graph: self.expand_graph,
            max_hops: self.max_hops.min(5),
            max_expanded_chunks: self.max_expanded_chunks.clamp(1, 100),
        }
    }
}

/// One retrieval query
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict to one repository namespace
    pub repository: Option<String>,
    pub options: QueryOptions,
}

/// Pipeline stage names, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    EmbedQuery,
    VectorSearch,
    GraphExpand,
    Rerank,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::EmbedQuery => write!(f, "embed-query"),
            StageKind::VectorSearch => write!(f, "vector-search"),
            StageKind::GraphExpand => write!(f, "graph-expand"),
            StageKind::Rerank => write!(f, "rerank"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed,
}

/// One stage's observability record
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: StageKind,
    /// Chunks (or vectors) flowing out of the stage
    pub count: usize,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
}

/// Per-query trace of stage counts, timings, and outcomes
#[derive(Debug, Clone, Default)]
pub struct StageTrace {
    pub stages: Vec<StageRecord>,
}

impl StageTrace {
    fn completed(&mut self, stage: StageKind, started: Instant, count: usize) {
        self.stages.push(StageRecord {
            stage,
            count,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: StageOutcome::Completed,
        });
    }

    fn failed(&mut self, stage: StageKind, started: Instant) {
        self.stages.push(StageRecord {
            stage,
            count: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: StageOutcome::Failed,
        });
    }
}

/// Successful query result: final ordered chunks plus the stage trace
#[derive(Debug)]
pub struct SearchResponse {
    pub chunks: Vec<ScoredChunk>,
    pub trace: StageTrace,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("query canceled")]
    Canceled,
}

/// A stage failure with the partial trace and the last completed stage's
/// chunks, kept for observability.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub trace: StageTrace,
    pub partial: Vec<ScoredChunk>,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Composes embedding provider, vector store, dependency graph, and
/// reranker into `search(query) → ranked chunks`. Stateless across
/// queries; the stores and graph are shared, read-mostly resources.
pub struct SearchPipeline {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    graph: Arc<tokio::sync::RwLock<Arc<DependencyGraph>>>,
    reranker: Reranker,
}

impl SearchPipeline {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        graph: Arc<tokio::sync::RwLock<Arc<DependencyGraph>>>,
        reranker: Reranker,
    ) -> Self {
        Self {
            embeddings,
            store,
            graph,
            reranker,
        }
    }

    /// Run one query through the staged pipeline.
    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, PipelineFailure> {
        let opts = request.options.clamped();
        let mut trace = StageTrace::default();
        let mut partial: Vec<ScoredChunk> = Vec::new();

        tracing::debug!(query_len = request.query.len(), ?opts, "Pipeline search");

        // Stage 1: embed the query
        let started = Instant::now();
        let embed_result: Result<Vec<Vec<f32>>, PipelineError> = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Canceled),
            r = self.embeddings.embed(std::slice::from_ref(&request.query)) => {
                r.map_err(PipelineError::from)
            }
        };
        let query_vec = match embed_result {
            Ok(mut vectors) if !vectors.is_empty() => {
                trace.completed(StageKind::EmbedQuery, started, 1);
                vectors.remove(0)
            }
            Ok(_) => {
                trace.failed(StageKind::EmbedQuery, started);
                return Err(PipelineFailure {
                    error: EmbeddingError::CountMismatch {
                        sent: 1,
                        received: 0,
                    }
                    .into(),
                    trace,
                    partial,
                });
            }
            Err(error) => {
                trace.failed(StageKind::EmbedQuery, started);
                return Err(PipelineFailure {
                    error,
                    trace,
                    partial,
                });
            }
        };

        // Stage 2: vector search, scoped to the repository if given
        let started = Instant::now();
        let params = SearchParams {
            top_k: opts.top_k,
            min_score: 0.0,
            repository: request.repository.clone(),
        };
        let search_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Canceled),
            r = self.store.search(&query_vec, &params) => r.map_err(PipelineError::from),
        };
        let mut chunks = match search_result {
            Ok(hits) => {
                let base: Vec<ScoredChunk> = dedup_by_id(
                    hits.into_iter()
                        .map(|h| ScoredChunk {
                            chunk: h.entry.chunk,
                            score: Some(h.score),
                        })
                        .collect(),
                );
                trace.completed(StageKind::VectorSearch, started, base.len());
                base
            }
            Err(error) => {
                trace.failed(StageKind::VectorSearch, started);
                return Err(PipelineFailure {
                    error,
                    trace,
                    partial,
                });
            }
        };
        partial = chunks.clone();

        // Stage 3: graph expansion. Base chunks keep their similarity
        // scores; discovered chunks append in BFS order without one.
        if opts.expand_graph {
            let started = Instant::now();
            if cancel.is_cancelled() {
                trace.failed(StageKind::GraphExpand, started);
                return Err(PipelineFailure {
                    error: PipelineError::Canceled,
                    trace,
                    partial,
                });
            }
            let graph = self.graph.read().await.clone();
            let seeds: Vec<_> = chunks.iter().map(|c| c.chunk.clone()).collect();
            let expanded = graph.expand(
                &seeds,
                &ExpandOptions {
                    max_hops: opts.max_hops,
                    max_expanded: opts.max_expanded_chunks,
                    kinds: None,
                },
            );
            let base_ids: HashSet<String> =
                chunks.iter().map(|c| c.chunk.id.clone()).collect();
            for chunk in expanded {
                if !base_ids.contains(&chunk.id) {
                    chunks.push(ScoredChunk { chunk, score: None });
                }
            }
            chunks = dedup_by_id(chunks);
            trace.completed(StageKind::GraphExpand, started, chunks.len());
            partial = chunks.clone();
        }

        // Stage 4: rerank, or pass through when no reranker is selected
        let chunks = match opts.reranker {
            RerankerKind::None => chunks,
            kind => {
                let started = Instant::now();
                let mode = match kind {
                    RerankerKind::Bge => RerankMode::CrossEncoder,
                    _ => RerankMode::LlmJudge,
                };
                let rerank_result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    reranked = self.reranker.rerank(
                        &request.query,
                        chunks,
                        opts.rerank_top_k,
                        mode,
                    ) => Some(reranked),
                };
                match rerank_result {
                    Some(reranked) => {
                        let reranked = dedup_by_id(reranked);
                        trace.completed(StageKind::Rerank, started, reranked.len());
                        reranked
                    }
                    None => {
                        trace.failed(StageKind::Rerank, started);
                        return Err(PipelineFailure {
                            error: PipelineError::Canceled,
                            trace,
                            partial,
                        });
                    }
                }
            }
        };

        Ok(SearchResponse { chunks, trace })
    }
}

/// Stage-boundary deduplication by chunk id, keeping first occurrence
fn dedup_by_id(chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.chunk.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_clamp_to_documented_ranges() {
        let opts = QueryOptions {
            top_k: 500,
            reranker: RerankerKind::None,
            rerank_top_k: 0,
            expand_graph: true,
            max_hops: 99,
            max_expanded_chunks: 0,
        }
        .clamped();
        assert_eq!(opts.top_k, 50);
        assert_eq!(opts.rerank_top_k, 1);
        assert_eq!(opts.max_hops, 5);
        assert_eq!(opts.max_expanded_chunks, 1);

        let zero = QueryOptions {
            top_k: 0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(zero.top_k, 1);
    }

    #[test]
    fn reranker_kind_parses() {
        assert_eq!("bge".parse::<RerankerKind>().unwrap(), RerankerKind::Bge);
        assert_eq!("llm".parse::<RerankerKind>().unwrap(), RerankerKind::Llm);
        assert_eq!("none".parse::<RerankerKind>().unwrap(), RerankerKind::None);
        assert!("best".parse::<RerankerKind>().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let opts = QueryOptions::default();
        assert_eq!(opts.top_k, 10);
        assert_eq!(opts.rerank_top_k, 5);
        assert!(opts.expand_graph);
        assert_eq!(opts.max_hops, 2);
        assert_eq!(opts.max_expanded_chunks, 15);
    }
}
