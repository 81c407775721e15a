//! Second-pass scoring over a small candidate set
//!
//! Three modes:
//! - `None` — identity, truncated to top-k
//! - `CrossEncoder` — a [`CandidateScorer`] scores each candidate
//!   independently against the query, sort descending (the `bge`
//!   configuration value maps here)
//! - `LlmJudge` — one prompt lists candidates 1..N with snippets; the
//!   model replies with an ordered subset of indices
//!
//! The reranker never errors and never introduces candidates absent from
//! its input: scorer/LLM failures and unparseable replies fall back to
//! the input order truncated to top-k.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chunker::Chunk;
use crate::provider::{ChatMessage, ChatOptions, LlmError, LlmProvider};

/// A pipeline candidate: base chunks carry their vector-similarity
/// score, graph-expanded chunks carry none.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: Option<f32>,
}

/// Reranking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerankMode {
    #[default]
    None,
    CrossEncoder,
    LlmJudge,
}

/// Capability trait for cross-encoder style scoring: one (query,
/// candidate) pair per call, higher is more relevant.
#[async_trait]
pub trait CandidateScorer: Send + Sync {
    async fn score(&self, query: &str, candidate: &str) -> Result<f32, LlmError>;
}

/// Snippet length shown per candidate in the judge prompt
const JUDGE_SNIPPET_CHARS: usize = 400;

pub struct Reranker {
    scorer: Option<Arc<dyn CandidateScorer>>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Reranker {
    pub fn new(
        scorer: Option<Arc<dyn CandidateScorer>>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self { scorer, llm }
    }

    /// Reorder `candidates` against `query` and truncate to `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_k: usize,
        mode: RerankMode,
    ) -> Vec<ScoredChunk> {
        tracing::debug!(count = candidates.len(), top_k, ?mode, "Reranking candidates");
        if candidates.len() <= 1 {
            return truncate(candidates, top_k);
        }
        match mode {
            RerankMode::None => truncate(candidates, top_k),
            RerankMode::CrossEncoder => self.cross_encode(query, candidates, top_k).await,
            RerankMode::LlmJudge => self.judge(query, candidates, top_k).await,
        }
    }

    async fn cross_encode(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        let Some(scorer) = &self.scorer else {
            tracing::warn!("No cross-encoder scorer configured, keeping input order");
            return truncate(candidates, top_k);
        };

        // Score first against the borrowed candidates; the input is only
        // consumed once every score landed, so a mid-batch failure falls
        // back to the full input order with scores untouched.
        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match scorer.score(query, &candidate.chunk.content).await {
                Ok(score) => scores.push(score),
                Err(e) => {
                    tracing::warn!(error = %e, "Cross-encoder failed, keeping input order");
                    return truncate(candidates, top_k);
                }
            }
        }
        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| ScoredChunk {
                score: Some(score),
                ..candidate
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .unwrap_or(f32::NEG_INFINITY)
                .total_cmp(&a.score.unwrap_or(f32::NEG_INFINITY))
        });
        truncate(scored, top_k)
    }

    async fn judge(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        let Some(llm) = &self.llm else {
            tracing::warn!("No LLM configured for judge reranking, keeping input order");
            return truncate(candidates, top_k);
        };

        let prompt = judge_prompt(query, &candidates, top_k);
        let messages = [ChatMessage::user(prompt)];
        let reply = match llm.chat(&messages, &ChatOptions::default()).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Judge call failed, keeping input order");
                return truncate(candidates, top_k);
            }
        };

        match parse_judge_indices(&reply, candidates.len()) {
            Some(indices) => {
                let mut picked = Vec::with_capacity(indices.len().min(top_k));
                let mut slots: Vec<Option<ScoredChunk>> =
                    candidates.into_iter().map(Some).collect();
                for idx in indices.into_iter().take(top_k) {
                    if let Some(candidate) = slots[idx - 1].take() {
                        picked.push(candidate);
                    }
                }
                picked
            }
            None => {
                tracing::warn!(reply_len = reply.len(), "Unparseable judge reply, keeping input order");
                truncate(candidates, top_k)
            }
        }
    }
}

fn truncate(mut candidates: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    candidates.truncate(top_k);
    candidates
}

fn judge_prompt(query: &str, candidates: &[ScoredChunk], top_k: usize) -> String {
    use std::fmt::Write;

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are ranking code snippets by how well they answer a question.\n"
    );
    let _ = writeln!(prompt, "Question: {query}\n");
    let _ = writeln!(prompt, "Candidates:");
    for (i, candidate) in candidates.iter().enumerate() {
        let snippet: String = candidate
            .chunk
            .content
            .chars()
            .take(JUDGE_SNIPPET_CHARS)
            .collect();
        let _ = writeln!(
            prompt,
            "{}. [{}] {}",
            i + 1,
            candidate.chunk.id,
            snippet.replace('\n', " ")
        );
    }
    let _ = writeln!(
        prompt,
        "\nSelect the at most {top_k} most relevant candidates. Reply with their numbers only, most relevant first, comma-separated (for example: 3, 1, 2)."
    );
    prompt
}

/// Extract 1-based candidate indices from a judge reply. Out-of-range
/// numbers are dropped, duplicates keep their first position. `None`
/// when nothing usable remains.
fn parse_judge_indices(reply: &str, candidate_count: usize) -> Option<Vec<usize>> {
    let mut indices = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for token in reply.split(|c: char| !c.is_ascii_digit()) {
        if token.is_empty() {
            continue;
        }
        let Ok(idx) = token.parse::<usize>() else {
            continue;
        };
        if idx >= 1 && idx <= candidate_count && seen.insert(idx) {
            indices.push(idx);
        }
    }
    if indices.is_empty() {
        None
    } else {
        Some(indices)
    }
}
