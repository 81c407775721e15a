//! Ollama local-server embedding provider

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{map_embed_transport, EmbeddingError, EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const EMBED_BATCH: usize = 64;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings via a local Ollama server (`/api/embed`). No API key.
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddings {
    pub fn new(base_url: Option<&str>, model: &str, dimension: usize) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            dimension,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: batch,
            })
            .send()
            .await
            .map_err(map_embed_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let detail: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(EmbeddingError::Http(format!("{status}: {detail}")));
        }
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
        Ok(body.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = texts.len(), model = %self.model, "Embedding texts");

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            out.extend(self.embed_batch(batch).await?);
        }
        if out.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                sent: texts.len(),
                received: out.len(),
            });
        }
        if let Some(bad) = out.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::Dimension {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}
