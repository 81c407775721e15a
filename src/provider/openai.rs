//! OpenAI-compatible embedding and chat providers
//!
//! One implementation serves both the hosted API and local
//! OpenAI-compatible servers (vLLM, llama.cpp, LM Studio); only the
//! base URL and key differ.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    check_status, map_embed_transport, map_transport, ChatMessage, ChatOptions, ChatStream,
    EmbeddingError, EmbeddingProvider, LlmError, LlmProvider, SseAction, SseDeltaStream,
};

const HOSTED_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Inputs per embeddings request; larger input sets are split and the
/// batches concatenated in order.
const EMBED_BATCH: usize = 128;
const MAX_RETRIES: u32 = 3;

fn client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())
}

// ---- embeddings ----

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeddings over the OpenAI `/v1/embeddings` surface
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddings {
    /// Point at any OpenAI-compatible server
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        dimension: usize,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: client().map_err(EmbeddingError::Http)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            dimension,
        })
    }

    /// The hosted API
    pub fn hosted(api_key: String, model: &str, dimension: usize) -> Result<Self, EmbeddingError> {
        Self::new(HOSTED_BASE_URL, Some(api_key), model, dimension)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut attempt = 0u32;
        loop {
            let mut req = self.client.post(&url).json(&EmbeddingsRequest {
                model: &self.model,
                input: batch,
            });
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            let result = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: EmbeddingsResponse = resp
                            .json()
                            .await
                            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
                        let mut rows = body.data;
                        rows.sort_by_key(|r| r.index);
                        return Ok(rows.into_iter().map(|r| r.embedding).collect());
                    } else if status.as_u16() == 429 {
                        Err(EmbeddingError::RateLimited)
                    } else {
                        let detail: String = resp
                            .text()
                            .await
                            .unwrap_or_default()
                            .chars()
                            .take(200)
                            .collect();
                        Err(EmbeddingError::Http(format!("{status}: {detail}")))
                    }
                }
                Err(e) => Err(map_embed_transport(e)),
            };

            match result {
                Err(EmbeddingError::RateLimited) | Err(EmbeddingError::Http(_))
                    if attempt < MAX_RETRIES =>
                {
                    let backoff = Duration::from_millis(500 * (1 << attempt));
                    tracing::warn!(attempt, ?backoff, "Embedding request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
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

// ---- chat ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Chat over the OpenAI `/v1/chat/completions` surface
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChat {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Result<Self, LlmError> {
        Ok(Self {
            client: client().map_err(LlmError::Http)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    pub fn hosted(api_key: String, model: &str) -> Result<Self, LlmError> {
        Self::new(HOSTED_BASE_URL, Some(api_key), model)
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&ChatRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(map_transport)?;
        check_status(resp).await
    }
}

fn parse_stream_data(data: &str) -> SseAction {
    if data.trim() == "[DONE]" {
        return SseAction::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .map_or(SseAction::Skip, SseAction::Delta),
        Err(_) => SseAction::Skip,
    }
}

#[async_trait]
impl LlmProvider for OpenAiChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let resp = self.send(messages, options, false).await?;
        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Decode("response carried no choices".into()))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatStream, LlmError> {
        let resp = self.send(messages, options, true).await?;
        Ok(SseDeltaStream::chat_stream(resp, parse_stream_data))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_data_parses_delta() {
        let data = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        assert!(matches!(parse_stream_data(data), SseAction::Delta(d) if d == "hel"));
    }

    #[test]
    fn stream_data_skips_role_preamble() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(matches!(parse_stream_data(data), SseAction::Skip));
    }

    #[test]
    fn stream_done_marker() {
        assert!(matches!(parse_stream_data("[DONE]"), SseAction::Done));
    }

    #[test]
    fn stream_garbage_is_skipped_not_fatal() {
        assert!(matches!(parse_stream_data("not json"), SseAction::Skip));
    }
}
