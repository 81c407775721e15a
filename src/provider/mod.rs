//! Embedding and LLM provider abstraction
//!
//! Uniform async traits over heterogeneous backends:
//!
//! - [`OpenAiEmbeddings`] / [`OpenAiChat`] — hosted OpenAI-compatible
//!   APIs; a `base_url` override points the same code at local
//!   OpenAI-compatible servers
//! - [`OllamaEmbeddings`] — local Ollama server
//! - [`AnthropicChat`] — hosted Anthropic messages API
//!
//! Providers own batching and retry; callers observe bulk operations
//! that wholly succeed or fail. Streams are lazy, finite, and
//! non-restartable sequences of UTF-8 deltas.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicChat;
pub use ollama::OllamaEmbeddings;
pub use openai::{OpenAiChat, OpenAiEmbeddings};

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from embedding providers
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(String),
    #[error("embedding provider rate limited")]
    RateLimited,
    #[error("embedding response malformed: {0}")]
    Decode(String),
    #[error("embedding count mismatch: sent {sent}, received {received}")]
    CountMismatch { sent: usize, received: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Errors from LLM providers
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("upstream refused request: {0}")]
    UpstreamRefused(String),
    #[error("canceled")]
    Canceled,
    #[error("transport error: {0}")]
    Http(String),
    #[error("malformed provider response: {0}")]
    Decode(String),
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generation options
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

/// Lazy, finite, non-restartable sequence of text deltas
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Fixed-dimension text embedding over some backend.
///
/// Output length equals input length and order is preserved; every
/// vector has length `dimension()`. The abstraction performs no silent
/// input truncation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
    fn dimension(&self) -> usize;
    fn model(&self) -> &str;
}

/// Uniform chat/stream interface over LLM backends.
///
/// Message order is preserved; output is the final assistant turn only.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError>;

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatStream, LlmError>;

    /// Approximate token count (4 chars/token heuristic by default)
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    fn model(&self) -> &str;
}

// ---- shared HTTP plumbing ----

pub(crate) fn map_transport(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Http(e.to_string())
    }
}

pub(crate) fn map_embed_transport(e: reqwest::Error) -> EmbeddingError {
    EmbeddingError::Http(e.to_string())
}

/// Map a non-success HTTP status to an error. The body is truncated and
/// never includes request headers, so keys cannot leak through errors.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(200).collect();
    if status.as_u16() == 429 {
        Err(LlmError::RateLimited)
    } else if status.is_client_error() {
        Err(LlmError::UpstreamRefused(format!("{status}: {detail}")))
    } else {
        Err(LlmError::Http(format!("{status}: {detail}")))
    }
}

// ---- server-sent events ----

/// What one SSE data payload contributes to the stream
pub(crate) enum SseAction {
    Delta(String),
    Skip,
    Done,
}

/// Adapts a byte stream of SSE events into a [`ChatStream`]. Events are
/// split on blank lines; `data:` payloads go through the
/// provider-specific parse function.
pub(crate) struct SseDeltaStream {
    inner: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    buf: String,
    done: bool,
    parse: fn(&str) -> SseAction,
}

impl SseDeltaStream {
    pub(crate) fn chat_stream(resp: reqwest::Response, parse: fn(&str) -> SseAction) -> ChatStream {
        use futures::StreamExt;
        let inner = resp.bytes_stream().map(|r| r.map(|b| b.to_vec()));
        Box::pin(Self {
            inner: Box::pin(inner),
            buf: String::new(),
            done: false,
            parse,
        })
    }
}

impl Stream for SseDeltaStream {
    type Item = Result<String, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            while let Some(pos) = this.buf.find("\n\n") {
                let event: String = this.buf.drain(..pos + 2).collect();
                match parse_sse_event(&event, this.parse) {
                    SseAction::Delta(delta) => return Poll::Ready(Some(Ok(delta))),
                    SseAction::Skip => {}
                    SseAction::Done => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                }
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).replace('\r', "");
                    this.buf.push_str(&text);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(map_transport(e))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

pub(crate) fn parse_sse_event(event: &str, parse: fn(&str) -> SseAction) -> SseAction {
    let payload: Vec<&str> = event
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if payload.is_empty() {
        return SseAction::Skip;
    }
    parse(payload.join("\n").as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_parse(data: &str) -> SseAction {
        if data == "[DONE]" {
            SseAction::Done
        } else {
            SseAction::Delta(data.to_string())
        }
    }

    #[test]
    fn sse_event_extracts_data_lines() {
        let action = parse_sse_event("event: ping\ndata: hello\n\n", echo_parse);
        assert!(matches!(action, SseAction::Delta(d) if d == "hello"));
    }

    #[test]
    fn sse_event_without_data_is_skipped() {
        let action = parse_sse_event("event: ping\n\n", echo_parse);
        assert!(matches!(action, SseAction::Skip));
    }

    #[test]
    fn sse_event_joins_multiple_data_lines() {
        let action = parse_sse_event("data: a\ndata: b\n\n", echo_parse);
        assert!(matches!(action, SseAction::Delta(d) if d == "a\nb"));
    }

    #[test]
    fn sse_done_marker() {
        let action = parse_sse_event("data: [DONE]\n\n", echo_parse);
        assert!(matches!(action, SseAction::Done));
    }

    #[test]
    fn default_token_count_is_quarter_of_chars() {
        struct Fake;
        #[async_trait]
        impl LlmProvider for Fake {
            async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<String, LlmError> {
                Ok(String::new())
            }
            async fn stream(
                &self,
                _: &[ChatMessage],
                _: &ChatOptions,
            ) -> Result<ChatStream, LlmError> {
                Err(LlmError::UpstreamRefused("no stream".into()))
            }
            fn model(&self) -> &str {
                "fake"
            }
        }
        assert_eq!(Fake.count_tokens(""), 0);
        assert_eq!(Fake.count_tokens("abcd"), 1);
        assert_eq!(Fake.count_tokens("abcde"), 2);
    }
}
