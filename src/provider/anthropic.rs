//! Anthropic messages-API chat provider

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    check_status, map_transport, ChatMessage, ChatOptions, ChatStream, LlmError, LlmProvider,
    Role, SseAction, SseDeltaStream,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

/// Chat via the Anthropic messages API.
///
/// System messages are lifted into the request's `system` field; the
/// rest map onto alternating user/assistant turns in order.
pub struct AnthropicChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicChat {
    pub fn new(base_url: Option<&str>, api_key: String, model: &str) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let wire: Vec<WireMessage> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect();

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: wire,
        };

        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(resp).await
    }
}

fn parse_stream_data(data: &str) -> SseAction {
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) if event.kind == "message_stop" => SseAction::Done,
        Ok(event) if event.kind == "content_block_delta" => event
            .delta
            .and_then(|d| d.text)
            .map_or(SseAction::Skip, SseAction::Delta),
        _ => SseAction::Skip,
    }
}

#[async_trait]
impl LlmProvider for AnthropicChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let resp = self.send(messages, options, false).await?;
        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        let text: String = body
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(LlmError::Decode("response carried no text blocks".into()));
        }
        Ok(text)
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
    fn stream_delta_parsed() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#;
        assert!(matches!(parse_stream_data(data), SseAction::Delta(d) if d == "hi"));
    }

    #[test]
    fn stream_stop_event() {
        let data = r#"{"type":"message_stop"}"#;
        assert!(matches!(parse_stream_data(data), SseAction::Done));
    }

    #[test]
    fn unrelated_events_skipped() {
        let data = r#"{"type":"message_start","message":{}}"#;
        assert!(matches!(parse_stream_data(data), SseAction::Skip));
        assert!(matches!(parse_stream_data("not json"), SseAction::Skip));
    }
}
