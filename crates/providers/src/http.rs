//! Generic OpenAI-compatible HTTP provider adapter.
//!
//! Most self-hosted and third-party endpoints (OpenAI itself, vLLM,
//! Ollama's `/v1` surface, OpenRouter, Together) speak the same
//! `/chat/completions` wire format. Rather than hand-writing a vendor
//! client per provider, this single adapter covers all of them — the
//! distinguishing bits (base URL, auth mode, default model) come from
//! [`ProviderConfig`].

use crate::sse::sse_response_stream;
use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use serde::{Deserialize, Serialize};
use shannon_domain::capability::LlmCapabilities;
use shannon_domain::config::{AuthMode, ProviderConfig};
use shannon_domain::error::{Error, Result};
use shannon_domain::stream::{BoxStream, StreamEvent, Usage};
use shannon_domain::tool::{Message, MessageContent, Role, ToolCall, ToolDefinition};
use std::time::Duration;

pub struct HttpProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    auth_mode: AuthMode,
    default_model: Option<String>,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Build a provider client from a registered connection. Resolves the
    /// API key eagerly so a misconfigured `env`/`keys` surfaces at startup
    /// (as a [`ProviderRegistry::record_init_error`] entry) rather than on
    /// the first request.
    pub fn new(config: &ProviderConfig, capabilities: LlmCapabilities, timeout_ms: u64) -> Result<Self> {
        let api_key = match config.auth.mode {
            AuthMode::None => None,
            _ => Some(resolve_api_key(&config.auth)?),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            id: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_mode: config.auth.mode,
            default_model: config.default_model.clone(),
            capabilities,
            client,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.api_key, self.auth_mode) {
            (Some(key), AuthMode::QueryParam) => builder.query(&[("key", key.as_str())]),
            (Some(key), _) => builder.bearer_auth(key),
            (None, _) => builder,
        }
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages.iter().map(WireMessage::from_message).collect()
    }

    fn wire_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function",
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn model_name(&self, req_model: &Option<String>) -> String {
        req_model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    fn build_request(&self, req: &ChatRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: self.model_name(&req.model),
            messages: Self::wire_messages(&req.messages),
            tools: if req.tools.is_empty() { None } else { Some(Self::wire_tools(&req.tools)) },
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then(|| ResponseFormat { r#type: "json_object" }),
            stream,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let wire = self.build_request(&req, false);
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(&wire))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "{} returned {status}: {body}",
                self.id
            )));
        }

        let body: WireResponse = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("invalid response from {}: {e}", self.id)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UpstreamUnavailable(format!("{} returned no choices", self.id)))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .flatten()
                .map(|c| ToolCall {
                    call_id: c.id,
                    tool_name: c.function.name,
                    arguments: serde_json::from_str(&c.function.arguments).unwrap_or(serde_json::Value::Null),
                })
                .collect(),
            usage: body.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: body.model.unwrap_or_else(|| wire.model.clone()),
            finish_reason: choice.finish_reason,
        })
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let wire = self.build_request(&req, true);
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(&wire))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "{} returned {status}: {body}",
                self.id
            )));
        }

        Ok(sse_response_stream(resp, parse_chat_chunk))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = format!("{}/embeddings", self.base_url);
        let body = WireEmbeddingsRequest {
            model: req.model.or_else(|| self.default_model.clone()).unwrap_or_else(|| "default".into()),
            input: req.input,
        };
        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "{} returned {status}: {text}",
                self.id
            )));
        }

        let parsed: WireEmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("invalid embeddings response from {}: {e}", self.id)))?;
        Ok(EmbeddingsResponse {
            embeddings: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Parse one SSE `data:` payload from the `/chat/completions` stream into
/// zero or more [`StreamEvent`]s. `[DONE]` maps to the terminal event;
/// everything else is expected to be a `WireStreamChunk`.
fn parse_chat_chunk(data: &str) -> Vec<Result<StreamEvent>> {
    if data == "[DONE]" {
        return vec![Ok(StreamEvent::Done { usage: None, finish_reason: None })];
    }
    let chunk: WireStreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => return vec![Err(Error::UpstreamUnavailable(format!("malformed stream chunk: {e}")))],
    };

    let mut events = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token { text }));
            }
        }
        for call in choice.delta.tool_calls.into_iter().flatten() {
            events.push(Ok(StreamEvent::ToolCallDelta {
                call_id: call.id.unwrap_or_default(),
                delta: call.function.and_then(|f| f.arguments).unwrap_or_default(),
            }));
        }
        if let Some(reason) = choice.finish_reason {
            events.push(Ok(StreamEvent::Done {
                usage: chunk.usage.map(|u| Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                }),
                finish_reason: Some(reason),
            }));
        }
    }
    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire format (OpenAI `/v1/chat/completions`-compatible)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl WireMessage {
    fn from_message(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            content: match &m.content {
                MessageContent::Text(t) => Some(t.clone()),
                MessageContent::Parts(_) => Some(m.content.extract_all_text()),
            },
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireToolCallFunction,
}

#[derive(Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireDeltaToolCall>>,
}

#[derive(Deserialize)]
struct WireDeltaToolCall {
    id: Option<String>,
    function: Option<WireDeltaFunction>,
}

#[derive(Deserialize)]
struct WireDeltaFunction {
    arguments: Option<String>,
}

#[derive(Serialize)]
struct WireEmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct WireEmbeddingsResponse {
    data: Vec<WireEmbeddingDatum>,
}

#[derive(Deserialize)]
struct WireEmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chat_chunk_done_sentinel() {
        let events = parse_chat_chunk("[DONE]");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn parse_chat_chunk_token_delta() {
        let data = r#"{"choices":[{"delta":{"content":"hel"},"finish_reason":null}]}"#;
        let events = parse_chat_chunk(data);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(StreamEvent::Token { text }) => assert_eq!(text, "hel"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_chat_chunk_finish_reason_emits_done() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#;
        let events = parse_chat_chunk(data);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn parse_chat_chunk_malformed_json_errors() {
        let events = parse_chat_chunk("{not json");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    #[test]
    fn wire_message_from_text_message() {
        let m = Message::user("hi there");
        let wire = WireMessage::from_message(&m);
        assert_eq!(wire.role, "user");
        assert_eq!(wire.content.as_deref(), Some("hi there"));
    }
}
