//! Deterministic in-process test double for [`LlmProvider`].
//!
//! Never makes a network call. Useful for exercising the gateway's
//! strategy router, cognitive patterns, and budget accounting without a
//! live provider — `chat` echoes the last user message back with a fixed
//! prefix, `chat_stream` replays it token-by-token, and `embeddings`
//! derives a deterministic vector from each input's hash.

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use shannon_domain::capability::{LlmCapabilities, ToolSupport};
use shannon_domain::error::Result;
use shannon_domain::stream::{BoxStream, StreamEvent, Usage};

pub struct EchoProvider {
    id: String,
    capabilities: LlmCapabilities,
}

impl EchoProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: true,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(32_000),
                max_output_tokens: Some(4_096),
            },
        }
    }

    fn echo_text(req: &ChatRequest) -> String {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, shannon_domain::tool::Role::User))
            .map(|m| m.content.extract_all_text())
            .unwrap_or_default();
        format!("echo: {last_user}")
    }
}

#[async_trait::async_trait]
impl LlmProvider for EchoProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let content = Self::echo_text(&req);
        let prompt_tokens = req
            .messages
            .iter()
            .map(|m| m.content.extract_all_text().split_whitespace().count() as u32)
            .sum();
        let completion_tokens = content.split_whitespace().count() as u32;
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            model: req.model.unwrap_or_else(|| format!("{}-echo", self.id)),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let content = Self::echo_text(&req);
        let tokens: Vec<String> = content
            .split_whitespace()
            .map(|s| format!("{s} "))
            .collect();
        let completion_tokens = tokens.len() as u32;
        let stream = async_stream::stream! {
            for tok in tokens {
                yield Ok(StreamEvent::Token { text: tok });
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 0,
                    completion_tokens,
                    total_tokens: completion_tokens,
                }),
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let embeddings = req.input.iter().map(|text| deterministic_vector(text)).collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Build an 8-dimensional pseudo-embedding from a string hash so repeated
/// calls with the same input are stable (needed for classifier/cache tests).
fn deterministic_vector(text: &str) -> Vec<f32> {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();
    (0..8)
        .map(|i| {
            let shifted = seed.rotate_left(i * 8);
            (shifted % 1000) as f32 / 1000.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shannon_domain::tool::Message;

    #[tokio::test]
    async fn chat_echoes_last_user_message() {
        let provider = EchoProvider::new("echo");
        let req = ChatRequest {
            messages: vec![Message::system("be terse"), Message::user("ping")],
            ..Default::default()
        };
        let resp = provider.chat(req).await.unwrap();
        assert_eq!(resp.content, "echo: ping");
        assert!(resp.usage.is_some());
    }

    #[tokio::test]
    async fn chat_stream_emits_tokens_then_done() {
        use futures_util::StreamExt;
        let provider = EchoProvider::new("echo");
        let req = ChatRequest {
            messages: vec![Message::user("one two three")],
            ..Default::default()
        };
        let mut stream = provider.chat_stream(req).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
        assert_eq!(events.len(), 4); // 3 tokens + done
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let provider = EchoProvider::new("echo");
        let req = EmbeddingsRequest {
            input: vec!["hello".into(), "hello".into()],
            model: None,
        };
        let resp = provider.embeddings(req).await.unwrap();
        assert_eq!(resp.embeddings[0], resp.embeddings[1]);
    }

    #[test]
    fn provider_id_and_capabilities() {
        let provider = EchoProvider::new("echo-1");
        assert_eq!(provider.provider_id(), "echo-1");
        assert!(provider.capabilities().supports_streaming);
    }
}
