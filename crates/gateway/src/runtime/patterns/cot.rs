//! Chain of Thought pattern (spec.md §4.5): one structured reasoning call,
//! scored by a cheap lexical heuristic, with an optional clarification
//! re-query when confidence comes in low.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

const STEP_MARKERS: &[&str] = &["→", "step", "1.", "2.", "3."];
const CONCLUSION_MARKERS: &[&str] = &["therefore:", "final answer:", "in conclusion:", "result:"];
const CONNECTORS: &[&str] = &["therefore", "because", "since", "thus", "consequently", "hence"];

const CONFIDENCE_THRESHOLD: f64 = 0.7;

pub struct ChainOfThoughtPattern;

#[async_trait]
impl Pattern for ChainOfThoughtPattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::ChainOfThought
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        emit(ctx, options, EventType::AgentThinking, Some("chain of thought".into()));

        let (content, mut tokens_used) = ask(ctx, options, query, prior_context, options.token_budget).await?;
        let mut confidence = score_confidence(&content);

        if confidence < CONFIDENCE_THRESHOLD {
            let clarification = format!(
                "Your previous reasoning was unclear:\n{content}\n\nRe-answer '{query}' with explicit numbered steps and a clear final answer."
            );
            let (retry_content, retry_tokens) = ask(ctx, options, &clarification, prior_context, options.token_budget / 2).await?;
            tokens_used += retry_tokens;
            let retry_confidence = score_confidence(&retry_content);
            if retry_confidence > confidence {
                return Ok(PatternResult {
                    result: retry_content,
                    tokens_used,
                    confidence: retry_confidence,
                    metadata: serde_json::json!({ "re_queried": true }),
                });
            }
            confidence = confidence.max(retry_confidence);
        }

        Ok(PatternResult {
            result: content,
            tokens_used,
            confidence,
            metadata: serde_json::json!({ "re_queried": false }),
        })
    }
}

async fn ask(
    ctx: &PatternContext,
    options: &PatternOptions,
    query: &str,
    prior_context: &str,
    budget_tokens: u64,
) -> Result<(String, u64)> {
    let prompt = format!(
        "Prior context: {prior_context}\n\nAnswer step by step, then give your final answer on its own line starting with 'Final Answer:'.\n\nQuestion: {query}"
    );
    let req = ChatRequest {
        messages: vec![Message::system("You reason step by step before answering."), Message::user(prompt)],
        temperature: Some(0.2),
        max_tokens: Some(budget_tokens.max(64) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    Ok((resp.content, tokens))
}

/// Heuristic confidence from step count, connector density, explicit
/// structure, and conclusion presence, clamped to `[0, 1]` (spec.md §4.5).
fn score_confidence(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let step_count = STEP_MARKERS.iter().filter(|m| lower.contains(*m)).count();
    let connector_count = CONNECTORS.iter().filter(|c| lower.contains(*c)).count();
    let has_conclusion = CONCLUSION_MARKERS.iter().any(|m| lower.contains(m));

    let mut score = 0.0;
    score += (step_count as f64 * 0.1).min(0.4);
    score += (connector_count as f64 * 0.08).min(0.3);
    if has_conclusion {
        score += 0.3;
    }
    score.clamp(0.0, 1.0)
}
