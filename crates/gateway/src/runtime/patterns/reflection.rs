//! Reflection pattern (spec.md §4.5): answer, self-evaluate, and retry with
//! the critique folded in until the score clears a threshold or retries
//! run out.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

const CONFIDENCE_THRESHOLD: f64 = 0.7;
const DEFAULT_MAX_RETRIES: usize = 3;

pub struct ReflectionPattern;

#[async_trait]
impl Pattern for ReflectionPattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::Reflection
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        let mut tokens_used = 0u64;
        let mut answer = synthesize(ctx, options, query, prior_context, None).await?;
        tokens_used += answer.1;
        let mut feedback_history = Vec::new();

        for attempt in 0..DEFAULT_MAX_RETRIES {
            let (score, feedback, eval_tokens) = evaluate(ctx, options, query, &answer.0).await?;
            tokens_used += eval_tokens;
            emit(ctx, options, EventType::AgentThinking, Some(format!("reflection attempt {attempt} score {score:.2}")));

            if score >= CONFIDENCE_THRESHOLD || attempt == DEFAULT_MAX_RETRIES - 1 {
                return Ok(PatternResult {
                    result: answer.0,
                    tokens_used,
                    confidence: score,
                    metadata: serde_json::json!({ "attempts": attempt + 1, "feedback_history": feedback_history }),
                });
            }

            feedback_history.push(feedback.clone());
            answer = synthesize(ctx, options, query, prior_context, Some(&feedback)).await?;
            tokens_used += answer.1;
        }

        Ok(PatternResult {
            result: answer.0,
            tokens_used,
            confidence: 0.5,
            metadata: serde_json::json!({ "attempts": DEFAULT_MAX_RETRIES, "feedback_history": feedback_history }),
        })
    }
}

async fn synthesize(
    ctx: &PatternContext,
    options: &PatternOptions,
    query: &str,
    prior_context: &str,
    feedback: Option<&str>,
) -> Result<(String, u64)> {
    let prompt = match feedback {
        Some(f) => format!("Prior context: {prior_context}\n\nRevise your answer to '{query}' using this feedback:\n{f}"),
        None => format!("Prior context: {prior_context}\n\nAnswer: {query}"),
    };
    let req = ChatRequest {
        messages: vec![Message::system("You answer carefully and revise when critiqued."), Message::user(prompt)],
        temperature: Some(0.3),
        max_tokens: Some((options.token_budget / 2).max(128) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    Ok((resp.content, tokens))
}

/// Runs the `EvaluateResult` activity (spec.md §4.5): a second LLM call
/// that scores the candidate answer and names what's wrong with it.
async fn evaluate(ctx: &PatternContext, options: &PatternOptions, query: &str, candidate: &str) -> Result<(f64, String, u64)> {
    let prompt = format!(
        "Question: {query}\nCandidate answer: {candidate}\n\nScore this answer from 0.0 to 1.0 and explain what's missing. \
         Reply as 'SCORE: <number>\\nFEEDBACK: <text>'."
    );
    let req = ChatRequest {
        messages: vec![Message::system("You are a strict evaluator."), Message::user(prompt)],
        temperature: Some(0.0),
        max_tokens: Some(256),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    let (score, feedback) = parse_evaluation(&resp.content);
    Ok((score, feedback, tokens))
}

fn parse_evaluation(text: &str) -> (f64, String) {
    let mut score = 0.5;
    let mut feedback = text.to_string();
    for line in text.lines() {
        let lowered = line.to_lowercase();
        if let Some(rest) = lowered.strip_prefix("score:") {
            if let Ok(parsed) = rest.trim().parse::<f64>() {
                score = parsed.clamp(0.0, 1.0);
            }
        } else if lowered.starts_with("feedback:") {
            feedback = line["feedback:".len()..].trim().to_string();
        }
    }
    (score, feedback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_score_and_feedback_lines() {
        let (score, feedback) = parse_evaluation("SCORE: 0.42\nFEEDBACK: missing citations");
        assert!((score - 0.42).abs() < 1e-6);
        assert!(feedback.contains("missing citations"));
    }

    #[test]
    fn falls_back_to_midpoint_when_unparseable() {
        let (score, _) = parse_evaluation("not a structured response");
        assert!((score - 0.5).abs() < 1e-6);
    }
}
