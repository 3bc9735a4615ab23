//! Browser pattern (spec.md §4.5): a single reason-and-act loop against a
//! browser tool surface, terminated by an explicit completion signal or a
//! no-progress detector. Screenshots are recorded as observations but
//! stripped from the reasoning history to keep prompts from growing
//! unbounded.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

const MAX_ITERATIONS: usize = 12;
const NO_PROGRESS_LIMIT: usize = 2;
const MIN_ITERATIONS_BEFORE_NO_PROGRESS_CHECK: usize = 2;
const COMPLETION_MARKERS: &[&str] = &["task complete", "final answer:", "done."];
const TOOL_INTENT_MARKERS: &[&str] = &["click(", "type(", "navigate(", "scroll(", "screenshot("];

pub struct BrowserPattern;

#[async_trait]
impl Pattern for BrowserPattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::Browser
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        let mut history: Vec<String> = vec![format!("Goal: {query}\nPrior context: {prior_context}")];
        let mut tokens_used = 0u64;
        let mut no_progress_streak = 0usize;

        for iteration in 0..MAX_ITERATIONS {
            if ctx.control.is_cancel_requested(ctx.workflow_id) {
                return Err(shannon_domain::error::Error::Cancelled);
            }

            let (response, step_tokens) = step(ctx, options, &history).await?;
            tokens_used += step_tokens;

            let lower = response.to_lowercase();
            let took_action = TOOL_INTENT_MARKERS.iter().any(|m| lower.contains(m));
            if took_action {
                emit(ctx, options, EventType::ToolInvoked, Some(format!("browser step {iteration}")));
                // A real browser tool executor would run the action here and
                // feed back a screenshot/DOM snapshot; this layer records the
                // intent as an observation without a tool runtime attached
                // (same boundary as the ReAct pattern's tool handling).
                emit(ctx, options, EventType::ToolObservation, Some("no browser executor attached".into()));
                no_progress_streak = 0;
            } else if iteration >= MIN_ITERATIONS_BEFORE_NO_PROGRESS_CHECK {
                no_progress_streak += 1;
            }

            // Screenshots are large and noise up reasoning; keep only a
            // short marker in history instead of the raw payload.
            let compacted = if lower.contains("screenshot(") {
                "[took a screenshot]".to_string()
            } else {
                response.clone()
            };
            history.push(compacted);

            if COMPLETION_MARKERS.iter().any(|m| lower.contains(m)) {
                return Ok(PatternResult {
                    result: response,
                    tokens_used,
                    confidence: 0.8,
                    metadata: serde_json::json!({ "iterations": iteration + 1, "terminated": "completion_marker" }),
                });
            }

            if no_progress_streak >= NO_PROGRESS_LIMIT {
                return Ok(PatternResult {
                    result: response,
                    tokens_used,
                    confidence: 0.4,
                    metadata: serde_json::json!({ "iterations": iteration + 1, "terminated": "no_progress" }),
                });
            }
        }

        Ok(PatternResult {
            result: history.last().cloned().unwrap_or_default(),
            tokens_used,
            confidence: 0.3,
            metadata: serde_json::json!({ "iterations": MAX_ITERATIONS, "terminated": "budget_exhausted" }),
        })
    }
}

async fn step(ctx: &PatternContext, options: &PatternOptions, history: &[String]) -> Result<(String, u64)> {
    let prompt = format!(
        "History so far:\n{}\n\nDecide the next browser action (e.g. navigate(url), click(selector), type(text), \
         scroll(dy), screenshot()) or declare 'Task complete' with your final answer.",
        history.join("\n---\n")
    );
    let req = ChatRequest {
        messages: vec![Message::system("You operate a browser one action at a time."), Message::user(prompt)],
        temperature: Some(0.2),
        max_tokens: Some((options.token_budget / MAX_ITERATIONS as u64).max(96) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    Ok((resp.content, tokens))
}
