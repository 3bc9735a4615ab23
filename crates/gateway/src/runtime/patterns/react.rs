//! ReAct pattern (spec.md §4.5): Thought → Action → Observation, looped.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

/// Default bound on Thought/Action/Observation cycles (spec.md §4.5).
const DEFAULT_MAX_ITERATIONS: usize = 8;
/// How many recent observations stay in context, keeping the prompt bounded.
const OBSERVATION_WINDOW: usize = 3;

const TERMINATION_MARKERS: &[&str] = &["final answer:", "task complete", "done."];

pub struct ReactPattern;

#[async_trait]
impl Pattern for ReactPattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::React
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        let mut observations: Vec<String> = Vec::new();
        let mut tokens_used: u64 = 0;
        let mut last_thought = String::new();

        for iteration in 0..DEFAULT_MAX_ITERATIONS {
            if ctx.control.is_cancel_requested(ctx.workflow_id) {
                return Err(shannon_domain::error::Error::Cancelled);
            }

            let window = observations.iter().rev().take(OBSERVATION_WINDOW).rev().cloned().collect::<Vec<_>>().join("\n");
            let prompt = format!(
                "Query: {query}\nPrior context: {prior_context}\nRecent observations:\n{window}\n\nThink step by step (Thought), decide on an Action, then state an Observation. \
                 If you have a final answer, begin a line with 'Final Answer:'."
            );

            emit(ctx, options, EventType::AgentThinking, Some(format!("react iteration {iteration}")));

            let req = ChatRequest {
                messages: vec![Message::system("You are a ReAct reasoning agent."), Message::user(prompt)],
                temperature: Some(0.3),
                max_tokens: Some((options.token_budget / DEFAULT_MAX_ITERATIONS as u64).max(128) as u32),
                ..Default::default()
            };

            let resp = ctx.router.chat_for_role(options.model_role, req).await?;
            tokens_used += resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
            last_thought = resp.content.clone();

            if !resp.tool_calls.is_empty() {
                for tc in &resp.tool_calls {
                    emit(ctx, options, EventType::ToolInvoked, Some(tc.tool_name.clone()));
                }
                // No tool runtime is wired into this pattern layer (spec.md
                // §6.4 scopes tool execution as an external collaborator);
                // record the call as its own observation so the loop can
                // still terminate or continue on the next iteration.
                emit(ctx, options, EventType::ToolObservation, Some("tool call recorded, no executor attached".into()));
                observations.push(format!("Action: {} (unexecuted)", resp.tool_calls[0].tool_name));
                continue;
            }

            let lower = resp.content.to_lowercase();
            if TERMINATION_MARKERS.iter().any(|m| lower.contains(m)) {
                return Ok(PatternResult {
                    result: resp.content,
                    tokens_used,
                    confidence: 0.8,
                    metadata: serde_json::json!({ "iterations": iteration + 1 }),
                });
            }

            observations.push(resp.content);
        }

        Ok(PatternResult {
            result: last_thought,
            tokens_used,
            confidence: 0.5,
            metadata: serde_json::json!({ "iterations": DEFAULT_MAX_ITERATIONS, "exhausted": true }),
        })
    }
}
