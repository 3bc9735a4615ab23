//! Cognitive patterns (C5, spec.md §4.5): the seven reasoning strategies a
//! subtask can be dispatched through, behind one common interface.
//!
//! Grounded on the reference turn loop's tool-call dispatch idiom
//! (`crates/gateway/src/runtime/turn.rs` in the teacher, since deleted from
//! this workspace as dead weight once its logic was absorbed here):
//! per-iteration LLM activity via `LlmRouter::chat_for_role`, a bounded loop
//! counter, span-per-activity tracing, and event emission on each step.

pub mod browser;
pub mod cot;
pub mod debate;
pub mod react;
pub mod reflection;
pub mod research;
pub mod tot;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use shannon_domain::agent_execution::{AgentExecution, AgentExecutionState};
use shannon_domain::capability::ModelRole;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_providers::router::LlmRouter;
use uuid::Uuid;

use crate::runtime::control_state::ControlStateStore;
use crate::runtime::event_log::EventLog;
use crate::runtime::primitives::{Subtask, SubtaskExecutor};

/// Shared wiring every pattern needs: the LLM router, the event log to
/// narrate progress into, and the workflow/agent identity to tag events
/// with (spec.md §4.5 "Options carrying ... event-emission flag").
pub struct PatternContext {
    pub workflow_id: Uuid,
    pub agent_id: String,
    pub router: Arc<LlmRouter>,
    pub events: Arc<EventLog>,
    pub control: Arc<ControlStateStore>,
}

/// Per-invocation knobs (spec.md §4.5 "Options"): token budget, model tier,
/// user/session identity, and whether to emit streaming events at all.
#[derive(Debug, Clone)]
pub struct PatternOptions {
    pub token_budget: u64,
    pub model_role: ModelRole,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub emit_events: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            token_budget: 4000,
            model_role: ModelRole::Executor,
            user_id: String::new(),
            session_id: None,
            emit_events: true,
        }
    }
}

/// What every pattern hands back (spec.md §4.5 `PatternResult`).
#[derive(Debug, Clone)]
pub struct PatternResult {
    pub result: String,
    pub tokens_used: u64,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}

/// Common interface every cognitive pattern implements (spec.md §4.5).
#[async_trait]
pub trait Pattern: Send + Sync {
    fn pattern_type(&self) -> PatternType;

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult>;
}

/// Holds one boxed [`Pattern`] per [`PatternType`] (spec.md §4.5 "Pattern
/// registry").
pub struct PatternRegistry {
    patterns: HashMap<PatternType, Arc<dyn Pattern>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        let mut patterns: HashMap<PatternType, Arc<dyn Pattern>> = HashMap::new();
        patterns.insert(PatternType::React, Arc::new(react::ReactPattern));
        patterns.insert(PatternType::ChainOfThought, Arc::new(cot::ChainOfThoughtPattern));
        patterns.insert(PatternType::TreeOfThoughts, Arc::new(tot::TreeOfThoughtsPattern));
        patterns.insert(PatternType::Debate, Arc::new(debate::DebatePattern));
        patterns.insert(PatternType::Reflection, Arc::new(reflection::ReflectionPattern));
        patterns.insert(PatternType::Research, Arc::new(research::ResearchPattern));
        patterns.insert(PatternType::Browser, Arc::new(browser::BrowserPattern));
        Self { patterns }
    }

    pub fn get(&self, pattern_type: PatternType) -> Option<Arc<dyn Pattern>> {
        self.patterns.get(&pattern_type).cloned()
    }

    /// Default selector (spec.md §4.5): honor an explicit `pattern_hint`,
    /// otherwise fall back to the first registered pattern (`React`, the
    /// iteration order `new()` inserts it in).
    pub fn select(&self, pattern_hint: Option<PatternType>) -> Arc<dyn Pattern> {
        if let Some(hint) = pattern_hint {
            if let Some(p) = self.get(hint) {
                return p;
            }
        }
        self.get(PatternType::React).expect("React is always registered")
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges a selected [`Pattern`] into the [`SubtaskExecutor`] interface
/// the execution primitives (C4) drive, so a decomposition plan's subtasks
/// run through whichever pattern the strategy router (C6) chose for them.
pub struct PatternExecutor {
    pub registry: Arc<PatternRegistry>,
    pub router: Arc<LlmRouter>,
    pub events: Arc<EventLog>,
    pub control: Arc<ControlStateStore>,
    pub pattern_hint: Option<PatternType>,
    pub options: PatternOptions,
}

#[async_trait]
impl SubtaskExecutor for PatternExecutor {
    async fn execute(&self, workflow_id: Uuid, prior_context: &str, subtask: &Subtask) -> Result<AgentExecution> {
        let agent_id = AgentExecution::derive_agent_id(workflow_id, subtask.index);
        let pattern = self.registry.select(self.pattern_hint);
        let ctx = PatternContext {
            workflow_id,
            agent_id: agent_id.clone(),
            router: self.router.clone(),
            events: self.events.clone(),
            control: self.control.clone(),
        };

        let started = std::time::Instant::now();
        let outcome = pattern.execute(&ctx, &subtask.description, prior_context, &self.options).await;

        match outcome {
            Ok(result) => Ok(AgentExecution {
                agent_id,
                workflow_id,
                input_summary: subtask.description.clone(),
                output: Some(result.result),
                state: AgentExecutionState::Completed,
                input_tokens: 0,
                output_tokens: result.tokens_used,
                model: None,
                provider: None,
                duration_ms: started.elapsed().as_millis() as u64,
                tool_executions: Vec::new(),
            }),
            Err(e) => Ok(AgentExecution {
                agent_id,
                workflow_id,
                input_summary: subtask.description.clone(),
                output: Some(e.to_string()),
                state: AgentExecutionState::Failed,
                input_tokens: 0,
                output_tokens: 0,
                model: None,
                provider: None,
                duration_ms: started.elapsed().as_millis() as u64,
                tool_executions: Vec::new(),
            }),
        }
    }
}

/// Emit an `AGENT_THINKING` (or other) event if the options ask for it;
/// patterns call this instead of `events.append` directly so a caller that
/// set `emit_events = false` (e.g. a dry-run classifier probe) gets silence.
pub(crate) fn emit(ctx: &PatternContext, options: &PatternOptions, event_type: EventType, message: Option<String>) {
    if !options.emit_events {
        return;
    }
    let _ = ctx.events.append(ctx.workflow_id, event_type, Some(ctx.agent_id.clone()), message, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_honors_explicit_hint() {
        let registry = PatternRegistry::new();
        let p = registry.select(Some(PatternType::Debate));
        assert_eq!(p.pattern_type(), PatternType::Debate);
    }

    #[test]
    fn selector_falls_back_to_react() {
        let registry = PatternRegistry::new();
        let p = registry.select(None);
        assert_eq!(p.pattern_type(), PatternType::React);
    }

    #[test]
    fn unknown_hint_falls_back_too() {
        let mut patterns: HashMap<PatternType, Arc<dyn Pattern>> = HashMap::new();
        patterns.insert(PatternType::React, Arc::new(react::ReactPattern));
        let registry = PatternRegistry { patterns };
        let p = registry.select(Some(PatternType::Debate));
        assert_eq!(p.pattern_type(), PatternType::React);
    }
}
