//! Strategy Router (C6, spec.md §4.6): load config → budget preflight →
//! decompose → apply overrides → select strategy → apply degradation.
//! Dispatch-as-child-workflow and on-return bookkeeping (steps 7-8) belong
//! to `workflow.rs`, which consumes the [`RoutingDecision`] this module
//! produces.

use std::collections::HashMap;
use std::sync::Arc;

use shannon_domain::capability::ModelRole;
use shannon_domain::config::RouterConfig;
use shannon_domain::error::{Error, Result};
use shannon_domain::strategy::{default_registry, PatternType, StrategyRegistryEntry};
use shannon_domain::tool::Message;
use shannon_providers::classifier::EmbeddingClassifier;
use shannon_providers::router::LlmRouter;
use shannon_providers::traits::ChatRequest;
use uuid::Uuid;

use crate::runtime::budget::BudgetTracker;
use crate::runtime::primitives::Subtask;

/// Caller-supplied overrides the router must honor without ever
/// clobbering them (spec.md §4.6 step 4: "never overwrites explicit
/// context values").
#[derive(Debug, Clone, Default)]
pub struct RouteOverrides {
    pub mode: Option<String>,
    pub cognitive_strategy: Option<PatternType>,
    /// `research_strategy` preset (spec.md §4.6 step 4): seeds research
    /// knobs when the task lands on the Research pattern, unless the
    /// caller already set them explicitly.
    pub research_strategy: bool,
    pub max_concurrent_agents: Option<u32>,
}

/// What the decomposition activity hands back (spec.md §4.6 step 3).
#[derive(Debug, Clone)]
pub struct DecomposedTask {
    pub complexity_score: f64,
    pub mode: String,
    pub subtasks: Vec<Subtask>,
    pub cognitive_strategy: Option<PatternType>,
}

/// The router's final output: which pattern to run, the subtask plan,
/// and the token budget it was granted after any degradation.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub mode: String,
    pub subtasks: Vec<Subtask>,
    pub pattern: PatternType,
    pub degraded_from: Option<PatternType>,
    pub token_budget: u64,
    pub complexity_score: f64,
    /// Seeded research knobs when `research_strategy` applied (spec.md
    /// §4.6 step 4); empty object otherwise.
    pub preset_overrides: serde_json::Value,
    /// Backpressure delay the preflight decision carried (spec.md §4.3:
    /// "a proceed with positive delay requires the caller to sleep before
    /// scheduling"). The orchestrator sleeps this off and emits
    /// `BUDGET_THRESHOLD` before dispatching the chosen primitive.
    pub backpressure_delay_ms: u64,
    pub pressure_level: shannon_domain::budget::PressureLevel,
}

pub struct StrategyRouter {
    config: RouterConfig,
    registry: Vec<StrategyRegistryEntry>,
    llm: Arc<LlmRouter>,
    budget: Arc<BudgetTracker>,
    classifier: Option<Arc<EmbeddingClassifier>>,
}

impl StrategyRouter {
    pub fn new(
        config: RouterConfig,
        llm: Arc<LlmRouter>,
        budget: Arc<BudgetTracker>,
        classifier: Option<Arc<EmbeddingClassifier>>,
    ) -> Self {
        Self { config, registry: default_registry(), llm, budget, classifier }
    }

    /// Runs steps 1-6 of spec.md §4.6. Step 2 (budget preflight) can
    /// reject outright via `Error::BudgetPressure`/`ResourceExhausted`;
    /// everything after that point is best-effort degradation, never a
    /// hard failure.
    pub async fn route(
        &self,
        task_id: Uuid,
        user_id: &str,
        session_id: Option<String>,
        query: &str,
        overrides: RouteOverrides,
    ) -> Result<RoutingDecision> {
        // Step 3 runs before the preflight so the preflight has a real
        // subtask count/complexity estimate to price against, rather than
        // guessing at 1 subtask and re-pricing after the fact.
        let decomposed = self.decompose(query).await?;

        let mode = overrides.mode.clone().unwrap_or_else(|| decomposed.mode.clone());

        // Step 2: budget preflight.
        let backpressure = self.budget.preflight(
            user_id,
            session_id,
            task_id,
            &mode,
            decomposed.subtasks.len().max(1) as u64,
            decomposed.complexity_score,
        );
        if !backpressure.can_proceed {
            return Err(Error::BudgetPressure {
                delay_ms: backpressure.delay_ms,
                pressure_level: backpressure.pressure_level.into(),
            });
        }

        // Step 5: select strategy — honor an explicit hint (caller
        // override first, then the decomposition's own hint), otherwise
        // fall back to the mode's configured default pattern.
        let hint = overrides.cognitive_strategy.or(decomposed.cognitive_strategy);
        let selected = match hint {
            Some(p) => p,
            None => self.pattern_for_mode(&mode),
        };

        // Step 6: degrade if the preflight's granted budget falls short of
        // the selected pattern's degradation threshold (spec.md §4.3).
        let (pattern, degraded_from, token_budget) =
            self.apply_degradation(selected, backpressure.estimated_tokens);

        let preset_overrides = self.research_preset(&overrides, pattern);

        Ok(RoutingDecision {
            mode,
            subtasks: decomposed.subtasks,
            pattern,
            degraded_from,
            token_budget,
            complexity_score: decomposed.complexity_score,
            preset_overrides,
            backpressure_delay_ms: backpressure.delay_ms,
            pressure_level: backpressure.pressure_level,
        })
    }

    /// Step 3: ask the planner model to break the query into subtasks and
    /// propose a mode/strategy. Falls back to a single whole-query
    /// subtask under `"standard"` mode if the model's response can't be
    /// parsed as the expected shape — a malformed decomposition should
    /// degrade gracefully, not abort the task.
    async fn decompose(&self, query: &str) -> Result<DecomposedTask> {
        if let Some(classifier) = &self.classifier {
            if let Ok(classified) = classifier.classify(query).await {
                let mode = classified.tier.as_mode_str().to_string();
                return Ok(DecomposedTask {
                    complexity_score: classified.score.clamp(0.0, 1.0),
                    mode,
                    subtasks: vec![single_subtask(query)],
                    cognitive_strategy: None,
                });
            }
        }

        let prompt = format!(
            "Decompose this task into an ordered list of subtasks. Respond as JSON with keys \
             \"complexity_score\" (0.0-1.0), \"mode\" (one of simple, standard, complex, supervisor), \
             \"subtasks\" (array of {{\"id\",\"description\",\"depends_on\"}}), and optionally \
             \"cognitive_strategy\" (one of react, chain_of_thought, tree_of_thoughts, debate, \
             reflection, research, browser).\n\nTask: {query}"
        );
        let req = ChatRequest {
            messages: vec![Message::system("You decompose tasks for an orchestration engine."), Message::user(prompt)],
            json_mode: true,
            temperature: Some(0.0),
            max_tokens: Some(512),
            ..Default::default()
        };

        let resp = self.llm.chat_for_role(ModelRole::Planner, req).await?;
        Ok(parse_decomposition(&resp.content, query))
    }

    fn pattern_for_mode(&self, mode: &str) -> PatternType {
        let name = self.config.mode_defaults.get(mode).map(String::as_str).unwrap_or("react");
        match name {
            "chain_of_thought" => PatternType::ChainOfThought,
            "tree_of_thoughts" => PatternType::TreeOfThoughts,
            "debate" => PatternType::Debate,
            "reflection" => PatternType::Reflection,
            "research" => PatternType::Research,
            "browser" => PatternType::Browser,
            // `"hybrid"` (supervisor mode) runs each subtask through its
            // own pattern via the Hybrid primitive; React is the sane
            // per-subtask default absent a more specific hint.
            _ => PatternType::React,
        }
    }

    /// Step 6: walk the degradation chain while the preflight's granted
    /// budget sits below the current pattern's degradation threshold
    /// (spec.md §4.3: `TreeOfThoughts(8000) → ChainOfThought(3000) →
    /// React`, etc.) — a pattern only survives once the budget clears its
    /// own threshold, or the chain bottoms out at a pattern with no
    /// successor (e.g. React).
    fn apply_degradation(&self, mut pattern: PatternType, budget: u64) -> (PatternType, Option<PatternType>, u64) {
        let original = pattern;
        loop {
            let entry = match self.registry.iter().find(|e| e.pattern_type == pattern) {
                Some(e) => e,
                None => break,
            };
            if budget >= entry.degradation_threshold || entry.degradation_successor.is_none() {
                break;
            }
            pattern = entry.degradation_successor.unwrap();
        }
        let degraded_from = if pattern == original { None } else { Some(original) };
        (pattern, degraded_from, budget)
    }

    /// Seeds `max_concurrent_agents`/`verification`/`react_max_iterations`/
    /// gap-filling knobs when `research_strategy` is requested and the
    /// resolved pattern is Research, without overwriting anything the
    /// caller already set explicitly (spec.md §4.6 step 4).
    fn research_preset(&self, overrides: &RouteOverrides, pattern: PatternType) -> serde_json::Value {
        if !overrides.research_strategy || pattern != PatternType::Research {
            return serde_json::json!({});
        }
        serde_json::json!({
            "max_concurrent_agents": overrides.max_concurrent_agents.unwrap_or(4),
            "verification": true,
            "react_max_iterations": 8,
            "gap_filling": true,
        })
    }
}

fn single_subtask(query: &str) -> Subtask {
    Subtask { id: "0".to_string(), index: 0, description: query.to_string(), depends_on: Vec::new() }
}

fn parse_decomposition(content: &str, query: &str) -> DecomposedTask {
    let value: Option<serde_json::Value> = serde_json::from_str(content).ok();
    let Some(value) = value else {
        return DecomposedTask {
            complexity_score: 0.5,
            mode: "standard".to_string(),
            subtasks: vec![single_subtask(query)],
            cognitive_strategy: None,
        };
    };

    let complexity_score = value.get("complexity_score").and_then(|v| v.as_f64()).unwrap_or(0.5).clamp(0.0, 1.0);
    let mode = value.get("mode").and_then(|v| v.as_str()).unwrap_or("standard").to_string();
    let cognitive_strategy = value
        .get("cognitive_strategy")
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok());

    let subtasks = value
        .get("subtasks")
        .and_then(|v| v.as_array())
        .filter(|arr| !arr.is_empty())
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(index, item)| {
                    let id = item
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| index.to_string());
                    Subtask {
                        id,
                        index,
                        description: item.get("description").and_then(|v| v.as_str()).unwrap_or(query).to_string(),
                        depends_on: item
                            .get("depends_on")
                            .and_then(|v| v.as_array())
                            .map(|deps| deps.iter().filter_map(|d| d.as_str().map(str::to_string)).collect())
                            .unwrap_or_default(),
                    }
                })
                .collect()
        })
        .unwrap_or_else(|| vec![single_subtask(query)]);

    DecomposedTask { complexity_score, mode, subtasks, cognitive_strategy }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_falls_back_to_single_subtask() {
        let decomposed = parse_decomposition("not json", "do the thing");
        assert_eq!(decomposed.subtasks.len(), 1);
        assert_eq!(decomposed.mode, "standard");
    }

    #[test]
    fn parses_well_formed_decomposition() {
        let content = r#"{"complexity_score":0.9,"mode":"complex","subtasks":[{"id":"a","description":"step one","depends_on":[]},{"id":"b","description":"step two","depends_on":["a"]}],"cognitive_strategy":"debate"}"#;
        let decomposed = parse_decomposition(content, "ignored");
        assert_eq!(decomposed.subtasks.len(), 2);
        assert_eq!(decomposed.subtasks[1].depends_on, vec!["a".to_string()]);
        assert_eq!(decomposed.cognitive_strategy, Some(PatternType::Debate));
        assert!((decomposed.complexity_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn empty_subtasks_array_falls_back_to_whole_query() {
        let content = r#"{"complexity_score":0.2,"mode":"simple","subtasks":[]}"#;
        let decomposed = parse_decomposition(content, "whole query text");
        assert_eq!(decomposed.subtasks.len(), 1);
        assert_eq!(decomposed.subtasks[0].description, "whole query text");
    }

    fn router() -> StrategyRouter {
        let llm_config = shannon_domain::config::LlmConfig::default();
        let llm = Arc::new(LlmRouter::from_config(&llm_config));
        let budget = Arc::new(BudgetTracker::new(
            shannon_domain::config::BudgetConfig::default(),
            shannon_domain::config::RateLimitConfig::default(),
        ));
        StrategyRouter::new(RouterConfig::default(), llm, budget, None)
    }

    #[test]
    fn pattern_for_mode_follows_configured_defaults() {
        let r = router();
        assert_eq!(r.pattern_for_mode("simple"), PatternType::React);
        assert_eq!(r.pattern_for_mode("complex"), PatternType::TreeOfThoughts);
        assert_eq!(r.pattern_for_mode("supervisor"), PatternType::React);
    }

    #[test]
    fn degradation_kicks_in_when_budget_is_starved() {
        let r = router();
        let (pattern, degraded_from, _) = r.apply_degradation(PatternType::TreeOfThoughts, 100);
        assert_ne!(pattern, PatternType::TreeOfThoughts);
        assert_eq!(degraded_from, Some(PatternType::TreeOfThoughts));
    }

    #[test]
    fn no_degradation_when_budget_clears_threshold() {
        let r = router();
        let (pattern, degraded_from, _) = r.apply_degradation(PatternType::React, 100);
        assert_eq!(pattern, PatternType::React);
        assert_eq!(degraded_from, None);
    }

    /// Scenario F: TreeOfThoughts has a degradation_threshold of 8000; a
    /// preflight budget of 6000 sits below it, so the decision must fall
    /// through to ChainOfThought (whose own threshold, 3000, the budget
    /// clears) rather than degrading all the way to React.
    #[test]
    fn scenario_f_budget_below_tree_of_thoughts_threshold_degrades_to_chain_of_thought() {
        let r = router();
        let (pattern, degraded_from, token_budget) = r.apply_degradation(PatternType::TreeOfThoughts, 6_000);
        assert_eq!(pattern, PatternType::ChainOfThought);
        assert_eq!(degraded_from, Some(PatternType::TreeOfThoughts));
        assert_eq!(token_budget, 6_000);
    }

    #[test]
    fn budget_above_threshold_keeps_original_pattern() {
        let r = router();
        let (pattern, degraded_from, _) = r.apply_degradation(PatternType::TreeOfThoughts, 9_000);
        assert_eq!(pattern, PatternType::TreeOfThoughts);
        assert_eq!(degraded_from, None);
    }

    #[test]
    fn research_preset_only_applies_to_research_pattern() {
        let r = router();
        let overrides = RouteOverrides { research_strategy: true, ..Default::default() };
        let preset = r.research_preset(&overrides, PatternType::Research);
        assert_eq!(preset["verification"], serde_json::json!(true));
        let empty = r.research_preset(&overrides, PatternType::React);
        assert_eq!(empty, serde_json::json!({}));
    }
}
