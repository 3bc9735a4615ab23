use serde::{Deserialize, Serialize};

/// Cognitive pattern implementations the Strategy Router can select
/// (spec.md §2 C5, GLOSSARY "Pattern").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    React,
    ChainOfThought,
    TreeOfThoughts,
    Debate,
    Reflection,
    Research,
    Browser,
}

/// An entry in the strategy registry (spec.md §3 "Strategy Registry
/// Entry"): pattern type, capability tags, a token-budget estimator, and a
/// degradation successor used when `budget < threshold[current]` (spec.md
/// §4.3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRegistryEntry {
    pub pattern_type: PatternType,
    pub capability_tags: Vec<String>,
    pub token_budget_estimator: TokenBudgetEstimator,
    pub degradation_threshold: u64,
    pub degradation_successor: Option<PatternType>,
}

/// A simple linear token-budget estimator: `base + per_subtask * subtasks`.
/// Kept as data (not a function pointer) so registry entries stay
/// serializable and config-loadable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenBudgetEstimator {
    pub base_tokens: u64,
    pub per_subtask_tokens: u64,
}

impl TokenBudgetEstimator {
    pub fn estimate(&self, subtask_count: u64) -> u64 {
        self.base_tokens + self.per_subtask_tokens * subtask_count
    }
}

/// The default degradation chains from spec.md §4.3:
/// `TreeOfThoughts → ChainOfThought → ReAct` and `Debate → Reflection →
/// ReAct`.
pub fn default_registry() -> Vec<StrategyRegistryEntry> {
    vec![
        StrategyRegistryEntry {
            pattern_type: PatternType::TreeOfThoughts,
            capability_tags: vec!["exploratory".into(), "best-first".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 2000, per_subtask_tokens: 1500 },
            degradation_threshold: 8000,
            degradation_successor: Some(PatternType::ChainOfThought),
        },
        StrategyRegistryEntry {
            pattern_type: PatternType::ChainOfThought,
            capability_tags: vec!["single-pass".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 800, per_subtask_tokens: 400 },
            degradation_threshold: 3000,
            degradation_successor: Some(PatternType::React),
        },
        StrategyRegistryEntry {
            pattern_type: PatternType::Debate,
            capability_tags: vec!["multi-agent".into(), "adversarial".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 1500, per_subtask_tokens: 1200 },
            degradation_threshold: 6000,
            degradation_successor: Some(PatternType::Reflection),
        },
        StrategyRegistryEntry {
            pattern_type: PatternType::Reflection,
            capability_tags: vec!["self-critique".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 1000, per_subtask_tokens: 500 },
            degradation_threshold: 2500,
            degradation_successor: Some(PatternType::React),
        },
        StrategyRegistryEntry {
            pattern_type: PatternType::React,
            capability_tags: vec!["tool-use".into(), "iterative".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 500, per_subtask_tokens: 300 },
            degradation_threshold: 0,
            degradation_successor: None,
        },
        StrategyRegistryEntry {
            pattern_type: PatternType::Research,
            capability_tags: vec!["search".into(), "citation".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 3000, per_subtask_tokens: 2000 },
            degradation_threshold: 10_000,
            degradation_successor: Some(PatternType::ChainOfThought),
        },
        StrategyRegistryEntry {
            pattern_type: PatternType::Browser,
            capability_tags: vec!["browser".into(), "tool-use".into()],
            token_budget_estimator: TokenBudgetEstimator { base_tokens: 1200, per_subtask_tokens: 800 },
            degradation_threshold: 5000,
            degradation_successor: Some(PatternType::React),
        },
    ]
}
