use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy Router configuration (C6): complexity thresholds, degradation
// chains, and the tier classifier connection.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub thresholds: RouterThresholds,
    /// Mode → default pattern mapping (spec.md §4.6 step 5:
    /// `simple → ReAct`, `complex → ToT/Debate`, `supervisor → DAG`-like
    /// decomposition handled by Hybrid).
    #[serde(default = "d_mode_defaults")]
    pub mode_defaults: std::collections::HashMap<String, String>,
    /// How long the Hybrid primitive (C4) waits for a subtask's declared
    /// dependencies before failing that subtask outright. Bounds a cyclic
    /// `depends_on` graph, which would otherwise wait on itself forever.
    #[serde(default = "d_hybrid_dependency_wait_timeout_ms")]
    pub hybrid_dependency_wait_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            thresholds: RouterThresholds::default(),
            mode_defaults: d_mode_defaults(),
            hybrid_dependency_wait_timeout_ms: d_hybrid_dependency_wait_timeout_ms(),
        }
    }
}

fn d_hybrid_dependency_wait_timeout_ms() -> u64 {
    30_000
}

/// Task-complexity classifier connection (spec.md §4.6 step 3's
/// decomposition activity relies on a complexity score; the classifier
/// configured here feeds that score when an embedding-based classifier is
/// used instead of an LLM decomposition call).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub cache_ttl_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: "embedding-classifier".into(),
            endpoint: "http://localhost:11434".into(),
            cache_ttl_secs: 300,
        }
    }
}

/// Complexity-score thresholds used to choose among strategy tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterThresholds {
    pub simple_max_score: f64,
    pub complex_min_score: f64,
    pub escalate_token_threshold: usize,
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self {
            simple_max_score: 0.3,
            complex_min_score: 0.6,
            escalate_token_threshold: 8000,
        }
    }
}

fn d_mode_defaults() -> std::collections::HashMap<String, String> {
    let mut m = std::collections::HashMap::new();
    m.insert("simple".into(), "react".into());
    m.insert("standard".into(), "chain_of_thought".into());
    m.insert("complex".into(), "tree_of_thoughts".into());
    m.insert("supervisor".into(), "hybrid".into());
    m
}
