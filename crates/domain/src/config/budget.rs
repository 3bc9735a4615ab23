use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::budget::ComplexityMultipliers;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget & Rate Control configuration (C3): per-role limits, the
// complexity-multiplier table, and the backpressure delay table.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Per-role (mode label) token ceilings.
    #[serde(default = "d_per_role_limits")]
    pub per_role_token_limit: HashMap<String, u64>,
    #[serde(default)]
    pub complexity_multipliers: ComplexityMultipliers,
    #[serde(default)]
    pub backpressure: BackpressureTable,
    /// Max workflows with `status=running` admitted at once (spec.md
    /// §S.6 supplement: concurrency ceilings enforced at submission time).
    #[serde(default = "d_max_in_flight")]
    pub max_in_flight_workflows: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_role_token_limit: d_per_role_limits(),
            complexity_multipliers: ComplexityMultipliers::default(),
            backpressure: BackpressureTable::default(),
            max_in_flight_workflows: d_max_in_flight(),
        }
    }
}

/// Delay (ms) applied at each pressure tier before a workflow is allowed
/// to proceed (spec.md §4.3's `BackpressureResult{delay_ms}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackpressureTable {
    pub light_delay_ms: u64,
    pub medium_delay_ms: u64,
    pub severe_delay_ms: u64,
    /// Above this pressure no amount of delay helps; preflight rejects.
    pub reject_above_committed_ratio: f64,
}

impl Default for BackpressureTable {
    fn default() -> Self {
        Self {
            light_delay_ms: 0,
            medium_delay_ms: 500,
            severe_delay_ms: 2000,
            reject_above_committed_ratio: 0.95,
        }
    }
}

fn d_per_role_limits() -> HashMap<String, u64> {
    let mut m = HashMap::new();
    m.insert("simple".into(), 20_000);
    m.insert("standard".into(), 60_000);
    m.insert("complex".into(), 150_000);
    m.insert("supervisor".into(), 400_000);
    m
}

fn d_max_in_flight() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_limits_for_all_modes() {
        let cfg = BudgetConfig::default();
        for mode in ["simple", "standard", "complex", "supervisor"] {
            assert!(cfg.per_role_token_limit.contains_key(mode));
        }
    }

    #[test]
    fn max_in_flight_matches_reference_implementation_default() {
        assert_eq!(BudgetConfig::default().max_in_flight_workflows, 10);
    }

    #[test]
    fn backpressure_delays_increase_with_pressure() {
        let t = BackpressureTable::default();
        assert!(t.light_delay_ms <= t.medium_delay_ms);
        assert!(t.medium_delay_ms <= t.severe_delay_ms);
    }
}
