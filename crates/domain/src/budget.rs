use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BudgetPressureLevel;

/// Per (user, session, task) token/cost preflight state (spec.md §3
/// "Budget Snapshot", §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub user_id: String,
    pub session_id: Option<String>,
    pub task_id: uuid::Uuid,
    pub reserved_tokens: u64,
    pub committed_tokens: u64,
    pub cost_accumulator: f64,
    pub pressure_level: PressureLevel,
    pub last_decision_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    None,
    Light,
    Medium,
    Severe,
}

impl From<PressureLevel> for BudgetPressureLevel {
    fn from(level: PressureLevel) -> Self {
        match level {
            PressureLevel::None | PressureLevel::Light => BudgetPressureLevel::Low,
            PressureLevel::Medium => BudgetPressureLevel::Medium,
            PressureLevel::Severe => BudgetPressureLevel::High,
        }
    }
}

/// Outcome of a token/cost budget preflight (spec.md §4.3).
///
/// A non-`can_proceed` outcome is fatal to the workflow; a `can_proceed`
/// with positive `delay_ms` requires the caller to sleep before scheduling
/// (spec.md §8 invariant 9: delay is bounded by the configured maximum).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackpressureResult {
    pub can_proceed: bool,
    pub delay_ms: u64,
    pub pressure_level: PressureLevel,
    /// The token estimate the preflight priced this task at (spec.md
    /// §4.3's "base × subtask-count × complexity multiplier"). This is
    /// the `budget` the degradation chain (§4.3, §4.6 step 6) walks
    /// against each pattern's `degradation_threshold` — not a per-pattern
    /// re-estimate.
    pub estimated_tokens: u64,
}

impl BackpressureResult {
    pub fn proceed(delay_ms: u64, pressure_level: PressureLevel, estimated_tokens: u64) -> Self {
        Self { can_proceed: true, delay_ms, pressure_level, estimated_tokens }
    }

    pub fn reject(pressure_level: PressureLevel, estimated_tokens: u64) -> Self {
        Self { can_proceed: false, delay_ms: 0, pressure_level, estimated_tokens }
    }
}

/// Complexity multiplier table used to turn a decomposition plan into a
/// token estimate (spec.md §4.3: `base × subtask_count × complexity
/// multiplier`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComplexityMultipliers {
    pub high_threshold: f64,
    pub high_multiplier: f64,
    pub medium_threshold: f64,
    pub medium_multiplier: f64,
    pub default_multiplier: f64,
}

impl Default for ComplexityMultipliers {
    fn default() -> Self {
        Self {
            high_threshold: 0.5,
            high_multiplier: 2.5,
            medium_threshold: 0.4,
            medium_multiplier: 1.5,
            default_multiplier: 1.0,
        }
    }
}

impl ComplexityMultipliers {
    pub fn multiplier_for(&self, complexity_score: f64) -> f64 {
        if complexity_score > self.high_threshold {
            self.high_multiplier
        } else if complexity_score > self.medium_threshold {
            self.medium_multiplier
        } else {
            self.default_multiplier
        }
    }

    pub fn estimate_tokens(&self, base: u64, subtask_count: u64, complexity_score: f64) -> u64 {
        ((base * subtask_count) as f64 * self.multiplier_for(complexity_score)).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_complexity_uses_high_multiplier() {
        let m = ComplexityMultipliers::default();
        assert!((m.multiplier_for(0.6) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn medium_complexity_uses_medium_multiplier() {
        let m = ComplexityMultipliers::default();
        assert!((m.multiplier_for(0.45) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn low_complexity_uses_default_multiplier() {
        let m = ComplexityMultipliers::default();
        assert!((m.multiplier_for(0.1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_tokens_scales_by_subtasks_and_complexity() {
        let m = ComplexityMultipliers::default();
        assert_eq!(m.estimate_tokens(1000, 4, 0.6), 10_000);
    }

    #[test]
    fn pressure_level_ordering() {
        assert!(PressureLevel::None < PressureLevel::Light);
        assert!(PressureLevel::Light < PressureLevel::Medium);
        assert!(PressureLevel::Medium < PressureLevel::Severe);
    }
}
