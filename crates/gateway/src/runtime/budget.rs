//! Token/cost budget preflight and per-user rate limiting (C3, spec.md
//! §4.3).
//!
//! Generalizes the teacher's quota-tracking idiom (`RwLock<HashMap<..>>`
//! keyed by owner, daily/window rollover) to a combined estimate →
//! backpressure → admit pipeline, plus a max-in-flight-workflows gate
//! (grounded on the reference workflow engine's concurrency ceiling).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shannon_domain::budget::{BackpressureResult, BudgetSnapshot, PressureLevel};
use shannon_domain::config::{BudgetConfig, RateLimitConfig};
use shannon_domain::error::{Error, Result};
use uuid::Uuid;

/// Base token estimate for a single subtask before the complexity
/// multiplier is applied (spec.md §4.3: "base × subtask_count ×
/// complexity multiplier").
const BASE_TOKENS_PER_SUBTASK: u64 = 1_000;

struct RateWindow {
    window_start: DateTime<Utc>,
    count: u64,
}

pub struct BudgetTracker {
    config: BudgetConfig,
    rate_limit: RateLimitConfig,
    snapshots: RwLock<HashMap<Uuid, BudgetSnapshot>>,
    rate_windows: RwLock<HashMap<String, RateWindow>>,
    in_flight: RwLock<HashSet<Uuid>>,
    recorded: RwLock<HashSet<Uuid>>,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig, rate_limit: RateLimitConfig) -> Self {
        Self {
            config,
            rate_limit,
            snapshots: RwLock::new(HashMap::new()),
            rate_windows: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashSet::new()),
            recorded: RwLock::new(HashSet::new()),
        }
    }

    /// Fixed one-minute window rate limit per user (spec.md Scenario D).
    /// Returns `Error::RateLimited` (with the `X-RateLimit-*` header
    /// fields spec.md §4.3 names: limit, remaining, reset) once the
    /// window is exhausted; `retry_after_secs` is bounded by the
    /// remainder of the current window.
    pub fn check_rate_limit(&self, user_id: &str) -> Result<()> {
        if !self.rate_limit.enabled {
            return Ok(());
        }
        let limit = self.rate_limit.requests_per_minute;
        let now = Utc::now();
        let mut windows = self.rate_windows.write();
        let window = windows.entry(user_id.to_owned()).or_insert_with(|| RateWindow {
            window_start: now,
            count: 0,
        });
        if now.signed_duration_since(window.window_start) >= chrono::Duration::minutes(1) {
            window.window_start = now;
            window.count = 0;
        }
        let reset_at = (window.window_start + chrono::Duration::minutes(1)).timestamp();
        if window.count >= limit {
            let elapsed = now.signed_duration_since(window.window_start).num_seconds().max(0);
            let retry_after_secs = (60 - elapsed).max(1) as u64;
            return Err(Error::RateLimited { retry_after_secs, limit, remaining: 0, reset_at });
        }
        window.count += 1;
        Ok(())
    }

    /// Admission gate: reject new workflows once
    /// `max_in_flight_workflows` are already running (spec.md §S.6
    /// supplement).
    pub fn admit_workflow(&self, workflow_id: Uuid) -> Result<()> {
        let mut in_flight = self.in_flight.write();
        if in_flight.len() as u32 >= self.config.max_in_flight_workflows {
            return Err(Error::ResourceExhausted {
                reason: format!(
                    "max_in_flight_workflows ({}) reached",
                    self.config.max_in_flight_workflows
                ),
            });
        }
        in_flight.insert(workflow_id);
        Ok(())
    }

    pub fn release_workflow(&self, workflow_id: Uuid) {
        self.in_flight.write().remove(&workflow_id);
    }

    /// Token/cost preflight for a task about to be scheduled. Estimates
    /// tokens from the decomposition's subtask count and complexity
    /// score, compares against the mode's ceiling, and returns a
    /// `BackpressureResult` (spec.md §4.3, §8 invariant 9: delay bounded
    /// by configured maximum).
    pub fn preflight(
        &self,
        user_id: &str,
        session_id: Option<String>,
        task_id: Uuid,
        mode: &str,
        subtask_count: u64,
        complexity_score: f64,
    ) -> BackpressureResult {
        let limit = *self.config.per_role_token_limit.get(mode).unwrap_or(&20_000);
        let estimated = self.config.complexity_multipliers.estimate_tokens(
            BASE_TOKENS_PER_SUBTASK,
            subtask_count.max(1),
            complexity_score,
        );
        let ratio = estimated as f64 / limit.max(1) as f64;
        let table = &self.config.backpressure;

        let (pressure_level, delay_ms) = if ratio >= table.reject_above_committed_ratio {
            (PressureLevel::Severe, table.severe_delay_ms)
        } else if ratio >= 0.7 {
            (PressureLevel::Medium, table.medium_delay_ms)
        } else if ratio >= 0.4 {
            (PressureLevel::Light, table.light_delay_ms)
        } else {
            (PressureLevel::None, 0)
        };

        self.snapshots.write().insert(
            task_id,
            BudgetSnapshot {
                user_id: user_id.to_owned(),
                session_id,
                task_id,
                reserved_tokens: estimated,
                committed_tokens: 0,
                cost_accumulator: 0.0,
                pressure_level,
                last_decision_at: Utc::now(),
            },
        );

        if ratio >= table.reject_above_committed_ratio {
            BackpressureResult::reject(pressure_level, estimated)
        } else {
            BackpressureResult::proceed(delay_ms, pressure_level, estimated)
        }
    }

    /// Record actual usage after execution. Idempotent on `task_id` so a
    /// retried completion callback never double-counts (spec.md §8
    /// invariant 9 "idempotent post-execution recording").
    pub fn record_usage(&self, task_id: Uuid, tokens_used: u64, cost: f64) {
        if !self.recorded.write().insert(task_id) {
            return;
        }
        if let Some(snapshot) = self.snapshots.write().get_mut(&task_id) {
            snapshot.committed_tokens = tokens_used;
            snapshot.cost_accumulator = cost;
            snapshot.last_decision_at = Utc::now();
        }
    }

    pub fn snapshot(&self, task_id: Uuid) -> Option<BudgetSnapshot> {
        self.snapshots.read().get(&task_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> BudgetTracker {
        BudgetTracker::new(BudgetConfig::default(), RateLimitConfig::default())
    }

    #[test]
    fn low_complexity_proceeds_with_no_delay() {
        let t = tracker();
        let result = t.preflight("u1", None, Uuid::new_v4(), "standard", 2, 0.1);
        assert!(result.can_proceed);
        assert_eq!(result.delay_ms, 0);
    }

    #[test]
    fn very_high_estimate_is_rejected() {
        let t = tracker();
        let result = t.preflight("u1", None, Uuid::new_v4(), "simple", 50, 0.9);
        assert!(!result.can_proceed);
    }

    #[test]
    fn record_usage_is_idempotent() {
        let t = tracker();
        let task = Uuid::new_v4();
        t.preflight("u1", None, task, "standard", 1, 0.1);
        t.record_usage(task, 500, 1.0);
        t.record_usage(task, 999_999, 999.0);
        let snap = t.snapshot(task).unwrap();
        assert_eq!(snap.committed_tokens, 500);
    }

    #[test]
    fn admission_gate_rejects_past_max_in_flight() {
        let mut cfg = BudgetConfig::default();
        cfg.max_in_flight_workflows = 1;
        let t = BudgetTracker::new(cfg, RateLimitConfig::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        t.admit_workflow(a).unwrap();
        assert!(t.admit_workflow(b).is_err());
        t.release_workflow(a);
        assert!(t.admit_workflow(b).is_ok());
    }

    #[test]
    fn rate_limit_rejects_after_threshold() {
        let mut rl = RateLimitConfig::default();
        rl.requests_per_minute = 2;
        let t = BudgetTracker::new(BudgetConfig::default(), rl);
        t.check_rate_limit("u1").unwrap();
        t.check_rate_limit("u1").unwrap();
        let err = t.check_rate_limit("u1").unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[test]
    fn rate_limit_disabled_never_rejects() {
        let mut rl = RateLimitConfig::default();
        rl.enabled = false;
        rl.requests_per_minute = 1;
        let t = BudgetTracker::new(BudgetConfig::default(), rl);
        for _ in 0..10 {
            t.check_rate_limit("u1").unwrap();
        }
    }
}
