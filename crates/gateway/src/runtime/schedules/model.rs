//! Schedule data model — types, enums, and config structs.
//!
//! A schedule is a cron-triggered [`crate::runtime::workflow::SubmitRequest`]:
//! running it means submitting `query` as a new task for `user_id` on the
//! configured cadence. `DigestMode`/`FetchConfig`/`SourceState`/
//! `DeliveryTarget` from the RSS-digest/webhook-delivery teacher feature
//! have no counterpart in spec.md §6.4 ("create/list/get/update/pause/
//! resume/delete and list runs") and were dropped — see DESIGN.md.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happens when the runner discovers a missed window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissedPolicy {
    /// Drop the missed run silently.
    Skip,
    /// Fire exactly once, no matter how many windows were missed.
    RunOnce,
    /// Fire once for every missed window (with back-off cap).
    CatchUp,
}

impl Default for MissedPolicy {
    fn default() -> Self {
        Self::RunOnce
    }
}

fn default_max_concurrency() -> u32 {
    1
}

fn default_max_catchup_runs() -> usize {
    5
}

const MAX_COOLDOWN_MINUTES: u64 = 24 * 60; // 24 hours

/// Compute cooldown duration in minutes: 2^(failures - 1), capped at 24h.
pub fn cooldown_minutes(consecutive_failures: u32) -> u64 {
    if consecutive_failures == 0 {
        return 0;
    }
    let exp = (consecutive_failures - 1).min(20); // prevent overflow
    let minutes = 1u64.checked_shl(exp).unwrap_or(MAX_COOLDOWN_MINUTES);
    minutes.min(MAX_COOLDOWN_MINUTES)
}

/// Persisted schedule. `status` is NOT stored — it is derived from
/// `enabled` + `consecutive_failures` via [`Schedule::computed_status`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    /// Cron expression: "minute hour dom month dow" (5-field)
    pub cron: String,
    pub timezone: String,
    pub enabled: bool,
    /// The user a fired run submits the task as.
    pub user_id: String,
    /// The query text submitted as a new task on each fire.
    pub query: String,
    /// Forces a mode instead of letting the strategy router decide.
    #[serde(default)]
    pub mode_override: Option<String>,
    /// Thread fired runs into an existing session, if set.
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_id: Option<Uuid>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    // ── Cron behaviour ────────────────────────────────────────────────
    /// What to do when a cron window is missed (default: run_once).
    #[serde(default)]
    pub missed_policy: MissedPolicy,
    /// Max concurrent runs for this schedule (default: 1).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Per-run timeout in milliseconds (None = no timeout).
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    // ── Catch-up configuration ─────────────────────────────────────
    /// Maximum catch-up runs per tick when using CatchUp missed policy.
    #[serde(default = "default_max_catchup_runs")]
    pub max_catchup_runs: usize,

    // ── Error tracking ──────────────────────────────────────────────
    /// Most recent error message from a failed run.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the most recent error occurred.
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    /// Number of consecutive failed runs (resets on success).
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Schedule is in cooldown until this time (exponential back-off).
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,

    // ── Usage tracking ───────────────────────────────────────────────
    /// Cumulative input tokens across all runs.
    #[serde(default)]
    pub total_input_tokens: u64,
    /// Cumulative output tokens across all runs.
    #[serde(default)]
    pub total_output_tokens: u64,
    /// Total number of completed runs.
    #[serde(default)]
    pub total_runs: u64,
}

impl Schedule {
    /// Derive status from persisted state. Never stored.
    pub fn computed_status(&self) -> ScheduleStatus {
        if !self.enabled {
            ScheduleStatus::Paused
        } else if self.consecutive_failures > 0 {
            ScheduleStatus::Error
        } else {
            ScheduleStatus::Active
        }
    }

    /// Build an API-facing view with computed `status`.
    pub fn to_view(&self) -> ScheduleView {
        ScheduleView {
            schedule: self.clone(),
            status: self.computed_status(),
        }
    }
}

/// API response wrapper that includes the computed `status` field.
#[derive(Clone, Debug, Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub status: ScheduleStatus,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Error,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule events (for SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleEvent {
    ScheduleUpdated { schedule: ScheduleView },
    ScheduleRunStarted { schedule_id: Uuid, run_id: Uuid },
    ScheduleRunCompleted { schedule_id: Uuid, run_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schedule(enabled: bool, consecutive_failures: u32) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            name: "test".into(),
            cron: "0 * * * *".into(),
            timezone: "UTC".into(),
            enabled,
            user_id: "user-1".into(),
            query: "summarize the week".into(),
            mode_override: None,
            session_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_run_id: None,
            last_run_at: None,
            next_run_at: None,
            missed_policy: MissedPolicy::default(),
            max_concurrency: 1,
            timeout_ms: None,
            max_catchup_runs: 5,
            last_error: if consecutive_failures > 0 {
                Some("test error".into())
            } else {
                None
            },
            last_error_at: None,
            consecutive_failures,
            cooldown_until: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_runs: 0,
        }
    }

    #[test]
    fn computed_status_active() {
        let s = test_schedule(true, 0);
        assert_eq!(s.computed_status(), ScheduleStatus::Active);
    }

    #[test]
    fn computed_status_paused() {
        let s = test_schedule(false, 0);
        assert_eq!(s.computed_status(), ScheduleStatus::Paused);
    }

    #[test]
    fn computed_status_error() {
        let s = test_schedule(true, 3);
        assert_eq!(s.computed_status(), ScheduleStatus::Error);
    }

    #[test]
    fn computed_status_paused_trumps_error() {
        let s = test_schedule(false, 5);
        assert_eq!(s.computed_status(), ScheduleStatus::Paused);
    }

    #[test]
    fn to_view_includes_computed_status() {
        let s = test_schedule(true, 0);
        let view = s.to_view();
        assert_eq!(view.status, ScheduleStatus::Active);

        let s2 = test_schedule(true, 1);
        let view2 = s2.to_view();
        assert_eq!(view2.status, ScheduleStatus::Error);
    }

    #[test]
    fn schedule_deserializes_without_error_fields() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "legacy",
            "cron": "0 9 * * *",
            "timezone": "UTC",
            "enabled": true,
            "user_id": "user-1",
            "query": "check on things",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        let s: Schedule = serde_json::from_value(json).unwrap();
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.last_error.is_none());
        assert_eq!(s.computed_status(), ScheduleStatus::Active);
        assert_eq!(s.missed_policy, MissedPolicy::RunOnce);
        assert_eq!(s.max_concurrency, 1);
        assert!(s.timeout_ms.is_none());
        assert_eq!(s.max_catchup_runs, 5);
    }

    #[test]
    fn missed_policy_serde_roundtrip() {
        let policies = [MissedPolicy::Skip, MissedPolicy::RunOnce, MissedPolicy::CatchUp];
        for p in &policies {
            let json = serde_json::to_string(p).unwrap();
            let back: MissedPolicy = serde_json::from_str(&json).unwrap();
            assert_eq!(*p, back);
        }
    }

    #[test]
    fn schedule_with_overrides_roundtrips() {
        let mut s = test_schedule(true, 0);
        s.missed_policy = MissedPolicy::CatchUp;
        s.max_concurrency = 3;
        s.timeout_ms = Some(60_000);
        s.mode_override = Some("complex".into());
        s.session_id = Some("sess-1".into());
        let json = serde_json::to_string(&s).unwrap();
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.missed_policy, MissedPolicy::CatchUp);
        assert_eq!(back.max_concurrency, 3);
        assert_eq!(back.timeout_ms, Some(60_000));
        assert_eq!(back.mode_override.as_deref(), Some("complex"));
        assert_eq!(back.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn cooldown_minutes_zero_failures() {
        assert_eq!(cooldown_minutes(0), 0);
    }

    #[test]
    fn cooldown_minutes_exponential() {
        assert_eq!(cooldown_minutes(1), 1);
        assert_eq!(cooldown_minutes(2), 2);
        assert_eq!(cooldown_minutes(3), 4);
        assert_eq!(cooldown_minutes(4), 8);
        assert_eq!(cooldown_minutes(5), 16);
    }

    #[test]
    fn cooldown_minutes_capped_at_24h() {
        assert_eq!(cooldown_minutes(21), 24 * 60);
        assert_eq!(cooldown_minutes(50), 24 * 60);
    }

    #[test]
    fn schedule_backward_compat_no_cooldown_field() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "legacy",
            "cron": "0 9 * * *",
            "timezone": "UTC",
            "enabled": true,
            "user_id": "user-1",
            "query": "check on things",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        let s: Schedule = serde_json::from_value(json).unwrap();
        assert!(s.cooldown_until.is_none());
        assert_eq!(s.max_catchup_runs, 5);
    }
}
