use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-user fixed-window rate limiting (C3, spec.md §4.3 / Scenario D).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per user per one-minute window (spec.md Scenario D
    /// default: 60).
    #[serde(default = "d_requests_per_minute")]
    pub requests_per_minute: u64,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: d_requests_per_minute(),
            enabled: true,
        }
    }
}

fn d_requests_per_minute() -> u64 {
    60
}
fn d_true() -> bool {
    true
}
