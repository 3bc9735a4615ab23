use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event Log & Stream Bus configuration (C1, spec.md §4.1).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Bounded ring buffer capacity for the live broadcast channel
    /// (spec.md §4.1: "capacity ≥ 256").
    #[serde(default = "d_ring_capacity")]
    pub ring_capacity: usize,
    /// Live ring retention after a workflow's terminal event
    /// (spec.md §4.1: "≥ 24 hours").
    #[serde(default = "d_live_ttl_hours")]
    pub live_ttl_hours: u64,
    /// Durable retention for completed workflows (spec.md §4.1: 7 days).
    #[serde(default = "d_completed_retention_days")]
    pub completed_retention_days: u64,
    /// Durable retention for failed workflows (spec.md §4.1: 30 days).
    #[serde(default = "d_failed_retention_days")]
    pub failed_retention_days: u64,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            ring_capacity: d_ring_capacity(),
            live_ttl_hours: d_live_ttl_hours(),
            completed_retention_days: d_completed_retention_days(),
            failed_retention_days: d_failed_retention_days(),
        }
    }
}

fn d_ring_capacity() -> usize {
    256
}
fn d_live_ttl_hours() -> u64 {
    24
}
fn d_completed_retention_days() -> u64 {
    7
}
fn d_failed_retention_days() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ring_capacity_meets_spec_minimum() {
        assert!(EventLogConfig::default().ring_capacity >= 256);
    }

    #[test]
    fn default_retention_matches_spec() {
        let cfg = EventLogConfig::default();
        assert_eq!(cfg.completed_retention_days, 7);
        assert_eq!(cfg.failed_retention_days, 30);
        assert!(cfg.live_ttl_hours >= 24);
    }
}
