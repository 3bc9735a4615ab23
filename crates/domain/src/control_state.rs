use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-workflow control triple `(status, reason, updated_at)` (spec.md §3,
/// §4.2). Initial state is `Running`. Transitions are monotonic toward
/// terminal states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlState {
    pub status: ControlStatus,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Running,
    PauseRequested,
    Paused,
    CancelRequested,
    Cancelled,
    /// Workflow-level terminal outcomes. Not named among the five core
    /// control states in spec.md §3, but spec.md §9's "forbids
    /// `cancelled → *` and `completed → *`" treats them as reachable
    /// terminal control states too, so the monotonicity check below covers
    /// them explicitly (decision recorded in DESIGN.md).
    Completed,
    Failed,
}

impl ControlStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ControlStatus::Cancelled | ControlStatus::Completed | ControlStatus::Failed)
    }

    /// Whether a transition from `self` to `next` is legal under the
    /// monotonic state machine (spec.md §4.2, §8 invariant 3).
    pub fn can_transition_to(self, next: ControlStatus) -> bool {
        use ControlStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Running, PauseRequested | CancelRequested | Completed | Failed) => true,
            (PauseRequested, Paused | CancelRequested | Completed | Failed) => true,
            (Paused, Running | CancelRequested) => true,
            (CancelRequested, Cancelled) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            status: ControlStatus::Running,
            reason: None,
            updated_at: Utc::now(),
        }
    }

    /// Attempt a transition, returning `false` (no-op) if illegal.
    pub fn transition(&mut self, next: ControlStatus, reason: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.reason = reason;
        self.updated_at = Utc::now();
        true
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ControlStatus::*;

    #[test]
    fn new_state_is_running() {
        assert_eq!(ControlState::new().status, Running);
    }

    #[test]
    fn running_to_pause_requested_is_legal() {
        let mut s = ControlState::new();
        assert!(s.transition(PauseRequested, None));
        assert_eq!(s.status, PauseRequested);
    }

    #[test]
    fn pause_requested_to_paused_to_running_roundtrip() {
        let mut s = ControlState::new();
        assert!(s.transition(PauseRequested, None));
        assert!(s.transition(Paused, None));
        assert!(s.transition(Running, None));
        assert_eq!(s.status, Running);
    }

    #[test]
    fn cancelled_is_terminal_and_irreversible() {
        let mut s = ControlState::new();
        assert!(s.transition(CancelRequested, Some("user".into())));
        assert!(s.transition(Cancelled, None));
        assert!(!s.transition(Running, None));
        assert!(!s.transition(PauseRequested, None));
        assert_eq!(s.status, Cancelled);
    }

    #[test]
    fn completed_forbids_further_transitions() {
        let mut s = ControlState::new();
        assert!(s.transition(Completed, None));
        assert!(!s.transition(CancelRequested, None));
    }

    #[test]
    fn paused_cannot_jump_directly_to_cancelled() {
        let mut s = ControlState::new();
        assert!(s.transition(PauseRequested, None));
        assert!(s.transition(Paused, None));
        assert!(!s.transition(Cancelled, None), "must go through CancelRequested first");
        assert!(s.transition(CancelRequested, None));
        assert!(s.transition(Cancelled, None));
    }
}
