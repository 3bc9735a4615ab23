use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A unit of work submitted through the gateway (spec.md §3 "Task").
///
/// Created by gateway submission, mutated only by workflow activities and
/// control signals. Terminal once `status` is any non-running value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub query: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub mode: TaskMode,
    #[serde(default)]
    pub routing_labels: Vec<String>,
    /// Free-form key→value map: model tier, overrides, research preset,
    /// iteration limits, feature toggles. Unknown keys are opaque and
    /// preserved by the router and patterns (spec.md §9).
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub usage: TaskUsage,
    pub model_used: Option<String>,
    pub provider_used: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Simple,
    Standard,
    Complex,
    Supervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    /// Non-running statuses are terminal (spec.md §3).
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running | TaskStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

impl Task {
    pub fn new(task_id: Uuid, query: impl Into<String>, user_id: impl Into<String>, mode: TaskMode) -> Self {
        Self {
            task_id,
            query: query.into(),
            session_id: None,
            user_id: user_id.into(),
            tenant_id: None,
            mode,
            routing_labels: Vec::new(),
            context: HashMap::new(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            usage: TaskUsage::default(),
            model_used: None,
            provider_used: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_and_running_are_not_terminal() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }

    #[test]
    fn completed_failed_cancelled_timeout_are_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
    }

    #[test]
    fn new_task_starts_queued_with_zero_usage() {
        let t = Task::new(Uuid::new_v4(), "2+2?", "user-1", TaskMode::Simple);
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.usage.total_tokens, 0);
    }
}
