use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation-scoped container grouping related tasks for a user
/// (spec.md §3 "Session", GLOSSARY). Updated transactionally with task
/// completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub title: Option<String>,
    /// Redacted conversation history (no raw tool arguments/secrets).
    #[serde(default)]
    pub history: Vec<SessionTurn>,
    pub aggregate: SessionAggregate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub task_id: uuid::Uuid,
    pub role: TurnRole,
    pub redacted_content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub task_count: u64,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            title: None,
            history: Vec::new(),
            aggregate: SessionAggregate::default(),
            created_at: Utc::now(),
        }
    }

    /// Fold a completed task's usage into the session's aggregate counters.
    pub fn record_task_usage(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.aggregate.total_input_tokens += input_tokens;
        self.aggregate.total_output_tokens += output_tokens;
        self.aggregate.total_cost_usd += cost_usd;
        self.aggregate.task_count += 1;
    }
}
