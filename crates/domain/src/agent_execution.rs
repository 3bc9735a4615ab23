use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of a single model or tool invocation within a workflow
/// (spec.md §3 "Agent Execution"). Written fire-and-forget from the
/// execution primitives; a persistence failure here must never fail the
/// workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub agent_id: String,
    pub workflow_id: Uuid,
    pub input_summary: String,
    pub output: Option<String>,
    pub state: AgentExecutionState,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub tool_executions: Vec<ToolExecutionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentExecutionState {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl AgentExecution {
    /// Derive a deterministic, human-readable agent id from
    /// `(parent_workflow_id, index)` (spec.md §4.4, §9 "Deterministic
    /// identity") so histories stay stable across replay.
    pub fn derive_agent_id(parent_workflow_id: Uuid, index: usize) -> String {
        format!("{parent_workflow_id}-agent-{index}")
    }
}
