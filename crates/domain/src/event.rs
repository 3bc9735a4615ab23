use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An append-only record in a workflow's event stream (spec.md §3, §4.1).
///
/// Identity is `(workflow_id, seq)`. Sequences are strictly increasing per
/// workflow and never gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub workflow_id: Uuid,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Ephemeral events are live-fan-out only; everything else survives in
    /// the durable store and is replayable (spec.md §3, confirmed against
    /// the reference workflow engine's `WorkflowEvent::is_persistent`).
    pub fn is_persistent(&self) -> bool {
        !matches!(self.event_type, EventType::LlmPartial)
    }
}

/// Stable wire identifiers for event types (spec.md §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Workflow lifecycle
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowPausing,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCancelling,
    WorkflowCancelled,

    // Agent lifecycle
    AgentStarted,
    AgentCompleted,
    AgentThinking,

    // LLM
    LlmPrompt,
    LlmPartial,
    LlmOutput,

    // Tools
    ToolInvoked,
    ToolObservation,
    ToolError,

    // Progress / coordination
    Progress,
    DataProcessing,
    Waiting,
    ErrorRecovery,
    TeamRecruited,
    TeamRetired,
    TeamStatus,
    RoleAssigned,
    Delegation,
    DependencySatisfied,

    // Budget / approval
    BudgetThreshold,
    ApprovalRequested,
    ApprovalDecision,

    // Errors
    ErrorOccurred,

    // Stream lifecycle
    StreamEnd,

    /// Checkpoint blob persisted immediately before a pause transition
    /// (SPEC_FULL.md §S.6), not part of spec.md §6.2's base wire list but
    /// carried as a persistent event so a restarted process can report
    /// what a paused workflow was doing.
    Checkpoint,
}

impl EventType {
    /// SSE `event:` line name for client-facing mappings (spec.md §6.3).
    /// Types without a special mapping use their own `SCREAMING_SNAKE_CASE`
    /// identifier as the SSE event name.
    pub fn sse_event_name(self) -> &'static str {
        match self {
            EventType::LlmPartial => "thread.message.delta",
            EventType::LlmOutput => "thread.message.completed",
            _ => self.wire_name(),
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            EventType::WorkflowStarted => "WORKFLOW_STARTED",
            EventType::WorkflowCompleted => "WORKFLOW_COMPLETED",
            EventType::WorkflowFailed => "WORKFLOW_FAILED",
            EventType::WorkflowPausing => "WORKFLOW_PAUSING",
            EventType::WorkflowPaused => "WORKFLOW_PAUSED",
            EventType::WorkflowResumed => "WORKFLOW_RESUMED",
            EventType::WorkflowCancelling => "WORKFLOW_CANCELLING",
            EventType::WorkflowCancelled => "WORKFLOW_CANCELLED",
            EventType::AgentStarted => "AGENT_STARTED",
            EventType::AgentCompleted => "AGENT_COMPLETED",
            EventType::AgentThinking => "AGENT_THINKING",
            EventType::LlmPrompt => "LLM_PROMPT",
            EventType::LlmPartial => "LLM_PARTIAL",
            EventType::LlmOutput => "LLM_OUTPUT",
            EventType::ToolInvoked => "TOOL_INVOKED",
            EventType::ToolObservation => "TOOL_OBSERVATION",
            EventType::ToolError => "TOOL_ERROR",
            EventType::Progress => "PROGRESS",
            EventType::DataProcessing => "DATA_PROCESSING",
            EventType::Waiting => "WAITING",
            EventType::ErrorRecovery => "ERROR_RECOVERY",
            EventType::TeamRecruited => "TEAM_RECRUITED",
            EventType::TeamRetired => "TEAM_RETIRED",
            EventType::TeamStatus => "TEAM_STATUS",
            EventType::RoleAssigned => "ROLE_ASSIGNED",
            EventType::Delegation => "DELEGATION",
            EventType::DependencySatisfied => "DEPENDENCY_SATISFIED",
            EventType::BudgetThreshold => "BUDGET_THRESHOLD",
            EventType::ApprovalRequested => "APPROVAL_REQUESTED",
            EventType::ApprovalDecision => "APPROVAL_DECISION",
            EventType::ErrorOccurred => "ERROR_OCCURRED",
            EventType::StreamEnd => "STREAM_END",
            EventType::Checkpoint => "CHECKPOINT",
        }
    }

    /// Parse a `types=` query-param entry back into an [`EventType`]
    /// (spec.md §4.8 event-type filtering). Case-insensitive on the wire
    /// name; there's no blanket `FromStr` because the wire name space is
    /// closed and small enough to match directly.
    pub fn from_wire_name(s: &str) -> Option<EventType> {
        let upper = s.to_ascii_uppercase();
        Some(match upper.as_str() {
            "WORKFLOW_STARTED" => EventType::WorkflowStarted,
            "WORKFLOW_COMPLETED" => EventType::WorkflowCompleted,
            "WORKFLOW_FAILED" => EventType::WorkflowFailed,
            "WORKFLOW_PAUSING" => EventType::WorkflowPausing,
            "WORKFLOW_PAUSED" => EventType::WorkflowPaused,
            "WORKFLOW_RESUMED" => EventType::WorkflowResumed,
            "WORKFLOW_CANCELLING" => EventType::WorkflowCancelling,
            "WORKFLOW_CANCELLED" => EventType::WorkflowCancelled,
            "AGENT_STARTED" => EventType::AgentStarted,
            "AGENT_COMPLETED" => EventType::AgentCompleted,
            "AGENT_THINKING" => EventType::AgentThinking,
            "LLM_PROMPT" => EventType::LlmPrompt,
            "LLM_PARTIAL" => EventType::LlmPartial,
            "LLM_OUTPUT" => EventType::LlmOutput,
            "TOOL_INVOKED" => EventType::ToolInvoked,
            "TOOL_OBSERVATION" => EventType::ToolObservation,
            "TOOL_ERROR" => EventType::ToolError,
            "PROGRESS" => EventType::Progress,
            "DATA_PROCESSING" => EventType::DataProcessing,
            "WAITING" => EventType::Waiting,
            "ERROR_RECOVERY" => EventType::ErrorRecovery,
            "TEAM_RECRUITED" => EventType::TeamRecruited,
            "TEAM_RETIRED" => EventType::TeamRetired,
            "TEAM_STATUS" => EventType::TeamStatus,
            "ROLE_ASSIGNED" => EventType::RoleAssigned,
            "DELEGATION" => EventType::Delegation,
            "DEPENDENCY_SATISFIED" => EventType::DependencySatisfied,
            "BUDGET_THRESHOLD" => EventType::BudgetThreshold,
            "APPROVAL_REQUESTED" => EventType::ApprovalRequested,
            "APPROVAL_DECISION" => EventType::ApprovalDecision,
            "ERROR_OCCURRED" => EventType::ErrorOccurred,
            "STREAM_END" => EventType::StreamEnd,
            "CHECKPOINT" => EventType::Checkpoint,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_event(event_type: EventType) -> Event {
        Event {
            workflow_id: Uuid::new_v4(),
            seq: 1,
            event_type,
            agent_id: None,
            message: None,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    #[test]
    fn llm_partial_is_ephemeral() {
        assert!(!mk_event(EventType::LlmPartial).is_persistent());
    }

    #[test]
    fn llm_output_is_persistent() {
        assert!(mk_event(EventType::LlmOutput).is_persistent());
    }

    #[test]
    fn workflow_and_agent_and_tool_events_are_persistent() {
        for t in [
            EventType::WorkflowStarted,
            EventType::AgentCompleted,
            EventType::ToolInvoked,
            EventType::ToolObservation,
            EventType::ApprovalDecision,
        ] {
            assert!(mk_event(t).is_persistent(), "{t:?} should be persistent");
        }
    }

    #[test]
    fn sse_mappings_match_spec() {
        assert_eq!(EventType::LlmPartial.sse_event_name(), "thread.message.delta");
        assert_eq!(EventType::LlmOutput.sse_event_name(), "thread.message.completed");
        assert_eq!(EventType::WorkflowStarted.sse_event_name(), "WORKFLOW_STARTED");
    }

    #[test]
    fn from_wire_name_is_case_insensitive_and_rejects_unknown() {
        assert_eq!(EventType::from_wire_name("tool_invoked"), Some(EventType::ToolInvoked));
        assert_eq!(EventType::from_wire_name("TOOL_INVOKED"), Some(EventType::ToolInvoked));
        assert_eq!(EventType::from_wire_name("NOT_A_TYPE"), None);
    }

    #[test]
    fn wire_name_roundtrips_through_serde() {
        let json = serde_json::to_string(&EventType::ToolObservation).unwrap();
        assert_eq!(json, "\"TOOL_OBSERVATION\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::ToolObservation);
    }
}
