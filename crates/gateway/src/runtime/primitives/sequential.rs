//! Sequential primitive (spec.md §4.4): run subtasks one at a time,
//! threading each output into the next subtask's context, checking for
//! pause/cancel between steps.

use std::sync::Arc;

use shannon_domain::agent_execution::{AgentExecution, AgentExecutionState};
use shannon_domain::error::{Error, Result};
use shannon_domain::event::EventType;
use uuid::Uuid;

use crate::runtime::control_state::ControlStateStore;
use crate::runtime::event_log::EventLog;

use super::{Executor, Subtask};

/// Run subtasks in order, passing each completed output forward as the
/// next subtask's prior context (spec.md §4.4 "linear accumulation").
/// Checks the control state before each step; a pause request checkpoints
/// progress so far and returns `Error::Cancelled`-shaped suspension is
/// left to the caller (the workflow orchestrator owns resuming).
pub async fn run_sequential(
    workflow_id: Uuid,
    subtasks: &[Subtask],
    executor: Executor,
    events: Arc<EventLog>,
    control: Arc<ControlStateStore>,
) -> Result<Vec<AgentExecution>> {
    let mut out = Vec::with_capacity(subtasks.len());
    let mut context = String::new();

    for subtask in subtasks {
        if control.is_cancel_requested(workflow_id) {
            return Err(Error::Cancelled);
        }
        if control.is_pause_requested(workflow_id) {
            control.checkpoint(
                workflow_id,
                serde_json::json!({ "completed_subtasks": out.len(), "next_subtask": subtask.id }),
            )?;
            control.confirm_paused(workflow_id)?;
            // Not an execution failure: the workflow orchestrator checks
            // `ControlStateStore::get` to tell a pause apart from a real
            // cancel, since both unwind the primitive the same way.
            return Err(Error::Cancelled);
        }

        events.append(
            workflow_id,
            EventType::AgentStarted,
            Some(AgentExecution::derive_agent_id(workflow_id, subtask.index)),
            Some(subtask.description.clone()),
            None,
        )?;

        // A failed step is recorded and the sequence carries on to the
        // next subtask rather than aborting (spec.md §4.4): only an
        // explicit pause/cancel unwinds the primitive early. The executor
        // trait itself can still return `Err` for an out-of-band failure
        // (e.g. the adapter layer, not the pattern); that's recorded the
        // same way as a pattern-level `Failed` state.
        let exec = match executor.execute(workflow_id, &context, subtask).await {
            Ok(exec) => exec,
            Err(e) => AgentExecution {
                agent_id: AgentExecution::derive_agent_id(workflow_id, subtask.index),
                workflow_id,
                input_summary: format!("{}: {e}", subtask.description),
                output: None,
                state: AgentExecutionState::Failed,
                input_tokens: 0,
                output_tokens: 0,
                model: None,
                provider: None,
                duration_ms: 0,
                tool_executions: Vec::new(),
            },
        };

        let event_type = if exec.state == AgentExecutionState::Completed {
            EventType::AgentCompleted
        } else {
            EventType::ErrorOccurred
        };
        events.append(
            workflow_id,
            event_type,
            Some(exec.agent_id.clone()),
            None,
            None,
        )?;

        if exec.state == AgentExecutionState::Completed {
            if let Some(output) = &exec.output {
                context = output.clone();
            }
        }
        out.push(exec);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::primitives::test_support::FakeExecutor;
    use shannon_domain::config::EventLogConfig;

    fn harness() -> (tempfile::TempDir, Arc<EventLog>, Arc<ControlStateStore>) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventLog::new(dir.path(), EventLogConfig::default()));
        let control = Arc::new(ControlStateStore::new(events.clone()));
        (dir, events, control)
    }

    fn subtasks(n: usize) -> Vec<Subtask> {
        (0..n)
            .map(|i| Subtask { id: format!("s{i}"), index: i, description: format!("step {i}"), depends_on: vec![] })
            .collect()
    }

    #[tokio::test]
    async fn threads_output_through_context() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let executor: Executor = Arc::new(FakeExecutor::new());
        let results = run_sequential(wf, &subtasks(3), executor, events, control).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[2].output.as_ref().unwrap().contains("s1::s2"));
    }

    #[tokio::test]
    async fn failed_step_is_recorded_and_sequence_continues() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let executor: Executor = Arc::new(FakeExecutor::failing_on("s1"));
        let results = run_sequential(wf, &subtasks(3), executor, events, control).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].state, shannon_domain::agent_execution::AgentExecutionState::Completed);
        assert_eq!(results[1].state, shannon_domain::agent_execution::AgentExecutionState::Failed);
        assert_eq!(results[2].state, shannon_domain::agent_execution::AgentExecutionState::Completed);
    }

    #[tokio::test]
    async fn pause_request_checkpoints_and_suspends() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        control.request_pause(wf, Some("user".into())).unwrap();
        let executor: Executor = Arc::new(FakeExecutor::new());
        let result = run_sequential(wf, &subtasks(3), executor, events, control.clone()).await;
        assert!(result.is_err());
        assert_eq!(
            control.get(wf).unwrap().status,
            shannon_domain::control_state::ControlStatus::Paused
        );
    }
}
