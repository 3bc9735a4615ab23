//! Parallel primitive (spec.md §4.4): fan out subtasks bounded by a
//! semaphore, each releasing its permit only after its completion event
//! is durably appended (producer-releases-on-handshake).

use std::sync::Arc;

use futures_util::future::join_all;
use shannon_domain::agent_execution::{AgentExecution, AgentExecutionState};
use shannon_domain::error::{Error, Result};
use shannon_domain::event::EventType;
use uuid::Uuid;

use crate::runtime::control_state::ControlStateStore;
use crate::runtime::event_log::EventLog;

use super::{Executor, Subtask};

/// Run every subtask concurrently, bounded by `max_concurrency` permits.
/// Returns one [`AgentExecution`] per subtask in original order; the
/// first failure is returned as `Err` once all already-started subtasks
/// have finished (no orphaned fan-out).
pub async fn run_parallel(
    workflow_id: Uuid,
    subtasks: &[Subtask],
    executor: Executor,
    events: Arc<EventLog>,
    control: Arc<ControlStateStore>,
    max_concurrency: usize,
) -> Result<Vec<AgentExecution>> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrency.max(1)));

    let futures = subtasks.iter().cloned().map(|subtask| {
        let executor = executor.clone();
        let events = events.clone();
        let control = control.clone();
        let semaphore = semaphore.clone();
        async move {
            if control.is_cancel_requested(workflow_id) {
                return Err(Error::Cancelled);
            }
            let permit = semaphore.acquire_owned().await.map_err(|_| {
                Error::ResourceExhausted { reason: "parallel semaphore closed".into() }
            })?;

            events.append(
                workflow_id,
                EventType::AgentStarted,
                Some(AgentExecution::derive_agent_id(workflow_id, subtask.index)),
                Some(subtask.description.clone()),
                None,
            )?;

            let result = executor.execute(workflow_id, "", &subtask).await;

            let event_type = match &result {
                Ok(exec) if exec.state == AgentExecutionState::Completed => EventType::AgentCompleted,
                _ => EventType::ErrorOccurred,
            };
            events.append(
                workflow_id,
                event_type,
                Some(AgentExecution::derive_agent_id(workflow_id, subtask.index)),
                result.as_ref().err().map(|e| e.to_string()),
                None,
            )?;
            // The permit is held until after the completion event has been
            // appended, then dropped here — a sibling only ever observes a
            // slot freeing up once that subtask's outcome is durable.
            drop(permit);

            result
        }
    });

    let results = join_all(futures).await;
    let mut out = Vec::with_capacity(results.len());
    let mut first_err = None;
    for r in results {
        match r {
            Ok(exec) => out.push(exec),
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(_) => {}
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}
