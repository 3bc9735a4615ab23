//! Hybrid primitive (spec.md §4.4): execute a dependency graph of
//! subtasks, each subtask waiting on its declared predecessors before it
//! can start, bounded by a shared concurrency budget.
//!
//! Grounded on the same producer-releases-on-handshake discipline as
//! [`super::parallel`], plus a `tokio::sync::watch` per subtask standing
//! in for the adapter's channel primitive (spec.md §4.7) — a subtask
//! publishes its completion once, and every dependent waits on the same
//! cell rather than a one-shot consumed by a single reader.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use shannon_domain::agent_execution::{AgentExecution, AgentExecutionState};
use shannon_domain::error::{Error, Result};
use shannon_domain::event::EventType;
use tokio::sync::watch;
use uuid::Uuid;

use crate::runtime::adapter::InProcessRuntime;
use crate::runtime::control_state::ControlStateStore;
use crate::runtime::event_log::EventLog;

use super::{Executor, Subtask};

#[derive(Clone)]
enum Outcome {
    Pending,
    Done(String),
    Failed,
}

/// Execute `subtasks` respecting each one's `depends_on`, running
/// independent branches concurrently. A subtask whose dependency failed
/// is itself treated as failed without ever starting (no partial input).
/// A dependency wait bounded by `dependency_wait_timeout` keeps a cyclic
/// `depends_on` graph from blocking the workflow forever: the stalled
/// subtask fails with `Error::Timeout` instead of hanging, which also
/// frees it to report through the normal failed-dependency path rather
/// than leaving the semaphore permit and in-flight slot held forever.
pub async fn run_hybrid(
    workflow_id: Uuid,
    subtasks: &[Subtask],
    executor: Executor,
    events: Arc<EventLog>,
    control: Arc<ControlStateStore>,
    max_concurrency: usize,
    dependency_wait_timeout: Duration,
) -> Result<Vec<AgentExecution>> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrency.max(1)));
    let runtime = Arc::new(InProcessRuntime::new());

    let mut senders: HashMap<String, watch::Sender<Outcome>> = HashMap::new();
    let mut receivers: HashMap<String, watch::Receiver<Outcome>> = HashMap::new();
    for subtask in subtasks {
        let (tx, rx) = watch::channel(Outcome::Pending);
        senders.insert(subtask.id.clone(), tx);
        receivers.insert(subtask.id.clone(), rx);
    }

    let futures = subtasks.iter().cloned().map(|subtask| {
        let executor = executor.clone();
        let events = events.clone();
        let control = control.clone();
        let semaphore = semaphore.clone();
        let runtime = runtime.clone();
        let waits: Vec<watch::Receiver<Outcome>> = subtask
            .depends_on
            .iter()
            .filter_map(|dep| receivers.get(dep).cloned())
            .collect();
        let tx = senders.get(&subtask.id).cloned().expect("sender registered above");

        async move {
            let mut dep_context = String::new();

            // Bounded by `dependency_wait_timeout` (adapter.rs's
            // `await_with_timeout`): a cyclic `depends_on` graph would
            // otherwise never observe `changed()` firing and hang the
            // whole workflow.
            let wait = async {
                for mut dep_rx in waits {
                    loop {
                        // `borrow()` first: a dependency that already
                        // finished before this subtask started waiting
                        // left its final value in place, and `changed()`
                        // only fires on values sent *after* this receiver
                        // was cloned.
                        let outcome = dep_rx.borrow().clone();
                        match outcome {
                            Outcome::Pending => {
                                if dep_rx.changed().await.is_err() {
                                    // Dependency task panicked without ever
                                    // sending a final value; treat as failed.
                                    return Err(Error::ActivityFailed {
                                        retryable: false,
                                        message: format!("subtask {}'s dependency vanished", subtask.id),
                                    });
                                }
                            }
                            Outcome::Done(output) => {
                                dep_context.push_str(&output);
                                dep_context.push(';');
                                break;
                            }
                            Outcome::Failed => {
                                return Err(Error::ActivityFailed {
                                    retryable: false,
                                    message: format!(
                                        "subtask {} skipped: a dependency failed",
                                        subtask.id
                                    ),
                                });
                            }
                        }
                    }
                }
                Ok(())
            };

            match runtime.await_with_timeout(wait, dependency_wait_timeout).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = tx.send(Outcome::Failed);
                    return Err(e);
                }
                Err(_timed_out) => {
                    let _ = tx.send(Outcome::Failed);
                    return Err(Error::Timeout(format!(
                        "subtask {} timed out waiting on its dependencies",
                        subtask.id
                    )));
                }
            }

            if control.is_cancel_requested(workflow_id) {
                let _ = tx.send(Outcome::Failed);
                return Err(Error::Cancelled);
            }

            let permit = semaphore.acquire_owned().await.map_err(|_| {
                Error::ResourceExhausted { reason: "hybrid semaphore closed".into() }
            })?;

            events.append(
                workflow_id,
                EventType::AgentStarted,
                Some(AgentExecution::derive_agent_id(workflow_id, subtask.index)),
                Some(subtask.description.clone()),
                None,
            )?;

            let result = executor.execute(workflow_id, &dep_context, &subtask).await;

            // `PatternExecutor` (the real `SubtaskExecutor`) never returns
            // `Err` for a failed pattern — it reports failure through
            // `AgentExecution.state` (patterns/mod.rs). Both that and a
            // genuine `Err` from the executor count as this subtask
            // failing its dependents.
            let failed = match &result {
                Ok(exec) => exec.state != AgentExecutionState::Completed,
                Err(_) => true,
            };

            let event_type = if failed { EventType::ErrorOccurred } else { EventType::AgentCompleted };
            events.append(
                workflow_id,
                event_type,
                Some(AgentExecution::derive_agent_id(workflow_id, subtask.index)),
                result.as_ref().err().map(|e| e.to_string()),
                None,
            )?;
            drop(permit);

            match &result {
                Ok(exec) if !failed => {
                    events.append(
                        workflow_id,
                        EventType::DependencySatisfied,
                        Some(exec.agent_id.clone()),
                        None,
                        None,
                    )?;
                    let _ = tx.send(Outcome::Done(exec.output.clone().unwrap_or_default()));
                }
                _ => {
                    let _ = tx.send(Outcome::Failed);
                }
            }

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

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn dependent_waits_for_its_dependency() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let subtasks = vec![
            Subtask { id: "a".into(), index: 0, description: "first".into(), depends_on: vec![] },
            Subtask { id: "b".into(), index: 1, description: "second".into(), depends_on: vec!["a".into()] },
        ];
        let executor: Executor = Arc::new(FakeExecutor::new());
        let results = run_hybrid(wf, &subtasks, executor, events, control, 4, TEST_TIMEOUT).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependent() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let subtasks = vec![
            Subtask { id: "a".into(), index: 0, description: "first".into(), depends_on: vec![] },
            Subtask { id: "b".into(), index: 1, description: "second".into(), depends_on: vec!["a".into()] },
        ];
        let executor: Executor = Arc::new(FakeExecutor::failing_on("a"));
        let result = run_hybrid(wf, &subtasks, executor, events, control, 4, TEST_TIMEOUT).await;
        assert!(result.is_err());
    }

    /// The real `PatternExecutor` never returns `Err` for a failed
    /// pattern — it reports `Ok(AgentExecution { state: Failed, .. })`
    /// (patterns/mod.rs). Before this fix, that case fell into the
    /// `Ok(exec)` branch and was broadcast as `Outcome::Done`, so the
    /// dependent would wrongly proceed as if its dependency had
    /// succeeded. It must be treated as a failed dependency instead.
    #[tokio::test]
    async fn dependency_reported_as_failed_state_still_skips_dependent() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let subtasks = vec![
            Subtask { id: "a".into(), index: 0, description: "first".into(), depends_on: vec![] },
            Subtask { id: "b".into(), index: 1, description: "second".into(), depends_on: vec!["a".into()] },
        ];
        let executor: Executor = Arc::new(FakeExecutor::failing_softly_on("a"));
        let result = run_hybrid(wf, &subtasks, executor, events, control, 4, TEST_TIMEOUT).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn independent_branches_run_concurrently() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let subtasks = vec![
            Subtask { id: "a".into(), index: 0, description: "left".into(), depends_on: vec![] },
            Subtask { id: "b".into(), index: 1, description: "right".into(), depends_on: vec![] },
            Subtask { id: "c".into(), index: 2, description: "join".into(), depends_on: vec!["a".into(), "b".into()] },
        ];
        let executor: Executor = Arc::new(FakeExecutor::new());
        let results = run_hybrid(wf, &subtasks, executor, events, control, 4, TEST_TIMEOUT).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    /// A cyclic `depends_on` graph (`a` waits on `b`, `b` waits on `a`)
    /// would otherwise never see either `watch` channel resolve; the
    /// dependency-wait timeout must bound it instead of hanging the test
    /// (and the workflow) forever.
    #[tokio::test]
    async fn cyclic_dependency_times_out_instead_of_hanging() {
        let (_d, events, control) = harness();
        let wf = Uuid::new_v4();
        control.register(wf, None);
        let subtasks = vec![
            Subtask { id: "a".into(), index: 0, description: "first".into(), depends_on: vec!["b".into()] },
            Subtask { id: "b".into(), index: 1, description: "second".into(), depends_on: vec!["a".into()] },
        ];
        let executor: Executor = Arc::new(FakeExecutor::new());
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run_hybrid(wf, &subtasks, executor, events, control, 4, Duration::from_millis(50)),
        )
        .await
        .expect("run_hybrid must return within the dependency timeout, not hang");
        assert!(result.is_err());
    }
}
