//! Execution primitives (C4, spec.md §4.4): the three composition
//! operators a decomposition plan is dispatched through.
//!
//! Generalized from the reference turn loop's concurrent tool dispatch
//! (`futures_util::future::join_all` over the tool calls within one turn)
//! into a semaphore-gated [`Parallel`] primitive with the
//! producer-releases-on-handshake protocol spec.md §4.4 requires: a
//! subtask only releases its concurrency permit after its completion
//! event has been durably appended, so a crash between "done" and
//! "recorded" can never be observed by a sibling. Sequential result
//! threading is grounded on the same turn loop's linear message
//! accumulation; the Hybrid dependency-wait is new, built from the
//! adapter's own channel/semaphore primitives.

pub mod hybrid;
pub mod parallel;
pub mod sequential;

use std::sync::Arc;

use async_trait::async_trait;
use shannon_domain::agent_execution::AgentExecution;
use shannon_domain::error::Result;
use uuid::Uuid;

/// One unit of work inside a decomposition plan (spec.md §4.4 — a
/// "subtask" is whatever the strategy router's decomposition step
/// produced; this primitives layer doesn't interpret its content).
#[derive(Debug, Clone)]
pub struct Subtask {
    pub id: String,
    pub index: usize,
    pub description: String,
    /// Subtask ids this one must wait on (Hybrid only; empty for
    /// Parallel/Sequential, which imply their own ordering).
    pub depends_on: Vec<String>,
}

/// Executes a single subtask down to a cognitive pattern and returns its
/// [`AgentExecution`] record. The primitives are agnostic to which
/// pattern actually runs — that choice belongs to the strategy router
/// (C6); primitives only compose whatever `SubtaskExecutor` they're
/// given.
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn execute(&self, workflow_id: Uuid, prior_context: &str, subtask: &Subtask) -> Result<AgentExecution>;
}

pub use hybrid::run_hybrid;
pub use parallel::run_parallel;
pub use sequential::run_sequential;

pub type Executor = Arc<dyn SubtaskExecutor>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A deterministic executor for primitive tests: returns a fixed
    /// `AgentExecution` recording which subtask ran. `fail_on` returns a
    /// hard `Err` (an out-of-band executor failure); `soft_fail_on`
    /// returns `Ok(AgentExecution { state: Failed, .. })`, matching how
    /// the real `PatternExecutor` reports a failed pattern.
    pub struct FakeExecutor {
        pub fail_on: Option<String>,
        pub soft_fail_on: Option<String>,
        pub calls: AtomicUsize,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self { fail_on: None, soft_fail_on: None, calls: AtomicUsize::new(0) }
        }

        pub fn failing_on(id: &str) -> Self {
            Self { fail_on: Some(id.to_owned()), soft_fail_on: None, calls: AtomicUsize::new(0) }
        }

        pub fn failing_softly_on(id: &str) -> Self {
            Self { fail_on: None, soft_fail_on: Some(id.to_owned()), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl SubtaskExecutor for FakeExecutor {
        async fn execute(&self, workflow_id: Uuid, prior_context: &str, subtask: &Subtask) -> Result<AgentExecution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(subtask.id.as_str()) {
                return Err(shannon_domain::error::Error::ActivityFailed {
                    retryable: false,
                    message: format!("subtask {} failed", subtask.id),
                });
            }
            if self.soft_fail_on.as_deref() == Some(subtask.id.as_str()) {
                return Ok(AgentExecution {
                    agent_id: AgentExecution::derive_agent_id(workflow_id, subtask.index),
                    workflow_id,
                    input_summary: subtask.description.clone(),
                    output: None,
                    state: shannon_domain::agent_execution::AgentExecutionState::Failed,
                    input_tokens: 0,
                    output_tokens: 0,
                    model: None,
                    provider: None,
                    duration_ms: 1,
                    tool_executions: Vec::new(),
                });
            }
            Ok(AgentExecution {
                agent_id: AgentExecution::derive_agent_id(workflow_id, subtask.index),
                workflow_id,
                input_summary: subtask.description.clone(),
                output: Some(format!("{}::{}", prior_context, subtask.id)),
                state: shannon_domain::agent_execution::AgentExecutionState::Completed,
                input_tokens: 10,
                output_tokens: 10,
                model: None,
                provider: None,
                duration_ms: 1,
                tool_executions: Vec::new(),
            })
        }
    }
}
