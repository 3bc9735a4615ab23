//! Workflow orchestrator: submit → route → execute → complete (spec.md
//! §4.6 steps 7-8, tying together C1-C6 and C9).
//!
//! `submit` runs the strategy router (C6, steps 1-6) inline so a caller
//! gets back a real `Task` row with its final mode/pattern already
//! decided, then dispatches the actual subtask execution onto a spawned
//! task so the HTTP response doesn't wait on the whole workflow.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shannon_domain::agent_execution::AgentExecution;
use shannon_domain::capability::ModelRole;
use shannon_domain::error::{Error, Result};
use shannon_domain::event::EventType;
use shannon_domain::session::TurnRole;
use shannon_domain::task::{Task, TaskMode};
use shannon_providers::router::LlmRouter;
use shannon_sessions::store::SessionStore;
use uuid::Uuid;

use crate::runtime::budget::BudgetTracker;
use crate::runtime::control_state::ControlStateStore;
use crate::runtime::event_log::EventLog;
use crate::runtime::patterns::{PatternExecutor, PatternOptions, PatternRegistry};
use crate::runtime::primitives::{run_hybrid, run_parallel, run_sequential, Executor};
use crate::runtime::strategy_router::{RouteOverrides, RoutingDecision, StrategyRouter};
use crate::runtime::task_store::TaskStore;

/// Caller-supplied inputs for a new task (spec.md §3 "Task" request
/// shape). `context` never gets clobbered by the router's own
/// decomposition — it flows straight onto the stored `Task`.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub query: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub tenant_id: Option<String>,
    pub mode_override: Option<String>,
    pub routing_labels: Vec<String>,
    pub context: HashMap<String, serde_json::Value>,
}

/// Which execution primitive a routing decision's subtask shape calls
/// for (spec.md §4.4: Parallel for independent fan-out, Sequential for
/// linear accumulation, Hybrid for a dependency graph).
fn pick_primitive(route: &RoutingDecision) -> Primitive {
    if route.subtasks.iter().any(|s| !s.depends_on.is_empty()) {
        Primitive::Hybrid
    } else if route.mode == "supervisor" && route.subtasks.len() > 1 {
        Primitive::Parallel
    } else {
        Primitive::Sequential
    }
}

enum Primitive {
    Parallel,
    Sequential,
    Hybrid,
}

fn mode_from_str(s: &str) -> TaskMode {
    match s {
        "simple" => TaskMode::Simple,
        "complex" => TaskMode::Complex,
        "supervisor" => TaskMode::Supervisor,
        _ => TaskMode::Standard,
    }
}

/// What a paused workflow needs to pick back up (spec.md §4.2 pause):
/// the caller's original inputs, replayed through the router again on
/// resume. A subtask-granular checkpoint/replay (honoring the
/// `Checkpoint` event's blob) belongs to the workflow-runtime adapter's
/// activity versioning (C7) and isn't wired in at this layer yet.
struct PausedWorkflow {
    req: SubmitRequest,
}

pub struct WorkflowOrchestrator {
    events: Arc<EventLog>,
    control: Arc<ControlStateStore>,
    budget: Arc<BudgetTracker>,
    router: Arc<StrategyRouter>,
    llm: Arc<LlmRouter>,
    patterns: Arc<PatternRegistry>,
    tasks: Arc<TaskStore>,
    sessions: Arc<SessionStore>,
    default_max_concurrency: u32,
    hybrid_dependency_wait_timeout: std::time::Duration,
    paused: Mutex<HashMap<Uuid, PausedWorkflow>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        events: Arc<EventLog>,
        control: Arc<ControlStateStore>,
        budget: Arc<BudgetTracker>,
        router: Arc<StrategyRouter>,
        llm: Arc<LlmRouter>,
        patterns: Arc<PatternRegistry>,
        tasks: Arc<TaskStore>,
        sessions: Arc<SessionStore>,
        default_max_concurrency: u32,
        hybrid_dependency_wait_timeout_ms: u64,
    ) -> Self {
        Self {
            events,
            control,
            budget,
            router,
            llm,
            patterns,
            tasks,
            sessions,
            default_max_concurrency,
            hybrid_dependency_wait_timeout: std::time::Duration::from_millis(hybrid_dependency_wait_timeout_ms),
            paused: Mutex::new(HashMap::new()),
        }
    }

    /// Steps 1-8 of spec.md §4.6: route the task, persist its row with
    /// the mode the router actually picked, then spawn the subtask
    /// execution in the background. Returns the `Queued` row immediately.
    pub async fn submit(self: &Arc<Self>, req: SubmitRequest) -> Result<Task> {
        self.budget.check_rate_limit(&req.user_id)?;

        let task_id = Uuid::new_v4();
        self.budget.admit_workflow(task_id)?;
        self.control.register(task_id, None);

        let overrides = RouteOverrides { mode: req.mode_override.clone(), ..Default::default() };
        let route = match self
            .router
            .route(task_id, &req.user_id, req.session_id.clone(), &req.query, overrides)
            .await
        {
            Ok(route) => route,
            Err(e) => {
                let _ = self.control.fail(task_id, e.to_string());
                self.budget.release_workflow(task_id);
                return Err(e);
            }
        };

        let mut task = Task::new(task_id, req.query.clone(), req.user_id.clone(), mode_from_str(&route.mode));
        task.session_id = req.session_id.clone();
        task.tenant_id = req.tenant_id.clone();
        task.routing_labels = req.routing_labels.clone();
        task.context = req.context.clone();
        self.tasks.insert(task.clone());

        let this = Arc::clone(self);
        let req_for_spawn = req.clone();
        tokio::spawn(async move {
            this.run(task_id, route, req_for_spawn).await;
        });

        Ok(task)
    }

    /// Resume a paused workflow (spec.md §4.2 "resume"). Re-runs the
    /// router and subtask plan from scratch against the task's original
    /// inputs; see [`PausedWorkflow`].
    pub async fn resume(self: &Arc<Self>, task_id: Uuid) -> Result<()> {
        let paused = self
            .paused
            .lock()
            .remove(&task_id)
            .ok_or_else(|| Error::InvalidRequest(format!("task {task_id} is not paused")))?;
        self.control.resume(task_id)?;
        self.tasks.mark_running(task_id)?;

        let overrides = RouteOverrides { mode: paused.req.mode_override.clone(), ..Default::default() };
        let route = self
            .router
            .route(task_id, &paused.req.user_id, paused.req.session_id.clone(), &paused.req.query, overrides)
            .await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(task_id, route, paused.req).await;
        });
        Ok(())
    }

    pub fn pause(&self, task_id: Uuid, reason: Option<String>) -> Result<()> {
        self.control.request_pause(task_id, reason)
    }

    pub fn cancel(&self, task_id: Uuid, reason: Option<String>) -> Result<()> {
        self.control.request_cancel(task_id, reason)
    }

    /// Step 7 (dispatch as child workflow) plus step 8 (on-return
    /// bookkeeping): run the chosen primitive, then record usage, update
    /// the session, and emit the terminal event.
    async fn run(&self, task_id: Uuid, route: RoutingDecision, req: SubmitRequest) {
        if let Err(e) = self.tasks.mark_running(task_id) {
            tracing::error!(%task_id, error = %e, "failed to mark task running");
            return;
        }

        // Step 6 carried a proceed-with-delay backpressure decision; honor
        // it before dispatching the primitive (spec.md §4.3, §8 invariant
        // 9) and record the threshold crossing on the event log.
        if route.backpressure_delay_ms > 0 {
            let _ = self.events.append(
                task_id,
                EventType::BudgetThreshold,
                None,
                None,
                Some(serde_json::json!({
                    "delay_ms": route.backpressure_delay_ms,
                    "pressure_level": route.pressure_level,
                })),
            );
            tokio::time::sleep(std::time::Duration::from_millis(route.backpressure_delay_ms)).await;
        }

        let max_concurrency = route
            .preset_overrides
            .get("max_concurrent_agents")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.default_max_concurrency as usize);

        let session_uuid = req.session_id.as_deref().and_then(|s| Uuid::parse_str(s).ok());
        let executor: Executor = Arc::new(PatternExecutor {
            registry: self.patterns.clone(),
            router: self.llm.clone(),
            events: self.events.clone(),
            control: self.control.clone(),
            pattern_hint: Some(route.pattern),
            options: PatternOptions {
                token_budget: route.token_budget,
                model_role: ModelRole::Executor,
                user_id: req.user_id.clone(),
                session_id: session_uuid,
                emit_events: true,
            },
        });

        let outcome = match pick_primitive(&route) {
            Primitive::Parallel => {
                run_parallel(task_id, &route.subtasks, executor, self.events.clone(), self.control.clone(), max_concurrency).await
            }
            Primitive::Sequential => {
                run_sequential(task_id, &route.subtasks, executor, self.events.clone(), self.control.clone()).await
            }
            Primitive::Hybrid => {
                run_hybrid(
                    task_id,
                    &route.subtasks,
                    executor,
                    self.events.clone(),
                    self.control.clone(),
                    max_concurrency,
                    self.hybrid_dependency_wait_timeout,
                )
                .await
            }
        };

        match outcome {
            Ok(executions) => self.finish_ok(task_id, &req, executions).await,
            Err(Error::Cancelled) => self.finish_unwound(task_id, req).await,
            Err(e) => self.finish_err(task_id, e).await,
        }
    }

    async fn finish_ok(&self, task_id: Uuid, req: &SubmitRequest, executions: Vec<AgentExecution>) {
        let (input_tokens, output_tokens) = executions.iter().fold((0u64, 0u64), |(i, o), e| {
            (i + e.input_tokens, o + e.output_tokens)
        });
        let result = executions
            .iter()
            .filter_map(|e| e.output.clone())
            .collect::<Vec<_>>()
            .join("\n");
        // No pricing table exists anywhere in this corpus; cost tracking
        // is left at zero until a provider pricing table is introduced.
        let cost_usd = 0.0;

        if let Err(e) = self.tasks.record_usage(task_id, input_tokens, output_tokens, cost_usd) {
            tracing::warn!(%task_id, error = %e, "failed to record task usage");
        }
        if let Err(e) = self.tasks.mark_completed(task_id, result.clone()) {
            tracing::warn!(%task_id, error = %e, "failed to mark task completed");
        }
        self.budget.record_usage(task_id, input_tokens + output_tokens, cost_usd);
        if let Err(e) = self.control.complete(task_id) {
            tracing::warn!(%task_id, error = %e, "failed to transition control state to completed");
        }

        if let Some(session_id) = &req.session_id {
            self.sessions.append_turn(session_id, task_id, TurnRole::User, req.query.clone());
            self.sessions.append_turn(session_id, task_id, TurnRole::Assistant, result);
            self.sessions.record_task_usage(session_id, input_tokens, output_tokens, cost_usd);
        }
        self.budget.release_workflow(task_id);
    }

    /// A primitive returned `Error::Cancelled`, which doubles as the
    /// unwind signal for both an honored pause and a genuine cancel
    /// (`sequential::run_sequential`'s doc comment); tell them apart by
    /// the control state the primitive already transitioned to.
    async fn finish_unwound(&self, task_id: Uuid, req: SubmitRequest) {
        let status = self.control.get(task_id).map(|s| s.status);
        match status {
            Some(shannon_domain::control_state::ControlStatus::Paused) => {
                if let Err(e) = self.tasks.mark_paused(task_id) {
                    tracing::warn!(%task_id, error = %e, "failed to mark task paused");
                }
                self.paused.lock().insert(task_id, PausedWorkflow { req });
            }
            _ => {
                if let Err(e) = self.tasks.mark_cancelled(task_id) {
                    tracing::warn!(%task_id, error = %e, "failed to mark task cancelled");
                }
                let _ = self.control.confirm_cancelled(task_id);
                self.budget.release_workflow(task_id);
            }
        }
    }

    async fn finish_err(&self, task_id: Uuid, e: Error) {
        let message = e.to_string();
        if let Err(err) = self.tasks.mark_failed(task_id, message.clone()) {
            tracing::warn!(%task_id, error = %err, "failed to mark task failed");
        }
        let _ = self.control.fail(task_id, message);
        self.budget.release_workflow(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shannon_domain::config::{BudgetConfig, EventLogConfig, LlmConfig, RateLimitConfig, RouterConfig};
    use shannon_providers::echo::EchoProvider;
    use shannon_providers::registry::ProviderRegistry;

    fn orchestrator() -> (tempfile::TempDir, Arc<WorkflowOrchestrator>) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventLog::new(dir.path(), EventLogConfig::default()));
        let control = Arc::new(ControlStateStore::new(events.clone()));
        let budget = Arc::new(BudgetTracker::new(BudgetConfig::default(), RateLimitConfig::default()));

        let mut llm_config = LlmConfig::default();
        llm_config.roles.entry("executor".to_string()).or_insert_with(|| shannon_domain::config::RoleConfig {
            model: "echo/echo-1".to_string(),
            require_tools: false,
            require_json: false,
            require_streaming: false,
            fallbacks: Vec::new(),
        });
        llm_config.roles.entry("planner".to_string()).or_insert_with(|| shannon_domain::config::RoleConfig {
            model: "echo/echo-1".to_string(),
            require_tools: false,
            require_json: false,
            require_streaming: false,
            fallbacks: Vec::new(),
        });
        let mut registry = ProviderRegistry::from_config(&llm_config);
        registry.register("echo", Arc::new(EchoProvider::new("echo")));
        let llm = Arc::new(LlmRouter::new(registry, llm_config.roles.clone(), llm_config.default_timeout_ms));

        let strategy_router = Arc::new(StrategyRouter::new(RouterConfig::default(), llm.clone(), budget.clone(), None));
        let patterns = Arc::new(PatternRegistry::new());
        let tasks = Arc::new(TaskStore::new(dir.path()).unwrap());
        let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());

        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            events,
            control,
            budget,
            strategy_router,
            llm,
            patterns,
            tasks,
            sessions,
            4,
            30_000,
        ));
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn submit_returns_queued_task_and_completes_in_background() {
        let (_dir, orchestrator) = orchestrator();
        let task = orchestrator
            .submit(SubmitRequest {
                query: "what is 2+2".to_string(),
                user_id: "user-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(task.status, shannon_domain::task::TaskStatus::Queued);

        for _ in 0..50 {
            if let Some(t) = orchestrator.tasks.get(task.task_id) {
                if t.status.is_terminal() {
                    assert_eq!(t.status, shannon_domain::task::TaskStatus::Completed);
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("task never reached a terminal state");
    }

    #[tokio::test]
    async fn cancel_before_execution_finishes_unwinds_cleanly() {
        let (_dir, orchestrator) = orchestrator();
        let task = orchestrator
            .submit(SubmitRequest {
                query: "long task".to_string(),
                user_id: "user-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let _ = orchestrator.cancel(task.task_id, Some("user requested".into()));

        for _ in 0..50 {
            if let Some(t) = orchestrator.tasks.get(task.task_id) {
                if t.status.is_terminal() {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}
