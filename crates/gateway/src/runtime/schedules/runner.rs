//! Background schedule runner (spec.md §6.4 "runner"): polls
//! [`ScheduleStore::due`] on a fixed tick and submits each due schedule's
//! query through the [`WorkflowOrchestrator`], then watches the spawned
//! task to record the run's outcome back onto the schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::runtime::schedules::ScheduleStore;
use crate::runtime::task_store::TaskStore;
use crate::runtime::workflow::{SubmitRequest, WorkflowOrchestrator};
use shannon_domain::task::TaskStatus;

/// How long to keep polling a fired run for a terminal status before
/// giving up on recording its outcome.
const MAX_POLLS: u32 = 150;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ScheduleRunner;

impl ScheduleRunner {
    pub fn new() -> Self {
        Self
    }

    /// One tick: submit every currently-due schedule and fire-and-forget
    /// a watcher task per run that records the outcome once it lands.
    pub async fn tick(
        &self,
        schedules: &Arc<ScheduleStore>,
        tasks: &Arc<TaskStore>,
        orchestrator: &Arc<WorkflowOrchestrator>,
    ) {
        for schedule in schedules.due(Utc::now()) {
            let mut context = std::collections::HashMap::new();
            context.insert("schedule_id".to_string(), serde_json::json!(schedule.id));

            let req = SubmitRequest {
                query: schedule.query.clone(),
                user_id: schedule.user_id.clone(),
                session_id: schedule.session_id.clone(),
                mode_override: schedule.mode_override.clone(),
                context,
                ..Default::default()
            };

            match orchestrator.submit(req).await {
                Ok(task) => {
                    let _ = schedules.record_run_started(schedule.id, task.task_id);
                    let schedules = schedules.clone();
                    let tasks = tasks.clone();
                    let schedule_id = schedule.id;
                    let task_id = task.task_id;
                    tokio::spawn(async move {
                        Self::await_and_record(tasks, schedules, schedule_id, task_id).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "scheduled submit failed");
                    let _ = schedules.record_run_result(
                        schedule.id,
                        Uuid::new_v4(),
                        false,
                        Some(e.to_string()),
                        0,
                        0,
                    );
                }
            }
        }
    }

    async fn await_and_record(
        tasks: Arc<TaskStore>,
        schedules: Arc<ScheduleStore>,
        schedule_id: Uuid,
        task_id: Uuid,
    ) {
        for _ in 0..MAX_POLLS {
            if let Some(task) = tasks.get(task_id) {
                if task.status.is_terminal() {
                    let success = task.status == TaskStatus::Completed;
                    let error = if success { None } else { task.error.clone() };
                    let _ = schedules.record_run_result(
                        schedule_id,
                        task_id,
                        success,
                        error,
                        task.usage.input_tokens,
                        task.usage.output_tokens,
                    );
                    return;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        tracing::warn!(%schedule_id, %task_id, "schedule run never reached a terminal state; giving up on recording outcome");
    }
}

impl Default for ScheduleRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::budget::BudgetTracker;
    use crate::runtime::control_state::ControlStateStore;
    use crate::runtime::event_log::EventLog;
    use crate::runtime::patterns::PatternRegistry;
    use crate::runtime::schedules::store::NewSchedule;
    use crate::runtime::strategy_router::StrategyRouter;
    use shannon_domain::config::{
        BudgetConfig, EventLogConfig, LlmConfig, RateLimitConfig, RoleConfig, RouterConfig,
    };
    use shannon_providers::echo::EchoProvider;
    use shannon_providers::registry::ProviderRegistry;
    use shannon_providers::router::LlmRouter;
    use shannon_sessions::store::SessionStore;

    fn orchestrator(dir: &std::path::Path) -> Arc<WorkflowOrchestrator> {
        let events = Arc::new(EventLog::new(dir, EventLogConfig::default()));
        let control = Arc::new(ControlStateStore::new(events.clone()));
        let budget = Arc::new(BudgetTracker::new(BudgetConfig::default(), RateLimitConfig::default()));

        let mut llm_config = LlmConfig::default();
        llm_config.roles.entry("executor".to_string()).or_insert_with(|| RoleConfig {
            model: "echo/echo-1".to_string(),
            require_tools: false,
            require_json: false,
            require_streaming: false,
            fallbacks: Vec::new(),
        });
        llm_config.roles.entry("planner".to_string()).or_insert_with(|| RoleConfig {
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
        let tasks = Arc::new(TaskStore::new(dir).unwrap());
        let sessions = Arc::new(SessionStore::new(dir).unwrap());

        Arc::new(WorkflowOrchestrator::new(
            events, control, budget, strategy_router, llm, patterns, tasks, sessions, 4, 30_000,
        ))
    }

    #[tokio::test]
    async fn tick_leaves_not_yet_due_schedules_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let schedules = Arc::new(ScheduleStore::new(dir.path()).unwrap());
        let tasks = Arc::new(TaskStore::new(dir.path()).unwrap());

        let schedule = schedules
            .create(NewSchedule {
                name: "digest".into(),
                cron: "0 9 * * *".into(),
                timezone: "UTC".into(),
                user_id: "user-1".into(),
                query: "summarize overnight activity".into(),
                mode_override: None,
                session_id: None,
            })
            .unwrap();
        assert!(schedules.due(Utc::now()).is_empty());

        let runner = ScheduleRunner::new();
        runner.tick(&schedules, &tasks, &orchestrator).await;
        assert!(schedules.get(schedule.id).unwrap().last_run_id.is_none());
    }

    #[tokio::test]
    async fn tick_submits_due_schedule_and_records_completion() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());

        {
            // `due()` requires `next_run_at <= now`; a freshly-created
            // schedule's next cron occurrence is always in the future, so
            // backdate it directly in the persisted snapshot rather than
            // waiting for a real cron match.
            let schedules = ScheduleStore::new(dir.path()).unwrap();
            let schedule = schedules
                .create(NewSchedule {
                    name: "digest".into(),
                    cron: "0 9 * * *".into(),
                    timezone: "UTC".into(),
                    user_id: "user-1".into(),
                    query: "2 + 2".into(),
                    mode_override: None,
                    session_id: None,
                })
                .unwrap();
            let mut backdated = schedule.clone();
            backdated.next_run_at = Some(Utc::now() - chrono::Duration::minutes(1));
            let path = dir.path().join("schedules").join("schedules.json");
            let json = serde_json::to_string_pretty(&vec![backdated]).unwrap();
            std::fs::write(&path, json).unwrap();
        }

        let schedules = Arc::new(ScheduleStore::new(dir.path()).unwrap());
        let tasks = Arc::new(TaskStore::new(dir.path()).unwrap());
        let schedule_id = schedules.list(None)[0].id;
        assert!(schedules.due(Utc::now()).iter().any(|s| s.id == schedule_id));

        let runner = ScheduleRunner::new();
        runner.tick(&schedules, &tasks, &orchestrator).await;
        assert!(schedules.get(schedule_id).unwrap().last_run_id.is_some());

        for _ in 0..50 {
            if schedules.get(schedule_id).unwrap().total_runs > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(schedules.get(schedule_id).unwrap().total_runs, 1);
        assert_eq!(schedules.get(schedule_id).unwrap().consecutive_failures, 0);
    }
}
