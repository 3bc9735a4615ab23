//! Persistent [`ScheduleStore`] (spec.md §6.4): cron-triggered task
//! submissions, snapshotted whole to `<state_dir>/schedules/schedules.json`
//! on every mutation (unlike the JSONL-append idiom `EventLog`/`TaskStore`/
//! `SessionStore` use — schedules are low-volume and frequently updated in
//! place, so a full-file rewrite is simpler and the file stays small).
//!
//! "List runs" (spec.md §6.4) is served from [`TaskStore`](crate::runtime::task_store::TaskStore)
//! by filtering on the `schedule_id` context key a fired run stamps onto
//! its task — there is no separate Run entity here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shannon_domain::error::{Error, Result};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::cron::{cron_next_tz, parse_tz};
use super::model::{MissedPolicy, Schedule, ScheduleEvent};
use super::validation::{validate_cron, validate_timezone};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Caller-supplied fields for a new schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub name: String,
    pub cron: String,
    pub timezone: String,
    pub user_id: String,
    pub query: String,
    pub mode_override: Option<String>,
    pub session_id: Option<String>,
}

pub struct ScheduleStore {
    inner: RwLock<HashMap<Uuid, Schedule>>,
    path: PathBuf,
    events: broadcast::Sender<ScheduleEvent>,
}

impl ScheduleStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("schedules");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("schedules.json");
        let schedules = Self::load(&path);
        tracing::info!(schedules = schedules.len(), path = %path.display(), "schedule store loaded");
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { inner: RwLock::new(schedules), path, events })
    }

    fn load(path: &Path) -> HashMap<Uuid, Schedule> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return HashMap::new();
        };
        let list: Vec<Schedule> = serde_json::from_str(&content).unwrap_or_default();
        list.into_iter().map(|s| (s.id, s)).collect()
    }

    fn persist(&self) -> Result<()> {
        let list: Vec<Schedule> = self.inner.read().values().cloned().collect();
        let json = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn emit(&self, event: ScheduleEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.events.subscribe()
    }

    pub fn create(&self, req: NewSchedule) -> Result<Schedule> {
        validate_cron(&req.cron)?;
        validate_timezone(&req.timezone)?;
        let now = Utc::now();
        let next_run_at = cron_next_tz(&req.cron, &now, parse_tz(&req.timezone));

        let schedule = Schedule {
            id: Uuid::new_v4(),
            name: req.name,
            cron: req.cron,
            timezone: req.timezone,
            enabled: true,
            user_id: req.user_id,
            query: req.query,
            mode_override: req.mode_override,
            session_id: req.session_id,
            created_at: now,
            updated_at: now,
            last_run_id: None,
            last_run_at: None,
            next_run_at,
            missed_policy: MissedPolicy::default(),
            max_concurrency: 1,
            timeout_ms: None,
            max_catchup_runs: 5,
            last_error: None,
            last_error_at: None,
            consecutive_failures: 0,
            cooldown_until: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_runs: 0,
        };

        self.inner.write().insert(schedule.id, schedule.clone());
        self.persist()?;
        self.emit(ScheduleEvent::ScheduleUpdated { schedule: schedule.to_view() });
        Ok(schedule)
    }

    pub fn get(&self, id: Uuid) -> Option<Schedule> {
        self.inner.read().get(&id).cloned()
    }

    pub fn list(&self, user_id: Option<&str>) -> Vec<Schedule> {
        let inner = self.inner.read();
        let mut out: Vec<Schedule> = inner
            .values()
            .filter(|s| user_id.map(|u| s.user_id == u).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    fn update<F: FnOnce(&mut Schedule)>(&self, id: Uuid, f: F) -> Result<Schedule> {
        let updated = {
            let mut inner = self.inner.write();
            let schedule = inner.get_mut(&id).ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
            f(schedule);
            schedule.updated_at = Utc::now();
            schedule.clone()
        };
        self.persist()?;
        self.emit(ScheduleEvent::ScheduleUpdated { schedule: updated.to_view() });
        Ok(updated)
    }

    pub fn update_fields(
        &self,
        id: Uuid,
        name: Option<String>,
        cron: Option<String>,
        timezone: Option<String>,
        query: Option<String>,
        mode_override: Option<Option<String>>,
    ) -> Result<Schedule> {
        if let Some(cron) = &cron {
            validate_cron(cron)?;
        }
        if let Some(tz) = &timezone {
            validate_timezone(tz)?;
        }
        self.update(id, |s| {
            if let Some(name) = name {
                s.name = name;
            }
            if let Some(cron) = cron {
                s.cron = cron;
            }
            if let Some(tz) = timezone {
                s.timezone = tz;
            }
            if let Some(query) = query {
                s.query = query;
            }
            if let Some(mode_override) = mode_override {
                s.mode_override = mode_override;
            }
            s.next_run_at = cron_next_tz(&s.cron, &Utc::now(), parse_tz(&s.timezone));
        })
    }

    pub fn pause(&self, id: Uuid) -> Result<Schedule> {
        self.update(id, |s| s.enabled = false)
    }

    pub fn resume(&self, id: Uuid) -> Result<Schedule> {
        self.update(id, |s| {
            s.enabled = true;
            s.consecutive_failures = 0;
            s.cooldown_until = None;
            s.next_run_at = cron_next_tz(&s.cron, &Utc::now(), parse_tz(&s.timezone));
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        let removed = self.inner.write().remove(&id);
        if removed.is_none() {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        self.persist()
    }

    /// Schedules due to fire: enabled, not in cooldown, with a
    /// `next_run_at` at or before `now` (spec.md §6.4 runner tick).
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Schedule> {
        self.inner
            .read()
            .values()
            .filter(|s| {
                s.enabled
                    && s.cooldown_until.map(|until| until <= now).unwrap_or(true)
                    && s.next_run_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn record_run_started(&self, id: Uuid, run_id: Uuid) -> Result<Schedule> {
        let schedule = self.update(id, |s| {
            s.last_run_id = Some(run_id);
            s.last_run_at = Some(Utc::now());
        })?;
        self.emit(ScheduleEvent::ScheduleRunStarted { schedule_id: id, run_id });
        Ok(schedule)
    }

    /// Record a fired run's outcome: rolls usage totals, the consecutive
    /// failure counter and exponential cooldown, and advances
    /// `next_run_at` to the next cron occurrence (spec.md §6.4).
    pub fn record_run_result(
        &self,
        id: Uuid,
        run_id: Uuid,
        success: bool,
        error: Option<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<Schedule> {
        let schedule = self.update(id, |s| {
            s.total_runs += 1;
            s.total_input_tokens += input_tokens;
            s.total_output_tokens += output_tokens;
            if success {
                s.consecutive_failures = 0;
                s.cooldown_until = None;
                s.last_error = None;
                s.last_error_at = None;
            } else {
                s.consecutive_failures += 1;
                s.last_error = error;
                s.last_error_at = Some(Utc::now());
                let cooldown = super::model::cooldown_minutes(s.consecutive_failures);
                s.cooldown_until = Some(Utc::now() + chrono::Duration::minutes(cooldown as i64));
            }
            s.next_run_at = cron_next_tz(&s.cron, &Utc::now(), parse_tz(&s.timezone));
        })?;
        self.emit(ScheduleEvent::ScheduleRunCompleted { schedule_id: id, run_id });
        Ok(schedule)
    }
}

pub type SharedScheduleStore = Arc<ScheduleStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn new_req() -> NewSchedule {
        NewSchedule {
            name: "daily digest".into(),
            cron: "0 9 * * *".into(),
            timezone: "UTC".into(),
            user_id: "user-1".into(),
            query: "summarize overnight activity".into(),
            mode_override: None,
            session_id: None,
        }
    }

    #[test]
    fn create_computes_next_run_at() {
        let (_d, store) = store();
        let schedule = store.create(new_req()).unwrap();
        assert!(schedule.next_run_at.is_some());
        assert_eq!(schedule.user_id, "user-1");
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let (_d, store) = store();
        let mut req = new_req();
        req.cron = "not a cron".into();
        assert!(store.create(req).is_err());
    }

    #[test]
    fn pause_resume_roundtrip() {
        let (_d, store) = store();
        let schedule = store.create(new_req()).unwrap();
        let paused = store.pause(schedule.id).unwrap();
        assert!(!paused.enabled);
        assert_eq!(paused.computed_status(), super::super::model::ScheduleStatus::Paused);
        let resumed = store.resume(schedule.id).unwrap();
        assert!(resumed.enabled);
    }

    #[test]
    fn failed_run_sets_cooldown_and_error_status() {
        let (_d, store) = store();
        let schedule = store.create(new_req()).unwrap();
        let run_id = Uuid::new_v4();
        store.record_run_started(schedule.id, run_id).unwrap();
        let updated = store
            .record_run_result(schedule.id, run_id, false, Some("boom".into()), 10, 0)
            .unwrap();
        assert_eq!(updated.consecutive_failures, 1);
        assert!(updated.cooldown_until.is_some());
        assert_eq!(updated.computed_status(), super::super::model::ScheduleStatus::Error);
    }

    #[test]
    fn successful_run_clears_failure_state() {
        let (_d, store) = store();
        let schedule = store.create(new_req()).unwrap();
        let run_id = Uuid::new_v4();
        store.record_run_result(schedule.id, run_id, false, Some("boom".into()), 0, 0).unwrap();
        let recovered = store.record_run_result(schedule.id, run_id, true, None, 5, 5).unwrap();
        assert_eq!(recovered.consecutive_failures, 0);
        assert!(recovered.cooldown_until.is_none());
        assert_eq!(recovered.total_runs, 2);
    }

    #[test]
    fn delete_removes_schedule() {
        let (_d, store) = store();
        let schedule = store.create(new_req()).unwrap();
        store.delete(schedule.id).unwrap();
        assert!(store.get(schedule.id).is_none());
        assert!(store.delete(schedule.id).is_err());
    }

    #[test]
    fn due_filters_by_next_run_at_and_cooldown() {
        let (_d, store) = store();
        let schedule = store.create(new_req()).unwrap();
        assert!(store.due(Utc::now() + chrono::Duration::days(2)).iter().any(|s| s.id == schedule.id));
        assert!(store.due(Utc::now()).is_empty());
    }

    #[test]
    fn persisted_schedules_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = ScheduleStore::new(dir.path()).unwrap();
            store.create(new_req()).unwrap().id
        };
        let store2 = ScheduleStore::new(dir.path()).unwrap();
        assert!(store2.get(id).is_some());
    }
}
