//! JSONL-backed task store (C9 task rows, spec.md §3 "Task", §4.9).
//!
//! Same VecDeque + HashMap-index + JSONL-append discipline as
//! `shannon_sessions::store::SessionStore` and `runtime::event_log`.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use shannon_domain::error::{Error, Result};
use shannon_domain::task::{Task, TaskStatus};
use uuid::Uuid;

const MAX_TASKS_IN_MEMORY: usize = 5_000;

struct Inner {
    rows: VecDeque<Task>,
    index: HashMap<Uuid, usize>,
    base_seq: usize,
}

impl Inner {
    fn new(rows: VecDeque<Task>) -> Self {
        let mut index = HashMap::with_capacity(rows.len());
        for (i, t) in rows.iter().enumerate() {
            index.insert(t.task_id, i);
        }
        Self { rows, index, base_seq: 0 }
    }

    fn deque_idx(&self, seq: usize) -> usize {
        seq - self.base_seq
    }

    fn get_mut(&mut self, task_id: Uuid) -> Option<&mut Task> {
        let seq = *self.index.get(&task_id)?;
        let idx = self.deque_idx(seq);
        self.rows.get_mut(idx)
    }

    fn get(&self, task_id: Uuid) -> Option<&Task> {
        let seq = *self.index.get(&task_id)?;
        let idx = self.deque_idx(seq);
        self.rows.get(idx)
    }

    fn push_back(&mut self, task: Task) {
        let seq = self.base_seq + self.rows.len();
        self.index.insert(task.task_id, seq);
        self.rows.push_back(task);
    }

    fn pop_front(&mut self) -> Option<Task> {
        let t = self.rows.pop_front()?;
        self.index.remove(&t.task_id);
        self.base_seq += 1;
        Some(t)
    }
}

pub struct TaskStore {
    inner: RwLock<Inner>,
    log_path: PathBuf,
}

impl TaskStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("tasks");
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join("tasks.jsonl");
        let rows = Self::load_recent(&log_path);
        tracing::info!(tasks = rows.len(), path = %log_path.display(), "task store loaded");
        Ok(Self { inner: RwLock::new(Inner::new(rows)), log_path })
    }

    fn load_recent(path: &Path) -> VecDeque<Task> {
        let mut latest: HashMap<Uuid, Task> = HashMap::new();
        let mut order: Vec<Uuid> = Vec::new();
        if let Ok(content) = std::fs::read_to_string(path) {
            for line in content.lines() {
                if let Ok(task) = serde_json::from_str::<Task>(line) {
                    if !latest.contains_key(&task.task_id) {
                        order.push(task.task_id);
                    }
                    latest.insert(task.task_id, task);
                }
            }
        }
        order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .rev()
            .take(MAX_TASKS_IN_MEMORY)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    fn persist(&self, task: &Task) {
        if let Ok(json) = serde_json::to_string(task) {
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path) {
                let _ = writeln!(f, "{json}");
            }
        }
    }

    pub fn insert(&self, task: Task) {
        self.persist(&task);
        let mut inner = self.inner.write();
        inner.push_back(task);
        if inner.rows.len() > MAX_TASKS_IN_MEMORY {
            inner.pop_front();
        }
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        self.inner.read().get(task_id).cloned()
    }

    /// List tasks, optionally filtered by user and/or status, newest first.
    pub fn list(
        &self,
        user_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<Task>, usize) {
        let inner = self.inner.read();
        let filter = |t: &&Task| {
            user_id.map(|u| t.user_id == u).unwrap_or(true)
                && status.map(|s| t.status == s).unwrap_or(true)
        };
        let total = inner.rows.iter().rev().filter(filter).count();
        let page = inner.rows.iter().rev().filter(filter).skip(offset).take(limit).cloned().collect();
        (page, total)
    }

    fn update<F: FnOnce(&mut Task)>(&self, task_id: Uuid, f: F) -> Result<Task> {
        let updated = {
            let mut inner = self.inner.write();
            let task = inner.get_mut(task_id).ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
            f(task);
            task.clone()
        };
        self.persist(&updated);
        Ok(updated)
    }

    pub fn mark_running(&self, task_id: Uuid) -> Result<Task> {
        self.update(task_id, |t| {
            t.status = TaskStatus::Running;
            t.started_at = Some(chrono::Utc::now());
        })
    }

    pub fn mark_paused(&self, task_id: Uuid) -> Result<Task> {
        self.update(task_id, |t| t.status = TaskStatus::Paused)
    }

    pub fn mark_completed(&self, task_id: Uuid, result: String) -> Result<Task> {
        self.update(task_id, |t| {
            t.status = TaskStatus::Completed;
            t.result = Some(result);
            t.completed_at = Some(chrono::Utc::now());
        })
    }

    pub fn mark_failed(&self, task_id: Uuid, error: String) -> Result<Task> {
        self.update(task_id, |t| {
            t.status = TaskStatus::Failed;
            t.error = Some(error);
            t.completed_at = Some(chrono::Utc::now());
        })
    }

    pub fn mark_cancelled(&self, task_id: Uuid) -> Result<Task> {
        self.update(task_id, |t| {
            t.status = TaskStatus::Cancelled;
            t.completed_at = Some(chrono::Utc::now());
        })
    }

    pub fn record_usage(&self, task_id: Uuid, input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Result<Task> {
        self.update(task_id, |t| {
            t.usage.input_tokens += input_tokens;
            t.usage.output_tokens += output_tokens;
            t.usage.total_tokens += input_tokens + output_tokens;
            t.usage.cost_usd += cost_usd;
        })
    }

    pub fn set_model_used(&self, task_id: Uuid, provider: String, model: String) -> Result<Task> {
        self.update(task_id, |t| {
            t.provider_used = Some(provider);
            t.model_used = Some(model);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shannon_domain::task::TaskMode;

    #[test]
    fn insert_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let task = Task::new(Uuid::new_v4(), "2+2?", "user-1", TaskMode::Simple);
        let id = task.task_id;
        store.insert(task);
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Queued);
    }

    #[test]
    fn mark_running_then_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let task = Task::new(Uuid::new_v4(), "q", "user-1", TaskMode::Simple);
        let id = task.task_id;
        store.insert(task);
        store.mark_running(id).unwrap();
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Running);
        store.mark_completed(id, "42".into()).unwrap();
        let done = store.get(id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("42"));
    }

    #[test]
    fn list_filters_by_user_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let t1 = Task::new(Uuid::new_v4(), "q1", "u1", TaskMode::Simple);
        let t2 = Task::new(Uuid::new_v4(), "q2", "u2", TaskMode::Simple);
        store.insert(t1);
        store.insert(t2);
        let (list, total) = store.list(Some("u1"), None, 10, 0);
        assert_eq!(total, 1);
        assert_eq!(list.len(), 1);
        let (queued, _) = store.list(None, Some(TaskStatus::Queued), 10, 0);
        assert_eq!(queued.len(), 2);
    }

    #[test]
    fn update_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        assert!(matches!(store.mark_running(Uuid::new_v4()), Err(Error::NotFound(_))));
    }

    #[test]
    fn persisted_tasks_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let store = TaskStore::new(dir.path()).unwrap();
            store.insert(Task::new(id, "q", "u1", TaskMode::Simple));
            store.mark_running(id).unwrap();
        }
        let store2 = TaskStore::new(dir.path()).unwrap();
        assert_eq!(store2.get(id).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn record_usage_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let task = Task::new(Uuid::new_v4(), "q", "u1", TaskMode::Simple);
        let id = task.task_id;
        store.insert(task);
        store.record_usage(id, 100, 50, 0.01).unwrap();
        store.record_usage(id, 10, 5, 0.001).unwrap();
        let t = store.get(id).unwrap();
        assert_eq!(t.usage.input_tokens, 110);
        assert_eq!(t.usage.total_tokens, 165);
    }
}
