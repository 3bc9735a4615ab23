//! JSONL-backed session store.
//!
//! Grounded on the same VecDeque + HashMap-index + JSONL-append discipline
//! used by the event log (`shannon-gateway::runtime::event_log`) and its
//! teacher precedent (`RunStore`): a bounded in-memory ring for fast
//! queries, with every mutation appended to a durable on-disk log so a
//! restarted process can reload recent sessions.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shannon_domain::error::{Error, Result};
use shannon_domain::session::{Session, TurnRole};

/// Cap on sessions kept hot in memory; older ones remain on disk but fall
/// out of `list`/`get` until the process is restarted (mirrors the
/// teacher's `RunStore` ring bound).
const MAX_SESSIONS_IN_MEMORY: usize = 5_000;

/// A session row plus store-only bookkeeping that doesn't belong on the
/// wire-facing `shannon_domain::Session` type.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    session: Session,
    #[serde(default)]
    deleted: bool,
}

struct Inner {
    rows: VecDeque<SessionRecord>,
    index: HashMap<String, usize>,
    base_seq: usize,
}

impl Inner {
    fn new(rows: VecDeque<SessionRecord>) -> Self {
        let mut index = HashMap::with_capacity(rows.len());
        for (i, r) in rows.iter().enumerate() {
            index.insert(r.session.session_id.clone(), i);
        }
        Self { rows, index, base_seq: 0 }
    }

    fn deque_idx(&self, seq: usize) -> usize {
        seq - self.base_seq
    }

    fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionRecord> {
        let seq = *self.index.get(session_id)?;
        let idx = self.deque_idx(seq);
        self.rows.get_mut(idx)
    }

    fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        let seq = *self.index.get(session_id)?;
        let idx = self.deque_idx(seq);
        self.rows.get(idx)
    }

    fn push_back(&mut self, record: SessionRecord) {
        let seq = self.base_seq + self.rows.len();
        self.index.insert(record.session.session_id.clone(), seq);
        self.rows.push_back(record);
    }

    fn pop_front(&mut self) -> Option<SessionRecord> {
        let r = self.rows.pop_front()?;
        self.index.remove(&r.session.session_id);
        self.base_seq += 1;
        Some(r)
    }
}

/// Returned by [`SessionStore::rename`] / [`SessionStore::soft_delete`]
/// when the session doesn't exist.
#[derive(Debug)]
pub struct SoftDeleteError;

pub struct SessionStore {
    inner: RwLock<Inner>,
    log_path: PathBuf,
}

impl SessionStore {
    /// Load (or create) the session store at `state_path/sessions/sessions.jsonl`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join("sessions.jsonl");

        let rows = Self::load_recent(&log_path);
        tracing::info!(sessions = rows.len(), path = %log_path.display(), "session store loaded");

        Ok(Self {
            inner: RwLock::new(Inner::new(rows)),
            log_path,
        })
    }

    fn load_recent(path: &Path) -> VecDeque<SessionRecord> {
        // Later lines for the same session_id supersede earlier ones — the
        // log is an append-only mutation journal, not one row per session.
        let mut latest: HashMap<String, SessionRecord> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        if let Ok(content) = std::fs::read_to_string(path) {
            for line in content.lines() {
                if let Ok(record) = serde_json::from_str::<SessionRecord>(line) {
                    let id = record.session.session_id.clone();
                    if !latest.contains_key(&id) {
                        order.push(id.clone());
                    }
                    latest.insert(id, record);
                }
            }
        }
        order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .rev()
            .take(MAX_SESSIONS_IN_MEMORY)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    fn persist(&self, record: &SessionRecord) {
        if let Ok(json) = serde_json::to_string(record) {
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path) {
                let _ = writeln!(f, "{json}");
            }
        }
    }

    fn insert(&self, record: SessionRecord) {
        self.persist(&record);
        let mut inner = self.inner.write();
        inner.push_back(record);
        if inner.rows.len() > MAX_SESSIONS_IN_MEMORY {
            inner.pop_front();
        }
    }

    /// Create a new session for `user_id`.
    pub fn create(&self, user_id: impl Into<String>) -> Session {
        let session = Session::new(uuid::Uuid::new_v4().to_string(), user_id);
        self.insert(SessionRecord { session: session.clone(), deleted: false });
        session
    }

    /// Look up a session by id. Soft-deleted sessions are not returned.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let inner = self.inner.read();
        let record = inner.get(session_id)?;
        if record.deleted {
            return None;
        }
        Some(record.session.clone())
    }

    /// List sessions for a user (non-deleted), newest first.
    pub fn list(&self, user_id: Option<&str>, limit: usize, offset: usize) -> (Vec<Session>, usize) {
        let inner = self.inner.read();
        let filter = |r: &&SessionRecord| {
            !r.deleted && user_id.map(|u| r.session.user_id == u).unwrap_or(true)
        };
        let total = inner.rows.iter().rev().filter(filter).count();
        let page = inner
            .rows
            .iter()
            .rev()
            .filter(filter)
            .skip(offset)
            .take(limit)
            .map(|r| r.session.clone())
            .collect();
        (page, total)
    }

    /// Append a redacted turn and persist.
    pub fn append_turn(&self, session_id: &str, task_id: uuid::Uuid, role: TurnRole, redacted_content: impl Into<String>) {
        let updated = {
            let mut inner = self.inner.write();
            match inner.get_mut(session_id) {
                Some(r) if !r.deleted => {
                    r.session.history.push(shannon_domain::session::SessionTurn {
                        task_id,
                        role,
                        redacted_content: redacted_content.into(),
                        timestamp: Utc::now(),
                    });
                    Some(r.clone())
                }
                _ => None,
            }
        };
        if let Some(r) = updated {
            self.persist(&r);
        }
    }

    /// Fold a completed task's usage into the session's aggregate counters
    /// (spec.md §3: "Updated transactionally with task completion").
    pub fn record_task_usage(&self, session_id: &str, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        let updated = {
            let mut inner = self.inner.write();
            match inner.get_mut(session_id) {
                Some(r) if !r.deleted => {
                    r.session.record_task_usage(input_tokens, output_tokens, cost_usd);
                    Some(r.clone())
                }
                _ => None,
            }
        };
        if let Some(r) = updated {
            self.persist(&r);
        }
    }

    /// Rename (`PATCH /sessions/{id}`).
    pub fn rename(&self, session_id: &str, title: impl Into<String>) -> std::result::Result<Session, SoftDeleteError> {
        let updated = {
            let mut inner = self.inner.write();
            match inner.get_mut(session_id) {
                Some(r) if !r.deleted => {
                    r.session.title = Some(title.into());
                    Some(r.clone())
                }
                _ => None,
            }
        };
        match updated {
            Some(r) => {
                self.persist(&r);
                Ok(r.session)
            }
            None => Err(SoftDeleteError),
        }
    }

    /// Soft-delete (`DELETE /sessions/{id}`): the session stops appearing
    /// in `get`/`list` but the JSONL row is never erased.
    pub fn soft_delete(&self, session_id: &str) -> std::result::Result<(), SoftDeleteError> {
        let updated = {
            let mut inner = self.inner.write();
            match inner.get_mut(session_id) {
                Some(r) if !r.deleted => {
                    r.deleted = true;
                    Some(r.clone())
                }
                _ => None,
            }
        };
        match updated {
            Some(r) => {
                self.persist(&r);
                Ok(())
            }
            None => Err(SoftDeleteError),
        }
    }
}

/// Map a [`SoftDeleteError`] to the shared error taxonomy at the API
/// boundary.
impl From<SoftDeleteError> for Error {
    fn from(_: SoftDeleteError) -> Self {
        Error::NotFound("session not found".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let s = store.create("user-1");
        let fetched = store.get(&s.session_id).unwrap();
        assert_eq!(fetched.user_id, "user-1");
        assert_eq!(fetched.aggregate.task_count, 0);
    }

    #[test]
    fn record_task_usage_accumulates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let s = store.create("user-1");
        store.record_task_usage(&s.session_id, 100, 50, 0.01);
        store.record_task_usage(&s.session_id, 200, 75, 0.02);
        let fetched = store.get(&s.session_id).unwrap();
        assert_eq!(fetched.aggregate.total_input_tokens, 300);
        assert_eq!(fetched.aggregate.task_count, 2);

        // Reload from disk — last-write-wins per session_id.
        let store2 = SessionStore::new(dir.path()).unwrap();
        let reloaded = store2.get(&s.session_id).unwrap();
        assert_eq!(reloaded.aggregate.total_input_tokens, 300);
    }

    #[test]
    fn rename_updates_title() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let s = store.create("user-1");
        let renamed = store.rename(&s.session_id, "My chat").unwrap();
        assert_eq!(renamed.title.as_deref(), Some("My chat"));
    }

    #[test]
    fn rename_missing_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.rename("does-not-exist", "x").is_err());
    }

    #[test]
    fn soft_delete_hides_from_get_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let s = store.create("user-1");
        store.soft_delete(&s.session_id).unwrap();
        assert!(store.get(&s.session_id).is_none());
        let (list, total) = store.list(Some("user-1"), 10, 0);
        assert_eq!(total, 0);
        assert!(list.is_empty());
    }

    #[test]
    fn list_filters_by_user_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        for i in 0..3 {
            store.create(format!("u{}", i % 2));
        }
        let (list, total) = store.list(Some("u0"), 10, 0);
        assert_eq!(total, 2);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn append_turn_grows_redacted_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let s = store.create("user-1");
        let task_id = uuid::Uuid::new_v4();
        store.append_turn(&s.session_id, task_id, TurnRole::User, "hello");
        store.append_turn(&s.session_id, task_id, TurnRole::Assistant, "hi there");
        let fetched = store.get(&s.session_id).unwrap();
        assert_eq!(fetched.history.len(), 2);
        assert_eq!(fetched.history[1].redacted_content, "hi there");
    }
}
