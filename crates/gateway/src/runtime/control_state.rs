//! Per-workflow control-state store with cascading parent→child
//! cancellation (C2, spec.md §4.2).
//!
//! Wraps `shannon_domain::control_state::ControlState`'s monotonic state
//! machine with workflow identity, group cascade (generalized from
//! `runtime::cancel::CancelMap`), and event emission so every transition is
//! also a durable `WORKFLOW_*` event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use shannon_domain::control_state::{ControlState, ControlStatus};
use shannon_domain::error::{Error, Result};
use shannon_domain::event::EventType;
use uuid::Uuid;

use crate::runtime::event_log::EventLog;

struct Entry {
    state: ControlState,
    parent: Option<Uuid>,
}

/// Holds every in-flight workflow's control triple plus the group index
/// used for cascading cancellation (spec.md §4.2 "cascading cancel").
pub struct ControlStateStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
    /// parent workflow_id → set of child workflow_ids.
    groups: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
    events: Arc<EventLog>,
}

impl ControlStateStore {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register a workflow as running, optionally under a parent (child
    /// workflows spawned by the Parallel/Hybrid primitives).
    pub fn register(&self, workflow_id: Uuid, parent: Option<Uuid>) {
        self.entries.lock().insert(
            workflow_id,
            Entry { state: ControlState::new(), parent },
        );
        if let Some(parent_id) = parent {
            self.groups.lock().entry(parent_id).or_default().insert(workflow_id);
        }
        self.events.ensure_channel(workflow_id);
        let _ = self.events.append(workflow_id, EventType::WorkflowStarted, None, None, None);
    }

    pub fn get(&self, workflow_id: Uuid) -> Option<ControlState> {
        self.entries.lock().get(&workflow_id).map(|e| e.state.clone())
    }

    pub fn is_cancel_requested(&self, workflow_id: Uuid) -> bool {
        matches!(
            self.get(workflow_id).map(|s| s.status),
            Some(ControlStatus::CancelRequested | ControlStatus::Cancelled)
        )
    }

    pub fn is_pause_requested(&self, workflow_id: Uuid) -> bool {
        matches!(self.get(workflow_id).map(|s| s.status), Some(ControlStatus::PauseRequested))
    }

    fn transition(&self, workflow_id: Uuid, next: ControlStatus, reason: Option<String>) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&workflow_id)
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))?;
        if !entry.state.transition(next, reason) {
            return Err(Error::InvalidRequest(format!(
                "illegal control transition {:?} -> {:?}",
                entry.state.status, next
            )));
        }
        Ok(())
    }

    /// Request a pause. The running primitive observes this at its next
    /// checkpoint, persists a `Checkpoint` event, then calls
    /// `confirm_paused` (spec.md §4.2 "checkpoint-before-pause").
    pub fn request_pause(&self, workflow_id: Uuid, reason: Option<String>) -> Result<()> {
        self.transition(workflow_id, ControlStatus::PauseRequested, reason)?;
        self.events.append(workflow_id, EventType::WorkflowPausing, None, None, None)?;
        Ok(())
    }

    /// Persist a checkpoint blob immediately before honoring a pause
    /// request, so a restarted process can report what a paused workflow
    /// was doing (SPEC_FULL.md §S.6).
    pub fn checkpoint(&self, workflow_id: Uuid, blob: serde_json::Value) -> Result<()> {
        self.events.append(workflow_id, EventType::Checkpoint, None, None, Some(blob))?;
        Ok(())
    }

    pub fn confirm_paused(&self, workflow_id: Uuid) -> Result<()> {
        self.transition(workflow_id, ControlStatus::Paused, None)?;
        self.events.append(workflow_id, EventType::WorkflowPaused, None, None, None)?;
        Ok(())
    }

    pub fn resume(&self, workflow_id: Uuid) -> Result<()> {
        self.transition(workflow_id, ControlStatus::Running, None)?;
        self.events.append(workflow_id, EventType::WorkflowResumed, None, None, None)?;
        Ok(())
    }

    /// Request cancellation, cascading to every registered child workflow
    /// (spec.md §4.2 "cascading cancel").
    pub fn request_cancel(&self, workflow_id: Uuid, reason: Option<String>) -> Result<()> {
        self.transition(workflow_id, ControlStatus::CancelRequested, reason.clone())?;
        self.events.append(workflow_id, EventType::WorkflowCancelling, None, None, None)?;

        let children: Vec<Uuid> = self.groups.lock().get(&workflow_id).cloned().unwrap_or_default().into_iter().collect();
        for child in children {
            // Children may already be terminal; ignore illegal-transition
            // errors for those, but propagate cascading intent otherwise.
            let _ = self.request_cancel(child, reason.clone());
        }
        Ok(())
    }

    pub fn confirm_cancelled(&self, workflow_id: Uuid) -> Result<()> {
        self.transition(workflow_id, ControlStatus::Cancelled, None)?;
        self.events.append(workflow_id, EventType::WorkflowCancelled, None, None, None)?;
        self.cleanup(workflow_id);
        Ok(())
    }

    pub fn complete(&self, workflow_id: Uuid) -> Result<()> {
        self.transition(workflow_id, ControlStatus::Completed, None)?;
        self.events.append(workflow_id, EventType::WorkflowCompleted, None, None, None)?;
        self.cleanup(workflow_id);
        Ok(())
    }

    pub fn fail(&self, workflow_id: Uuid, reason: String) -> Result<()> {
        self.transition(workflow_id, ControlStatus::Failed, Some(reason.clone()))?;
        self.events.append(
            workflow_id,
            EventType::WorkflowFailed,
            None,
            Some(reason),
            None,
        )?;
        self.cleanup(workflow_id);
        Ok(())
    }

    fn cleanup(&self, workflow_id: Uuid) {
        self.groups.lock().remove(&workflow_id);
        self.events.close_channel(workflow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ControlStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventLog::new(dir.path(), Default::default()));
        (dir, ControlStateStore::new(events))
    }

    #[test]
    fn register_starts_running() {
        let (_d, store) = store();
        let wf = Uuid::new_v4();
        store.register(wf, None);
        assert_eq!(store.get(wf).unwrap().status, ControlStatus::Running);
    }

    #[test]
    fn pause_resume_roundtrip() {
        let (_d, store) = store();
        let wf = Uuid::new_v4();
        store.register(wf, None);
        store.request_pause(wf, Some("user".into())).unwrap();
        assert!(store.is_pause_requested(wf));
        store.confirm_paused(wf).unwrap();
        assert_eq!(store.get(wf).unwrap().status, ControlStatus::Paused);
        store.resume(wf).unwrap();
        assert_eq!(store.get(wf).unwrap().status, ControlStatus::Running);
    }

    #[test]
    fn cancel_cascades_to_children() {
        let (_d, store) = store();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        store.register(parent, None);
        store.register(child, Some(parent));

        store.request_cancel(parent, Some("timeout".into())).unwrap();
        assert!(store.is_cancel_requested(parent));
        assert!(store.is_cancel_requested(child));
    }

    #[test]
    fn cannot_cancel_after_completed() {
        let (_d, store) = store();
        let wf = Uuid::new_v4();
        store.register(wf, None);
        store.complete(wf).unwrap();
        assert!(store.request_cancel(wf, None).is_err());
    }

    #[test]
    fn unknown_workflow_is_not_found() {
        let (_d, store) = store();
        assert!(matches!(
            store.request_pause(Uuid::new_v4(), None),
            Err(Error::NotFound(_))
        ));
    }
}
