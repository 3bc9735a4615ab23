//! Append-only per-workflow event store (C1, spec.md §4.1).
//!
//! Durable persistence is one JSONL file per workflow under
//! `<state_dir>/events/<workflow_id>.jsonl`; live fan-out is a bounded
//! `tokio::broadcast` channel per workflow. `(workflow_id, seq)` is the
//! dedupe point and the identity of an event (spec.md §3, §8 invariant 1).

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use shannon_domain::config::EventLogConfig;
use shannon_domain::error::{Error, Result};
use shannon_domain::event::{Event, EventType};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Number of append retries before an emitter sees `EventStoreUnavailable`
/// (spec.md §4.1 "Failure semantics").
const MAX_PERSIST_RETRIES: u32 = 3;

struct WorkflowLog {
    /// Persistent events only, in sequence order (ephemeral events never
    /// land here — spec.md §8 invariant 10).
    events: VecDeque<Event>,
    next_seq: u64,
    terminal_at: Option<chrono::DateTime<Utc>>,
    failed: bool,
}

impl WorkflowLog {
    fn new() -> Self {
        Self { events: VecDeque::new(), next_seq: 0, terminal_at: None, failed: false }
    }
}

pub struct EventLog {
    workflows: RwLock<HashMap<Uuid, WorkflowLog>>,
    channels: RwLock<HashMap<Uuid, broadcast::Sender<Event>>>,
    dir: PathBuf,
    config: EventLogConfig,
}

/// Result of `subscribe`: persisted events the caller missed, plus a live
/// receiver transitioning to real-time delivery (spec.md §4.1 "subscribe",
/// §8 invariant 7 "resume equivalence").
pub struct Subscription {
    pub replay: Vec<Event>,
    pub live: broadcast::Receiver<Event>,
}

impl EventLog {
    pub fn new(state_dir: &Path, config: EventLogConfig) -> Self {
        let dir = state_dir.join("events");
        std::fs::create_dir_all(&dir).ok();
        Self {
            workflows: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            dir,
            config,
        }
    }

    fn log_path(&self, workflow_id: Uuid) -> PathBuf {
        self.dir.join(format!("{workflow_id}.jsonl"))
    }

    /// Ensure a broadcast channel exists for this workflow; called when a
    /// workflow starts so the first subscriber never races channel
    /// creation against the first append.
    pub fn ensure_channel(&self, workflow_id: Uuid) {
        let mut channels = self.channels.write();
        channels
            .entry(workflow_id)
            .or_insert_with(|| broadcast::channel(self.config.ring_capacity.max(256)).0);
        self.workflows.write().entry(workflow_id).or_insert_with(WorkflowLog::new);
    }

    /// Load persisted events for a workflow from disk into the in-memory
    /// cache, if not already cached (supports resuming after a restart).
    fn load_if_absent(&self, workflow_id: Uuid) {
        {
            let workflows = self.workflows.read();
            if workflows.contains_key(&workflow_id) {
                return;
            }
        }
        let mut log = WorkflowLog::new();
        if let Ok(content) = std::fs::read_to_string(self.log_path(workflow_id)) {
            for line in content.lines() {
                if let Ok(event) = serde_json::from_str::<Event>(line) {
                    log.next_seq = log.next_seq.max(event.seq + 1);
                    if matches!(
                        event.event_type,
                        EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled
                    ) {
                        log.terminal_at = Some(event.timestamp);
                    }
                    log.events.push_back(event);
                }
            }
        }
        self.workflows.write().insert(workflow_id, log);
    }

    fn persist_line(&self, workflow_id: Uuid, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut last_err = None;
        for attempt in 0..MAX_PERSIST_RETRIES {
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path(workflow_id))
                .and_then(|mut f| writeln!(f, "{line}"))
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(10 * 2u64.pow(attempt)));
                }
            }
        }
        Err(Error::EventStoreUnavailable(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Append an event, assigning the next sequence number for this
    /// workflow. Sequences are serialized per-workflow under the write
    /// lock (spec.md §4.1 "Ordering").
    pub fn append(
        &self,
        workflow_id: Uuid,
        event_type: EventType,
        agent_id: Option<String>,
        message: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<Event> {
        self.load_if_absent(workflow_id);
        let event = {
            let mut workflows = self.workflows.write();
            let log = workflows.entry(workflow_id).or_insert_with(WorkflowLog::new);
            let seq = log.next_seq;
            log.next_seq += 1;
            let event = Event {
                workflow_id,
                seq,
                event_type,
                agent_id,
                message,
                timestamp: Utc::now(),
                payload,
            };
            if event.is_persistent() {
                log.events.push_back(event.clone());
                if matches!(
                    event_type,
                    EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled
                ) {
                    log.terminal_at = Some(event.timestamp);
                    log.failed = matches!(event_type, EventType::WorkflowFailed);
                }
            }
            event
        };

        if event.is_persistent() {
            self.persist_line(workflow_id, &event)?;
        }
        self.broadcast(workflow_id, event.clone());
        Ok(event)
    }

    fn broadcast(&self, workflow_id: Uuid, event: Event) {
        self.ensure_channel(workflow_id);
        let channels = self.channels.read();
        if let Some(tx) = channels.get(&workflow_id) {
            let _ = tx.send(event);
        }
    }

    /// Persistent history ordered ascending, from `from_seq` inclusive
    /// (spec.md §4.1 "fetch").
    pub fn fetch(
        &self,
        workflow_id: Uuid,
        from_seq: u64,
        limit: usize,
        types_filter: Option<&[EventType]>,
    ) -> Vec<Event> {
        self.load_if_absent(workflow_id);
        let workflows = self.workflows.read();
        match workflows.get(&workflow_id) {
            Some(log) => log
                .events
                .iter()
                .filter(|e| e.seq >= from_seq)
                .filter(|e| types_filter.map_or(true, |f| f.contains(&e.event_type)))
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Replay missed persisted events then hand back a live receiver
    /// (spec.md §4.1 "subscribe"). `last_event_id` is a numeric sequence;
    /// the API layer accepts an opaque cursor too but always resolves it
    /// to a sequence before calling here.
    pub fn subscribe(
        &self,
        workflow_id: Uuid,
        last_event_id: Option<u64>,
        types_filter: Option<&[EventType]>,
    ) -> Subscription {
        self.ensure_channel(workflow_id);
        let live = {
            let channels = self.channels.read();
            channels.get(&workflow_id).expect("ensure_channel just ran").subscribe()
        };
        let replay = match last_event_id {
            Some(last) => self.fetch(workflow_id, last + 1, usize::MAX, types_filter),
            None => Vec::new(),
        };
        Subscription { replay, live }
    }

    /// Drop the broadcast channel once nobody can subscribe usefully any
    /// more (called after a terminal event settles); durable history is
    /// unaffected.
    pub fn close_channel(&self, workflow_id: Uuid) {
        self.channels.write().remove(&workflow_id);
    }

    /// Apply retention policy: completed workflows keep events for
    /// `completed_retention_days`, failed workflows for
    /// `failed_retention_days` (spec.md §4.1 "ttl"). Purges both the
    /// in-memory cache and the JSONL file for expired workflows.
    pub fn prune_expired(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let workflows = self.workflows.read();
            for (id, log) in workflows.iter() {
                if let Some(terminal_at) = log.terminal_at {
                    let retention_days = if log.failed {
                        self.config.failed_retention_days
                    } else {
                        self.config.completed_retention_days
                    };
                    if now.signed_duration_since(terminal_at) > chrono::Duration::days(retention_days as i64) {
                        expired.push(*id);
                    }
                }
            }
        }
        for id in expired {
            self.workflows.write().remove(&id);
            let _ = std::fs::remove_file(self.log_path(id));
            self.close_channel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, EventLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path(), EventLogConfig::default());
        (dir, log)
    }

    #[test]
    fn sequences_are_monotonic_per_workflow() {
        let (_dir, log) = log();
        let wf = Uuid::new_v4();
        let e1 = log.append(wf, EventType::WorkflowStarted, None, None, None).unwrap();
        let e2 = log.append(wf, EventType::AgentStarted, None, None, None).unwrap();
        assert_eq!(e1.seq, 0);
        assert_eq!(e2.seq, 1);
    }

    #[test]
    fn llm_partial_is_never_persisted() {
        let (_dir, log) = log();
        let wf = Uuid::new_v4();
        log.append(wf, EventType::LlmPartial, None, None, None).unwrap();
        log.append(wf, EventType::LlmOutput, None, None, None).unwrap();
        let fetched = log.fetch(wf, 0, 100, None);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].event_type, EventType::LlmOutput);
    }

    #[test]
    fn fetch_respects_from_seq_and_type_filter() {
        let (_dir, log) = log();
        let wf = Uuid::new_v4();
        for _ in 0..5 {
            log.append(wf, EventType::Progress, None, None, None).unwrap();
        }
        log.append(wf, EventType::WorkflowCompleted, None, None, None).unwrap();
        let page = log.fetch(wf, 2, 10, None);
        assert_eq!(page.len(), 4);
        assert_eq!(page[0].seq, 2);

        let only_completed = log.fetch(wf, 0, 10, Some(&[EventType::WorkflowCompleted]));
        assert_eq!(only_completed.len(), 1);
    }

    #[test]
    fn subscribe_with_last_event_id_replays_only_newer_events() {
        let (_dir, log) = log();
        let wf = Uuid::new_v4();
        let e0 = log.append(wf, EventType::WorkflowStarted, None, None, None).unwrap();
        let e1 = log.append(wf, EventType::AgentStarted, None, None, None).unwrap();
        let e2 = log.append(wf, EventType::AgentCompleted, None, None, None).unwrap();

        let sub = log.subscribe(wf, Some(e0.seq), None);
        assert_eq!(sub.replay.len(), 2);
        assert_eq!(sub.replay[0].seq, e1.seq);
        assert_eq!(sub.replay[1].seq, e2.seq);
    }

    #[test]
    fn persisted_events_survive_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let wf = Uuid::new_v4();
        {
            let log = EventLog::new(dir.path(), EventLogConfig::default());
            log.append(wf, EventType::WorkflowStarted, None, None, None).unwrap();
            log.append(wf, EventType::WorkflowCompleted, None, None, None).unwrap();
        }
        let log2 = EventLog::new(dir.path(), EventLogConfig::default());
        let fetched = log2.fetch(wf, 0, 100, None);
        assert_eq!(fetched.len(), 2);
    }

    #[test]
    fn prune_expired_removes_old_completed_workflow() {
        let (_dir, log) = log();
        let wf = Uuid::new_v4();
        log.append(wf, EventType::WorkflowStarted, None, None, None).unwrap();
        log.append(wf, EventType::WorkflowCompleted, None, None, None).unwrap();
        // Force the terminal timestamp into the past.
        {
            let mut workflows = log.workflows.write();
            let wflog = workflows.get_mut(&wf).unwrap();
            wflog.terminal_at = Some(Utc::now() - chrono::Duration::days(30));
        }
        log.prune_expired();
        assert!(log.fetch(wf, 0, 100, None).is_empty());
    }
}
