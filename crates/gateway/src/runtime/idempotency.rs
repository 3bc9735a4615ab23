//! Idempotency-key tracking for the gateway's ingress middleware (spec.md
//! §4.8: "`Idempotency-Key` header suppresses duplicate side effects
//! within a TTL").
//!
//! A `RwLock<HashMap>` keyed on the header value, same discipline as
//! `BudgetTracker`'s rate-limit windows: a bounded in-memory map with
//! lazy eviction of expired entries on insert.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

/// Default TTL an idempotency key is remembered for before a retried
/// request with the same key is treated as new.
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct Entry {
    task_id: Uuid,
    expires_at: Instant,
}

/// Tracks `Idempotency-Key` → the `task_id` it originally produced, so a
/// client's retried request returns the first response instead of
/// re-submitting the task.
pub struct IdempotencyStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    /// If `key` was seen (and not yet expired), returns the `task_id` the
    /// original request produced. Otherwise records `key` against
    /// `task_id` and returns `None`, meaning the caller should proceed.
    pub fn check_and_record(&self, key: &str, task_id: Uuid) -> Option<Uuid> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.expires_at > now);

        if let Some(existing) = entries.get(key) {
            return Some(existing.task_id);
        }
        entries.insert(key.to_string(), Entry { task_id, expires_at: now + self.ttl });
        None
    }

    /// Look up without recording — used by the middleware to short-circuit
    /// before a handler runs.
    pub fn lookup(&self, key: &str) -> Option<Uuid> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries.get(key).filter(|e| e.expires_at > now).map(|e| e.task_id)
    }

    /// Record a new key → task_id mapping (called once the handler has
    /// actually produced a `task_id`).
    pub fn record(&self, key: &str, task_id: Uuid) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), Entry { task_id, expires_at: now + self.ttl });
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}
