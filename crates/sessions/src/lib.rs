//! Session container persistence for the Shannon orchestration engine
//! (spec.md §3 "Session", §4.9 C9 persistence adapter for session rows).
//!
//! A session groups related tasks for a user: title, redacted conversation
//! history, aggregate token/cost counters, creation time. Updated
//! transactionally with task completion (`SessionStore::record_task_usage`).

pub mod store;

pub use store::{SessionStore, SoftDeleteError};
