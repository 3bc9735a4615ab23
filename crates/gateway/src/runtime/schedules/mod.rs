//! Schedule store and runner — cron-triggered task submissions
//! (spec.md §6.4).
//!
//! Schedules are persisted to `<state_dir>/schedules/schedules.json`. A
//! background tick (spec.md §6.4 "runner") calls [`ScheduleStore::due`]
//! and submits each due schedule's query as a new task.
//!
//! Split into submodules for maintainability:
//! - [`model`] — Data types, enums, config structs
//! - [`cron`] — Timezone-aware cron evaluation
//! - [`validation`] — Input validation (cron, timezones)
//! - [`store`] — Persistent `ScheduleStore` with event broadcasting

pub mod cron;
pub mod model;
pub mod runner;
pub mod store;
pub mod validation;

// Re-export the public API so existing `use crate::runtime::schedules::X` imports still work.
pub use cron::{cron_matches, cron_next, cron_next_n, cron_next_n_tz, cron_next_tz, parse_tz};
pub use model::{cooldown_minutes, MissedPolicy, Schedule, ScheduleEvent, ScheduleStatus, ScheduleView};
pub use runner::ScheduleRunner;
pub use store::{NewSchedule, ScheduleStore};
pub use validation::{validate_cron, validate_timezone};
