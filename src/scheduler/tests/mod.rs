//! Scheduler integration tests.

mod lifecycle;
mod status_history;
