//! Cron scheduling.
//!
//! Validates cron expressions (5-field input is normalized to the
//! 6-field form the `cron` crate expects, and expressions firing more
//! often than once a minute are rejected), materializes cron triggers
//! into scheduled jobs, and runs the tick loop that turns due jobs
//! into synthetic `schedule.fired` events on the event queue.

pub mod error;
pub mod schedule;
pub mod scheduler;

pub use error::{Result, ScheduleError};
pub use schedule::{MIN_INTERVAL_SECS, calculate_next_run, next_runs, validate_schedule};
pub use scheduler::{Scheduler, SchedulerConfig};
