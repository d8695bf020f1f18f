//! Trigger matching.
//!
//! Decides which skills and workflows an incoming event activates. A
//! trigger matches on source, optionally on event type, and optionally
//! on payload filter fields. Cron triggers are declarative input for
//! the scheduler and never match live traffic here.

pub mod matcher;

pub use matcher::{Triggered, find_matches, trigger_matches};
