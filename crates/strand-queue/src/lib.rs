//! Event intake and dispatch queue.
//!
//! Producers enqueue events; a single registered consumer drains them.
//! Draining is single-flight: one sweep runs at a time, and a sweep
//! keeps re-fetching the pending list until it is empty, so events
//! enqueued mid-sweep are picked up by the same sweep instead of
//! waiting for the next enqueue.

pub mod error;
pub mod queue;

pub use error::{QueueError, Result};
pub use queue::{EnqueueInput, EventConsumer, EventQueue};
