//! Entity model and persistence contract.
//!
//! Defines every record the orchestration engine works with (events,
//! skill and workflow definitions, runs, checkpoints, human-input
//! requests, scheduled jobs), the async store traits other crates
//! depend on, and [`MemoryStore`], a thread-safe in-memory
//! implementation of all of them.

pub mod entities;
pub mod error;
pub mod memory;
pub mod store;

pub use entities::{
    Checkpoint, CheckpointKind, CheckpointOwner, Event, EventStatus, HitlRequest, HitlStatus,
    JobOwner, Run, RunStatus, ScheduledJob, Skill, ToolCallRecord, Trigger, TriggerFilter,
    Workflow, WorkflowRun, WorkflowRunStatus,
};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::{CheckpointStore, DefinitionStore, EventStore, HitlStore, JobStore, RunStore};
