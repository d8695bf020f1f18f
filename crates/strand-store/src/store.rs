//! The persistence contract.
//!
//! One async trait per concern so embedders can bring their own
//! backends; [`MemoryStore`](crate::memory::MemoryStore) implements all
//! of them. Engine components hold `Arc<dyn Trait>` handles and never
//! see a concrete store type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{
    Checkpoint, CheckpointKind, CheckpointOwner, Event, EventStatus, HitlRequest, HitlStatus,
    JobOwner, Run, ScheduledJob, Skill, Workflow, WorkflowRun,
};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Durable event intake.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: Event) -> Result<Event>;

    async fn get_event(&self, id: Uuid) -> Result<Event>;

    /// Atomically transition an event's status.
    ///
    /// Rejects transitions out of a terminal status.
    async fn set_event_status(&self, id: Uuid, status: EventStatus) -> Result<Event>;

    /// Pending events in creation order.
    async fn list_pending_events(&self) -> Result<Vec<Event>>;

    async fn count_pending_events(&self) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Skill and workflow definitions.
///
/// This is the management surface; the engine only reads it.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn upsert_skill(&self, skill: Skill) -> Result<Skill>;
    async fn get_skill(&self, id: Uuid) -> Result<Skill>;
    async fn list_skills(&self) -> Result<Vec<Skill>>;
    async fn remove_skill(&self, id: Uuid) -> Result<()>;

    async fn upsert_workflow(&self, workflow: Workflow) -> Result<Workflow>;
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;
    async fn remove_workflow(&self, id: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Skill runs and workflow runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: Run) -> Result<Run>;
    async fn get_run(&self, id: Uuid) -> Result<Run>;

    /// Replace a stored run. Rejected when the stored run is terminal.
    async fn update_run(&self, run: Run) -> Result<Run>;

    async fn insert_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun>;
    async fn get_workflow_run(&self, id: Uuid) -> Result<WorkflowRun>;

    /// Replace a stored workflow run. Rejected when the stored run is
    /// terminal.
    async fn update_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun>;
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Append-only checkpoint log, sequenced per owner.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint for `owner`, assigning the next gap-free
    /// sequence number atomically.
    async fn append_checkpoint(
        &self,
        owner: CheckpointOwner,
        kind: CheckpointKind,
        data: Value,
        state: Option<Value>,
    ) -> Result<Checkpoint>;

    /// All checkpoints for `owner` in sequence order.
    async fn list_checkpoints(&self, owner: CheckpointOwner) -> Result<Vec<Checkpoint>>;

    /// The highest-sequence checkpoint for `owner`, if any.
    async fn latest_checkpoint(&self, owner: CheckpointOwner) -> Result<Option<Checkpoint>>;
}

// ---------------------------------------------------------------------------
// Human input
// ---------------------------------------------------------------------------

/// Human-input requests raised by paused workflow runs.
#[async_trait]
pub trait HitlStore: Send + Sync {
    async fn insert_hitl(&self, request: HitlRequest) -> Result<HitlRequest>;
    async fn get_hitl(&self, id: Uuid) -> Result<HitlRequest>;

    /// Transition a request out of `Pending`.
    ///
    /// Only `Pending` requests transition; anything else is rejected, so
    /// a response racing an expiry sweep resolves to exactly one winner.
    /// `responded_at` is stamped when `to` is `Responded`.
    async fn transition_hitl(
        &self,
        id: Uuid,
        to: HitlStatus,
        response: Option<String>,
    ) -> Result<HitlRequest>;

    /// The pending request for a workflow run, if one exists.
    async fn pending_hitl_for(&self, workflow_run_id: Uuid) -> Result<Option<HitlRequest>>;

    /// Every pending request, for the expiry sweep.
    async fn list_pending_hitl(&self) -> Result<Vec<HitlRequest>>;
}

// ---------------------------------------------------------------------------
// Scheduled jobs
// ---------------------------------------------------------------------------

/// Materialized cron jobs, unique per `(owner, trigger_index)`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the job for `(job.owner, job.trigger_index)`.
    async fn upsert_job(&self, job: ScheduledJob) -> Result<ScheduledJob>;

    async fn get_job(&self, owner: JobOwner, trigger_index: usize)
    -> Result<Option<ScheduledJob>>;

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>>;

    async fn remove_job(&self, owner: JobOwner, trigger_index: usize) -> Result<()>;

    /// Enabled jobs whose `next_run_at` is at or before `now`.
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    /// Record a firing: set `last_run_at` and the recomputed
    /// `next_run_at`.
    async fn record_job_fire(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<ScheduledJob>;
}
