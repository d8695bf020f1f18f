//! In-memory reference store.
//!
//! Backs the engine's tests and embedders that do not need durability.
//! Every map is a `DashMap`, so single-entity operations take the entry
//! lock and are atomic; checkpoint logs are stored per owner so
//! sequence assignment happens under one lock and stays gap-free.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use async_trait::async_trait;

use crate::entities::{
    Checkpoint, CheckpointKind, CheckpointOwner, Event, EventStatus, HitlRequest, HitlStatus,
    JobOwner, Run, ScheduledJob, Skill, Workflow, WorkflowRun,
};
use crate::error::{Result, StoreError};
use crate::store::{CheckpointStore, DefinitionStore, EventStore, HitlStore, JobStore, RunStore};

/// Thread-safe in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: DashMap<Uuid, Event>,
    skills: DashMap<Uuid, Skill>,
    workflows: DashMap<Uuid, Workflow>,
    runs: DashMap<Uuid, Run>,
    workflow_runs: DashMap<Uuid, WorkflowRun>,
    checkpoints: DashMap<CheckpointOwner, Vec<Checkpoint>>,
    hitl: DashMap<Uuid, HitlRequest>,
    jobs: DashMap<(JobOwner, usize), ScheduledJob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: Event) -> Result<Event> {
        if self.events.contains_key(&event.id) {
            return Err(StoreError::AlreadyExists {
                entity: "event",
                id: event.id.to_string(),
            });
        }
        self.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Event> {
        self.events
            .get(&id)
            .map(|e| e.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "event",
                id: id.to_string(),
            })
    }

    async fn set_event_status(&self, id: Uuid, status: EventStatus) -> Result<Event> {
        let mut entry = self.events.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "event",
            id: id.to_string(),
        })?;

        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                entity: "event",
                id: id.to_string(),
                from: format!("{:?}", entry.status),
                to: format!("{status:?}"),
            });
        }

        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn list_pending_events(&self) -> Result<Vec<Event>> {
        let mut pending: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Pending)
            .map(|e| e.clone())
            .collect();
        // UUID v7 ids break created_at ties deterministically.
        pending.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(pending)
    }

    async fn count_pending_events(&self) -> Result<usize> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Pending)
            .count())
    }
}

// ---------------------------------------------------------------------------
// DefinitionStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn upsert_skill(&self, skill: Skill) -> Result<Skill> {
        debug!(skill_id = %skill.id, skill_name = %skill.name, "skill upserted");
        self.skills.insert(skill.id, skill.clone());
        Ok(skill)
    }

    async fn get_skill(&self, id: Uuid) -> Result<Skill> {
        self.skills
            .get(&id)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "skill",
                id: id.to_string(),
            })
    }

    async fn list_skills(&self) -> Result<Vec<Skill>> {
        let mut skills: Vec<Skill> = self.skills.iter().map(|s| s.clone()).collect();
        skills.sort_by_key(|s| s.id);
        Ok(skills)
    }

    async fn remove_skill(&self, id: Uuid) -> Result<()> {
        self.skills.remove(&id).ok_or_else(|| StoreError::NotFound {
            entity: "skill",
            id: id.to_string(),
        })?;
        Ok(())
    }

    async fn upsert_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        debug!(workflow_id = %workflow.id, workflow_name = %workflow.name, "workflow upserted");
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        self.workflows
            .get(&id)
            .map(|w| w.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            })
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self.workflows.iter().map(|w| w.clone()).collect();
        workflows.sort_by_key(|w| w.id);
        Ok(workflows)
    }

    async fn remove_workflow(&self, id: Uuid) -> Result<()> {
        self.workflows
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_run(&self, run: Run) -> Result<Run> {
        self.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Run> {
        self.runs
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "run",
                id: id.to_string(),
            })
    }

    async fn update_run(&self, mut run: Run) -> Result<Run> {
        let mut entry = self.runs.get_mut(&run.id).ok_or_else(|| StoreError::NotFound {
            entity: "run",
            id: run.id.to_string(),
        })?;

        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                entity: "run",
                id: run.id.to_string(),
                from: format!("{:?}", entry.status),
                to: format!("{:?}", run.status),
            });
        }

        run.updated_at = Utc::now();
        *entry = run.clone();
        Ok(run)
    }

    async fn insert_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun> {
        self.workflow_runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_workflow_run(&self, id: Uuid) -> Result<WorkflowRun> {
        self.workflow_runs
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "workflow_run",
                id: id.to_string(),
            })
    }

    async fn update_workflow_run(&self, mut run: WorkflowRun) -> Result<WorkflowRun> {
        let mut entry =
            self.workflow_runs
                .get_mut(&run.id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "workflow_run",
                    id: run.id.to_string(),
                })?;

        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                entity: "workflow_run",
                id: run.id.to_string(),
                from: format!("{:?}", entry.status),
                to: format!("{:?}", run.status),
            });
        }

        run.updated_at = Utc::now();
        *entry = run.clone();
        Ok(run)
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn append_checkpoint(
        &self,
        owner: CheckpointOwner,
        kind: CheckpointKind,
        data: Value,
        state: Option<Value>,
    ) -> Result<Checkpoint> {
        // The entry lock covers both the count read and the push, so
        // concurrent appends for one owner serialize and sequences stay
        // gap-free.
        let mut log = self.checkpoints.entry(owner).or_default();
        let checkpoint = Checkpoint {
            id: Uuid::now_v7(),
            owner,
            sequence: log.len() as u32,
            kind,
            data,
            state,
            created_at: Utc::now(),
        };
        log.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn list_checkpoints(&self, owner: CheckpointOwner) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(&owner)
            .map(|log| log.clone())
            .unwrap_or_default())
    }

    async fn latest_checkpoint(&self, owner: CheckpointOwner) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(&owner)
            .and_then(|log| log.last().cloned()))
    }
}

// ---------------------------------------------------------------------------
// HitlStore
// ---------------------------------------------------------------------------

#[async_trait]
impl HitlStore for MemoryStore {
    async fn insert_hitl(&self, request: HitlRequest) -> Result<HitlRequest> {
        self.hitl.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_hitl(&self, id: Uuid) -> Result<HitlRequest> {
        self.hitl
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "hitl_request",
                id: id.to_string(),
            })
    }

    async fn transition_hitl(
        &self,
        id: Uuid,
        to: HitlStatus,
        response: Option<String>,
    ) -> Result<HitlRequest> {
        let mut entry = self.hitl.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "hitl_request",
            id: id.to_string(),
        })?;

        if entry.status != HitlStatus::Pending {
            return Err(StoreError::InvalidTransition {
                entity: "hitl_request",
                id: id.to_string(),
                from: format!("{:?}", entry.status),
                to: format!("{to:?}"),
            });
        }

        entry.status = to;
        entry.response = response;
        if to == HitlStatus::Responded {
            entry.responded_at = Some(Utc::now());
        }
        Ok(entry.clone())
    }

    async fn pending_hitl_for(&self, workflow_run_id: Uuid) -> Result<Option<HitlRequest>> {
        Ok(self
            .hitl
            .iter()
            .find(|r| r.workflow_run_id == workflow_run_id && r.status == HitlStatus::Pending)
            .map(|r| r.clone()))
    }

    async fn list_pending_hitl(&self) -> Result<Vec<HitlRequest>> {
        Ok(self
            .hitl
            .iter()
            .filter(|r| r.status == HitlStatus::Pending)
            .map(|r| r.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_job(&self, job: ScheduledJob) -> Result<ScheduledJob> {
        self.jobs.insert((job.owner, job.trigger_index), job.clone());
        Ok(job)
    }

    async fn get_job(
        &self,
        owner: JobOwner,
        trigger_index: usize,
    ) -> Result<Option<ScheduledJob>> {
        Ok(self.jobs.get(&(owner, trigger_index)).map(|j| j.clone()))
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.iter().map(|j| j.clone()).collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn remove_job(&self, owner: JobOwner, trigger_index: usize) -> Result<()> {
        self.jobs
            .remove(&(owner, trigger_index))
            .ok_or_else(|| StoreError::NotFound {
                entity: "scheduled_job",
                id: format!("{}:{trigger_index}", owner.id()),
            })?;
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let mut due: Vec<ScheduledJob> = self
            .jobs
            .iter()
            .filter(|j| j.enabled && j.next_run_at.is_some_and(|at| at <= now))
            .map(|j| j.clone())
            .collect();
        due.sort_by_key(|j| j.next_run_at);
        Ok(due)
    }

    async fn record_job_fire(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<ScheduledJob> {
        let mut entry = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "scheduled_job",
                id: id.to_string(),
            })?;

        entry.last_run_at = Some(last_run_at);
        entry.next_run_at = next_run_at;
        Ok(entry.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
