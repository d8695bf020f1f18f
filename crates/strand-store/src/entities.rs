//! Core entity model for the orchestration engine.
//!
//! Events flow in from external sources, match against triggers declared
//! on skills and workflows, and produce runs. Runs and workflow runs
//! accumulate checkpoints; workflow runs may additionally pause on a
//! human-input request. Scheduled jobs are the materialized form of
//! cron triggers. All identifiers are UUID v7 so insertion order and
//! time order coincide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use strand_access::{ServerRef, ToolPolicy};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Lifecycle of an ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    /// Terminal statuses are set exactly once and never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// An external occurrence ingested into the system.
///
/// `payload` and `metadata` are opaque JSON documents; the engine never
/// interprets them beyond the filter fields triggers declare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Originating system, e.g. `"github"`, `"slack"`, `"cron"`.
    pub source: String,
    /// Dotted event name, e.g. `"push"`, `"issue.opened"`.
    pub event_type: String,
    pub payload: Value,
    pub metadata: Value,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Create a pending event with a fresh UUID v7 and both timestamps
    /// set to now.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            metadata,
            status: EventStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Payload-level constraints a trigger may impose on matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFilter {
    /// Exact-match constraint on `payload.repository`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Membership constraint on `payload.ref`; empty = unconstrained.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
}

/// A single activation condition on a skill or workflow.
///
/// A trigger is either event-driven (`source` + optional `event_types`
/// + optional `filter`) or cron-driven (`schedule` set). Cron triggers
/// never match live traffic; the scheduler materializes them into
/// [`ScheduledJob`]s instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub source: String,
    /// Event types this trigger accepts; `None` = every type from
    /// `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_types: Option<Vec<String>>,
    /// Cron expression (5- or 6-field). Present iff this is a cron
    /// trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<TriggerFilter>,
}

impl Trigger {
    /// Event-driven trigger on every type from `source`.
    pub fn on_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Cron-driven trigger.
    pub fn on_schedule(expr: impl Into<String>) -> Self {
        Self {
            source: "cron".to_string(),
            schedule: Some(expr.into()),
            ..Self::default()
        }
    }

    pub fn is_cron(&self) -> bool {
        self.schedule.is_some()
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A unit of automation: instructions an agent executes with a bound
/// set of tool servers under a tool policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    /// Natural-language instructions handed to the agent driver.
    pub instructions: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub servers: Vec<ServerRef>,
    #[serde(default)]
    pub policy: ToolPolicy,
    pub enabled: bool,
}

impl Skill {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            instructions: instructions.into(),
            triggers: Vec::new(),
            servers: Vec::new(),
            policy: ToolPolicy::default(),
            enabled: true,
        }
    }
}

/// A multi-skill automation driven by an orchestrating agent.
///
/// Carries the same definition surface as a skill plus the set of
/// skills the orchestrator may invoke via the `workflow:run_skill`
/// control tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub instructions: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub servers: Vec<ServerRef>,
    #[serde(default)]
    pub policy: ToolPolicy,
    /// Skills the orchestrator may invoke, by id.
    #[serde(default)]
    pub skills: Vec<Uuid>,
    pub enabled: bool,
}

impl Workflow {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            instructions: instructions.into(),
            triggers: Vec::new(),
            servers: Vec::new(),
            policy: ToolPolicy::default(),
            skills: Vec::new(),
            enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Lifecycle of a single skill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One tool invocation recorded on a run, in call order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    /// Successful result, if the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Captured failure, if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub called_at: DateTime<Utc>,
}

/// One execution of a skill against an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub event_id: Uuid,
    pub skill_id: Uuid,
    /// Set when this run was invoked from inside a workflow run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<Uuid>,
    pub status: RunStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ordered log of every tool call made during the run.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(event_id: Uuid, skill_id: Uuid, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            event_id,
            skill_id,
            parent_run_id: None,
            workflow_run_id: None,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            tool_calls: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle of a workflow run. `WaitingForInput` is the one
/// re-enterable pause state; everything terminal stays terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Pending,
    Running,
    WaitingForInput,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One execution of a workflow against an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub event_id: Uuid,
    pub status: WorkflowRunStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Child skill runs spawned via `workflow:run_skill`, in order.
    #[serde(default)]
    pub skill_runs: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(workflow_id: Uuid, event_id: Uuid, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            event_id,
            status: WorkflowRunStatus::Pending,
            input,
            output: None,
            error: None,
            skill_runs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// The execution record a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CheckpointOwner {
    Run(Uuid),
    WorkflowRun(Uuid),
}

impl CheckpointOwner {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Run(id) | Self::WorkflowRun(id) => *id,
        }
    }
}

/// What a checkpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Message,
    ToolCall,
    SkillRun,
    HitlRequest,
}

/// An append-only progress record on a run or workflow run.
///
/// `sequence` is gap-free per owner, starting at 0. `state`, when
/// present, is a resumable snapshot of the owner's conversation at the
/// moment the checkpoint was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub owner: CheckpointOwner,
    pub sequence: u32,
    pub kind: CheckpointKind,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Human input
// ---------------------------------------------------------------------------

/// Lifecycle of a human-input request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStatus {
    Pending,
    Responded,
    Expired,
    Cancelled,
}

impl HitlStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A request for human input raised by a paused workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlRequest {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    /// The checkpoint whose `state` snapshot resumption restores.
    pub checkpoint_id: Uuid,
    pub status: HitlStatus,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Suggested responses; empty = free-form.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Deadline after which the request may be swept to `Expired`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl HitlRequest {
    pub fn new(workflow_run_id: Uuid, checkpoint_id: Uuid, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_run_id,
            checkpoint_id,
            status: HitlStatus::Pending,
            prompt: prompt.into(),
            context: None,
            options: Vec::new(),
            response: None,
            timeout_at: None,
            created_at: Utc::now(),
            responded_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduled jobs
// ---------------------------------------------------------------------------

/// The definition a scheduled job was materialized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum JobOwner {
    Skill(Uuid),
    Workflow(Uuid),
}

impl JobOwner {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Skill(id) | Self::Workflow(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Skill(_) => "skill",
            Self::Workflow(_) => "workflow",
        }
    }
}

/// A cron trigger materialized into a firing record.
///
/// Unique per `(owner, trigger_index)`; the scheduler's sync pass keeps
/// the job table reconciled with the definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub owner: JobOwner,
    /// Index of the cron trigger in the owner's trigger list.
    pub trigger_index: usize,
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// `None` when the schedule has no further fire times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl ScheduledJob {
    pub fn new(
        owner: JobOwner,
        trigger_index: usize,
        schedule: impl Into<String>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner,
            trigger_index,
            schedule: schedule.into(),
            last_run_at: None,
            next_run_at,
            enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_starts_pending_with_v7_id() {
        let event = Event::new("github", "push", json!({}), json!({}));
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.id.get_version_num(), 7);
        assert_eq!(event.created_at, event.updated_at);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::Processing.is_terminal());
        assert!(EventStatus::Completed.is_terminal());
        assert!(EventStatus::Failed.is_terminal());

        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());

        assert!(!WorkflowRunStatus::WaitingForInput.is_terminal());
        assert!(WorkflowRunStatus::Completed.is_terminal());

        assert!(!HitlStatus::Pending.is_terminal());
        assert!(HitlStatus::Expired.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkflowRunStatus::WaitingForInput).unwrap(),
            r#""waiting_for_input""#
        );
        assert_eq!(
            serde_json::to_string(&EventStatus::Processing).unwrap(),
            r#""processing""#
        );
    }

    #[test]
    fn checkpoint_owner_is_tagged() {
        let id = Uuid::now_v7();
        let owner = CheckpointOwner::WorkflowRun(id);
        let value = serde_json::to_value(owner).unwrap();
        assert_eq!(value["kind"], "workflow_run");
        assert_eq!(value["id"], json!(id));
    }

    #[test]
    fn trigger_deserializes_with_defaults() {
        let trigger: Trigger = serde_json::from_value(json!({"source": "github"})).unwrap();
        assert_eq!(trigger.source, "github");
        assert!(trigger.event_types.is_none());
        assert!(!trigger.is_cron());

        let cron: Trigger =
            serde_json::from_value(json!({"source": "cron", "schedule": "0 * * * *"})).unwrap();
        assert!(cron.is_cron());
    }

    #[test]
    fn skill_definition_round_trips() {
        let mut skill = Skill::new("triage", "Label incoming issues.");
        skill.triggers.push(Trigger::on_source("github"));
        skill.policy = strand_access::ToolPolicy::allow_only(["github:*"]);

        let json = serde_json::to_string(&skill).unwrap();
        let back: Skill = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, skill.id);
        assert_eq!(back.triggers.len(), 1);
        assert_eq!(back.policy, skill.policy);
    }
}
