//! Workflow orchestration state machine.
//!
//! A workflow run is driven by an orchestrating agent that, besides
//! ordinary tools, gets two control tools: `workflow:run_skill` to
//! invoke one of the workflow's skills as a child run, and
//! `workflow:request_input` to pause the run for a human. Pausing is
//! durable: the conversation is snapshotted into a checkpoint and the
//! run carries no blocked call stack, so resumption can happen on any
//! process at any later time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use strand_store::{
    CheckpointKind, CheckpointOwner, CheckpointStore, DefinitionStore, Event, EventStore,
    HitlRequest, HitlStatus, HitlStore, RunStore, StoreError, Workflow, WorkflowRun,
    WorkflowRunStatus,
};

use crate::error::{EngineError, Result};
use crate::runner::{EngineConfig, SkillRunner, server_specs};
use crate::seams::{AgentDriver, AgentTurn, ToolInvoker, ToolSpec, TurnRequest};

/// Control tool: invoke one of the workflow's skills as a child run.
pub const TOOL_RUN_SKILL: &str = "workflow:run_skill";
/// Control tool: pause the run until a human responds.
pub const TOOL_REQUEST_INPUT: &str = "workflow:request_input";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a drive of the state machine ended.
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// The run reached a terminal status.
    Finished(WorkflowRun),
    /// The run paused on a pending human-input request.
    WaitingForInput {
        run: WorkflowRun,
        request: HitlRequest,
    },
}

impl WorkflowOutcome {
    pub fn run(&self) -> &WorkflowRun {
        match self {
            Self::Finished(run) => run,
            Self::WaitingForInput { run, .. } => run,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes workflow runs, including pause and resume.
#[derive(Clone)]
pub struct WorkflowEngine {
    events: Arc<dyn EventStore>,
    definitions: Arc<dyn DefinitionStore>,
    runs: Arc<dyn RunStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    hitl: Arc<dyn HitlStore>,
    runner: SkillRunner,
    agent: Arc<dyn AgentDriver>,
    config: EngineConfig,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: Arc<dyn EventStore>,
        definitions: Arc<dyn DefinitionStore>,
        runs: Arc<dyn RunStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        hitl: Arc<dyn HitlStore>,
        agent: Arc<dyn AgentDriver>,
        tools: Arc<dyn ToolInvoker>,
        config: EngineConfig,
    ) -> Self {
        let runner = SkillRunner::new(
            runs.clone(),
            checkpoints.clone(),
            agent.clone(),
            tools,
            config.clone(),
        );
        Self {
            events,
            definitions,
            runs,
            checkpoints,
            hitl,
            runner,
            agent,
            config,
        }
    }

    /// The skill runner this engine spawns child runs with. Also
    /// suitable for dispatching standalone skill runs.
    pub fn skill_runner(&self) -> &SkillRunner {
        &self.runner
    }

    /// Execute a workflow against an event from the start.
    pub async fn execute(&self, workflow: &Workflow, event: &Event) -> Result<WorkflowOutcome> {
        let run = WorkflowRun::new(workflow.id, event.id, event_input(event));
        let mut run = self.runs.insert_workflow_run(run).await?;
        run.status = WorkflowRunStatus::Running;
        let run = self.runs.update_workflow_run(run).await?;

        info!(
            workflow_run_id = %run.id,
            workflow_id = %workflow.id,
            workflow_name = %workflow.name,
            event_id = %event.id,
            "workflow run started"
        );

        let conversation = vec![event_input(event)];
        self.drive(workflow, run, event, conversation).await
    }

    /// Resume a paused run with a human response.
    ///
    /// The request must still be pending; a cancelled request resolves
    /// the run to `Cancelled` without reprocessing, and anything else
    /// is rejected. The conversation is rebuilt from the pause
    /// checkpoint's snapshot, the response appended, and the state
    /// machine driven onward.
    pub async fn resume_with_response(
        &self,
        request_id: Uuid,
        response: &str,
    ) -> Result<WorkflowOutcome> {
        let request = self.hitl.get_hitl(request_id).await?;

        match request.status {
            HitlStatus::Pending => {}
            HitlStatus::Cancelled => {
                let mut run = self.runs.get_workflow_run(request.workflow_run_id).await?;
                if !run.status.is_terminal() {
                    run.status = WorkflowRunStatus::Cancelled;
                    run.error = Some("input request was cancelled".to_string());
                    run = self.runs.update_workflow_run(run).await?;
                }
                info!(workflow_run_id = %run.id, "cancelled run resolved at resumption");
                return Ok(WorkflowOutcome::Finished(run));
            }
            other => {
                return Err(EngineError::RequestNotPending {
                    id: request_id,
                    status: format!("{other:?}").to_lowercase(),
                });
            }
        }

        let mut run = self.runs.get_workflow_run(request.workflow_run_id).await?;
        if run.status != WorkflowRunStatus::WaitingForInput {
            return Err(EngineError::NotWaitingForInput {
                workflow_run_id: run.id,
                status: format!("{:?}", run.status).to_lowercase(),
            });
        }

        let request = self
            .hitl
            .transition_hitl(request_id, HitlStatus::Responded, Some(response.to_string()))
            .await?;

        let snapshot = self
            .checkpoints
            .latest_checkpoint(CheckpointOwner::WorkflowRun(run.id))
            .await?
            .and_then(|c| c.state);
        let mut conversation = match snapshot {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(EngineError::MissingSnapshot {
                    workflow_run_id: run.id,
                });
            }
        };
        conversation.push(json!({ "role": "user", "content": response }));

        run.status = WorkflowRunStatus::Running;
        let run = self.runs.update_workflow_run(run).await?;
        info!(
            workflow_run_id = %run.id,
            request_id = %request.id,
            "workflow run resumed with response"
        );

        let workflow = self.definitions.get_workflow(run.workflow_id).await?;
        let event = self.events.get_event(run.event_id).await?;
        self.drive(&workflow, run, &event, conversation).await
    }

    /// Cancel a pending input request.
    ///
    /// The paused run stays paused; the cancellation takes effect when
    /// something attempts resumption.
    pub async fn cancel_request(&self, request_id: Uuid) -> Result<HitlRequest> {
        let request = self
            .hitl
            .transition_hitl(request_id, HitlStatus::Cancelled, None)
            .await?;
        info!(request_id = %request.id, workflow_run_id = %request.workflow_run_id, "input request cancelled");
        Ok(request)
    }

    /// Expire pending requests whose deadline has passed.
    ///
    /// Each expired request fails its paused run. A request that races
    /// a response keeps the response. Intended to be called from an
    /// external periodic sweeper. Returns the requests expired by this
    /// sweep.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<HitlRequest>> {
        let mut expired = Vec::new();

        for request in self.hitl.list_pending_hitl().await? {
            let Some(deadline) = request.timeout_at else {
                continue;
            };
            if deadline > now {
                continue;
            }

            match self
                .hitl
                .transition_hitl(request.id, HitlStatus::Expired, None)
                .await
            {
                Ok(request) => {
                    let mut run = self.runs.get_workflow_run(request.workflow_run_id).await?;
                    if run.status == WorkflowRunStatus::WaitingForInput {
                        run.status = WorkflowRunStatus::Failed;
                        run.error = Some("human input request expired".to_string());
                        self.runs.update_workflow_run(run).await?;
                    }
                    warn!(request_id = %request.id, "input request expired");
                    expired.push(request);
                }
                // Lost the race to a response or cancellation.
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(expired)
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        workflow: &Workflow,
        mut run: WorkflowRun,
        event: &Event,
        mut conversation: Vec<Value>,
    ) -> Result<WorkflowOutcome> {
        let owner = CheckpointOwner::WorkflowRun(run.id);
        let mut tools = control_specs();
        tools.extend(server_specs(&workflow.servers));

        for _ in 0..self.config.max_turns {
            let request = TurnRequest {
                instructions: workflow.instructions.clone(),
                tools: tools.clone(),
                conversation: conversation.clone(),
            };

            let turn = match self.agent.run_turn(request).await {
                Ok(turn) => turn,
                Err(err) => {
                    warn!(workflow_run_id = %run.id, error = %err, "agent turn failed");
                    return self.finish_failed(run, err.to_string()).await;
                }
            };

            match turn {
                AgentTurn::Message(text) => {
                    self.checkpoints
                        .append_checkpoint(
                            owner,
                            CheckpointKind::Message,
                            json!({ "message": text }),
                            None,
                        )
                        .await?;
                    run.status = WorkflowRunStatus::Completed;
                    run.output = Some(text);
                    let run = self.runs.update_workflow_run(run).await?;
                    info!(workflow_run_id = %run.id, "workflow run completed");
                    return Ok(WorkflowOutcome::Finished(run));
                }
                AgentTurn::ToolCall { name, arguments } if name == TOOL_RUN_SKILL => {
                    let entry = self
                        .run_child_skill(workflow, &mut run, event, &arguments)
                        .await?;
                    conversation.push(json!({
                        "role": "assistant",
                        "tool_call": { "name": TOOL_RUN_SKILL, "arguments": arguments },
                    }));
                    conversation.push(entry);
                }
                AgentTurn::ToolCall { name, arguments } if name == TOOL_REQUEST_INPUT => {
                    return self.pause(run, &mut conversation, &arguments).await;
                }
                AgentTurn::ToolCall { name, arguments } => {
                    let record = self
                        .runner
                        .call_tool(&workflow.policy, &name, arguments)
                        .await;
                    conversation.push(json!({
                        "role": "assistant",
                        "tool_call": { "name": record.tool, "arguments": record.arguments },
                    }));
                    conversation.push(crate::runner::tool_result_entry(&record));
                    self.checkpoints
                        .append_checkpoint(
                            owner,
                            CheckpointKind::ToolCall,
                            json!({
                                "tool": record.tool,
                                "result": record.result,
                                "error": record.error,
                            }),
                            None,
                        )
                        .await?;
                }
                AgentTurn::PauseForInput {
                    prompt,
                    context,
                    options,
                } => {
                    // Driver-level pause; same semantics as the control
                    // tool.
                    let arguments = json!({
                        "prompt": prompt,
                        "context": context,
                        "options": options,
                    });
                    return self.pause(run, &mut conversation, &arguments).await;
                }
            }
        }

        self.finish_failed(
            run,
            format!("agent exceeded maximum of {} turns", self.config.max_turns),
        )
        .await
    }

    /// Invoke one of the workflow's skills as a child run.
    ///
    /// Argument problems and unknown skills come back to the agent as
    /// tool errors; the workflow run keeps going.
    async fn run_child_skill(
        &self,
        workflow: &Workflow,
        run: &mut WorkflowRun,
        event: &Event,
        arguments: &Value,
    ) -> Result<Value> {
        let skill_id = arguments
            .get("skill_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let Some(skill_id) = skill_id else {
            return Ok(tool_error(TOOL_RUN_SKILL, "missing or invalid `skill_id`"));
        };

        if !workflow.skills.contains(&skill_id) {
            return Ok(tool_error(
                TOOL_RUN_SKILL,
                &format!("skill {skill_id} is not part of this workflow"),
            ));
        }

        let skill = match self.definitions.get_skill(skill_id).await {
            Ok(skill) => skill,
            Err(StoreError::NotFound { .. }) => {
                return Ok(tool_error(
                    TOOL_RUN_SKILL,
                    &format!("skill {skill_id} does not exist"),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let child = self.runner.run(&skill, event, Some(run.id)).await?;
        run.skill_runs.push(child.id);
        *run = self.runs.update_workflow_run(run.clone()).await?;

        self.checkpoints
            .append_checkpoint(
                CheckpointOwner::WorkflowRun(run.id),
                CheckpointKind::SkillRun,
                json!({
                    "skill_id": skill.id,
                    "run_id": child.id,
                    "status": child.status,
                }),
                None,
            )
            .await?;

        Ok(json!({
            "role": "tool",
            "name": TOOL_RUN_SKILL,
            "result": {
                "run_id": child.id,
                "status": child.status,
                "output": child.output,
                "error": child.error,
            },
        }))
    }

    /// Pause the run on a human-input request.
    ///
    /// The conversation (including the pause call itself) is
    /// snapshotted into the checkpoint so resumption can rebuild it.
    async fn pause(
        &self,
        mut run: WorkflowRun,
        conversation: &mut Vec<Value>,
        arguments: &Value,
    ) -> Result<WorkflowOutcome> {
        if self.hitl.pending_hitl_for(run.id).await?.is_some() {
            return Err(EngineError::PendingInputExists {
                workflow_run_id: run.id,
            });
        }

        let prompt = arguments
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("Input required")
            .to_string();
        let context = arguments.get("context").filter(|v| !v.is_null()).cloned();
        let options: Vec<String> = arguments
            .get("options")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        // Agent-supplied and untrusted: a value too large to represent
        // as a deadline means no deadline.
        let timeout_at = arguments
            .get("timeout_secs")
            .and_then(|v| v.as_i64())
            .and_then(Duration::try_seconds)
            .and_then(|delta| Utc::now().checked_add_signed(delta));

        conversation.push(json!({
            "role": "assistant",
            "tool_call": { "name": TOOL_REQUEST_INPUT, "arguments": arguments },
        }));

        let checkpoint = self
            .checkpoints
            .append_checkpoint(
                CheckpointOwner::WorkflowRun(run.id),
                CheckpointKind::HitlRequest,
                json!({ "prompt": prompt, "options": options }),
                Some(Value::Array(conversation.clone())),
            )
            .await?;

        let mut request = HitlRequest::new(run.id, checkpoint.id, prompt);
        request.context = context;
        request.options = options;
        request.timeout_at = timeout_at;
        let request = self.hitl.insert_hitl(request).await?;

        run.status = WorkflowRunStatus::WaitingForInput;
        let run = self.runs.update_workflow_run(run).await?;
        info!(
            workflow_run_id = %run.id,
            request_id = %request.id,
            "workflow run paused for input"
        );

        Ok(WorkflowOutcome::WaitingForInput { run, request })
    }

    async fn finish_failed(&self, mut run: WorkflowRun, error: String) -> Result<WorkflowOutcome> {
        run.status = WorkflowRunStatus::Failed;
        run.error = Some(error);
        let run = self.runs.update_workflow_run(run).await?;
        warn!(workflow_run_id = %run.id, error = ?run.error, "workflow run failed");
        Ok(WorkflowOutcome::Finished(run))
    }
}

fn control_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            TOOL_RUN_SKILL,
            "invoke one of this workflow's skills as a child run",
        ),
        ToolSpec::new(
            TOOL_REQUEST_INPUT,
            "pause this run until a human provides input",
        ),
    ]
}

fn tool_error(tool: &str, message: &str) -> Value {
    json!({ "role": "tool", "name": tool, "error": message })
}

fn event_input(event: &Event) -> Value {
    json!({
        "role": "user",
        "source": event.source,
        "event_type": event.event_type,
        "payload": event.payload,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
