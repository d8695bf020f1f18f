//! Skill run executor.
//!
//! Drives the agent turn loop for a single skill: each turn either
//! produces a final message (run completes), a tool call (checked
//! against the skill's policy, routed to the invoker, result fed back),
//! or fails. Every turn appends a checkpoint owned by the run, and the
//! full tool-call log is kept durable on the run record.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use strand_access::{ServerRef, ToolPolicy, is_tool_allowed, split_tool_name};
use strand_store::{
    Checkpoint, CheckpointKind, CheckpointOwner, CheckpointStore, Event, Run, RunStatus, RunStore,
    Skill, ToolCallRecord,
};

use crate::error::Result;
use crate::seams::{AgentDriver, AgentTurn, ToolInvoker, ToolSpec, TurnRequest};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on agent turns per run; exhausting it fails the run.
    pub max_turns: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_turns: 16 }
    }
}

// ---------------------------------------------------------------------------
// SkillRunner
// ---------------------------------------------------------------------------

/// Executes skill runs through the agent and tool seams.
#[derive(Clone)]
pub struct SkillRunner {
    runs: Arc<dyn RunStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    agent: Arc<dyn AgentDriver>,
    tools: Arc<dyn ToolInvoker>,
    config: EngineConfig,
}

impl SkillRunner {
    pub fn new(
        runs: Arc<dyn RunStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        agent: Arc<dyn AgentDriver>,
        tools: Arc<dyn ToolInvoker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            runs,
            checkpoints,
            agent,
            tools,
            config,
        }
    }

    /// Execute one skill against an event.
    ///
    /// Always returns the finished run record; agent and tool failures
    /// end up in its `status`/`error` fields rather than in `Err`.
    /// `workflow_run_id` links child runs spawned from a workflow.
    pub async fn run(
        &self,
        skill: &Skill,
        event: &Event,
        workflow_run_id: Option<Uuid>,
    ) -> Result<Run> {
        let mut run = Run::new(event.id, skill.id, event_input(event));
        run.workflow_run_id = workflow_run_id;
        let mut run = self.runs.insert_run(run).await?;
        run.status = RunStatus::Running;
        run = self.runs.update_run(run).await?;

        info!(
            run_id = %run.id,
            skill_id = %skill.id,
            skill_name = %skill.name,
            event_id = %event.id,
            "skill run started"
        );

        let owner = CheckpointOwner::Run(run.id);
        let tools = server_specs(&skill.servers);
        let mut conversation = vec![event_input(event)];

        for _ in 0..self.config.max_turns {
            let request = TurnRequest {
                instructions: skill.instructions.clone(),
                tools: tools.clone(),
                conversation: conversation.clone(),
            };

            match self.agent.run_turn(request).await {
                Ok(AgentTurn::Message(text)) => {
                    self.checkpoint(owner, CheckpointKind::Message, json!({ "message": text }))
                        .await?;
                    run.status = RunStatus::Completed;
                    run.output = Some(text);
                    let run = self.runs.update_run(run).await?;
                    info!(run_id = %run.id, "skill run completed");
                    return Ok(run);
                }
                Ok(AgentTurn::ToolCall { name, arguments }) => {
                    let record = self.call_tool(&skill.policy, &name, arguments).await;

                    conversation.push(json!({
                        "role": "assistant",
                        "tool_call": { "name": record.tool, "arguments": record.arguments },
                    }));
                    conversation.push(tool_result_entry(&record));

                    self.checkpoint(
                        owner,
                        CheckpointKind::ToolCall,
                        json!({
                            "tool": record.tool,
                            "result": record.result,
                            "error": record.error,
                        }),
                    )
                    .await?;

                    run.tool_calls.push(record);
                    run = self.runs.update_run(run).await?;
                }
                Ok(AgentTurn::PauseForInput { .. }) => {
                    // Pausing is a workflow-only capability.
                    return self
                        .fail(run, "skill runs cannot request human input".to_string())
                        .await;
                }
                Err(err) => {
                    warn!(run_id = %run.id, error = %err, "agent turn failed");
                    return self.fail(run, err.to_string()).await;
                }
            }
        }

        self.fail(
            run,
            format!("agent exceeded maximum of {} turns", self.config.max_turns),
        )
        .await
    }

    /// Policy-check and route one tool call. Denials and invocation
    /// failures are captured in the record and returned to the agent as
    /// tool errors; they never fail the run.
    pub(crate) async fn call_tool(
        &self,
        policy: &ToolPolicy,
        name: &str,
        arguments: Value,
    ) -> ToolCallRecord {
        let mut record = ToolCallRecord {
            tool: name.to_string(),
            arguments: arguments.clone(),
            result: None,
            error: None,
            called_at: chrono::Utc::now(),
        };

        if !is_tool_allowed(name, policy) {
            warn!(tool = %name, "tool call denied by policy");
            record.error = Some(format!("tool `{name}` is not permitted by policy"));
            return record;
        }

        let (server, method) = match split_tool_name(name) {
            (Some(server), method) => (server, method),
            (None, _) => {
                record.error = Some(format!("tool `{name}` has no server prefix"));
                return record;
            }
        };

        match self.tools.invoke(server, method, arguments).await {
            Ok(result) => record.result = Some(result),
            Err(err) => {
                warn!(tool = %name, error = %err, "tool invocation failed");
                record.error = Some(err.to_string());
            }
        }
        record
    }

    async fn checkpoint(
        &self,
        owner: CheckpointOwner,
        kind: CheckpointKind,
        data: Value,
    ) -> Result<Checkpoint> {
        Ok(self
            .checkpoints
            .append_checkpoint(owner, kind, data, None)
            .await?)
    }

    async fn fail(&self, mut run: Run, error: String) -> Result<Run> {
        run.status = RunStatus::Failed;
        run.error = Some(error);
        let run = self.runs.update_run(run).await?;
        warn!(run_id = %run.id, error = ?run.error, "skill run failed");
        Ok(run)
    }
}

/// Conversation seed describing the triggering event.
fn event_input(event: &Event) -> Value {
    json!({
        "role": "user",
        "source": event.source,
        "event_type": event.event_type,
        "payload": event.payload,
    })
}

/// Transcript entry for a tool result or tool error.
pub(crate) fn tool_result_entry(record: &ToolCallRecord) -> Value {
    match &record.error {
        Some(error) => json!({ "role": "tool", "name": record.tool, "error": error }),
        None => json!({ "role": "tool", "name": record.tool, "result": record.result }),
    }
}

/// Advertise each bound server to the agent.
pub(crate) fn server_specs(servers: &[ServerRef]) -> Vec<ToolSpec> {
    servers
        .iter()
        .map(|r| match r {
            ServerRef::Global(name) => {
                ToolSpec::new(name.clone(), format!("tools served by `{name}`"))
            }
            ServerRef::Inline(config) => ToolSpec::new(
                config.name.clone(),
                format!("tools served by `{}`", config.name),
            ),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
