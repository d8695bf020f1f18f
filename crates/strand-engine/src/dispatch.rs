//! Event dispatch.
//!
//! The dispatcher is the queue's consumer: for each drained event it
//! finds the matching enabled skills and workflows and executes them.
//! Synthetic cron events name their owner in the payload and are
//! routed straight to it, bypassing trigger matching. Per-target
//! failures are recorded on the run entities and never fail the event.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use strand_queue::EventConsumer;
use strand_store::{DefinitionStore, Event, StoreError};
use strand_triggers::find_matches;

use crate::seams::Notifier;
use crate::workflow::WorkflowEngine;

/// Queue consumer that fans events out to matching definitions.
#[derive(Clone)]
pub struct Dispatcher {
    definitions: Arc<dyn DefinitionStore>,
    engine: WorkflowEngine,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(definitions: Arc<dyn DefinitionStore>, engine: WorkflowEngine) -> Self {
        Self {
            definitions,
            engine,
            notifier: None,
        }
    }

    /// Attach a notifier pinged after each dispatched event.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Route a cron firing straight to the owner named in its payload.
    async fn dispatch_cron(&self, event: &Event, kind: &str, id: Uuid) -> anyhow::Result<()> {
        match kind {
            "workflow" => match self.definitions.get_workflow(id).await {
                Ok(workflow) if workflow.enabled => {
                    if let Err(err) = self.engine.execute(&workflow, event).await {
                        warn!(workflow_id = %id, error = %err, "scheduled workflow failed to execute");
                    }
                }
                Ok(_) => debug!(workflow_id = %id, "scheduled workflow is disabled, skipping"),
                Err(StoreError::NotFound { .. }) => {
                    warn!(workflow_id = %id, "scheduled workflow no longer exists");
                }
                Err(err) => return Err(err.into()),
            },
            "skill" => match self.definitions.get_skill(id).await {
                Ok(skill) if skill.enabled => {
                    if let Err(err) = self.engine.skill_runner().run(&skill, event, None).await {
                        warn!(skill_id = %id, error = %err, "scheduled skill failed to execute");
                    }
                }
                Ok(_) => debug!(skill_id = %id, "scheduled skill is disabled, skipping"),
                Err(StoreError::NotFound { .. }) => {
                    warn!(skill_id = %id, "scheduled skill no longer exists");
                }
                Err(err) => return Err(err.into()),
            },
            other => warn!(owner_kind = other, "cron event names an unknown owner kind"),
        }
        Ok(())
    }

    async fn dispatch_matched(&self, event: &Event) -> anyhow::Result<()> {
        let skills = self.definitions.list_skills().await?;
        for skill in find_matches(&skills, event) {
            if let Err(err) = self.engine.skill_runner().run(skill, event, None).await {
                warn!(skill_id = %skill.id, error = %err, "matched skill failed to execute");
            }
        }

        let workflows = self.definitions.list_workflows().await?;
        for workflow in find_matches(&workflows, event) {
            if let Err(err) = self.engine.execute(workflow, event).await {
                warn!(workflow_id = %workflow.id, error = %err, "matched workflow failed to execute");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventConsumer for Dispatcher {
    async fn consume(&self, event: &Event) -> anyhow::Result<()> {
        info!(
            event_id = %event.id,
            event_source = %event.source,
            event_type = %event.event_type,
            "dispatching event"
        );

        match cron_owner(event) {
            Some((kind, id)) => self.dispatch_cron(event, &kind, id).await?,
            None => self.dispatch_matched(event).await?,
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify(event).await;
        }
        Ok(())
    }
}

/// Extract the `(kind, id)` owner of a synthetic cron event, if this
/// is one.
fn cron_owner(event: &Event) -> Option<(String, Uuid)> {
    if event.source != "cron" || event.event_type != "schedule.fired" {
        return None;
    }
    let owner = event.payload.get("owner")?;
    let kind = owner.get("kind").and_then(Value::as_str)?;
    let id = owner
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())?;
    Some((kind.to_string(), id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::EngineConfig;
    use crate::seams::AgentTurn;
    use crate::testing::{RecordingNotifier, ScriptedAgent, StubInvoker};
    use serde_json::json;
    use strand_store::{EventStore, MemoryStore, Skill, Trigger, Workflow};

    fn dispatcher_with(store: Arc<MemoryStore>, agent: Arc<ScriptedAgent>) -> Dispatcher {
        let engine = WorkflowEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            agent,
            StubInvoker::ok(json!(null)),
            EngineConfig::default(),
        );
        Dispatcher::new(store, engine)
    }

    fn github_skill() -> Skill {
        let mut skill = Skill::new("triage", "Label incoming issues.");
        skill.triggers.push(Trigger::on_source("github"));
        skill
    }

    #[tokio::test]
    async fn matched_skills_are_executed() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_skill(github_skill()).await.unwrap();
        let mut other = Skill::new("slack-bot", "Answer questions.");
        other.triggers.push(Trigger::on_source("slack"));
        store.upsert_skill(other).await.unwrap();

        let agent = ScriptedAgent::looping(AgentTurn::Message("handled".into()));
        let dispatcher = dispatcher_with(store.clone(), agent.clone());

        let event = Event::new("github", "issue.opened", json!({}), json!({}));
        store.insert_event(event.clone()).await.unwrap();
        dispatcher.consume(&event).await.unwrap();

        // Exactly one definition matched, so the agent ran one turn.
        let requests = agent.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].instructions, "Label incoming issues.");
    }

    #[tokio::test]
    async fn unmatched_events_run_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_skill(github_skill()).await.unwrap();

        let agent = ScriptedAgent::looping(AgentTurn::Message("handled".into()));
        let dispatcher = dispatcher_with(store.clone(), agent.clone());

        let event = Event::new("pagerduty", "incident", json!({}), json!({}));
        dispatcher.consume(&event).await.unwrap();
        assert!(agent.requests().is_empty());
    }

    #[tokio::test]
    async fn cron_event_invokes_named_workflow_directly() {
        let store = Arc::new(MemoryStore::new());
        // The workflow has only a cron trigger, which never matches
        // live traffic; only direct invocation can reach it.
        let mut workflow = Workflow::new("digest", "Send the digest.");
        workflow.triggers.push(Trigger::on_schedule("0 8 * * *"));
        store.upsert_workflow(workflow.clone()).await.unwrap();

        let agent = ScriptedAgent::looping(AgentTurn::Message("sent".into()));
        let dispatcher = dispatcher_with(store.clone(), agent.clone());

        let event = Event::new(
            "cron",
            "schedule.fired",
            json!({"owner": {"kind": "workflow", "id": workflow.id.to_string()}}),
            json!({}),
        );
        store.insert_event(event.clone()).await.unwrap();
        dispatcher.consume(&event).await.unwrap();

        let requests = agent.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].instructions, "Send the digest.");
    }

    #[tokio::test]
    async fn cron_event_for_disabled_owner_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut skill = Skill::new("nightly", "Do the chores.");
        skill.enabled = false;
        store.upsert_skill(skill.clone()).await.unwrap();

        let agent = ScriptedAgent::looping(AgentTurn::Message("done".into()));
        let dispatcher = dispatcher_with(store.clone(), agent.clone());

        let event = Event::new(
            "cron",
            "schedule.fired",
            json!({"owner": {"kind": "skill", "id": skill.id.to_string()}}),
            json!({}),
        );
        dispatcher.consume(&event).await.unwrap();
        assert!(agent.requests().is_empty());
    }

    #[tokio::test]
    async fn cron_event_for_deleted_owner_does_not_fail() {
        let store = Arc::new(MemoryStore::new());
        let agent = ScriptedAgent::looping(AgentTurn::Message("done".into()));
        let dispatcher = dispatcher_with(store, agent);

        let event = Event::new(
            "cron",
            "schedule.fired",
            json!({"owner": {"kind": "workflow", "id": Uuid::now_v7().to_string()}}),
            json!({}),
        );
        dispatcher.consume(&event).await.unwrap();
    }

    #[tokio::test]
    async fn notifier_is_pinged_after_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let agent = ScriptedAgent::looping(AgentTurn::Message("handled".into()));
        let notifier = RecordingNotifier::new();
        let dispatcher = dispatcher_with(store, agent).with_notifier(notifier.clone());

        let event = Event::new("github", "push", json!({}), json!({}));
        dispatcher.consume(&event).await.unwrap();
        assert_eq!(notifier.seen(), vec![event.id]);
    }

    #[tokio::test]
    async fn failing_target_does_not_fail_the_event() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_skill(github_skill()).await.unwrap();

        // The agent errors, so the run fails; the event must still
        // dispatch cleanly.
        let agent = ScriptedAgent::with_turns(vec![Err("model unavailable".into())]);
        let dispatcher = dispatcher_with(store.clone(), agent);

        let event = Event::new("github", "push", json!({}), json!({}));
        store.insert_event(event.clone()).await.unwrap();
        dispatcher.consume(&event).await.unwrap();
    }
}
