//! Test doubles for the collaborator seams.
//!
//! Used by this crate's own tests and by embedders wiring the engine
//! up in theirs. A [`ScriptedAgent`] plays back a fixed sequence of
//! turns; a [`StubInvoker`] answers every tool call the same way.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use strand_store::Event;

use crate::seams::{AgentDriver, AgentTurn, Notifier, ToolInvoker, TurnRequest};

/// Agent driver that replays a scripted turn sequence.
pub struct ScriptedAgent {
    turns: Mutex<VecDeque<Result<AgentTurn, String>>>,
    repeat: Option<AgentTurn>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedAgent {
    /// Play the given turns in order; a further turn is an error.
    pub fn with_turns(turns: Vec<Result<AgentTurn, String>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer every turn with a clone of `turn`, forever.
    pub fn looping(turn: AgentTurn) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(VecDeque::new()),
            repeat: Some(turn),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request the engine sent, in order.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentDriver for ScriptedAgent {
    async fn run_turn(&self, request: TurnRequest) -> anyhow::Result<AgentTurn> {
        self.requests.lock().unwrap().push(request);
        let next = self.turns.lock().unwrap().pop_front();
        match next {
            Some(Ok(turn)) => Ok(turn),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => match &self.repeat {
                Some(turn) => Ok(turn.clone()),
                None => Err(anyhow::anyhow!("agent script exhausted")),
            },
        }
    }
}

enum StubBehavior {
    Succeed(Value),
    Fail(String),
}

/// Tool invoker that records calls and answers them all identically.
pub struct StubInvoker {
    behavior: StubBehavior,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubInvoker {
    pub fn ok(result: Value) -> Arc<Self> {
        Arc::new(Self {
            behavior: StubBehavior::Succeed(result),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            behavior: StubBehavior::Fail(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(server, method)` pairs in invocation order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for StubInvoker {
    async fn invoke(&self, server: &str, method: &str, _arguments: Value) -> anyhow::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((server.to_string(), method.to_string()));
        match &self.behavior {
            StubBehavior::Succeed(value) => Ok(value.clone()),
            StubBehavior::Fail(message) => Err(anyhow::anyhow!(message.clone())),
        }
    }
}

/// Notifier that remembers which events it was pinged for.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<uuid::Uuid>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<uuid::Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &Event) {
        self.seen.lock().unwrap().push(event.id);
    }
}
