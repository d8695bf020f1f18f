//! External collaborator seams.
//!
//! The engine drives an agent and invokes tools without knowing how
//! either is implemented. Embedders supply an [`AgentDriver`] (the LLM
//! client), a [`ToolInvoker`] (the tool-server transport), and
//! optionally a [`Notifier`] for post-dispatch fanout. Failures cross
//! these seams as `anyhow::Error` and are recorded on the affected
//! entities, never propagated as engine failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strand_store::Event;

// ---------------------------------------------------------------------------
// Turn protocol
// ---------------------------------------------------------------------------

/// A tool surface advertised to the agent for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// `server:method` name, or a bare server name advertising the
    /// whole server.
    pub name: String,
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Everything the agent needs for one turn.
///
/// `conversation` is the opaque, serializable transcript. Checkpoints
/// snapshot it verbatim, and resumption replays it verbatim, so its
/// entries only need to make sense to the driver that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub instructions: String,
    pub tools: Vec<ToolSpec>,
    pub conversation: Vec<Value>,
}

/// What the agent decided to do with its turn.
#[derive(Debug, Clone)]
pub enum AgentTurn {
    /// A final answer; ends the run successfully.
    Message(String),
    /// Invoke a tool and hand the result back next turn.
    ToolCall { name: String, arguments: Value },
    /// Pause the run until a human responds. Only meaningful inside a
    /// workflow run.
    PauseForInput {
        prompt: String,
        context: Option<Value>,
        options: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The agent backing skill and workflow runs.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    async fn run_turn(&self, request: TurnRequest) -> anyhow::Result<AgentTurn>;
}

/// Transport to external tool servers.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, server: &str, method: &str, arguments: Value) -> anyhow::Result<Value>;
}

/// Post-dispatch notification fanout. Fire-and-forget; the dispatcher
/// never waits on delivery semantics beyond the call itself.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event);
}
