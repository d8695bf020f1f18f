//! Skill and workflow execution.
//!
//! Ties the other crates together: the [`Dispatcher`] consumes drained
//! events, trigger matching picks the targets, the [`SkillRunner`]
//! drives single-skill agent loops, and the [`WorkflowEngine`] runs the
//! orchestration state machine with durable pause/resume on human
//! input. The agent, tool transport, and notification fanout are
//! supplied by the embedder through the seams in [`seams`].

pub mod dispatch;
pub mod error;
pub mod runner;
pub mod seams;
pub mod testing;
pub mod workflow;

pub use dispatch::Dispatcher;
pub use error::{EngineError, Result};
pub use runner::{EngineConfig, SkillRunner};
pub use seams::{AgentDriver, AgentTurn, Notifier, ToolInvoker, ToolSpec, TurnRequest};
pub use workflow::{TOOL_REQUEST_INPUT, TOOL_RUN_SKILL, WorkflowEngine, WorkflowOutcome};
