//! Conversation flow orchestration for voice agents.
//!
//! A conversation is modeled as a graph of [`FlowNode`]s. Each node tells the
//! language model what to do and which functions it may call; calling one of
//! them runs an optional handler and moves the conversation to the next node.
//! A [`FlowEngine`] runs one conversation over a shared, validated
//! [`FlowGraph`], and a [`SessionController`] ties that engine to the
//! lifecycle of a real-time session.

pub mod engine;
pub mod error;
pub mod function;
pub mod graph;
pub mod llm_client;
pub mod message;
pub mod node;
pub mod render;
pub mod schema;
pub mod session;
pub mod summary;

pub use engine::{EngineConfig, EngineStatus, FlowEngine, Step, TurnOutcome};
pub use error::{ConfigurationError, FlowError};
pub use function::{END_NODE, FunctionHandler, FunctionSpec, HandlerRegistry, Transition};
pub use graph::FlowGraph;
pub use llm_client::{OpenAICompatibleClient, TurnClient, TurnError};
pub use message::{Command, Message, Role, ToolCall, TurnRequest, TurnResponse};
pub use node::{Action, ContextStrategy, FlowNode};
pub use session::{SessionController, SessionEvent, SessionReport, SessionState};
pub use summary::{LLMSummarizer, MockSummarizer, Summarizer};
