//! Error taxonomy for flow loading and flow execution.
//!
//! Load-time failures are collected in [`ConfigurationError`] and are fatal:
//! no engine is ever built from a graph that failed to load. Runtime failures
//! are [`FlowError`]s; the tool-call variants are recoverable and never
//! advance the conversation.

use thiserror::Error;

/// Reasons a flow document is rejected at load time.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("flow document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read flow document: {0}")]
    Io(#[from] std::io::Error),
    #[error("initial node '{0}' is not defined")]
    MissingInitialNode(String),
    #[error("node '{0}' is defined more than once")]
    DuplicateNode(String),
    #[error("node id '{0}' is reserved")]
    ReservedNodeId(String),
    #[error("function '{function}' is declared more than once on node '{node}'")]
    DuplicateFunction { node: String, function: String },
    #[error("function '{function}' on node '{node}' transitions to unknown node '{target}'")]
    DanglingTransition {
        node: String,
        function: String,
        target: String,
    },
    #[error("function '{function}' on node '{node}' must declare exactly one of `transition_to` or `transition`")]
    AmbiguousTransition { node: String, function: String },
    #[error("function '{function}' on node '{node}' declares a dynamic transition without routes")]
    EmptyRoutes { node: String, function: String },
    #[error("function '{function}' on node '{node}' declares a dynamic transition but has no handler")]
    DynamicWithoutHandler { node: String, function: String },
    #[error("function '{function}' on node '{node}' references unknown handler '{handler}'")]
    UnknownHandler {
        node: String,
        function: String,
        handler: String,
    },
    #[error("node '{0}' ends the conversation in its pre_actions; end_conversation belongs in post_actions")]
    EndInPreActions(String),
    #[error("no terminal node is reachable from initial node '{0}'")]
    NoReachableTerminal(String),
}

/// Failures surfaced while a flow is running.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("function '{function}' is not available at node '{node}'{}", .hint.as_ref().map(|h| format!(" (did you mean '{h}'?)")).unwrap_or_default())]
    UnknownFunction {
        node: String,
        function: String,
        hint: Option<String>,
    },

    #[error("invalid arguments for '{function}': {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("handler for '{function}' failed: {source}")]
    Handler {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot resolve transition for '{function}': {reason}")]
    Transition { function: String, reason: String },

    #[error("{collaborator} collaborator failed: {source}")]
    Collaborator {
        collaborator: &'static str,
        fatal: bool,
        #[source]
        source: anyhow::Error,
    },

    #[error("flow engine is {0}, operation not permitted")]
    NotActive(crate::engine::EngineStatus),
}

impl FlowError {
    /// True for the tool-call failures that leave the node unchanged and can be
    /// fed back to the model.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FlowError::UnknownFunction { .. }
                | FlowError::InvalidArguments { .. }
                | FlowError::Handler { .. }
                | FlowError::Transition { .. }
        )
    }

    /// True when the error should end the session instead of waiting for the
    /// next user message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::Collaborator { fatal: true, .. })
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FlowError>;
