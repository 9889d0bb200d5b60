//! Conversation turns exchanged with the language model, and the commands the
//! flow issues to the external runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A function invocation requested by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model provider, echoed back with the result.
    pub id: String,
    pub name: String,
    /// Raw JSON text of the arguments, exactly as the model produced it.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One entry of the conversation: either prompt content, a spoken exchange, an
/// assistant tool call, or the result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Set on assistant messages that carry a tool call instead of text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Set on tool messages; refers to the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant message recording that the model called a tool.
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call: Some(call),
            tool_call_id: None,
        }
    }

    /// The answer to a tool call, fed back to the model.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A callable tool as advertised to the language model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Everything the language model needs for one turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
}

/// What the language model answered for one turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnResponse {
    /// Text to speak to the user; may be empty when the model only calls tools.
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl TurnResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }
}

/// Represents commands that the flow issues to an external runtime.
///
/// This enum decouples the orchestrator's decisions from the runtime's
/// execution of side effects (speaking text, hanging up the call).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Command the runtime to speak the given text to the user.
    SpeakText(String),
    /// Command the runtime to end the conversation.
    EndConversation,
    /// A non-advancing failure the runtime should know about.
    ReportError(String),
}
