//! Conversation nodes: one conversational state with its prompts, callable
//! functions and exit behaviour.

use crate::function::FunctionSpec;
use crate::message::{Command, Message};
use serde::{Deserialize, Serialize};

/// How prior history is carried into a node when it is entered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Keep every prior turn.
    #[default]
    Append,
    /// Replace the history with a single summary turn on entry.
    ResetWithSummary {
        #[serde(default)]
        summary_prompt: Option<String>,
    },
}

impl ContextStrategy {
    pub fn resets(&self) -> bool {
        matches!(self, ContextStrategy::ResetWithSummary { .. })
    }
}

/// A side-effecting directive run on node entry or after a terminal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Speak a fixed sentence without involving the model.
    TtsSay { text: String },
    /// Hang up.
    EndConversation,
}

impl Action {
    pub fn to_command(&self) -> Command {
        match self {
            Action::TtsSay { text } => Command::SpeakText(text.clone()),
            Action::EndConversation => Command::EndConversation,
        }
    }
}

/// A named vertex of the flow graph. Immutable once the graph is loaded.
#[derive(Debug, Clone, Default)]
pub struct FlowNode {
    pub id: String,
    pub role_messages: Vec<Message>,
    pub task_messages: Vec<Message>,
    pub functions: Vec<FunctionSpec>,
    pub context_strategy: ContextStrategy,
    pub pre_actions: Vec<Action>,
    pub post_actions: Vec<Action>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// A node without functions ends the flow once reached.
    pub fn is_terminal(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn with_role(mut self, content: impl Into<String>) -> Self {
        self.role_messages.push(Message::system(content));
        self
    }

    pub fn with_task(mut self, content: impl Into<String>) -> Self {
        self.task_messages.push(Message::system(content));
        self
    }

    pub fn with_function(mut self, function: FunctionSpec) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_strategy(mut self, strategy: ContextStrategy) -> Self {
        self.context_strategy = strategy;
        self
    }

    pub fn with_pre_action(mut self, action: Action) -> Self {
        self.pre_actions.push(action);
        self
    }

    pub fn with_post_action(mut self, action: Action) -> Self {
        self.post_actions.push(action);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategy_parses_from_document_shape() {
        let append: ContextStrategy = serde_json::from_value(json!({"strategy": "append"})).unwrap();
        assert_eq!(append, ContextStrategy::Append);
        assert!(!append.resets());

        let reset: ContextStrategy = serde_json::from_value(json!({
            "strategy": "reset_with_summary",
            "summary_prompt": "Summarize the intake."
        }))
        .unwrap();
        assert!(reset.resets());
        assert_eq!(
            reset,
            ContextStrategy::ResetWithSummary {
                summary_prompt: Some("Summarize the intake.".into())
            }
        );
    }

    #[test]
    fn actions_map_to_commands() {
        let actions: Vec<Action> = serde_json::from_value(json!([
            {"type": "tts_say", "text": "One moment."},
            {"type": "end_conversation"}
        ]))
        .unwrap();
        let commands: Vec<Command> = actions.iter().map(Action::to_command).collect();
        assert_eq!(
            commands,
            vec![
                Command::SpeakText("One moment.".into()),
                Command::EndConversation
            ]
        );
    }

    #[test]
    fn terminal_means_no_functions() {
        let end = FlowNode::new("end").with_post_action(Action::EndConversation);
        assert!(end.is_terminal());

        let start = FlowNode::new("start").with_function(FunctionSpec::to("go", "end"));
        assert!(!start.is_terminal());
        assert!(start.function("go").is_some());
        assert!(start.function("stop").is_none());
    }
}
