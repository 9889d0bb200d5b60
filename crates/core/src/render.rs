//! Turn rendering.
//!
//! Rendering is a pure function of the active node and the engine's
//! conversation state, so what the model sees for any state can be checked
//! without a model.

use crate::message::{Message, ToolDeclaration, TurnRequest};
use crate::node::FlowNode;

/// Builds the request for one model turn at `node`.
///
/// Layout: the primer (role messages currently in force), the carried
/// history, then the node's task messages. Every function of the node is
/// offered as a tool; terminal nodes offer none.
pub fn render(node: &FlowNode, primer: &[Message], history: &[Message]) -> TurnRequest {
    let mut messages = Vec::with_capacity(primer.len() + history.len() + node.task_messages.len());
    messages.extend_from_slice(primer);
    messages.extend_from_slice(history);
    messages.extend_from_slice(&node.task_messages);

    let tools = node
        .functions
        .iter()
        .map(|function| ToolDeclaration {
            name: function.name.clone(),
            description: function.description.clone(),
            parameters: function.parameters.to_json(),
        })
        .collect();

    TurnRequest { messages, tools }
}

/// The role messages in force after entering `node`.
///
/// A node's role messages replace the current primer on its first visit, and
/// on every entry when the node resets the context. Otherwise the current
/// primer carries over unchanged.
pub fn primer_for(node: &FlowNode, current: &[Message], first_visit: bool) -> Vec<Message> {
    if !node.role_messages.is_empty() && (first_visit || node.context_strategy.resets()) {
        node.role_messages.clone()
    } else {
        current.to_vec()
    }
}
