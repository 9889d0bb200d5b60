//! Flow graph loading and validation.
//!
//! A [`FlowGraph`] is built once from a declarative JSON document, validated
//! as a whole, and then shared read-only (behind an `Arc`) by every session
//! that uses it. A document that fails validation never produces a graph.

use crate::error::ConfigurationError;
use crate::function::{END_NODE, FunctionSpec, HandlerRegistry, Route, Transition};
use crate::message::Message;
use crate::node::{Action, ContextStrategy, FlowNode};
use crate::schema::ArgumentSchema;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

// --- Document Model ---

/// The raw flow document, as written by hand.
#[derive(Debug, Deserialize)]
pub struct FlowDocument {
    pub initial_node: String,
    /// Kept as ordered entries so duplicate keys are detected instead of
    /// silently overwritten.
    #[serde(deserialize_with = "deserialize_entries")]
    pub nodes: Vec<(String, NodeDocument)>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeDocument {
    #[serde(default)]
    pub role_messages: Vec<Message>,
    #[serde(default)]
    pub task_messages: Vec<Message>,
    #[serde(default)]
    pub functions: Vec<FunctionEntry>,
    #[serde(default)]
    pub context_strategy: ContextStrategy,
    #[serde(default)]
    pub pre_actions: Vec<Action>,
    #[serde(default)]
    pub post_actions: Vec<Action>,
}

/// The two wrappers flow documents use around function declarations.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FunctionEntry {
    /// `{"type": "function", "function": {...}}`
    Wrapped { function: FunctionDocument },
    /// `{"function_declarations": [{...}, ...]}`
    Declarations {
        function_declarations: Vec<FunctionDocument>,
    },
}

#[derive(Debug, Deserialize)]
pub struct FunctionDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Option<ArgumentSchema>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub transition_to: Option<String>,
    #[serde(default)]
    pub transition: Option<DynamicDocument>,
}

#[derive(Debug, Deserialize)]
pub struct DynamicDocument {
    pub on: String,
    pub routes: Vec<Route>,
}

fn deserialize_entries<'de, D>(deserializer: D) -> Result<Vec<(String, NodeDocument)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, NodeDocument)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of node id to node definition")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, NodeDocument>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

// --- Validated Graph ---

/// The validated, immutable set of nodes for a conversation.
#[derive(Debug)]
pub struct FlowGraph {
    initial_node: String,
    nodes: HashMap<String, FlowNode>,
}

impl FlowGraph {
    /// Builds a graph from already-constructed nodes, applying the same
    /// validation as document loading.
    pub fn new(
        initial_node: impl Into<String>,
        nodes: impl IntoIterator<Item = FlowNode>,
    ) -> Result<Self, ConfigurationError> {
        let mut map = HashMap::new();
        for node in nodes {
            if node.id == END_NODE {
                return Err(ConfigurationError::ReservedNodeId(node.id));
            }
            if map.contains_key(&node.id) {
                return Err(ConfigurationError::DuplicateNode(node.id));
            }
            map.insert(node.id.clone(), node);
        }
        let graph = Self {
            initial_node: initial_node.into(),
            nodes: map,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Parses and validates a JSON flow document, binding handler names
    /// against `registry`.
    pub fn from_json_str(json: &str, registry: &HandlerRegistry) -> Result<Self, ConfigurationError> {
        let document: FlowDocument = serde_json::from_str(json)?;
        Self::from_document(document, registry)
    }

    /// Reads a flow document from disk.
    pub fn from_path(path: impl AsRef<Path>, registry: &HandlerRegistry) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let graph = Self::from_json_str(&json, registry)?;
        info!(path = %path.display(), nodes = graph.nodes.len(), initial = %graph.initial_node, "Flow graph loaded");
        Ok(graph)
    }

    pub fn from_document(document: FlowDocument, registry: &HandlerRegistry) -> Result<Self, ConfigurationError> {
        let mut nodes = Vec::with_capacity(document.nodes.len());
        for (id, raw) in document.nodes {
            nodes.push(build_node(id, raw, registry)?);
        }
        Self::new(document.initial_node, nodes)
    }

    pub fn initial_node(&self) -> &str {
        &self.initial_node
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of terminal nodes reachable from the initial node, sorted.
    pub fn reachable_terminals(&self) -> Vec<&str> {
        let mut terminals: Vec<&str> = self
            .reachable()
            .into_iter()
            .filter(|id| *id == END_NODE || self.nodes.get(*id).is_some_and(FlowNode::is_terminal))
            .collect();
        terminals.sort_unstable();
        terminals
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.nodes.contains_key(&self.initial_node) {
            return Err(ConfigurationError::MissingInitialNode(self.initial_node.clone()));
        }

        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort_unstable();
        for id in ids {
            let node = &self.nodes[id];
            if node.pre_actions.contains(&Action::EndConversation) {
                return Err(ConfigurationError::EndInPreActions(id.clone()));
            }
            let mut seen = HashSet::new();
            for function in &node.functions {
                if !seen.insert(function.name.as_str()) {
                    return Err(ConfigurationError::DuplicateFunction {
                        node: id.clone(),
                        function: function.name.clone(),
                    });
                }
                if let Transition::Dynamic { routes, .. } = &function.transition {
                    if routes.is_empty() {
                        return Err(ConfigurationError::EmptyRoutes {
                            node: id.clone(),
                            function: function.name.clone(),
                        });
                    }
                    if function.handler.is_none() {
                        return Err(ConfigurationError::DynamicWithoutHandler {
                            node: id.clone(),
                            function: function.name.clone(),
                        });
                    }
                }
                for target in function.transition.targets() {
                    if target != END_NODE && !self.nodes.contains_key(target) {
                        return Err(ConfigurationError::DanglingTransition {
                            node: id.clone(),
                            function: function.name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        if self.reachable_terminals().is_empty() {
            return Err(ConfigurationError::NoReachableTerminal(self.initial_node.clone()));
        }
        debug!(initial = %self.initial_node, nodes = self.nodes.len(), "Flow graph validated");
        Ok(())
    }

    /// Breadth-first walk over every declared transition target.
    fn reachable(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.initial_node.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for function in &node.functions {
                    queue.extend(function.transition.targets());
                }
            }
        }
        seen
    }
}

fn build_node(id: String, raw: NodeDocument, registry: &HandlerRegistry) -> Result<FlowNode, ConfigurationError> {
    let declarations = raw.functions.into_iter().flat_map(|entry| match entry {
        FunctionEntry::Wrapped { function } => vec![function],
        FunctionEntry::Declarations {
            function_declarations,
        } => function_declarations,
    });

    let mut functions = Vec::new();
    for decl in declarations {
        functions.push(build_function(&id, decl, registry)?);
    }

    Ok(FlowNode {
        id,
        role_messages: raw.role_messages,
        task_messages: raw.task_messages,
        functions,
        context_strategy: raw.context_strategy,
        pre_actions: raw.pre_actions,
        post_actions: raw.post_actions,
    })
}

fn build_function(
    node: &str,
    decl: FunctionDocument,
    registry: &HandlerRegistry,
) -> Result<FunctionSpec, ConfigurationError> {
    let transition = match (decl.transition_to, decl.transition) {
        (Some(target), None) => Transition::Static(target),
        (None, Some(dynamic)) => Transition::Dynamic {
            field: dynamic.on,
            routes: dynamic.routes,
        },
        _ => {
            return Err(ConfigurationError::AmbiguousTransition {
                node: node.to_string(),
                function: decl.name,
            });
        }
    };

    let handler = match decl.handler {
        Some(name) => Some(registry.get(&name).ok_or_else(|| ConfigurationError::UnknownHandler {
            node: node.to_string(),
            function: decl.name.clone(),
            handler: name.clone(),
        })?),
        None => None,
    };

    Ok(FunctionSpec {
        name: decl.name,
        description: decl.description,
        parameters: decl.parameters.unwrap_or_default(),
        handler,
        transition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("verify_birthday", |args| async move {
            Ok::<_, anyhow::Error>(json!({"verified": args.get("birthday") == Some(&json!("1983-01-01"))}))
        });
        registry
    }

    fn load(doc: serde_json::Value) -> Result<FlowGraph, ConfigurationError> {
        FlowGraph::from_json_str(&doc.to_string(), &registry())
    }

    #[test]
    fn loads_both_function_shapes() {
        let graph = load(json!({
            "initial_node": "greeting",
            "nodes": {
                "greeting": {
                    "role_messages": [{"role": "system", "content": "You are a YC partner."}],
                    "task_messages": [{"role": "system", "content": "Ask for the pitch."}],
                    "functions": [{
                        "type": "function",
                        "function": {
                            "name": "collect_pitch",
                            "description": "Collect the founder's pitch",
                            "parameters": {
                                "type": "object",
                                "properties": {"pitch": {"type": "string"}},
                                "required": ["pitch"]
                            },
                            "transition_to": "verify"
                        }
                    }]
                },
                "verify": {
                    "functions": [{
                        "function_declarations": [
                            {"name": "revise", "parameters": null, "transition_to": "greeting"},
                            {"name": "confirm", "parameters": null, "transition_to": "end"}
                        ]
                    }]
                },
                "end": {
                    "task_messages": [{"role": "system", "content": "Say goodbye."}],
                    "functions": [],
                    "post_actions": [{"type": "end_conversation"}]
                }
            }
        }))
        .unwrap();

        assert_eq!(graph.initial_node(), "greeting");
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node("verify").unwrap().functions.len(), 2);
        assert_eq!(graph.reachable_terminals(), vec!["end"]);
        let pitch = graph.node("greeting").unwrap().function("collect_pitch").unwrap();
        assert_eq!(pitch.parameters.required, vec!["pitch".to_string()]);
    }

    #[test]
    fn rejects_missing_initial_node() {
        let err = load(json!({
            "initial_node": "nowhere",
            "nodes": {"end": {}}
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingInitialNode(id) if id == "nowhere"));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let raw = r#"{
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {"name": "go", "transition_to": "b"}}]},
                "b": {},
                "a": {}
            }
        }"#;
        let err = FlowGraph::from_json_str(raw, &registry()).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateNode(id) if id == "a"));
    }

    #[test]
    fn rejects_duplicate_function_names() {
        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"function_declarations": [
                    {"name": "go", "transition_to": "b"},
                    {"name": "go", "transition_to": "b"}
                ]}]},
                "b": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateFunction { function, .. } if function == "go"));
    }

    #[test]
    fn rejects_dangling_static_transition() {
        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {"name": "go", "transition_to": "missing"}}]},
                "b": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DanglingTransition { target, .. } if target == "missing"));
    }

    #[test]
    fn rejects_unknown_handler_and_handlerless_dynamic() {
        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {
                    "name": "go", "handler": "nope", "transition_to": "b"
                }}]},
                "b": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownHandler { handler, .. } if handler == "nope"));

        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {
                    "name": "go",
                    "transition": {"on": "ok", "routes": [{"when": true, "to": "b"}]}
                }}]},
                "b": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DynamicWithoutHandler { .. }));
    }

    #[test]
    fn rejects_both_or_neither_transition() {
        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {"name": "go"}}]},
                "b": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::AmbiguousTransition { .. }));
    }

    #[test]
    fn rejects_graph_without_reachable_exit() {
        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {"name": "loop", "transition_to": "a"}}]},
                "island": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::NoReachableTerminal(id) if id == "a"));
    }

    #[test]
    fn rejects_end_conversation_before_the_node_runs() {
        let err = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {
                    "pre_actions": [{"type": "end_conversation"}],
                    "functions": [{"type": "function", "function": {"name": "go", "transition_to": "b"}}]
                },
                "b": {"post_actions": [{"type": "end_conversation"}]}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::EndInPreActions(id) if id == "a"));
    }

    #[test]
    fn end_sentinel_counts_as_terminal() {
        let graph = load(json!({
            "initial_node": "a",
            "nodes": {
                "a": {"functions": [{"type": "function", "function": {"name": "hang_up", "transition_to": "__end__"}}]}
            }
        }))
        .unwrap();
        assert_eq!(graph.reachable_terminals(), vec![END_NODE]);
    }

    #[test]
    fn dynamic_routes_are_checked_at_load() {
        let err = load(json!({
            "initial_node": "start",
            "nodes": {
                "start": {"functions": [{"type": "function", "function": {
                    "name": "verify_birthday",
                    "handler": "verify_birthday",
                    "transition": {"on": "verified", "routes": [
                        {"when": true, "to": "done"},
                        {"when": false, "to": "retry"}
                    ]}
                }}]},
                "done": {}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DanglingTransition { target, .. } if target == "retry"));
    }

    #[test]
    fn rejects_reserved_id_and_malformed_json() {
        let err = FlowGraph::new(END_NODE, vec![FlowNode::new(END_NODE)]).unwrap_err();
        assert!(matches!(err, ConfigurationError::ReservedNodeId(_)));

        let err = FlowGraph::from_json_str("{\"initial_node\": ", &registry()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }
}
