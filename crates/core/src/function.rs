//! Callable functions offered to the model at a node, and the handlers bound
//! to them.

use crate::schema::ArgumentSchema;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Validated arguments passed to a handler.
pub type Arguments = Map<String, Value>;

/// Reserved node id: transitioning here ends the conversation without
/// entering a node.
pub const END_NODE: &str = "__end__";

/// Externally supplied logic bound to a function.
///
/// A handler runs at most once per accepted tool call. Its result is fed back
/// to the model as the tool result and, for dynamic transitions, decides the
/// next node.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, args: Arguments) -> Result<Value>;
}

/// Adapts an async closure into a [`FunctionHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> FunctionHandler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Arguments) -> Result<Value> {
        (self.0)(args).await
    }
}

/// Named handlers available to flow documents.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn FunctionHandler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

/// A value of the routing field that selects a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteKey {
    Flag(bool),
    Label(String),
}

impl RouteKey {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (RouteKey::Flag(expected), Value::Bool(actual)) => expected == actual,
            (RouteKey::Label(expected), Value::String(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Flag(flag) => write!(f, "{flag}"),
            RouteKey::Label(label) => write!(f, "'{label}'"),
        }
    }
}

/// One branch of a dynamic transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub when: RouteKey,
    pub to: String,
}

/// Where a function leads once it has been invoked successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Always the same next node.
    Static(String),
    /// The handler result's `field` selects one of a finite set of nodes.
    Dynamic { field: String, routes: Vec<Route> },
}

impl Transition {
    /// Every node id this transition may lead to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Transition::Static(target) => vec![target.as_str()],
            Transition::Dynamic { routes, .. } => routes.iter().map(|r| r.to.as_str()).collect(),
        }
    }

    /// Picks the next node id for a handler result.
    pub fn resolve(&self, result: &Value) -> std::result::Result<&str, String> {
        match self {
            Transition::Static(target) => Ok(target),
            Transition::Dynamic { field, routes } => {
                let value = result
                    .get(field)
                    .ok_or_else(|| format!("handler result has no field '{field}'"))?;
                routes
                    .iter()
                    .find(|route| route.when.matches(value))
                    .map(|route| route.to.as_str())
                    .ok_or_else(|| {
                        let declared: Vec<String> =
                            routes.iter().map(|r| r.when.to_string()).collect();
                        format!(
                            "value {value} of field '{field}' matches no route (declared: {})",
                            declared.join(", ")
                        )
                    })
            }
        }
    }
}

/// A callable tool available while its owning node is active.
#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: ArgumentSchema,
    pub handler: Option<Arc<dyn FunctionHandler>>,
    pub transition: Transition,
}

impl FunctionSpec {
    /// A handler-less function with a fixed next node.
    pub fn to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: ArgumentSchema::empty(),
            handler: None,
            transition: Transition::Static(target.into()),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: ArgumentSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn FunctionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("handler", &self.handler.as_ref().map(|_| "<handler>"))
            .field("transition", &self.transition)
            .finish()
    }
}
