//! The per-session flow runtime.
//!
//! A [`FlowEngine`] holds the single active node of one conversation, renders
//! it into model turns, resolves tool calls into transitions and fires node
//! actions. It is single-writer: one event is processed at a time, and every
//! mutation of the node, history or status happens only after all fallible
//! and suspending work of a step has completed. Dropping any engine future
//! therefore never leaves a half-applied transition behind.

use crate::error::{FlowError, Result};
use crate::function::END_NODE;
use crate::graph::FlowGraph;
use crate::llm_client::TurnClient;
use crate::message::{Command, Message, ToolCall, TurnRequest};
use crate::node::{ContextStrategy, FlowNode};
use crate::render::{primer_for, render};
use crate::summary::{DEFAULT_SUMMARY_PROMPT, Summarizer};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a flow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Active,
    Terminated,
    Cancelled,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::Uninitialized => "uninitialized",
            EngineStatus::Active => "active",
            EngineStatus::Terminated => "terminated",
            EngineStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Tuning knobs for the turn cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Rejected tool calls fed back to the model within one turn cycle before
    /// the failure is surfaced.
    pub max_reprompts: u32,
    /// Model turns chained by transitions within one turn cycle.
    pub max_steps_per_turn: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reprompts: 2,
            max_steps_per_turn: 8,
        }
    }
}

/// An accepted tool call and the transition it caused.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub function: String,
    pub from: String,
    pub to: String,
    /// Handler result, or an acknowledgement for handler-less functions.
    pub result: Value,
    /// True when the history was replaced by a summary on entry.
    pub summarized: bool,
    pub terminated: bool,
}

/// Outcome of a terminal node's closing turn.
enum ClosingTurn {
    Skipped,
    Spoke(String),
    Failed(String),
}

/// How a turn cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model spoke and now waits for the user.
    AwaitingUser,
    /// The flow reached its end; post-actions have run.
    Terminated,
}

/// Runtime state of one conversation over a shared [`FlowGraph`].
pub struct FlowEngine {
    graph: Arc<FlowGraph>,
    turns: Arc<dyn TurnClient>,
    summarizer: Option<Arc<dyn Summarizer>>,
    commands: mpsc::Sender<Command>,
    config: EngineConfig,

    current: String,
    history: Vec<Message>,
    primer: Vec<Message>,
    visited: HashSet<String>,
    status: EngineStatus,
}

impl FlowEngine {
    /// Creates an engine positioned at the graph's initial node. Nothing is
    /// rendered or spoken until [`FlowEngine::initialize`] runs.
    pub fn new(graph: Arc<FlowGraph>, turns: Arc<dyn TurnClient>, commands: mpsc::Sender<Command>) -> Self {
        let current = graph.initial_node().to_string();
        Self {
            graph,
            turns,
            summarizer: None,
            commands,
            config: EngineConfig::default(),
            current,
            history: Vec::new(),
            primer: Vec::new(),
            visited: HashSet::new(),
            status: EngineStatus::Uninitialized,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn current_node(&self) -> &str {
        &self.current
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// The request the model would receive right now.
    pub fn render(&self) -> Result<TurnRequest> {
        self.ensure_active()?;
        Ok(render(self.active_node()?, &self.primer, &self.history))
    }

    /// Enters the initial node and runs the opening turn.
    #[instrument(skip_all, fields(node = %self.current))]
    pub async fn initialize(&mut self) -> Result<TurnOutcome> {
        if self.status != EngineStatus::Uninitialized {
            return Err(FlowError::NotActive(self.status));
        }
        let graph = Arc::clone(&self.graph);
        let node = graph.node(&self.current);
        let primer = node.map(|n| primer_for(n, &[], true)).unwrap_or_default();
        let closing = match node {
            Some(node) => self.closing_turn(node, &primer, &self.history).await,
            None => ClosingTurn::Skipped,
        };

        self.primer = primer;
        self.visited.insert(self.current.clone());
        self.status = EngineStatus::Active;
        info!("Flow initialized");

        if self.on_entered(closing).await {
            return Ok(TurnOutcome::Terminated);
        }
        self.run_turn().await
    }

    /// Records what the user said.
    pub fn user_message(&mut self, text: &str) -> Result<()> {
        self.ensure_active()?;
        self.history.push(Message::user(text));
        Ok(())
    }

    /// Records a user message and runs the resulting turn cycle.
    pub async fn advance(&mut self, text: &str) -> Result<TurnOutcome> {
        self.user_message(text)?;
        self.run_turn().await
    }

    /// Abandons the conversation. A terminated flow stays terminated.
    pub fn cancel(&mut self) {
        if self.status != EngineStatus::Terminated {
            info!(node = %self.current, previous = %self.status, "Flow cancelled");
            self.status = EngineStatus::Cancelled;
        }
    }

    /// Runs model turns until the model waits for the user or the flow ends.
    ///
    /// Each model response is processed in order: its text is spoken, then its
    /// tool calls are resolved one by one. A successful transition triggers
    /// another model turn at the new node; tool calls that follow it in the
    /// same response are dropped. Rejected tool calls are fed back to the
    /// model up to `max_reprompts` times.
    #[instrument(skip_all, fields(node = %self.current))]
    pub async fn run_turn(&mut self) -> Result<TurnOutcome> {
        self.ensure_active()?;
        let mut reprompts = 0;

        for _ in 0..self.config.max_steps_per_turn {
            let request = self.render()?;
            let response = self.turns.submit_turn(&request).await.map_err(|e| FlowError::Collaborator {
                collaborator: "llm-turn",
                fatal: e.is_fatal(),
                source: e.into_source(),
            })?;

            if !response.text.trim().is_empty() {
                self.history.push(Message::assistant(response.text.clone()));
                self.emit(Command::SpeakText(response.text)).await;
            }
            if response.tool_calls.is_empty() {
                return Ok(TurnOutcome::AwaitingUser);
            }

            let mut calls = response.tool_calls.into_iter();
            while let Some(call) = calls.next() {
                match self.handle_tool_call(&call).await {
                    Ok(step) => {
                        if calls.len() > 0 {
                            warn!(dropped = calls.len(), node = %step.to, "Dropping tool calls issued against the previous node");
                        }
                        if step.terminated {
                            return Ok(TurnOutcome::Terminated);
                        }
                        break;
                    }
                    Err(err) if err.is_recoverable() => {
                        reprompts += 1;
                        if reprompts > self.config.max_reprompts {
                            return Err(err);
                        }
                        warn!(error = %err, attempt = reprompts, "Tool call rejected; re-prompting model");
                        self.record_rejection(&call, &err);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        warn!(max = self.config.max_steps_per_turn, "Turn step budget exhausted; waiting for user");
        Ok(TurnOutcome::AwaitingUser)
    }

    /// Resolves one tool call against the active node.
    ///
    /// On any error, or if the future is dropped before it completes, the
    /// node, history and status are left exactly as they were. On success the
    /// call and its result are appended to the history (or condensed, if the
    /// target node resets the context), the target becomes the active node,
    /// its pre-actions run, and a terminal target speaks its closing turn and
    /// runs its post-actions.
    #[instrument(skip_all, fields(node = %self.current, function = %call.name))]
    pub async fn handle_tool_call(&mut self, call: &ToolCall) -> Result<Step> {
        self.ensure_active()?;
        let graph = Arc::clone(&self.graph);
        let node = self.active_node_in(&graph)?;

        let spec = node.function(&call.name).ok_or_else(|| FlowError::UnknownFunction {
            node: node.id.clone(),
            function: call.name.clone(),
            hint: closest_function(node, &call.name),
        })?;

        let args = spec
            .parameters
            .validate(&call.arguments)
            .map_err(|violation| FlowError::InvalidArguments {
                function: spec.name.clone(),
                reason: violation.to_string(),
            })?;

        let result = match &spec.handler {
            Some(handler) => handler.call(args).await.map_err(|source| FlowError::Handler {
                function: spec.name.clone(),
                source,
            })?,
            None => json!({"status": "acknowledged"}),
        };

        let target = spec
            .transition
            .resolve(&result)
            .map_err(|reason| FlowError::Transition {
                function: spec.name.clone(),
                reason,
            })?
            .to_string();
        let next = if target == END_NODE {
            None
        } else {
            Some(graph.node(&target).ok_or_else(|| FlowError::Transition {
                function: spec.name.clone(),
                reason: format!("node '{target}' does not exist"),
            })?)
        };

        let mut carried = vec![
            Message::tool_call(call.clone()),
            Message::tool_result(call.id.clone(), result.to_string()),
        ];
        let mut summarized = false;
        if let Some(ContextStrategy::ResetWithSummary { summary_prompt }) = next.map(|n| &n.context_strategy) {
            let mut full = self.history.clone();
            full.extend(carried.iter().cloned());
            if let Some(summary) = self.summarize(summary_prompt.as_deref(), &full).await {
                carried = vec![summary];
                summarized = true;
            }
        }

        let history = if summarized {
            carried
        } else {
            let mut history = self.history.clone();
            history.extend(carried);
            history
        };
        let first_visit = !self.visited.contains(&target);
        let primer = match next {
            Some(next) => primer_for(next, &self.primer, first_visit),
            None => self.primer.clone(),
        };
        let closing = match next {
            Some(next) => self.closing_turn(next, &primer, &history).await,
            None => ClosingTurn::Skipped,
        };

        // Commit.
        self.history = history;
        self.primer = primer;
        self.visited.insert(target.clone());
        let from = std::mem::replace(&mut self.current, target.clone());
        info!(%from, to = %target, summarized, "Transitioned");

        let terminated = self.on_entered(closing).await;
        Ok(Step {
            function: call.name.clone(),
            from,
            to: target,
            result,
            summarized,
            terminated,
        })
    }

    // --- Internals ---

    fn ensure_active(&self) -> Result<()> {
        match self.status {
            EngineStatus::Active => Ok(()),
            other => Err(FlowError::NotActive(other)),
        }
    }

    fn active_node(&self) -> Result<&FlowNode> {
        self.active_node_in(&self.graph)
    }

    fn active_node_in<'g>(&self, graph: &'g FlowGraph) -> Result<&'g FlowNode> {
        graph.node(&self.current).ok_or(FlowError::NotActive(EngineStatus::Terminated))
    }

    /// Applies entry behaviour for the node just committed and returns true
    /// when the flow has ended. State is settled before any command is sent.
    async fn on_entered(&mut self, closing: ClosingTurn) -> bool {
        if self.current == END_NODE {
            self.status = EngineStatus::Terminated;
            info!("Flow reached end sentinel");
            self.emit(Command::EndConversation).await;
            return true;
        }

        let graph = Arc::clone(&self.graph);
        let Some(node) = graph.node(&self.current) else {
            warn!(node = %self.current, "Entered node missing from graph");
            return false;
        };
        let mut commands: Vec<Command> = node.pre_actions.iter().map(|a| a.to_command()).collect();
        let terminal = node.is_terminal();
        if terminal {
            match closing {
                ClosingTurn::Spoke(text) => {
                    self.history.push(Message::assistant(text.clone()));
                    commands.push(Command::SpeakText(text));
                }
                ClosingTurn::Failed(reason) => commands.push(Command::ReportError(reason)),
                ClosingTurn::Skipped => {}
            }
            commands.extend(node.post_actions.iter().map(|a| a.to_command()));
            self.status = EngineStatus::Terminated;
            info!(node = %node.id, post_actions = node.post_actions.len(), "Flow terminated");
        }

        for command in commands {
            self.emit(command).await;
        }
        terminal
    }

    /// The last model turn at a terminal node, rendered against the state the
    /// node will be entered with. Only terminal nodes with task messages get
    /// one. Failures are reported but cannot stop the flow from ending.
    async fn closing_turn(&self, node: &FlowNode, primer: &[Message], history: &[Message]) -> ClosingTurn {
        if !node.is_terminal() || node.task_messages.is_empty() {
            return ClosingTurn::Skipped;
        }
        let request = render(node, primer, history);
        match self.turns.submit_turn(&request).await {
            Ok(response) => {
                if !response.tool_calls.is_empty() {
                    warn!(count = response.tool_calls.len(), "Ignoring tool calls at terminal node");
                }
                if response.text.trim().is_empty() {
                    ClosingTurn::Skipped
                } else {
                    ClosingTurn::Spoke(response.text)
                }
            }
            Err(e) => {
                warn!(error = %e, "Closing turn failed");
                ClosingTurn::Failed(e.to_string())
            }
        }
    }

    async fn summarize(&self, prompt: Option<&str>, history: &[Message]) -> Option<Message> {
        let Some(summarizer) = &self.summarizer else {
            warn!("No summarizer configured; keeping full history");
            return None;
        };
        match summarizer
            .summarize(prompt.unwrap_or(DEFAULT_SUMMARY_PROMPT), history)
            .await
        {
            Ok(summary) => {
                debug!(turns = history.len(), "History condensed");
                Some(summary)
            }
            Err(e) => {
                warn!(error = ?e, "Summarization failed; falling back to append");
                None
            }
        }
    }

    fn record_rejection(&mut self, call: &ToolCall, err: &FlowError) {
        self.history.push(Message::tool_call(call.clone()));
        self.history.push(Message::tool_result(
            call.id.clone(),
            json!({"error": err.to_string()}).to_string(),
        ));
    }

    async fn emit(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            warn!("Failed to deliver command: receiver dropped.");
        }
    }
}

/// Best fuzzy match among the node's function names.
fn closest_function(node: &FlowNode, name: &str) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    node.functions
        .iter()
        .filter_map(|f| matcher.fuzzy_match(&f.name, name).map(|score| (score, &f.name)))
        .max_by_key(|(score, _)| *score)
        .map(|(_, n)| n.clone())
}
