//! Session lifecycle.
//!
//! A [`SessionController`] binds one [`FlowEngine`] to one real-time session.
//! It is driven entirely by [`SessionEvent`]s read from a channel, so the
//! lifecycle can be exercised without any transport behind it.

use crate::engine::{EngineConfig, EngineStatus, FlowEngine, TurnOutcome};
use crate::error::{FlowError, Result};
use crate::graph::FlowGraph;
use crate::llm_client::TurnClient;
use crate::message::{Command, Message};
use crate::summary::Summarizer;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Events delivered by the session transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ParticipantJoined { participant_id: String },
    /// A transcribed user utterance.
    UserMessage { text: String },
    ParticipantLeft { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Completed,
    Cancelled,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Completed => write!(f, "COMPLETED"),
            SessionState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Final view of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub state: SessionState,
    /// Active node when the session ended; `None` if no participant ever joined.
    pub node: Option<String>,
    pub engine_status: Option<EngineStatus>,
    pub history: Vec<Message>,
}

/// Unit of engine work started by an event.
enum Work {
    Initialize,
    User(String),
}

pub struct SessionController {
    id: String,
    graph: Arc<FlowGraph>,
    turns: Arc<dyn TurnClient>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: EngineConfig,
    commands: mpsc::Sender<Command>,

    state: SessionState,
    engine: Option<FlowEngine>,
    pending: VecDeque<String>,
}

impl SessionController {
    pub fn new(
        id: impl Into<String>,
        graph: Arc<FlowGraph>,
        turns: Arc<dyn TurnClient>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            id: id.into(),
            graph,
            turns,
            summarizer: None,
            config: EngineConfig::default(),
            commands,
            state: SessionState::Idle,
            engine: None,
            pending: VecDeque::new(),
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

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Processes events until the session is completed or cancelled.
    ///
    /// Engine work runs concurrently with the event channel: a participant
    /// leaving mid-turn abandons the in-flight work, and user messages that
    /// arrive meanwhile are queued in order. A closed channel counts as the
    /// participant leaving.
    #[instrument(name = "session", skip_all, fields(session_id = %self.id))]
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> SessionReport {
        info!("Session waiting for participant");
        loop {
            match self.state {
                SessionState::Idle => match events.recv().await {
                    Some(SessionEvent::ParticipantJoined { participant_id }) => {
                        info!(%participant_id, "Participant joined; starting flow");
                        self.start_engine();
                        self.drive(Work::Initialize, &mut events).await;
                    }
                    Some(SessionEvent::UserMessage { .. }) => {
                        warn!("Ignoring user message before any participant joined");
                    }
                    Some(SessionEvent::ParticipantLeft { .. }) | None => {
                        self.state = SessionState::Cancelled;
                    }
                },
                SessionState::Active => {
                    if let Some(text) = self.pending.pop_front() {
                        self.drive(Work::User(text), &mut events).await;
                        continue;
                    }
                    match events.recv().await {
                        Some(SessionEvent::UserMessage { text }) => {
                            self.drive(Work::User(text), &mut events).await;
                        }
                        Some(SessionEvent::ParticipantJoined { participant_id }) => {
                            debug!(%participant_id, "Additional participant joined");
                        }
                        Some(SessionEvent::ParticipantLeft { reason }) => {
                            info!(?reason, "Participant left");
                            self.cancel();
                        }
                        None => {
                            info!("Event channel closed");
                            self.cancel();
                        }
                    }
                }
                SessionState::Completed | SessionState::Cancelled => break,
            }
        }

        info!(state = %self.state, "Session finished");
        self.report()
    }

    fn start_engine(&mut self) {
        let mut engine = FlowEngine::new(Arc::clone(&self.graph), Arc::clone(&self.turns), self.commands.clone())
            .with_config(self.config.clone());
        if let Some(summarizer) = &self.summarizer {
            engine = engine.with_summarizer(Arc::clone(summarizer));
        }
        self.engine = Some(engine);
        self.state = SessionState::Active;
    }

    /// Runs one unit of engine work while still listening for events.
    async fn drive(&mut self, work: Work, events: &mut mpsc::Receiver<SessionEvent>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let pending = &mut self.pending;

        let outcome: Option<Result<TurnOutcome>> = {
            let work = async {
                match work {
                    Work::Initialize => engine.initialize().await,
                    Work::User(text) => engine.advance(&text).await,
                }
            };
            tokio::pin!(work);
            loop {
                tokio::select! {
                    result = &mut work => break Some(result),
                    event = events.recv() => match event {
                        Some(SessionEvent::UserMessage { text }) => {
                            debug!(queued = pending.len() + 1, "Queueing user message behind in-flight turn");
                            pending.push_back(text);
                        }
                        Some(SessionEvent::ParticipantJoined { participant_id }) => {
                            debug!(%participant_id, "Additional participant joined");
                        }
                        Some(SessionEvent::ParticipantLeft { reason }) => {
                            info!(?reason, "Participant left during an in-flight turn");
                            break None;
                        }
                        None => {
                            info!("Event channel closed during an in-flight turn");
                            break None;
                        }
                    },
                }
            }
        };

        match outcome {
            None => self.cancel(),
            Some(Ok(TurnOutcome::AwaitingUser)) => {}
            Some(Ok(TurnOutcome::Terminated)) => {
                info!("Flow terminated; session completed");
                self.state = SessionState::Completed;
            }
            Some(Err(err)) => self.fail(err).await,
        }
    }

    async fn fail(&mut self, err: FlowError) {
        if err.is_fatal() {
            error!(error = %err, "Fatal failure; cancelling session");
        } else {
            warn!(error = %err, "Turn failed; waiting for next user message");
        }
        if self.commands.send(Command::ReportError(err.to_string())).await.is_err() {
            warn!("Failed to deliver command: receiver dropped.");
        }
        if err.is_fatal() {
            self.cancel();
        }
    }

    fn cancel(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.cancel();
        }
        self.state = SessionState::Cancelled;
    }

    fn report(self) -> SessionReport {
        SessionReport {
            state: self.state,
            node: self.engine.as_ref().map(|e| e.current_node().to_string()),
            engine_status: self.engine.as_ref().map(FlowEngine::status),
            history: self.engine.map(|e| e.history().to_vec()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionSpec;
    use crate::llm_client::TurnError;
    use crate::message::{ToolCall, TurnRequest, TurnResponse};
    use crate::node::{Action, FlowNode};
    use async_trait::async_trait;

    /// Greets, then moves to the terminal node once the user says "done".
    struct Greeter;

    #[async_trait]
    impl TurnClient for Greeter {
        async fn submit_turn(&self, request: &TurnRequest) -> std::result::Result<TurnResponse, TurnError> {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::message::Role::User)
                .map(|m| m.content.as_str());
            Ok(match (last_user, request.tools.is_empty()) {
                (_, true) => TurnResponse::text("Goodbye."),
                (Some("done"), false) => TurnResponse::calls(vec![ToolCall::new("c1", "finish", "{}")]),
                (Some(other), false) => TurnResponse::text(format!("You said {other}.")),
                (None, false) => TurnResponse::text("Hello!"),
            })
        }
    }

    fn graph() -> Arc<FlowGraph> {
        let start = FlowNode::new("start")
            .with_task("Chat until the user says done.")
            .with_function(FunctionSpec::to("finish", "end"));
        let end = FlowNode::new("end")
            .with_task("Say goodbye.")
            .with_post_action(Action::EndConversation);
        Arc::new(FlowGraph::new("start", vec![start, end]).unwrap())
    }

    #[tokio::test]
    async fn joined_then_completed() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(8);
        let controller = SessionController::new("s1", graph(), Arc::new(Greeter), cmd_tx);
        assert_eq!(controller.state(), SessionState::Idle);

        event_tx
            .send(SessionEvent::ParticipantJoined {
                participant_id: "caller".into(),
            })
            .await
            .unwrap();
        event_tx
            .send(SessionEvent::UserMessage { text: "hi".into() })
            .await
            .unwrap();
        event_tx
            .send(SessionEvent::UserMessage { text: "done".into() })
            .await
            .unwrap();

        let report = controller.run(event_rx).await;
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.node.as_deref(), Some("end"));
        assert_eq!(report.engine_status, Some(EngineStatus::Terminated));

        let mut commands = Vec::new();
        while let Ok(cmd) = cmd_rx.try_recv() {
            commands.push(cmd);
        }
        assert_eq!(
            commands,
            vec![
                Command::SpeakText("Hello!".into()),
                Command::SpeakText("You said hi.".into()),
                Command::SpeakText("Goodbye.".into()),
                Command::EndConversation,
            ]
        );
    }

    #[tokio::test]
    async fn leaving_before_join_cancels_without_engine() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        event_tx
            .send(SessionEvent::ParticipantLeft { reason: None })
            .await
            .unwrap();

        let report = SessionController::new("s2", graph(), Arc::new(Greeter), cmd_tx)
            .run(event_rx)
            .await;
        assert_eq!(report.state, SessionState::Cancelled);
        assert_eq!(report.node, None);
        assert!(report.history.is_empty());
    }

    #[tokio::test]
    async fn closed_channel_counts_as_leaving() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        event_tx
            .send(SessionEvent::ParticipantJoined {
                participant_id: "caller".into(),
            })
            .await
            .unwrap();
        drop(event_tx);

        let report = SessionController::new("s3", graph(), Arc::new(Greeter), cmd_tx)
            .run(event_rx)
            .await;
        assert_eq!(report.state, SessionState::Cancelled);
        assert_eq!(report.node.as_deref(), Some("start"));
        assert_eq!(report.engine_status, Some(EngineStatus::Cancelled));
    }

    struct Broken;

    #[async_trait]
    impl TurnClient for Broken {
        async fn submit_turn(&self, _request: &TurnRequest) -> std::result::Result<TurnResponse, TurnError> {
            Err(TurnError::Fatal(anyhow::anyhow!("invalid api key")))
        }
    }

    #[tokio::test]
    async fn fatal_turn_failure_reports_and_cancels() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        event_tx
            .send(SessionEvent::ParticipantJoined {
                participant_id: "caller".into(),
            })
            .await
            .unwrap();

        let report = SessionController::new("s4", graph(), Arc::new(Broken), cmd_tx)
            .run(event_rx)
            .await;
        assert_eq!(report.state, SessionState::Cancelled);
        match cmd_rx.try_recv() {
            Ok(Command::ReportError(message)) => assert!(message.contains("invalid api key")),
            other => panic!("expected error report, got {other:?}"),
        }
    }
}
