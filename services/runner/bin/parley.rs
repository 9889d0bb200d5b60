//! Main Entrypoint for the Parley Runner
//!
//! This binary is responsible for:
//! 1. Parsing the command line.
//! 2. Loading configuration from the environment and initializing logging.
//! 3. Loading and validating a flow document against the demo handlers.
//! 4. Driving one console session over that flow.

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_core::{
    FlowGraph, LLMSummarizer, OpenAICompatibleClient, SessionController, SessionEvent,
};
use parley_runner::{
    config::{self, Config},
    console,
    handlers::demo_registry,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Run conversation flows on the console", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a flow document and report its structure
    Validate {
        /// Path to the flow document (JSON)
        flow: PathBuf,
    },
    /// Talk to a flow from the terminal
    Chat {
        /// Path to the flow document (JSON)
        flow: PathBuf,
        /// Identifier attached to the session's log lines
        #[arg(long, default_value = "console")]
        session_id: String,
    },
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
}

fn load_flow(path: &Path) -> anyhow::Result<FlowGraph> {
    FlowGraph::from_path(path, &demo_registry())
        .with_context(|| format!("Failed to load flow document {}", path.display()))
}

fn validate(path: &Path) -> anyhow::Result<()> {
    init_logging(config::log_level().context("Failed to load configuration")?);
    let graph = load_flow(path)?;

    let mut nodes: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
    nodes.sort_unstable();
    println!("{} is valid", path.display());
    println!("  initial node:   {}", graph.initial_node());
    println!("  nodes ({}):      {}", nodes.len(), nodes.join(", "));
    println!("  terminal nodes: {}", graph.reachable_terminals().join(", "));
    Ok(())
}

async fn chat(path: &Path, session_id: String) -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    init_logging(config.log_level);
    info!("Configuration loaded. Loading flow...");

    // --- 3. Load Flow ---
    let graph = Arc::new(load_flow(path)?);

    // --- 4. Initialize Collaborators ---
    info!(provider = ?config.provider, model = %config.chat_model, "Connecting language model.");
    let openai_config = config.openai_config();
    let turns = Arc::new(OpenAICompatibleClient::new(
        openai_config.clone(),
        config.chat_model.clone(),
    ));
    let summarizer = Arc::new(LLMSummarizer::new(
        openai_config,
        config.summary_model.clone(),
    ));

    // --- 5. Run Session ---
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(32);
    let controller = SessionController::new(session_id, graph, turns, command_tx)
        .with_summarizer(summarizer)
        .with_config(config.engine.clone());
    let session = tokio::spawn(controller.run(event_rx));

    event_tx
        .send(SessionEvent::ParticipantJoined {
            participant_id: "console".to_string(),
        })
        .await
        .context("Session stopped before it started")?;
    eprintln!("Type to talk, {} to leave.", console::QUIT);
    console::spawn_stdin_reader(event_tx);

    let ended_by_flow = console::print_commands(command_rx, tokio::io::stdout()).await?;
    let report = session.await.context("Session task failed")?;
    info!(
        state = %report.state,
        node = ?report.node,
        turns = report.history.len(),
        ended_by_flow,
        "Session has finished."
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { flow } => validate(&flow),
        Commands::Chat { flow, session_id } => chat(&flow, session_id).await,
    }
}
