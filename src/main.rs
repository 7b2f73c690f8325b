//! Hivemind CLI entry point: the composition root.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use hivemind::domain::models::session::SessionStatus;
use hivemind::infrastructure::anthropic::{AnthropicConfig, AnthropicProvider};
use hivemind::infrastructure::config::{ConfigLoader, SwarmConfig};
use hivemind::infrastructure::fs::LocalFileAccess;
use hivemind::infrastructure::git::GitVcs;
use hivemind::infrastructure::persistence::{SessionPersistence, SessionSnapshot};
use hivemind::domain::ports::clock::SystemClock;
use hivemind::services::cost_ledger::CostLedger;
use hivemind::services::event_bus::{EventBus, SwarmEvent};
use hivemind::services::orchestrator::Orchestrator;
use hivemind::services::session_store::SessionStore;
use hivemind::services::worktree_manager::WorktreeManager;

#[derive(Parser)]
#[command(name = "hivemind", about = "Swarm orchestration core", version)]
struct Cli {
    /// Emit machine-readable JSON output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task through a full session
    Run {
        /// The natural-language task to execute
        task: String,
        /// Optional session name
        #[arg(long)]
        name: Option<String>,
    },
    /// Manage persisted session snapshots
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Print the resolved configuration
    Config,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List stored sessions, newest first
    List,
    /// Print a stored session snapshot
    Show { id: String },
    /// Delete a stored session snapshot
    Delete { id: String },
}

fn init_tracing(config: &SwarmConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Sessions { command } => handle_sessions(&config, command, cli.json).await,
        Commands::Run { task, name } => {
            init_tracing(&config);
            run_session(config, task, name, cli.json).await
        }
    }
}

async fn handle_sessions(
    config: &SwarmConfig,
    command: SessionCommands,
    json: bool,
) -> Result<()> {
    let workspace = PathBuf::from(&config.workspace_root);
    let store = SessionPersistence::initialize(&workspace, config.persistence.max_sessions)
        .await
        .context("Failed to open session store")?;

    match command {
        SessionCommands::List => {
            let ids = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else if ids.is_empty() {
                println!("no stored sessions");
            } else {
                for id in ids {
                    println!("{id}");
                }
            }
        }
        SessionCommands::Show { id } => {
            println!("{}", store.export(&id).await?);
        }
        SessionCommands::Delete { id } => {
            let removed = store.delete(&id).await?;
            if !removed {
                anyhow::bail!("no stored session with id {id}");
            }
            println!("deleted {id}");
        }
    }
    Ok(())
}

async fn run_session(
    config: SwarmConfig,
    task: String,
    name: Option<String>,
    json: bool,
) -> Result<()> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .context("ANTHROPIC_API_KEY must be set to run a session")?;
    let workspace = PathBuf::from(&config.workspace_root);

    // Wire the runtime: bus, store, ledger, worktrees, provider, driver.
    let bus = Arc::new(EventBus::default());
    let store = Arc::new(SessionStore::new(Arc::clone(&bus), config.session_limits()));
    let ledger = Arc::new(CostLedger::new(Arc::clone(&bus)));
    let clock = Arc::new(SystemClock);
    let worktrees = Arc::new(WorktreeManager::new(
        Arc::new(GitVcs::new()),
        clock.clone(),
        config.worktree_config(),
    ));
    let provider = Arc::new(AnthropicProvider::new(
        AnthropicConfig::new(api_key).with_base_url(config.model.base_url.clone()),
    )?);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        provider,
        Arc::new(LocalFileAccess::new()),
        worktrees,
        Arc::clone(&ledger),
        Arc::clone(&bus),
        clock,
        workspace.clone(),
        config.orchestrator_config(),
    ));

    let mut events = bus.subscribe().await;
    let session = store.create(task, name).await?;
    println!("session {} started", session.id);
    orchestrator.start(session.id).await?;

    // Follow the event stream until the session lands in a terminal state.
    let mut final_status = SessionStatus::Failed;
    while let Some(envelope) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&envelope)?);
        } else {
            match &envelope.payload {
                SwarmEvent::SessionUpdated { status, .. } => {
                    println!("[session] {}", status.as_str());
                }
                SwarmEvent::TaskCreated { title, .. } => println!("[task] created: {title}"),
                SwarmEvent::TaskUpdated { task_id, status, .. } => {
                    println!("[task] {task_id}: {}", status.as_str());
                }
                SwarmEvent::AgentSpawned { agent_id, role, .. } => {
                    println!("[agent] {agent_id} spawned as {}", role.as_str());
                }
                SwarmEvent::CostUpdate { total_cost_usd, .. } => {
                    println!("[cost] total ${total_cost_usd:.4}");
                }
                SwarmEvent::OrchestrationError { error, .. } => {
                    eprintln!("[error] {error}");
                }
                _ => {}
            }
        }
        if let SwarmEvent::SessionUpdated { session_id, status } = envelope.payload {
            if session_id == session.id && status.is_terminal() {
                final_status = status;
                break;
            }
        }
    }

    let summary = ledger.summary(session.id).await;
    println!(
        "session {}: {} (cost ${:.4}, {} calls)",
        session.id,
        final_status.as_str(),
        summary.total_cost_usd,
        summary.request_count
    );

    if config.persistence.enabled {
        let persistence =
            SessionPersistence::initialize(&workspace, config.persistence.max_sessions).await?;
        let snapshot = store
            .with_entry(session.id, |entry| {
                Ok(SessionSnapshot::new(
                    entry.session.clone(),
                    entry.board.list().into_iter().cloned().collect(),
                    entry.pool.list().into_iter().cloned().collect(),
                    entry.mailbox.all_messages().to_vec(),
                ))
            })
            .await?
            .with_costs(summary, ledger.records(session.id).await);
        persistence.save(&snapshot).await?;
        persistence.cleanup().await?;
        println!("snapshot saved to {}/.swarm-sessions", workspace.display());
    }

    Ok(())
}
