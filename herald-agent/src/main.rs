use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use herald_agent::config::AgentConfig;
use herald_agent::control::{control_channel, event_channel};
use herald_agent::orchestrator::Orchestrator;
use herald_data::{MemoryStore, MockChannel, SystemClock};
use herald_engine::HumanDelaySampler;

#[derive(Parser)]
#[command(name = "herald-agent", about = "Runs one outreach agent loop")]
struct Cli {
    /// Path to config file (default: ~/.config/herald/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file of contacts to seed the in-memory store with
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Agent id (overrides config file and HERALD_AGENT_ID)
    #[arg(long)]
    agent_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_ref())?;
    if let Some(agent_id) = cli.agent_id {
        config.agent_id = agent_id;
    }
    info!(
        agent_id = %config.agent_id,
        steps = config.sequence.len(),
        daily_cap = config.pacing.daily_cap_start,
        "loaded config"
    );

    // In-memory store and mock channel: this binary is the dry-run harness;
    // production deployments wire real ContactStore/Channel implementations
    // through the library API instead.
    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &cli.contacts {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read contacts file: {}", path.display()))?;
        let seeded = store
            .seed_from_json(&json)
            .with_context(|| format!("failed to parse contacts file: {}", path.display()))?;
        info!(contacts = seeded, "seeded contact store");
    }
    let channel = Arc::new(MockChannel::new());

    let clock = Arc::new(SystemClock);
    let sampler = Arc::new(HumanDelaySampler::new(config.delay.clone()));
    let (control, commands) = control_channel();
    let (events_tx, mut events_rx) = event_channel();
    let cancel = CancellationToken::new();

    // Mirror status transitions into the log.
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!(
                contact_id = %event.contact_id,
                agent_id = %event.agent_id,
                from = %event.from,
                to = %event.to,
                "status transition"
            );
        }
    });

    let orchestrator = Orchestrator::from_config(
        &config,
        store.clone(),
        channel,
        clock,
        sampler,
        commands,
        events_tx,
        cancel.clone(),
    );
    let loop_handle = tokio::spawn(orchestrator.run());

    info!("agent started, ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");

    // Pause first so no new send starts while the loop winds down.
    control.pause();
    cancel.cancel();

    match loop_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "agent loop failed"),
        Err(e) => error!(error = %e, "agent loop panicked"),
    }

    let (pending, claimed, contacted, skipped) = store.counts();
    info!(pending, claimed, contacted, skipped, "final contact counts");

    Ok(())
}
