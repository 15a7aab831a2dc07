//! Whiteboard CLI - Main entry point
//!
//! 시나리오 파일의 생명주기 이벤트를 재생한 뒤 런타임 스냅샷을 JSON으로 출력한다.

mod scenario;

use anyhow::Context;
use clap::Parser;
use scenario::Scenario;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whiteboard_core::{LoggingEndpointBuilder, Snapshot, StateChange, Whiteboard};
use whiteboard_foundation::{ProviderId, WhiteboardConfig};

/// Whiteboard - replay provider lifecycle events and inspect the outcome
#[derive(Parser, Debug)]
#[command(name = "whiteboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file (JSON array of lifecycle events)
    scenario: PathBuf,

    /// Configuration file (.json or .toml), merged over the global config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provider ids the endpoint builder refuses to bind
    #[arg(long = "refuse", value_name = "ID")]
    refuse: Vec<u64>,

    /// Also print the most recent state changes
    #[arg(long, value_name = "N")]
    history: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// `--history` 출력
#[derive(Serialize)]
struct Report<'a> {
    snapshot: &'a Snapshot,
    history: Vec<StateChange>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stdout는 스냅샷 출력용)
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Load configuration
    let mut config = WhiteboardConfig::load().context("Failed to load global config")?;
    if let Some(path) = &args.config {
        config.merge(WhiteboardConfig::load_from(path)?);
    }

    let scenario = Scenario::load(&args.scenario)?;
    info!(scenario = %scenario.name, events = scenario.events.len(), "Replaying scenario");

    let endpoints = Arc::new(
        LoggingEndpointBuilder::new().refuse(args.refuse.iter().copied().map(ProviderId)),
    );
    let whiteboard = Whiteboard::new(config, endpoints)?;

    let total = scenario.events.len();
    let handled = whiteboard.run(futures::stream::iter(scenario.events)).await;
    info!(handled, failed = total - handled, "Scenario replayed");

    let snapshot = whiteboard.snapshot();
    let output = match args.history {
        Some(limit) => serde_json::to_string_pretty(&Report {
            snapshot: &snapshot,
            history: whiteboard.state().history(limit),
        })?,
        None => serde_json::to_string_pretty(&snapshot)?,
    };
    println!("{}", output);

    whiteboard.close();
    Ok(())
}
