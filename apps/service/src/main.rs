mod cli;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use uppe_core::storage::LibsqlStorage;
use uppe_core::{Config, Orchestrator};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = cli.json.then_some(logger::LogFormat::Json);
    logger::init_with(tracing::level_filters::LevelFilter::INFO, format);

    let config = Config::from_config(cli.config.as_ref()).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::CheckConfig => check_config(config).await,
        Command::Prune { days } => prune(config, days).await,
    }
}

async fn build(config: Config) -> anyhow::Result<Orchestrator> {
    let storage = LibsqlStorage::open(&config.database.path, config.database.pool_size)
        .await
        .with_context(|| format!("opening database {}", config.database.path))?;
    Ok(Orchestrator::builder(config).storage(Arc::new(storage)).build()?)
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("\n{config}");
    let orchestrator = build(config).await?;
    orchestrator.start().await?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Interrupt received");
    orchestrator.shutdown().await;

    let unpersisted = orchestrator.unpersisted_count().await;
    if unpersisted > 0 {
        warn!(unpersisted, "Exiting with writes that never reached the database");
    }
    Ok(())
}

async fn check_config(config: Config) -> anyhow::Result<()> {
    println!("{config}");
    let orchestrator = build(config).await?;

    let report = orchestrator.check_definitions().await?;
    for invalid in &report.invalid {
        error!(kind = invalid.kind, id = %invalid.id, name = %invalid.name, "Invalid definition: {}", invalid.reason);
    }
    println!(
        "{} monitors, {} providers, {} workflow rules, {} invalid",
        report.monitors,
        report.providers,
        report.rules,
        report.invalid.len()
    );

    if !report.invalid.is_empty() {
        anyhow::bail!("{} invalid definitions", report.invalid.len());
    }
    Ok(())
}

async fn prune(config: Config, days: Option<i64>) -> anyhow::Result<()> {
    let days = days.unwrap_or(config.retention.heartbeat_days);
    anyhow::ensure!(days > 0, "retention must be at least one day");

    let orchestrator = build(config).await?;
    let cutoff = Utc::now() - Duration::days(days);
    let deleted = orchestrator.prune_heartbeats(cutoff).await?;
    info!(deleted, days, "Pruned heartbeats");
    println!("Deleted {deleted} heartbeats older than {days} days");
    Ok(())
}
