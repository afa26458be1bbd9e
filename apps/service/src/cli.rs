use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Uppe monitoring and alerting service
#[derive(Debug, Parser)]
#[command(name = "uppe", version, about)]
pub struct Cli {
    /// Config file; defaults to $XDG_CONFIG_HOME/uppe/config.toml
    #[arg(short, long, global = true, env = "UPPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Schedule checks and deliver alerts until interrupted (default)
    Run,
    /// Load the configuration and stored definitions, report problems and exit
    CheckConfig,
    /// Delete heartbeats older than the retention period
    Prune {
        /// Overrides `retention.heartbeat_days`
        #[arg(long)]
        days: Option<i64>,
    },
}
