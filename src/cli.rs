use std::{path::PathBuf, sync::OnceLock};

use clap::{Parser, Subcommand};

/// Vulnerability scanning for fleets of Docker hosts.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the config file.
    #[arg(short, long, default_value = "aegis.toml")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the per-host agent that lists containers and executes scans.
    Agent,
    /// Run the central service that tracks hosts and stores results.
    Orchestrator,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}
