//! branchpulse: branch and pull-request lifecycle tracking.
//!
//! # Usage
//!
//! ```text
//! branchpulse init --org <org> --repo <repo>... [--trunk main] [--interval 3600] [--database <path>]
//! branchpulse sync [<repository>] [--all] [--dry-run]
//! branchpulse branches [--repo <repo>] [--open] [--json]
//! branchpulse stats [--as-of <RFC3339|YYYY-MM-DD>] [--days N] [--json]
//! branchpulse daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    branches::BranchesArgs, daemon::DaemonCommand, init::InitArgs, stats::StatsArgs,
    sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "branchpulse",
    version,
    about = "Track branch and pull-request lifecycles across GitHub repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.branchpulse/config.yaml.
    Init(InitArgs),

    /// Run one reconciliation pass now.
    Sync(SyncArgs),

    /// List tracked branches.
    Branches(BranchesArgs),

    /// Report lifecycle metrics.
    Stats(StatsArgs),

    /// Run or control the background scheduler.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Branches(args) => args.run(),
        Commands::Stats(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
