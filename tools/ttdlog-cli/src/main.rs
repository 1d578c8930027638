//! ttdlog - inspect time travel logs
//!
//! # Commands
//!
//! - `ttdlog info` - Header and summary counts of a log file
//! - `ttdlog dump` - Print entries, optionally limited to a time range
//! - `ttdlog snapshots` - List snapshots and verify their checksums
//! - `ttdlog callbacks` - Correlate host callback registrations and cancels
//! - `ttdlog config` - Show the effective configuration
//!
//! # Usage
//!
//! ```bash
//! # Summary of the last emitted log
//! ttdlog info ~/.local/share/ttdlog/logs/ttdlog.bin
//!
//! # Entries 100 through 200 as JSON lines
//! ttdlog dump ttdlog.bin --from 100 --to 200 --json
//! ```

mod callbacks;
mod config;
mod dump;
mod info;
mod load;
mod snapshots;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// ttdlog - inspect time travel logs
#[derive(Parser)]
#[command(name = "ttdlog")]
#[command(about = "Inspect time travel logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header and summary counts
    Info(info::InfoArgs),

    /// Print log entries
    Dump(dump::DumpArgs),

    /// List snapshots and verify checksums
    Snapshots(snapshots::SnapshotsArgs),

    /// Correlate host callback operations
    Callbacks(callbacks::CallbacksArgs),

    /// Show the effective configuration
    Config(config::ConfigArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info(args) => info::execute(args),
        Commands::Dump(args) => dump::execute(args),
        Commands::Snapshots(args) => snapshots::execute(args),
        Commands::Callbacks(args) => callbacks::execute(args),
        Commands::Config(args) => config::execute(args),
    }
}
