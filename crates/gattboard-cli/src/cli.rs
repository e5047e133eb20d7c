//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./gattboard.toml when present)
    #[arg(short, long, global = true, env = "GATTBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the primary snapshot endpoint
    #[arg(long, global = true)]
    pub endpoint: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Advertise the service and publish snapshots until stopped (default)
    Run {
        /// Publish into an in-memory peripheral instead of the Bluetooth adapter
        #[arg(long)]
        dry_run: bool,

        /// Override the refresh interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Run a single refresh and print the snapshot and slot layout
    Refresh,
    /// Print an example configuration file
    ExampleConfig,
}

impl Cli {
    /// The subcommand to execute; `run` when none was given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run {
            dry_run: false,
            interval: None,
        })
    }
}
