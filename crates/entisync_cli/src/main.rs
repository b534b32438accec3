//! entisync CLI
//!
//! Replays sync scenarios against an in-memory remote.
//!
//! # Commands
//!
//! - `replay` - Run a JSON scenario script and print local and remote state

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// entisync scenario tools.
#[derive(Parser)]
#[command(name = "entisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario script against an in-memory remote
    Replay {
        /// Path to the scenario JSON file
        script: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay { script, format } => {
            commands::replay::run(&script, format)?;
        }
        Commands::Version => {
            println!("entisync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("entisync core v{}", entisync_core::VERSION);
        }
    }

    Ok(())
}
