//! remstore CLI
//!
//! Command-line tools for looking into a file-backed remstore cache.
//!
//! # Commands
//!
//! - `inspect` - Display node counts and sync state
//! - `verify` - Check every node for structural damage
//! - `dump` - Print nodes as JSON

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// remstore cache tools.
#[derive(Parser)]
#[command(name = "remstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display node counts and sync state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every node for structural damage
    Verify,

    /// Print nodes as JSON
    Dump {
        /// Only nodes whose path starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Maximum number of nodes to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump { prefix, limit } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, prefix.as_deref(), limit)?;
        }
        Commands::Version => {
            println!("remstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("snapshot format v{}", remstore_node::SNAPSHOT_VERSION);
        }
    }

    Ok(())
}
