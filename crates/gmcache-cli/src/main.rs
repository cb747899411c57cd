//! gmcache command-line tool
//!
//! Inspect and maintain the on-disk conversation cache without starting the
//! desktop client.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use gmcache_sync::{logging, SyncConfig};

mod commands;

/// Inspect and manage the gmcache conversation cache
#[derive(Parser)]
#[command(name = "gmcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (defaults to GMCACHE_DATA_DIR, then the platform data dir)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached conversations with message counts and watermarks
    List,

    /// Show a conversation and its newest cached messages
    Show {
        /// Conversation id
        id: String,

        /// Number of messages to show
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show row counts and blob sizes
    Stats,

    /// Forget a conversation's indexing watermark
    Invalidate {
        /// Conversation id
        id: String,
    },

    /// Remove a conversation and everything cached under it
    Evict {
        /// Conversation id
        id: String,
    },

    /// List starred message ids in a conversation
    Starred {
        /// Conversation id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_with_default(if cli.verbose { "debug" } else { "warn" });

    let mut config = SyncConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::List => commands::list(&config).await?,
        Commands::Show { id, limit } => {
            commands::show(&config, &id, limit.unwrap_or(config.page_limit)).await?
        }
        Commands::Stats => commands::stats(&config).await?,
        Commands::Invalidate { id } => commands::invalidate(&config, &id).await?,
        Commands::Evict { id } => commands::evict(&config, &id).await?,
        Commands::Starred { id } => commands::starred(&config, &id)?,
    }

    Ok(())
}
