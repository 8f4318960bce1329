//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Replica - content-addressed snapshot sync
///
/// Hashes state into content-addressed trees and replays host/worker
/// synchronization over in-process channels.
#[derive(Parser, Debug)]
#[command(name = "replica")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "REPLICA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hash a file or directory into a snapshot tree
    Hash(HashArgs),

    /// Synchronize a tree to local worker services
    Sync(SyncArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the hash command
#[derive(Parser, Debug)]
pub struct HashArgs {
    /// File or directory to hash
    pub path: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// File or directory the host serves
    pub path: PathBuf,

    /// Number of worker service instances
    #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u32).range(1..=64))]
    pub workers: u32,

    /// Run workers concurrently instead of one after another
    #[arg(long)]
    pub parallel: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one value per line)
    Plain,
}
