//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "prefrank",
    version,
    author = "neur0map",
    about = "Preference-aware candidate ranking and diversification",
    long_about = "Prefrank narrows a catalog with tiered, auto-relaxing filters, scores the survivors against a \
                  buyer's liked and disliked features, and returns a diverse top-k list."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/prefrank/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank candidates for a JSON ranking request
    Rank {
        /// Request file (JSON); reads stdin when omitted
        #[arg(short, long, value_name = "FILE")]
        request: Option<PathBuf>,

        /// Profile to apply on top of the configuration
        #[arg(short, long)]
        profile: Option<String>,

        /// Print compact JSON instead of pretty JSON
        #[arg(long)]
        compact: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the lexical vector cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Catalog database utilities
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Recompute the cached vector of every catalog item
    Rebuild,

    /// Show cache size
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum DbAction {
    /// Show row counts
    Stats,

    /// Load candidates from a JSON array file
    Import {
        /// File containing a JSON array of candidates
        file: PathBuf,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
