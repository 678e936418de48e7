use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "solution-cache")]
#[command(about = "Inspect and maintain a solution-scoped analysis cache", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to <solution>/.solution-cache.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache root directory, overriding configuration and environment
    #[arg(long, global = true)]
    pub cache_root: Option<PathBuf>,

    /// Size profile: small, medium, large, very-large or auto
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show hit/miss counters, usage and quota state
    Stats {
        /// Solution root
        solution: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run durable-tier maintenance and a storage quota sweep
    Cleanup {
        /// Solution root
        solution: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List files changed since the last saved snapshot
    Changes {
        /// Solution root
        solution: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Invalidate entries affected by changes and save a new snapshot
    Refresh {
        /// Solution root
        solution: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete every cached entry
    Clear {
        /// Solution root
        solution: PathBuf,
    },
}

impl Commands {
    pub fn solution(&self) -> &PathBuf {
        match self {
            Commands::Stats { solution, .. }
            | Commands::Cleanup { solution, .. }
            | Commands::Changes { solution, .. }
            | Commands::Refresh { solution, .. }
            | Commands::Clear { solution } => solution,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
