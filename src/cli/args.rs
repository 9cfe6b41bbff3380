//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// sws - Stan WASM build server core
///
/// Compiles Stan models to JavaScript + WebAssembly through a shared,
/// content-addressed build cache.
#[derive(Parser, Debug)]
#[command(name = "sws")]
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
    #[arg(short, long, global = true, env = "SWS_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, inspect and drive individual jobs
    Job(JobArgs),

    /// Compile a model file end to end and write its artifacts
    Build(BuildArgs),

    /// Inspect and repair the build cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the job command
#[derive(Parser, Debug)]
pub struct JobArgs {
    #[command(subcommand)]
    pub action: JobAction,
}

/// Job subcommands
#[derive(Subcommand, Debug)]
pub enum JobAction {
    /// Create a new job and print its ID
    Create,

    /// Show a job's status
    Status {
        /// Job ID
        job_id: String,
    },

    /// Attach model source to a job
    Upload {
        /// Job ID
        job_id: String,

        /// Stan source file ("-" reads stdin)
        file: PathBuf,
    },

    /// Start or advance a job's build
    Run {
        /// Job ID
        job_id: String,

        /// Keep waiting until the job completes or fails
        #[arg(short, long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "600", requires = "wait")]
        timeout: u64,
    },

    /// Print or save a compiled artifact
    Fetch {
        /// Job ID
        job_id: String,

        /// Artifact name (main.js or main.wasm)
        artifact: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List jobs
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Delete finished jobs
    Prune {
        /// Only jobs last updated more than N days ago
        #[arg(long, default_value = "7")]
        days: u32,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Stan source file
    pub file: PathBuf,

    /// Directory to write main.js and main.wasm into
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "600")]
    pub timeout: u64,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one cache entry
    Show {
        /// Source hash (64 hex characters)
        key: String,
    },

    /// Release build leases whose holder exceeded the lease timeout
    Reclaim {
        /// Only this source hash (default: every entry)
        key: Option<String>,
    },
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

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
