//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Strata - incremental layered image builder
///
/// Runs the steps of a strata.toml against working containers, committing
/// one cached layer per step so unchanged prefixes are never rebuilt.
#[derive(Parser, Debug)]
#[command(name = "strata")]
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
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the builds of a buildfile
    Build(BuildArgs),

    /// List the cached layers of each build
    Layers(LayersArgs),

    /// Remove cached layers the current buildfile no longer reaches
    Gc(GcArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Options shared by commands that read a buildfile
#[derive(Parser, Debug, Clone, Default)]
pub struct BuildfileArgs {
    /// Buildfile path (defaults to the nearest strata.toml)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Only use the build with this name
    #[arg(long)]
    pub only: Option<String>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub buildfile: BuildfileArgs,

    /// Use the stub backend: print what would run without touching images
    #[arg(long)]
    pub dry_run: bool,

    /// Suppress command echo and process output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the layers command
#[derive(Parser, Debug)]
pub struct LayersArgs {
    #[command(flatten)]
    pub buildfile: BuildfileArgs,

    /// Output format
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the gc command
#[derive(Parser, Debug)]
pub struct GcArgs {
    #[command(flatten)]
    pub buildfile: BuildfileArgs,

    /// Show what would be removed
    #[arg(long)]
    pub dry_run: bool,
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

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
