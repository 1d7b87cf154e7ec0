//! Strata - incremental layered image builder
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use strata::cli::{Cli, Commands};
use strata::config::ConfigManager;
use strata::error::{StrataError, StrataResult};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Set in the re-executed process so it never escalates twice
const UNSHARED_ENV: &str = "STRATA_UNSHARED";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> StrataResult<ExitCode> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;
    init_logging(cli.verbose, &config.general.log_format);
    debug!("Loaded configuration from {}", manager.path().display());

    let result = match cli.command {
        Commands::Build(args) => strata::cli::commands::build(args, &config).await,
        Commands::Layers(args) => strata::cli::commands::layers(args, &config).await,
        Commands::Gc(args) => strata::cli::commands::gc(args, &config).await,
        Commands::Config(args) => strata::cli::commands::config(args, &config, &manager).await,
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(StrataError::PrivilegeEscalationRequired { program, args, .. })
            if config.build.unshare && std::env::var_os(UNSHARED_ENV).is_none() =>
        {
            reexec(&program, &args).await
        }
        Err(e) => Err(e),
    }
}

/// 0 = warn, 1 = info, 2+ = debug; without -v, RUST_LOG wins when set
fn init_logging(verbose: u8, log_format: &str) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=warn")),
        1 => EnvFilter::new("strata=info"),
        _ => EnvFilter::new("strata=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run this invocation again under `program args...` and report its status
async fn reexec(program: &str, args: &[String]) -> StrataResult<ExitCode> {
    let exe = std::env::current_exe()
        .map_err(|e| StrataError::io("locating the strata executable", e))?;
    info!("Re-running under {} {}", program, args.join(" "));

    let status = tokio::process::Command::new(program)
        .args(args)
        .arg(&exe)
        .args(std::env::args_os().skip(1))
        .env(UNSHARED_ENV, "1")
        .status()
        .await
        .map_err(|e| StrataError::command_spawn(program, e))?;

    Ok(status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE))
}
