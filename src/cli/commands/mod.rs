//! CLI command implementations

pub mod build;
pub mod config;
pub mod gc;
pub mod layers;

pub use build::execute as build;
pub use config::execute as config;
pub use gc::execute as gc;
pub use layers::execute as layers;

use crate::buildfile::Buildfile;
use crate::cli::args::BuildfileArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{StrataError, StrataResult};
use crate::pipeline::Build;
use crate::process::{ColorRules, OutputRegistry, ProcessRunner};
use std::sync::Arc;
use tracing::debug;

/// Read the buildfile named on the command line, or the nearest `strata.toml`
pub(crate) async fn load_buildfile(args: &BuildfileArgs) -> StrataResult<Buildfile> {
    let path = match &args.file {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| StrataError::io("getting current directory", e))?;
            ConfigManager::find_buildfile(&cwd).ok_or(StrataError::BuildfileNotFound(cwd))?
        }
    };
    debug!("Using buildfile {}", path.display());
    Buildfile::load(&path).await
}

/// Output registry configured from `[output]`
pub(crate) fn output_registry(config: &Config) -> StrataResult<OutputRegistry> {
    let colors = config.output.colors && console::colors_enabled();
    let rules = if config.output.highlight {
        ColorRules::compile(
            config
                .output
                .rules
                .iter()
                .map(|rule| (rule.pattern.as_str(), rule.template.as_str())),
            colors,
        )
        .map_err(|e| StrataError::User(format!("invalid highlight rule: {e}")))?
    } else {
        ColorRules::default()
    };
    Ok(OutputRegistry::stdout(colors, rules))
}

/// Runnable builds of the buildfile selected by `args`
pub(crate) async fn load_builds(
    args: &BuildfileArgs,
    config: &Config,
    quiet: bool,
    dry_run: bool,
) -> StrataResult<(Vec<Build>, ProcessRunner)> {
    let buildfile = load_buildfile(args).await?;
    let registry = Arc::new(output_registry(config)?);
    let runner = ProcessRunner::new(registry).with_quiet(quiet || config.build.quiet);
    let builds = buildfile.builds(config, &runner, dry_run, args.only.as_deref())?;

    // Checked up front: inside a Parallel the error would only show as a failed branch
    for build in &builds {
        build.check_privileges()?;
    }
    Ok((builds, runner))
}
