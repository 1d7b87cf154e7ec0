//! Build command - run the builds of a buildfile

use crate::action::{ActionRef, Context};
use crate::cli::args::BuildArgs;
use crate::cli::commands::load_builds;
use crate::cli::ui;
use crate::config::Config;
use crate::error::{StrataError, StrataResult};
use crate::pipeline::{run_step, Build, Parallel, ResultLog};
use crate::target::Localhost;
use console::style;
use std::sync::Arc;
use tracing::info;

/// Prefix of invocation-level notifications
const ROOT_LABEL: &str = "strata";

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> StrataResult<()> {
    let quiet = args.quiet || config.build.quiet;
    let (builds, runner) = load_builds(&args.buildfile, config, quiet, args.dry_run).await?;
    info!(
        "Running {} builds{}",
        builds.len(),
        if args.dry_run { " (dry run)" } else { "" }
    );

    let host = Localhost::with_label(ROOT_LABEL, runner);
    let ctx = Context::new(&host, ResultLog::new());
    let outcome = run_builds(&ctx, builds).await;

    report(ctx.results());
    if let Err(e) = &outcome {
        if let Some(output) = unstreamed_output(e, quiet) {
            ui::section("Output of the failed command");
            println!("{}", output);
        }
    }
    outcome
}

/// Captured output of a failed command that quiet mode kept off the terminal
///
/// Without quiet mode the output was streamed as it arrived and is not repeated.
fn unstreamed_output(err: &StrataError, quiet: bool) -> Option<String> {
    if !quiet || !err.is_command_failure() {
        return None;
    }
    match err.root_cause() {
        StrataError::CommandFailure { stdout, stderr, .. } => {
            let output: Vec<&str> = [stdout.as_str(), stderr.as_str()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect();
            (!output.is_empty()).then(|| output.join("\n"))
        }
        _ => None,
    }
}

/// One build runs directly; several run side by side
async fn run_builds(ctx: &Context<'_>, mut builds: Vec<Build>) -> StrataResult<()> {
    if builds.len() == 1 {
        let build = builds.remove(0);
        return run_step(ctx, &build, 0, None).await;
    }
    let branches: Vec<ActionRef> = builds
        .into_iter()
        .map(|build| Arc::new(build) as ActionRef)
        .collect();
    Parallel::new(branches).run(ctx).await
}

fn report(results: &ResultLog) {
    let tally = results.tally();

    ui::section("Summary");
    for result in results.snapshot() {
        if let Some(error) = &result.error {
            ui::step_error(&format!("{} {}: {}", result.target, result.action, error));
        }
    }

    let passed = style(format!("{} PASS", tally.passed)).green();
    let failed = if tally.failed > 0 {
        style(format!("{} FAIL", tally.failed)).red()
    } else {
        style(format!("{} FAIL", tally.failed)).dim()
    };
    println!("  {}  {}  {}", passed, failed, style(format!("{} cached", tally.cached)).dim());
}
