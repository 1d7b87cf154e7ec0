//! Gc command - remove layers the buildfile no longer reaches

use crate::cli::args::GcArgs;
use crate::cli::commands::load_builds;
use crate::cli::ui;
use crate::config::Config;
use crate::error::StrataResult;
use crate::pipeline::BuildTarget;

/// Execute the gc command
pub async fn execute(args: GcArgs, config: &Config) -> StrataResult<()> {
    let (builds, _) = load_builds(&args.buildfile, config, true, false).await?;

    let mut total = 0;
    for build in &builds {
        let (Some(cache), BuildTarget::Container { base }) = (build.layer_cache(), build.target())
        else {
            continue;
        };
        let plan = cache.resolve(base, build.steps().steps()).await?;
        if plan.stale.is_empty() {
            continue;
        }

        if args.dry_run {
            ui::section(&format!("Would remove from {}", build.name()));
            for layer in &plan.stale {
                println!("  {}", layer);
            }
            total += plan.stale.len();
        } else {
            total += cache.invalidate(&plan).await?;
        }
    }

    match (total, args.dry_run) {
        (0, _) => ui::step_ok("No stale layers"),
        (n, true) => ui::step_info(&format!("{} stale layers would be removed", n)),
        (n, false) => ui::step_ok(&format!("Removed {} stale layers", n)),
    }
    Ok(())
}
