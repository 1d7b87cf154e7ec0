//! Layers command - show which cached layers each build would reuse

use crate::cache::CachePlan;
use crate::cli::args::{LayersArgs, OutputFormat};
use crate::cli::commands::load_builds;
use crate::cli::ui;
use crate::config::Config;
use crate::error::StrataResult;
use crate::pipeline::{Build, BuildTarget};
use console::style;
use serde::Serialize;

/// State of one cached layer relative to the current buildfile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerState {
    /// Reused by the next build
    Retained,
    /// Unreachable from the current steps
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerRow {
    pub build: String,
    pub layer: String,
    pub state: LayerState,
}

/// Cache plan of every committing container build
pub(crate) async fn plans(builds: &[Build]) -> StrataResult<Vec<(String, CachePlan)>> {
    let mut plans = Vec::new();
    for build in builds {
        let (Some(cache), BuildTarget::Container { base }) = (build.layer_cache(), build.target())
        else {
            continue;
        };
        let plan = cache.resolve(base, build.steps().steps()).await?;
        plans.push((build.name().to_string(), plan));
    }
    Ok(plans)
}

/// Flatten plans into rows, retained layers first in chain order
pub fn rows(plans: &[(String, CachePlan)]) -> Vec<LayerRow> {
    let mut rows = Vec::new();
    for (build, plan) in plans {
        let retained = plan.retained.iter().map(|l| (l, LayerState::Retained));
        let stale = plan.stale.iter().map(|l| (l, LayerState::Stale));
        rows.extend(retained.chain(stale).map(|(layer, state)| LayerRow {
            build: build.clone(),
            layer: layer.clone(),
            state,
        }));
    }
    rows
}

/// Execute the layers command
pub async fn execute(args: LayersArgs, config: &Config) -> StrataResult<()> {
    let (builds, _) = load_builds(&args.buildfile, config, true, false).await?;
    let plans = plans(&builds).await?;
    let rows = rows(&plans);

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{}", row.layer);
            }
        }
        OutputFormat::Table => print_table(&plans, &rows),
    }
    Ok(())
}

fn print_table(plans: &[(String, CachePlan)], rows: &[LayerRow]) {
    if plans.is_empty() {
        ui::step_info("No build commits an image, nothing is cached");
        return;
    }

    for (build, plan) in plans {
        ui::section(build);
        if !plan.listed {
            ui::step_warn_hint("Backend unavailable", "Layers could not be listed");
            continue;
        }
        println!("  {} of {} steps cached", plan.reusable, plan.keys.len());
    }
    if rows.is_empty() {
        return;
    }

    println!();
    println!(
        "{:<16} {:<10} {}",
        style("BUILD").bold(),
        style("STATE").bold(),
        style("LAYER").bold()
    );
    for row in rows {
        let state = match row.state {
            LayerState::Retained => style("retained").green(),
            LayerState::Stale => style("stale").yellow(),
        };
        println!("{:<16} {:<10} {}", row.build, state, row.layer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_list_retained_before_stale() {
        let plan = CachePlan {
            keys: vec!["a".into(), "b".into()],
            reusable: 1,
            retained: vec!["app:layer-a".into()],
            stale: vec!["app:layer-x".into()],
            listed: true,
        };
        let rows = rows(&[("app".to_string(), plan)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].state, LayerState::Retained);
        assert_eq!(rows[1].layer, "app:layer-x");

        let json = serde_json::to_string(&rows[1]).unwrap();
        assert!(json.contains("\"state\":\"stale\""));
    }
}
