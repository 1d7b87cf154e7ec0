//! Sequential step execution

use crate::action::{Action, ActionRef, CacheKey, Context, Status};
use crate::error::{StrataError, StrataResult};
use crate::pipeline::result::StepResult;
use crate::process::Event;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

/// Work to do after a step succeeded and before the next one starts
///
/// An error from the hook fails the step that triggered it.
#[async_trait]
pub trait StepHook: Send + Sync {
    async fn after_success(&self, index: usize, action: &dyn Action) -> StrataResult<()>;
}

/// Run one step: notify, execute, record, then let the step clean up
pub async fn run_step(
    ctx: &Context<'_>,
    action: &dyn Action,
    index: usize,
    hook: Option<&dyn StepHook>,
) -> StrataResult<()> {
    let registry = ctx.runner().registry().clone();
    let label = ctx.label().to_string();
    let name = action.describe();

    registry.event(Some(&label), Event::Start, &name);
    let started = Instant::now();

    let mut outcome = action.execute(ctx).await;
    if outcome.is_ok() {
        if let Some(hook) = hook {
            outcome = hook.after_success(index, action).await;
        }
    }
    let duration = started.elapsed();

    let status = match &outcome {
        Ok(()) => {
            registry.event(Some(&label), Event::Success, &name);
            ctx.results()
                .push(StepResult::success(&label, &name, duration));
            Status::Success
        }
        Err(e) => {
            registry.event(Some(&label), Event::Failure, &format!("{}: {}", name, e));
            ctx.results()
                .push(StepResult::failure(&label, &name, e.to_string(), duration));
            Status::Failure
        }
    };
    debug!("{} {} in {:?}", name, status, duration);

    if let Err(e) = action.cleanup(ctx, status).await {
        warn!("Cleanup of {} failed: {}", name, e);
    }
    outcome
}

/// Ordered steps run one at a time against one target
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    steps: Vec<ActionRef>,
}

impl Sequence {
    pub fn new(steps: Vec<ActionRef>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ActionRef] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step, stopping at the first failure
    pub async fn run(&self, ctx: &Context<'_>) -> StrataResult<()> {
        self.run_from(ctx, 0, None).await
    }

    /// Run the steps from `start` on, calling `hook` after each success
    ///
    /// A failing step stops the sequence: later steps never run and the
    /// error names the step that failed.
    pub async fn run_from(
        &self,
        ctx: &Context<'_>,
        start: usize,
        hook: Option<&dyn StepHook>,
    ) -> StrataResult<()> {
        for (index, step) in self.steps.iter().enumerate().skip(start) {
            if let Err(e) = run_step(ctx, step.as_ref(), index, hook).await {
                return Err(StrataError::StepFailed {
                    target: ctx.label().to_string(),
                    step: step.describe(),
                    index,
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Action for Sequence {
    fn describe(&self) -> String {
        format!("Sequence({} steps)", self.steps.len())
    }

    fn cache_key(&self) -> String {
        self.steps
            .iter()
            .fold(CacheKey::new("Sequence"), |key, step| {
                key.arg(step.cache_key())
            })
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        self.run(ctx).await
    }

    async fn replay(&self, ctx: &Context<'_>) -> StrataResult<()> {
        for step in &self.steps {
            step.replay(ctx).await?;
        }
        Ok(())
    }
}
