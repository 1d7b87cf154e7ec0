//! Concurrent branches

use crate::action::{Action, ActionRef, CacheKey, Context};
use crate::error::{StrataError, StrataResult};
use crate::pipeline::result::ResultLog;
use crate::pipeline::sequence::run_step;
use async_trait::async_trait;
use futures_util::future::join_all;

/// Independent branches run at the same time
///
/// Every branch runs to completion whatever the others do. Branch results
/// are appended in declaration order once all branches finished.
#[derive(Debug, Clone, Default)]
pub struct Parallel {
    branches: Vec<ActionRef>,
}

impl Parallel {
    pub fn new(branches: Vec<ActionRef>) -> Self {
        Self { branches }
    }

    pub fn branches(&self) -> &[ActionRef] {
        &self.branches
    }

    /// Run as a top-level step, recording the aggregate result after the branches
    pub async fn run(&self, ctx: &Context<'_>) -> StrataResult<()> {
        run_step(ctx, self, 0, None).await
    }
}

#[async_trait]
impl Action for Parallel {
    fn describe(&self) -> String {
        format!("Parallel({} branches)", self.branches.len())
    }

    fn cache_key(&self) -> String {
        self.branches
            .iter()
            .fold(CacheKey::new("Parallel"), |key, branch| {
                key.arg(branch.cache_key())
            })
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        let forks: Vec<ResultLog> = self.branches.iter().map(|_| ResultLog::new()).collect();

        let runs = self
            .branches
            .iter()
            .zip(&forks)
            .enumerate()
            .map(|(index, (branch, log))| async move {
                let branch_ctx = ctx.with_results(log.clone());
                run_step(&branch_ctx, branch.as_ref(), index, None).await
            });
        let outcomes = join_all(runs).await;

        for log in &forks {
            ctx.results().absorb(log);
        }

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            return Err(StrataError::ParallelFailed {
                failed,
                total: self.branches.len(),
            });
        }
        Ok(())
    }

    async fn replay(&self, ctx: &Context<'_>) -> StrataResult<()> {
        for branch in &self.branches {
            branch.replay(ctx).await?;
        }
        Ok(())
    }
}
