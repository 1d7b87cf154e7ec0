//! One image build: a target, its steps and the layer cache around them

use crate::action::{Action, ActionRef, CacheKey, Context, Status};
use crate::backend::{is_root, Backend};
use crate::cache::{CachePlan, LayerCache, LayerCommitter};
use crate::error::{StrataError, StrataResult};
use crate::pipeline::result::StepResult;
use crate::pipeline::sequence::{Sequence, StepHook};
use crate::process::Event;
use crate::target::{Container, ImageCommit, Localhost, Target};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Program a privileged backend is re-entered through
const UNSHARE_PROGRAM: &str = "buildah";

/// Where the steps of a build run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    /// A working container created from a base image
    Container { base: String },
    /// This machine
    Localhost,
}

/// A named build
pub struct Build {
    name: String,
    target: BuildTarget,
    commit: Option<ImageCommit>,
    mounts: Vec<(PathBuf, PathBuf)>,
    steps: Sequence,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Build {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Build")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("commit", &self.commit)
            .field("steps", &self.steps.len())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Build {
    /// Build running `steps` in a container from `base`
    pub fn container(
        name: impl Into<String>,
        base: impl Into<String>,
        steps: Vec<ActionRef>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            name: name.into(),
            target: BuildTarget::Container { base: base.into() },
            commit: None,
            mounts: Vec::new(),
            steps: Sequence::new(steps),
            backend,
        }
    }

    /// Build running `steps` on this machine
    pub fn localhost(name: impl Into<String>, steps: Vec<ActionRef>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            target: BuildTarget::Localhost,
            commit: None,
            mounts: Vec::new(),
            steps: Sequence::new(steps),
            backend,
        }
    }

    /// Commit the result (enables the layer cache)
    pub fn commit(mut self, commit: ImageCommit) -> Self {
        self.commit = Some(commit);
        self
    }

    /// Bind-mount `host` at `guest` for the whole build, outside the layer chain
    pub fn mount(mut self, host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        self.mounts.push((host.into(), guest.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    pub fn steps(&self) -> &Sequence {
        &self.steps
    }

    pub fn commit_target(&self) -> Option<&ImageCommit> {
        self.commit.as_ref()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Layer cache of the commit target
    pub fn layer_cache(&self) -> Option<LayerCache> {
        match (&self.target, &self.commit) {
            (BuildTarget::Container { .. }, Some(commit)) => {
                Some(LayerCache::new(self.backend.clone(), commit.image.clone()))
            }
            _ => None,
        }
    }

    /// Fail with [`StrataError::PrivilegeEscalationRequired`] when the backend
    /// cannot work from the current process
    pub fn check_privileges(&self) -> StrataResult<()> {
        let needs_root = matches!(self.target, BuildTarget::Container { .. })
            && self.backend.requires_privileges();
        if needs_root && !is_root() {
            return Err(StrataError::PrivilegeEscalationRequired {
                backend: self.backend.name().to_string(),
                program: UNSHARE_PROGRAM.to_string(),
                args: vec!["unshare".to_string()],
            });
        }
        Ok(())
    }

    /// Run the build, returning the id of the committed image if any
    pub async fn run(&self, ctx: &Context<'_>) -> StrataResult<Option<String>> {
        self.check_privileges()?;
        match &self.target {
            BuildTarget::Localhost => self.run_localhost(ctx).await.map(|_| None),
            BuildTarget::Container { base } => self.run_container(ctx, base).await,
        }
    }

    async fn run_localhost(&self, ctx: &Context<'_>) -> StrataResult<()> {
        let host = Localhost::with_label(self.name.clone(), ctx.runner().clone());
        let host_ctx = ctx.with_target(&host);

        let mut outcome = Ok(());
        for (source, dest) in &self.mounts {
            outcome = host.mount(source, dest).await;
            if outcome.is_err() {
                break;
            }
        }
        if outcome.is_ok() {
            outcome = self.steps.run(&host_ctx).await;
        }

        let released = host.release().await;
        outcome.and(released)
    }

    async fn run_container(&self, ctx: &Context<'_>, base: &str) -> StrataResult<Option<String>> {
        let registry = ctx.runner().registry().clone();
        let label = self.name.as_str();

        if self.steps.is_empty() {
            registry.event(Some(label), Event::Info, "Nothing to do");
            return Ok(None);
        }

        let cache = self.layer_cache();
        let plan = match &cache {
            Some(cache) => Some(self.prepare_cache(ctx, cache, base).await?),
            None => None,
        };
        let reusable = plan.as_ref().map_or(0, |p| p.reusable);

        if let (Some(plan), Some(commit)) = (&plan, &self.commit) {
            if plan.is_complete() {
                registry.event(Some(label), Event::Info, "Image up to date");
                return self.tag_cached(plan, commit).await;
            }
        }

        let from = plan
            .as_ref()
            .and_then(|p| p.resume_from())
            .unwrap_or(base);
        let container =
            Container::acquire(self.backend.clone(), from, label, ctx.runner().clone()).await?;

        let mut outcome = Ok(());
        for (source, dest) in &self.mounts {
            outcome = container.mount(source, dest).await;
            if outcome.is_err() {
                break;
            }
        }

        {
            let container_ctx = ctx.with_target(&container);
            // Reused layers hold files only
            for step in &self.steps.steps()[..reusable] {
                if outcome.is_err() {
                    break;
                }
                outcome = step.replay(&container_ctx).await;
            }

            if outcome.is_ok() {
                let committer = match (&plan, &self.commit) {
                    (Some(plan), Some(commit)) => Some(LayerCommitter::new(
                        &container,
                        &commit.image,
                        &plan.keys,
                        reusable,
                        commit.format,
                    )),
                    _ => None,
                };
                let hook = committer.as_ref().map(|c| c as &dyn StepHook);
                outcome = self.steps.run_from(&container_ctx, reusable, hook).await;
            }
        }

        let status = if outcome.is_ok() {
            Status::Success
        } else {
            Status::Failure
        };
        registry.event(Some(label), Event::Clean, &format!("Releasing {}", container.handle()));
        let released = container.release(status, self.commit.as_ref()).await;

        match (outcome, released) {
            (Err(e), Err(teardown)) => {
                warn!("Teardown of {} also failed: {}", label, teardown);
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(()), Err(teardown)) => Err(teardown),
            (Ok(()), Ok(id)) => {
                if let (Some(commit), Some(id)) = (&self.commit, &id) {
                    registry.event(
                        Some(label),
                        Event::Success,
                        &format!("Committed {} ({})", commit.image, id),
                    );
                }
                Ok(id)
            }
        }
    }

    /// Resolve the reusable prefix, report cached steps and drop stale layers
    async fn prepare_cache(
        &self,
        ctx: &Context<'_>,
        cache: &LayerCache,
        base: &str,
    ) -> StrataResult<CachePlan> {
        let registry = ctx.runner().registry();
        let label = self.name.as_str();

        let plan = cache.resolve(base, self.steps.steps()).await?;
        for step in &self.steps.steps()[..plan.reusable] {
            let name = step.describe();
            registry.event(
                Some(label),
                Event::Skip,
                &format!("Found valid cached layer for {}", name),
            );
            ctx.results().push(StepResult::cached(label, &name));
        }

        let removed = cache.invalidate(&plan).await?;
        if removed > 0 {
            registry.event(
                Some(label),
                Event::Clean,
                &format!("Removed {} stale layers", removed),
            );
        }
        info!(
            "{}: {} of {} steps cached, {} stale layers removed",
            label,
            plan.reusable,
            plan.keys.len(),
            removed
        );
        Ok(plan)
    }

    /// Every step is cached: name the last layer as the requested image
    async fn tag_cached(
        &self,
        plan: &CachePlan,
        commit: &ImageCommit,
    ) -> StrataResult<Option<String>> {
        let Some(last) = plan.resume_from() else {
            return Ok(None);
        };
        for tag in commit.image.full_tags() {
            self.backend.tag(last, &tag).await?;
        }
        Ok(Some(last.to_string()))
    }
}

#[async_trait]
impl Action for Build {
    fn describe(&self) -> String {
        format!("Build({})", self.name)
    }

    fn cache_key(&self) -> String {
        let base = match &self.target {
            BuildTarget::Container { base } => Some(base.as_str()),
            BuildTarget::Localhost => None,
        };
        CacheKey::new("Build")
            .arg(&self.name)
            .opt("base", base)
            .opt("commit", self.commit.as_ref().map(|c| c.image.to_string()))
            .field("steps", self.steps.cache_key())
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        self.run(ctx).await.map(|_| ())
    }
}
