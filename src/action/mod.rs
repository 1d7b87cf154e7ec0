//! Build steps
//!
//! An [`Action`] is one unit of work run against a [`Context`]. Its cache key
//! is derived from its declared inputs only, so two actions built from the
//! same definition always hash the same, whatever happened at runtime.

mod builtin;
mod context;

pub use builtin::{Copy, Mkdir, Mount, Run, User, WriteFile};
pub use context::Context;

use crate::error::StrataResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build step
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    /// Short human-readable label used in step notifications
    fn describe(&self) -> String;

    /// Deterministic identity of the step's declared inputs
    fn cache_key(&self) -> String;

    /// Apply the step to the context
    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()>;

    /// Called with the final status after `execute`, whatever the outcome
    async fn cleanup(&self, _ctx: &Context<'_>, _status: Status) -> StrataResult<()> {
        Ok(())
    }

    /// Restore what the step set up outside the filesystem when its layer is reused
    ///
    /// A committed layer holds files only, so a build resuming past this step
    /// calls `replay` instead of `execute`.
    async fn replay(&self, _ctx: &Context<'_>) -> StrataResult<()> {
        Ok(())
    }
}

/// Shared handle to an immutable action
pub type ActionRef = Arc<dyn Action>;

/// Builder for `Kind(arg, key=value)` cache keys
///
/// Arguments are serialized with `Debug` quoting so `Run("a b")` and
/// `Run("a", "b")` never collide.
#[derive(Debug)]
pub struct CacheKey {
    kind: &'static str,
    parts: Vec<String>,
}

impl CacheKey {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            parts: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl fmt::Debug) -> Self {
        self.parts.push(format!("{:?}", value));
        self
    }

    pub fn field(mut self, name: &str, value: impl fmt::Debug) -> Self {
        self.parts.push(format!("{}={:?}", name, value));
        self
    }

    /// Add `name=value` only when a value is set
    pub fn opt<T: fmt::Debug>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub fn finish(self) -> String {
        format!("{}({})", self.kind, self.parts.join(", "))
    }
}
