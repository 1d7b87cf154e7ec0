//! Backend factory
//!
//! Picks the backend named in configuration, or the stub for dry runs.

use crate::backend::{Backend, BuildahBackend, StubBackend};
use crate::config::Config;
use crate::error::{StrataError, StrataResult};
use crate::process::ProcessRunner;
use std::str::FromStr;
use std::sync::Arc;

/// Available backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Buildah,
    Stub,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Buildah => "buildah",
            Self::Stub => "stub",
        }
    }
}

impl FromStr for BackendKind {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buildah" => Ok(Self::Buildah),
            "stub" => Ok(Self::Stub),
            other => Err(StrataError::User(format!(
                "unknown backend {other:?} (expected buildah or stub)"
            ))),
        }
    }
}

/// Create the backend for one build, labeling its commands with `prefix`
pub fn create_backend(
    config: &Config,
    runner: &ProcessRunner,
    prefix: &str,
    dry_run: bool,
) -> StrataResult<Arc<dyn Backend>> {
    let kind = if dry_run {
        BackendKind::Stub
    } else {
        config.build.backend.parse()?
    };

    Ok(match kind {
        BackendKind::Buildah => Arc::new(BuildahBackend::new(runner.clone(), prefix)),
        BackendKind::Stub => Arc::new(StubBackend::new().with_registry(runner.registry().clone())),
    })
}
