//! In-memory backend
//!
//! Keeps a set of image names and records every call instead of touching
//! the filesystem. Used for `--dry-run` and throughout the test suite.

use crate::backend::Backend;
use crate::error::{StrataError, StrataResult};
use crate::image::ImageFormat;
use crate::process::{Exec, OutputRegistry, ProcessOutput};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// How a stubbed image listing should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFailure {
    /// Backend cannot be reached
    Unavailable,
    /// Backend answered with an error
    Fatal,
}

#[derive(Debug, Default)]
struct StubState {
    images: BTreeSet<String>,
    calls: Vec<String>,
    containers: usize,
    commits: usize,
    failing_scripts: Vec<String>,
    failing_operations: Vec<String>,
    list_failure: Option<ListFailure>,
}

/// Backend that only pretends
#[derive(Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
    registry: Option<Arc<OutputRegistry>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo would-be container commands through `registry`
    pub fn with_registry(mut self, registry: Arc<OutputRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Seed existing images
    pub fn with_images<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().images.extend(names.into_iter().map(Into::into));
        self
    }

    /// Commands whose display contains `needle` exit with status 1
    pub fn fail_on(self, needle: impl Into<String>) -> Self {
        self.state().failing_scripts.push(needle.into());
        self
    }

    /// Make a backend operation (`create`, `mount_root`, `commit`, ...) fail
    pub fn fail_operation(self, operation: impl Into<String>) -> Self {
        self.state().failing_operations.push(operation.into());
        self
    }

    /// Make image listing fail
    pub fn fail_listing(self, failure: ListFailure) -> Self {
        self.state().list_failure = Some(failure);
        self
    }

    pub fn images(&self) -> Vec<String> {
        self.state().images.iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of commits performed
    pub fn commits(&self) -> usize {
        self.state().commits
    }

    /// Recorded calls starting with `operation`
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(operation))
            .cloned()
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, operation: &str, detail: impl AsRef<str>) -> StrataResult<()> {
        let mut state = self.state();
        let detail = detail.as_ref();
        let call = if detail.is_empty() {
            operation.to_string()
        } else {
            format!("{} {}", operation, detail)
        };
        state.calls.push(call.clone());
        if state.failing_operations.iter().any(|op| op == operation) {
            return Err(StrataError::CommandFailure {
                command: format!("stub {}", call),
                code: 125,
                stdout: String::new(),
                stderr: format!("stub {} failure", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn create(&self, base: &str) -> StrataResult<String> {
        self.record("create", base)?;
        let mut state = self.state();
        state.containers += 1;
        Ok(format!("stub-ctr-{}", state.containers))
    }

    async fn mount_root(&self, handle: &str) -> StrataResult<PathBuf> {
        self.record("mount_root", handle)?;
        Ok(PathBuf::from("/stub").join(handle))
    }

    async fn unmount_root(&self, handle: &str) -> StrataResult<()> {
        self.record("unmount_root", handle)
    }

    async fn exec_in(&self, handle: &str, exec: &Exec) -> StrataResult<ProcessOutput> {
        let command = exec.display();
        self.record("exec", format!("{} {}", handle, command))?;

        if let Some(registry) = &self.registry {
            if !exec.quiet {
                registry.command(exec.prefix.as_deref(), &command);
            }
        }

        let fails = self
            .state()
            .failing_scripts
            .iter()
            .any(|needle| command.contains(needle.as_str()));
        let output = ProcessOutput {
            command,
            exit_code: i32::from(fails),
            ..Default::default()
        };
        if fails && exec.raises {
            return Err(StrataError::CommandFailure {
                command: output.command,
                code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    async fn commit(
        &self,
        handle: &str,
        name: Option<&str>,
        format: ImageFormat,
    ) -> StrataResult<String> {
        self.record(
            "commit",
            format!("{} {} {}", handle, format, name.unwrap_or("-")),
        )?;
        let mut state = self.state();
        state.commits += 1;
        let id = format!("sha256-stub-{}", state.commits);
        state.images.insert(name.map(str::to_string).unwrap_or_else(|| id.clone()));
        Ok(id)
    }

    async fn tag(&self, image: &str, tag: &str) -> StrataResult<()> {
        self.record("tag", format!("{} {}", image, tag))?;
        self.state().images.insert(tag.to_string());
        Ok(())
    }

    async fn list_images(&self, name_prefix: &str) -> StrataResult<Vec<String>> {
        self.record("list", name_prefix)?;
        let state = self.state();
        match state.list_failure {
            Some(ListFailure::Unavailable) => Err(StrataError::BackendUnavailable {
                backend: "stub".to_string(),
                reason: "connection refused".to_string(),
            }),
            Some(ListFailure::Fatal) => Err(StrataError::cache_backend(
                "listing",
                "storage is corrupted",
            )),
            None => Ok(state
                .images
                .iter()
                .filter(|name| name.starts_with(name_prefix))
                .cloned()
                .collect()),
        }
    }

    async fn remove_images(&self, names: &[String]) -> StrataResult<()> {
        self.record("rmi", names.join(" "))?;
        let mut state = self.state();
        for name in names {
            state.images.remove(name);
        }
        Ok(())
    }

    async fn host_exec(&self, exec: &Exec) -> StrataResult<ProcessOutput> {
        let command = exec.display();
        self.record("host", &command)?;
        if let Some(registry) = &self.registry {
            if !exec.quiet {
                registry.command(exec.prefix.as_deref(), &command);
            }
        }
        Ok(ProcessOutput {
            command,
            ..Default::default()
        })
    }

    async fn mount(&self, source: &Path, mountpoint: &Path) -> StrataResult<()> {
        self.record(
            "mount",
            format!("{} {}", source.display(), mountpoint.display()),
        )
    }

    async fn unmount(&self, mountpoint: &Path) -> StrataResult<()> {
        self.record("unmount", mountpoint.display().to_string())
    }

    async fn remove(&self, handle: &str) -> StrataResult<()> {
        self.record("remove", handle)
    }
}
