//! Working containers
//!
//! [`Container::acquire`] creates and mounts a working container; consuming
//! [`Container::release`] tears it down, so every acquired container is
//! released at most once.

use crate::action::Status;
use crate::backend::Backend;
use crate::error::{StrataError, StrataResult};
use crate::image::{ImageFormat, ImageRef};
use crate::process::{Exec, ProcessOutput, ProcessRunner};
use crate::target::{copy_args, mkdir_args, CreatedDirs, Target};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Final image produced by a successful build
#[derive(Debug, Clone)]
pub struct ImageCommit {
    pub image: ImageRef,
    pub format: ImageFormat,
}

impl ImageCommit {
    pub fn new(image: ImageRef, format: ImageFormat) -> Self {
        Self { image, format }
    }
}

/// A mounted working container
pub struct Container {
    label: String,
    runner: ProcessRunner,
    backend: Arc<dyn Backend>,
    handle: String,
    root: PathBuf,
    mounts: Mutex<Vec<PathBuf>>,
    dirs: CreatedDirs,
}

impl Container {
    /// Create a working container from `base` and mount its filesystem
    ///
    /// A container that was created but cannot be mounted is removed again.
    pub async fn acquire(
        backend: Arc<dyn Backend>,
        base: &str,
        label: impl Into<String>,
        runner: ProcessRunner,
    ) -> StrataResult<Self> {
        let handle = backend
            .create(base)
            .await
            .map_err(|e| acquisition_error(format!("container from {base}"), e))?;

        let root = match backend.mount_root(&handle).await {
            Ok(root) => root,
            Err(e) => {
                if let Err(cleanup) = backend.remove(&handle).await {
                    warn!("Failed to remove container {}: {}", handle, cleanup);
                }
                return Err(acquisition_error(format!("root of {handle}"), e));
            }
        };
        debug!("Container {} from {} mounted at {}", handle, base, root.display());

        Ok(Self {
            label: label.into(),
            runner,
            backend,
            handle,
            root,
            mounts: Mutex::new(Vec::new()),
            dirs: CreatedDirs::default(),
        })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Commit the current state as an intermediate layer
    pub async fn commit_layer(&self, name: &str, format: ImageFormat) -> StrataResult<String> {
        self.backend.commit(&self.handle, Some(name), format).await
    }

    async fn host(&self, args: Vec<String>) -> StrataResult<ProcessOutput> {
        let exec = Exec::new(args).prefix(self.label.clone());
        self.backend.host_exec(&exec).await
    }

    /// Tear the container down
    ///
    /// Bind mounts are undone in reverse order, then the root. The final
    /// image is committed and tagged only when `status` is a success. The
    /// container is removed in every case. Returns the committed image id.
    pub async fn release(
        self,
        status: Status,
        commit: Option<&ImageCommit>,
    ) -> StrataResult<Option<String>> {
        let mut failure: Option<StrataError> = None;

        let mounts = std::mem::take(&mut *self.mounts.lock().unwrap_or_else(|p| p.into_inner()));
        for mountpoint in mounts.iter().rev() {
            let result = self.backend.unmount(mountpoint).await;
            note(&mut failure, "unmount", &mountpoint.display().to_string(), result);
        }
        let result = self.backend.unmount_root(&self.handle).await;
        note(&mut failure, "unmount", &self.handle, result);

        let mut image_id = None;
        if let (Status::Success, Some(commit)) = (status, commit) {
            match self.commit_final(commit).await {
                Ok(id) => image_id = Some(id),
                Err(e) => note(&mut failure, "commit", &self.handle, Err(e)),
            }
        }

        let result = self.backend.remove(&self.handle).await;
        note(&mut failure, "remove", &self.handle, result);

        match failure {
            Some(err) => Err(err),
            None => Ok(image_id),
        }
    }

    async fn commit_final(&self, commit: &ImageCommit) -> StrataResult<String> {
        let id = self.backend.commit(&self.handle, None, commit.format).await?;
        for tag in commit.image.full_tags() {
            self.backend.tag(&id, &tag).await?;
        }
        Ok(id)
    }
}

/// Keep the first teardown error and log every one
fn note(failure: &mut Option<StrataError>, what: &str, subject: &str, result: StrataResult<()>) {
    if let Err(e) = result {
        warn!("Failed to {} {}: {}", what, subject, e);
        failure.get_or_insert(e);
    }
}

fn acquisition_error(resource: String, err: StrataError) -> StrataError {
    match err {
        StrataError::PrivilegeEscalationRequired { .. } | StrataError::BackendUnavailable { .. } => {
            err
        }
        other => StrataError::acquisition(resource, other.to_string()),
    }
}

#[async_trait]
impl Target for Container {
    fn label(&self) -> &str {
        &self.label
    }

    fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    fn path(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    async fn exec(&self, exec: Exec) -> StrataResult<ProcessOutput> {
        let mut exec = exec;
        if exec.prefix.is_none() {
            exec.prefix = Some(self.label.clone());
        }
        if self.runner.is_quiet() {
            exec.quiet = true;
        }
        self.backend.exec_in(&self.handle, &exec).await
    }

    async fn mount(&self, host: &Path, guest: &Path) -> StrataResult<()> {
        let mountpoint = self.path(guest);
        self.mkdir_host(&[host.to_path_buf(), mountpoint.clone()])
            .await?;
        self.backend.mount(host, &mountpoint).await?;
        self.mounts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(mountpoint);
        Ok(())
    }

    async fn copy(&self, sources: &[PathBuf], dest: &Path) -> StrataResult<()> {
        self.host(copy_args(sources, &self.path(dest))).await?;
        Ok(())
    }

    async fn mkdir(&self, paths: &[PathBuf]) -> StrataResult<()> {
        let translated: Vec<PathBuf> = paths.iter().map(|p| self.path(p)).collect();
        self.mkdir_host(&translated).await
    }
}

impl Container {
    async fn mkdir_host(&self, host_paths: &[PathBuf]) -> StrataResult<()> {
        let pending = self.dirs.pending(host_paths);
        if pending.is_empty() {
            return Ok(());
        }
        self.host(mkdir_args(&pending)).await?;
        self.dirs.mark(&pending);
        Ok(())
    }
}
