//! The host as a build target

use crate::error::StrataResult;
use crate::process::{Exec, ProcessOutput, ProcessRunner};
use crate::target::{copy_args, mkdir_args, CreatedDirs, Target};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Runs everything directly on this machine
pub struct Localhost {
    label: String,
    runner: ProcessRunner,
    dirs: CreatedDirs,
    mounts: Mutex<Vec<PathBuf>>,
}

impl Localhost {
    pub fn new(runner: ProcessRunner) -> Self {
        Self::with_label("localhost", runner)
    }

    pub fn with_label(label: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            label: label.into(),
            runner,
            dirs: CreatedDirs::default(),
            mounts: Mutex::new(Vec::new()),
        }
    }

    /// Undo the bind mounts made during the run, newest first
    ///
    /// Every mount is attempted; the first error is returned.
    pub async fn release(&self) -> StrataResult<()> {
        let mounts = std::mem::take(&mut *self.mounts.lock().unwrap_or_else(|p| p.into_inner()));
        let mut failure = None;
        for mountpoint in mounts.iter().rev() {
            let exec = Exec::new(["umount".to_string(), mountpoint.display().to_string()]);
            if let Err(e) = self.exec(exec).await {
                warn!("Failed to unmount {}: {}", mountpoint.display(), e);
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Prepend `sudo` so the command runs as `user`
    fn with_user(args: Vec<String>, user: Option<&str>) -> Vec<String> {
        let mut argv = match user {
            None => return args,
            Some("root") => vec!["sudo".to_string()],
            Some(user) => vec!["sudo".to_string(), "-u".to_string(), user.to_string()],
        };
        argv.extend(args);
        argv
    }
}

#[async_trait]
impl Target for Localhost {
    fn label(&self) -> &str {
        &self.label
    }

    fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    fn path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    async fn exec(&self, exec: Exec) -> StrataResult<ProcessOutput> {
        let args = Self::with_user(exec.args.clone(), exec.user.as_deref());
        let mut exec = exec.with_args(args).user(None);
        if exec.prefix.is_none() {
            exec.prefix = Some(self.label.clone());
        }
        self.runner.run(&exec).await
    }

    async fn mount(&self, host: &Path, guest: &Path) -> StrataResult<()> {
        self.mkdir(&[host.to_path_buf(), guest.to_path_buf()]).await?;
        let exec = Exec::new([
            "mount".to_string(),
            "-o".to_string(),
            "bind".to_string(),
            host.display().to_string(),
            guest.display().to_string(),
        ]);
        self.exec(exec).await?;
        self.mounts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(guest.to_path_buf());
        Ok(())
    }

    async fn copy(&self, sources: &[PathBuf], dest: &Path) -> StrataResult<()> {
        self.exec(Exec::new(copy_args(sources, dest))).await?;
        Ok(())
    }

    async fn mkdir(&self, paths: &[PathBuf]) -> StrataResult<()> {
        let pending = self.dirs.pending(paths);
        if pending.is_empty() {
            return Ok(());
        }
        self.exec(Exec::new(mkdir_args(&pending))).await?;
        self.dirs.mark(&pending);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CaptureBuffer, OutputRegistry};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn localhost() -> (Localhost, CaptureBuffer) {
        let (registry, buffer) = OutputRegistry::capture();
        (Localhost::new(ProcessRunner::new(Arc::new(registry))), buffer)
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn users_become_sudo() {
        assert_eq!(Localhost::with_user(args(&["id"]), None), args(&["id"]));
        assert_eq!(
            Localhost::with_user(args(&["id"]), Some("root")),
            args(&["sudo", "id"])
        );
        assert_eq!(
            Localhost::with_user(args(&["id"]), Some("app")),
            args(&["sudo", "-u", "app", "id"])
        );
    }

    #[tokio::test]
    async fn exec_is_prefixed_with_label() {
        let (host, buffer) = localhost();
        let output = host.exec(Exec::shell("echo hello")).await.unwrap();
        assert_eq!(output.stdout, "hello");
        assert!(buffer.lines().contains(&"localhost | hello".to_string()));
    }

    #[tokio::test]
    async fn mkdir_runs_once_per_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b");
        let (host, buffer) = localhost();

        host.mkdir(std::slice::from_ref(&path)).await.unwrap();
        host.mkdir(std::slice::from_ref(&path)).await.unwrap();

        assert!(path.is_dir());
        let echoes = buffer
            .lines()
            .into_iter()
            .filter(|l| l.contains("+ mkdir"))
            .count();
        assert_eq!(echoes, 1);
    }

    #[tokio::test]
    async fn copy_uses_host_paths() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.txt");
        std::fs::write(&source, "data").unwrap();
        let dest = dir.path().join("out.txt");
        let (host, _) = localhost();

        host.copy(&[source], &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "data");
        assert_eq!(host.path(Path::new("/etc")), PathBuf::from("/etc"));
    }
}
