//! Build environments
//!
//! A [`Target`] is what actions run against: the host itself or a working
//! container. Both expose the same primitives and only differ in how users
//! and paths are translated.

mod container;
mod localhost;

pub use container::{Container, ImageCommit};
pub use localhost::Localhost;

use crate::error::StrataResult;
use crate::process::{Exec, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Primitives available to actions
#[async_trait]
pub trait Target: Send + Sync {
    /// Output prefix and result label
    fn label(&self) -> &str;

    fn runner(&self) -> &ProcessRunner;

    /// Host path of a path on the target
    fn path(&self, path: &Path) -> PathBuf;

    /// Run a command; nonzero exit fails unless `exec.raises` is off
    async fn exec(&self, exec: Exec) -> StrataResult<ProcessOutput>;

    /// Bind-mount a host directory at `guest`
    async fn mount(&self, host: &Path, guest: &Path) -> StrataResult<()>;

    /// Copy host paths to `dest` on the target
    async fn copy(&self, sources: &[PathBuf], dest: &Path) -> StrataResult<()>;

    /// Create directories, skipping those already created during this run
    async fn mkdir(&self, paths: &[PathBuf]) -> StrataResult<()>;
}

/// Directories created during one run
#[derive(Debug, Default)]
pub(crate) struct CreatedDirs {
    paths: Mutex<HashSet<PathBuf>>,
}

impl CreatedDirs {
    /// Paths of `paths` not created yet, in order, without duplicates
    pub(crate) fn pending(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let created = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        let mut pending: Vec<PathBuf> = Vec::new();
        for path in paths {
            if !created.contains(path) && !pending.contains(path) {
                pending.push(path.clone());
            }
        }
        pending
    }

    pub(crate) fn mark(&self, paths: &[PathBuf]) {
        let mut created = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        created.extend(paths.iter().cloned());
    }
}

/// `mkdir -p` argument vector
pub(crate) fn mkdir_args(paths: &[PathBuf]) -> Vec<String> {
    let mut args = vec!["mkdir".to_string(), "-p".to_string()];
    args.extend(paths.iter().map(|p| p.display().to_string()));
    args
}

/// `cp -a` argument vector
pub(crate) fn copy_args(sources: &[PathBuf], dest: &Path) -> Vec<String> {
    let mut args = vec!["cp".to_string(), "-a".to_string()];
    args.extend(sources.iter().map(|p| p.display().to_string()));
    args.push(dest.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_skips_created_and_duplicates() {
        let dirs = CreatedDirs::default();
        dirs.mark(&[PathBuf::from("/a")]);
        let pending = dirs.pending(&["/a".into(), "/b".into(), "/b".into(), "/c".into()]);
        assert_eq!(pending, vec![PathBuf::from("/b"), PathBuf::from("/c")]);
    }

    #[test]
    fn argument_vectors() {
        assert_eq!(mkdir_args(&["/x".into()]), vec!["mkdir", "-p", "/x"]);
        assert_eq!(
            copy_args(&["a".into(), "b".into()], Path::new("/dst")),
            vec!["cp", "-a", "a", "b", "/dst"]
        );
    }
}
