//! Filesystem backends
//!
//! The build core never shells out to a container tool directly; it talks to
//! a [`Backend`]:
//! - `buildah`: real working containers and committed images
//! - `stub`: in-memory, records every call (dry runs and tests)

mod buildah;
mod factory;
mod stub;

pub use buildah::BuildahBackend;
pub use factory::{create_backend, BackendKind};
pub use stub::{ListFailure, StubBackend};

use crate::error::StrataResult;
use crate::image::ImageFormat;
use crate::process::{Exec, ProcessOutput};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Contract consumed from a container filesystem tool
///
/// Handles are opaque working-container identifiers returned by `create`.
/// Image names are reported without the implicit `localhost/` registry.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &'static str;

    /// Whether the backend needs root (or a user namespace) to mount filesystems
    fn requires_privileges(&self) -> bool {
        false
    }

    /// Instantiate a working container from `base`
    async fn create(&self, base: &str) -> StrataResult<String>;

    /// Mount the container filesystem on the host, returning its root
    async fn mount_root(&self, handle: &str) -> StrataResult<PathBuf>;

    /// Unmount the container filesystem
    async fn unmount_root(&self, handle: &str) -> StrataResult<()>;

    /// Run a command inside the container
    async fn exec_in(&self, handle: &str, exec: &Exec) -> StrataResult<ProcessOutput>;

    /// Commit the container state, optionally naming the image; returns the image id
    async fn commit(&self, handle: &str, name: Option<&str>, format: ImageFormat)
        -> StrataResult<String>;

    /// Add a name to an existing image
    async fn tag(&self, image: &str, tag: &str) -> StrataResult<()>;

    /// Names of all images starting with `name_prefix`
    async fn list_images(&self, name_prefix: &str) -> StrataResult<Vec<String>>;

    /// Remove images by name; names that no longer exist are ignored
    async fn remove_images(&self, names: &[String]) -> StrataResult<()>;

    /// Run a command on the host side of the backend (mkdir, cp, mount under the root)
    async fn host_exec(&self, exec: &Exec) -> StrataResult<ProcessOutput>;

    /// Bind-mount a host directory at `mountpoint` (a host path under the container root)
    async fn mount(&self, source: &Path, mountpoint: &Path) -> StrataResult<()> {
        let exec = Exec::new([
            "mount".to_string(),
            "-o".to_string(),
            "bind".to_string(),
            source.display().to_string(),
            mountpoint.display().to_string(),
        ]);
        self.host_exec(&exec).await?;
        Ok(())
    }

    /// Undo a bind mount
    async fn unmount(&self, mountpoint: &Path) -> StrataResult<()> {
        let exec = Exec::new(["umount".to_string(), mountpoint.display().to_string()]);
        self.host_exec(&exec).await?;
        Ok(())
    }

    /// Remove the working container
    async fn remove(&self, handle: &str) -> StrataResult<()>;
}

/// Whether the current process has an effective uid of 0
///
/// Inside `buildah unshare` this is true for the mapped user.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
