//! Buildah backend
//!
//! Drives the `buildah` CLI through the shared [`ProcessRunner`] so its
//! output is prefixed like every other command of the build.

use crate::backend::Backend;
use crate::error::{StrataError, StrataResult};
use crate::image::{normalize_name, ImageFormat};
use crate::process::{Exec, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Messages buildah prints when an image is already gone
const MISSING_IMAGE_MESSAGES: [&str; 3] = ["image not known", "no such image", "not found"];

#[derive(Debug, Deserialize)]
struct ImageEntry {
    #[serde(default)]
    names: Option<Vec<String>>,
}

/// Backend using rootless buildah
pub struct BuildahBackend {
    runner: ProcessRunner,
    prefix: String,
    program: String,
}

impl BuildahBackend {
    /// Create a buildah backend whose commands are labeled with `prefix`
    pub fn new(runner: ProcessRunner, prefix: impl Into<String>) -> Self {
        Self {
            runner,
            prefix: prefix.into(),
            program: "buildah".to_string(),
        }
    }

    /// Use a different buildah executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command<I, S>(&self, args: I) -> Exec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![self.program.clone()];
        argv.extend(args.into_iter().map(Into::into));
        Exec::new(argv).prefix(self.prefix.clone())
    }

    async fn run(&self, exec: Exec) -> StrataResult<ProcessOutput> {
        self.runner.run(&exec).await.map_err(|e| self.unavailable(e))
    }

    /// A missing executable means the backend is unreachable, not a failed build
    fn unavailable(&self, err: StrataError) -> StrataError {
        match err {
            StrataError::CommandSpawn { command, source }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                StrataError::BackendUnavailable {
                    backend: self.program.clone(),
                    reason: format!("{}: {}", command, source),
                }
            }
            other => other,
        }
    }

    fn last_line(output: &ProcessOutput) -> String {
        output
            .stdout
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn parse_images(stdout: &str, name_prefix: &str) -> StrataResult<Vec<String>> {
        let stdout = stdout.trim();
        if stdout.is_empty() || stdout == "null" {
            return Ok(Vec::new());
        }
        let entries: Vec<ImageEntry> = serde_json::from_str(stdout)
            .map_err(|e| StrataError::cache_backend("listing", format!("unreadable image list: {e}")))?;

        let mut names: Vec<String> = entries
            .into_iter()
            .flat_map(|entry| entry.names.unwrap_or_default())
            .map(|name| normalize_name(&name).to_string())
            .filter(|name| name.starts_with(name_prefix))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[async_trait]
impl Backend for BuildahBackend {
    fn name(&self) -> &'static str {
        "buildah"
    }

    fn requires_privileges(&self) -> bool {
        true
    }

    async fn create(&self, base: &str) -> StrataResult<String> {
        let output = self.run(self.command(["from", base])).await?;
        Ok(Self::last_line(&output))
    }

    async fn mount_root(&self, handle: &str) -> StrataResult<PathBuf> {
        let output = self.run(self.command(["mount", handle])).await?;
        Ok(PathBuf::from(Self::last_line(&output)))
    }

    async fn unmount_root(&self, handle: &str) -> StrataResult<()> {
        self.run(self.command(["umount", handle])).await?;
        Ok(())
    }

    async fn exec_in(&self, handle: &str, exec: &Exec) -> StrataResult<ProcessOutput> {
        let mut args = vec![self.program.clone(), "run".to_string()];
        if let Some(user) = &exec.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        args.push(handle.to_string());
        args.push("--".to_string());
        args.extend(exec.args.iter().cloned());

        let mut wrapped = exec.clone().with_args(args).user(None);
        if wrapped.prefix.is_none() {
            wrapped.prefix = Some(self.prefix.clone());
        }
        self.run(wrapped).await
    }

    async fn commit(
        &self,
        handle: &str,
        name: Option<&str>,
        format: ImageFormat,
    ) -> StrataResult<String> {
        let mut args = vec![
            "commit".to_string(),
            "--quiet".to_string(),
            format!("--format={}", format),
            handle.to_string(),
        ];
        if let Some(name) = name {
            args.push(name.to_string());
        }
        let output = self.run(self.command(args)).await?;
        Ok(Self::last_line(&output))
    }

    async fn tag(&self, image: &str, tag: &str) -> StrataResult<()> {
        self.run(self.command(["tag", image, tag])).await?;
        Ok(())
    }

    async fn list_images(&self, name_prefix: &str) -> StrataResult<Vec<String>> {
        let output = self
            .run(self.command(["images", "--json"]).quiet(true))
            .await
            .map_err(|e| match e {
                StrataError::CommandFailure { stderr, code, .. } => StrataError::cache_backend(
                    "listing",
                    format!("buildah images exited with {code}: {stderr}"),
                ),
                other => other,
            })?;
        let names = Self::parse_images(&output.stdout, name_prefix)?;
        debug!("Found {} images under {}", names.len(), name_prefix);
        Ok(names)
    }

    async fn remove_images(&self, names: &[String]) -> StrataResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rmi".to_string()];
        args.extend(names.iter().cloned());
        let output = self.run(self.command(args).raises(false)).await?;

        if output.success() {
            return Ok(());
        }
        let stderr = output.stderr.to_lowercase();
        if MISSING_IMAGE_MESSAGES.iter().any(|m| stderr.contains(m)) {
            debug!("Some layers were already removed: {}", output.stderr);
            return Ok(());
        }
        Err(StrataError::cache_backend(
            "removal",
            format!("buildah rmi exited with {}: {}", output.exit_code, output.stderr),
        ))
    }

    async fn host_exec(&self, exec: &Exec) -> StrataResult<ProcessOutput> {
        let mut exec = exec.clone();
        if exec.prefix.is_none() {
            exec.prefix = Some(self.prefix.clone());
        }
        self.runner.run(&exec).await
    }

    async fn remove(&self, handle: &str) -> StrataResult<()> {
        self.run(self.command(["rm", handle])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::OutputRegistry;
    use std::sync::Arc;

    fn backend(program: &str) -> BuildahBackend {
        let (registry, _) = OutputRegistry::capture();
        BuildahBackend::new(ProcessRunner::new(Arc::new(registry)), "app").with_program(program)
    }

    #[test]
    fn parse_images_filters_and_normalizes() {
        let json = r#"[
            {"names": ["localhost/app:layer-b", "localhost/app:latest"]},
            {"names": null},
            {"names": ["localhost/app:layer-a", "localhost/other:layer-c"]}
        ]"#;
        let names = BuildahBackend::parse_images(json, "app:layer-").unwrap();
        assert_eq!(names, vec!["app:layer-a", "app:layer-b"]);
    }

    #[test]
    fn parse_images_accepts_empty_output() {
        assert!(BuildahBackend::parse_images("", "x").unwrap().is_empty());
        assert!(BuildahBackend::parse_images("null", "x").unwrap().is_empty());
    }

    #[test]
    fn parse_images_rejects_garbage() {
        let err = BuildahBackend::parse_images("{not json", "x").unwrap_err();
        assert!(matches!(err, StrataError::CacheBackend { .. }));
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let err = backend("strata-no-such-buildah")
            .list_images("app:layer-")
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn failing_listing_is_fatal() {
        // `false images --json` exits 1
        let err = backend("false").list_images("app:layer-").await.unwrap_err();
        assert!(matches!(err, StrataError::CacheBackend { .. }));
    }

    #[test]
    fn backend_requires_privileges() {
        assert!(backend("buildah").requires_privileges());
        assert_eq!(backend("buildah").name(), "buildah");
    }
}
