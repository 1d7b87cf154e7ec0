//! Buildfile parsing
//!
//! A `strata.toml` lists one or more `[[build]]` entries, each with a target
//! and an ordered list of `[[build.steps]]`.

use crate::action::{ActionRef, Copy, Mkdir, Mount, Run, User, WriteFile};
use crate::backend::create_backend;
use crate::config::Config;
use crate::error::{StrataError, StrataResult};
use crate::image::{ImageFormat, ImageRef};
use crate::pipeline::{Build, Parallel};
use crate::process::{Expect, ProcessRunner};
use crate::target::ImageCommit;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Parsed `strata.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Buildfile {
    /// Independent builds, run concurrently
    #[serde(rename = "build", default)]
    pub builds: Vec<BuildSpec>,

    /// File the builds were read from; relative paths resolve against its directory
    #[serde(skip)]
    pub path: PathBuf,
}

/// Where a build runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Container,
    Localhost,
}

/// One `[[build]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    /// Output prefix; defaults to the commit repository or the base image
    pub name: Option<String>,

    #[serde(default)]
    pub target: TargetKind,

    /// Base image of a container build
    pub base: Option<String>,

    /// `repository[:tag[,tag...]]` to commit the result as
    pub commit: Option<String>,

    /// Commit format; defaults to the configured one
    pub format: Option<ImageFormat>,

    /// Bind mounts held for the whole build
    #[serde(default)]
    pub mounts: Vec<MountSpec>,

    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    pub host: PathBuf,
    pub guest: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSpec {
    pub name: String,
    pub home: PathBuf,
    pub uid: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteSpec {
    pub path: PathBuf,
    pub content: String,
}

/// One `[[build.steps]]` entry, recognized by its key
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Run(RunSpec),
    Copy(CopySpec),
    Mkdir(MkdirSpec),
    Mount(MountStep),
    User(UserStep),
    Write(WriteStep),
    Parallel(ParallelStep),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
    pub run: String,
    pub user: Option<String>,
    #[serde(default)]
    pub quiet: bool,
    /// `[pattern, reply]` pairs
    #[serde(default)]
    pub expect: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySpec {
    /// Sources followed by the destination
    pub copy: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MkdirSpec {
    pub mkdir: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountStep {
    pub mount: MountSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserStep {
    pub user: UserSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteStep {
    pub write: WriteSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelStep {
    pub parallel: Vec<StepSpec>,
}

impl BuildSpec {
    /// Display name of the build
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(commit) = &self.commit {
            return ImageRef::parse(commit).repository().to_string();
        }
        match (&self.target, &self.base) {
            (TargetKind::Container, Some(base)) => base.clone(),
            _ => "localhost".to_string(),
        }
    }
}

impl Buildfile {
    /// Read and validate a buildfile from disk
    pub async fn load(path: &Path) -> StrataResult<Self> {
        if !path.is_file() {
            return Err(StrataError::BuildfileNotFound(path.to_path_buf()));
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StrataError::io(format!("reading buildfile {}", path.display()), e))?;
        Self::parse(&content, path)
    }

    /// Parse and validate buildfile contents attributed to `path`
    pub fn parse(content: &str, path: &Path) -> StrataResult<Self> {
        let mut buildfile: Self = toml::from_str(content).map_err(|e| invalid(path, e))?;
        buildfile.path = path.to_path_buf();
        buildfile.validate()?;
        debug!("Parsed {} builds from {}", buildfile.builds.len(), path.display());
        Ok(buildfile)
    }

    fn validate(&self) -> StrataResult<()> {
        if self.builds.is_empty() {
            return Err(invalid(&self.path, "no [[build]] entries"));
        }
        let mut seen = std::collections::HashSet::new();
        let mut repositories = std::collections::HashMap::new();
        for spec in &self.builds {
            let name = spec.display_name();
            if !seen.insert(name.clone()) {
                return Err(invalid(&self.path, format!("duplicate build name {name:?}")));
            }
            // Layers live under the commit repository; a shared one would be pruned as stale
            if let Some(commit) = &spec.commit {
                let repository = ImageRef::parse(commit).repository().to_string();
                if let Some(other) = repositories.insert(repository.clone(), name.clone()) {
                    return Err(invalid(
                        &self.path,
                        format!("builds {other:?} and {name:?} both commit to {repository:?}"),
                    ));
                }
            }
            match spec.target {
                TargetKind::Container if spec.base.is_none() => {
                    return Err(invalid(&self.path, format!("build {name:?} has no base image")));
                }
                TargetKind::Localhost if spec.commit.is_some() => {
                    return Err(invalid(
                        &self.path,
                        format!("localhost build {name:?} cannot commit an image"),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Names of every build, in declaration order
    pub fn names(&self) -> Vec<String> {
        self.builds.iter().map(BuildSpec::display_name).collect()
    }

    /// Turn the entries into runnable builds, restricted to `only` when given
    pub fn builds(
        &self,
        config: &Config,
        runner: &ProcessRunner,
        dry_run: bool,
        only: Option<&str>,
    ) -> StrataResult<Vec<Build>> {
        if let Some(only) = only {
            if !self.names().iter().any(|n| n == only) {
                return Err(StrataError::UnknownBuild(only.to_string()));
            }
        }

        let default_format: ImageFormat = config.build.format.parse()?;
        self.builds
            .iter()
            .filter(|spec| only.is_none_or(|only| spec.display_name() == only))
            .map(|spec| self.build(spec, config, runner, dry_run, default_format))
            .collect()
    }

    fn build(
        &self,
        spec: &BuildSpec,
        config: &Config,
        runner: &ProcessRunner,
        dry_run: bool,
        default_format: ImageFormat,
    ) -> StrataResult<Build> {
        let name = spec.display_name();
        let steps = spec
            .steps
            .iter()
            .map(|step| self.action(step))
            .collect::<StrataResult<Vec<_>>>()?;
        let backend = create_backend(config, runner, &name, dry_run)?;

        let mut build = match (&spec.target, &spec.base) {
            (TargetKind::Container, Some(base)) => Build::container(&name, base, steps, backend),
            (TargetKind::Container, None) => {
                return Err(invalid(&self.path, format!("build {name:?} has no base image")));
            }
            (TargetKind::Localhost, _) if dry_run => {
                return Err(StrataError::User(format!(
                    "localhost build {name:?} runs on this machine and cannot be dry-run"
                )));
            }
            (TargetKind::Localhost, _) => Build::localhost(&name, steps, backend),
        };

        if let Some(commit) = &spec.commit {
            let format = spec.format.unwrap_or(default_format);
            build = build.commit(ImageCommit::new(ImageRef::parse(commit), format));
        }
        for mount in &spec.mounts {
            build = build.mount(self.resolve(&mount.host), &mount.guest);
        }
        Ok(build)
    }

    fn action(&self, step: &StepSpec) -> StrataResult<ActionRef> {
        Ok(match step {
            StepSpec::Run(run) => {
                let expects = run
                    .expect
                    .iter()
                    .map(|(pattern, reply)| Expect::new(pattern, reply.clone()))
                    .collect::<StrataResult<Vec<_>>>()
                    .map_err(|e| invalid(&self.path, e))?;
                let mut action = Run::new(&run.run).quiet(run.quiet).expecting(expects);
                if let Some(user) = &run.user {
                    action = action.user(user);
                }
                Arc::new(action)
            }
            StepSpec::Copy(copy) => {
                let Some((dest, sources)) = copy.copy.split_last() else {
                    return Err(invalid(&self.path, "copy needs at least one source and a destination"));
                };
                if sources.is_empty() {
                    return Err(invalid(&self.path, "copy needs at least one source and a destination"));
                }
                let copy = Copy::new(sources.to_vec(), dest);
                match self.dir() {
                    Some(dir) => Arc::new(copy.relative_to(dir)),
                    None => Arc::new(copy),
                }
            }
            StepSpec::Mkdir(mkdir) => Arc::new(Mkdir::new(mkdir.mkdir.clone())),
            StepSpec::Mount(step) => {
                let mount = Mount::new(&step.mount.host, &step.mount.guest);
                match self.dir() {
                    Some(dir) => Arc::new(mount.relative_to(dir)),
                    None => Arc::new(mount),
                }
            }
            StepSpec::User(step) => {
                let user = &step.user;
                Arc::new(User::new(&user.name, &user.home, user.uid))
            }
            StepSpec::Write(step) => Arc::new(WriteFile::new(&step.write.path, &step.write.content)),
            StepSpec::Parallel(step) => {
                let branches = step
                    .parallel
                    .iter()
                    .map(|branch| self.action(branch))
                    .collect::<StrataResult<Vec<_>>>()?;
                Arc::new(Parallel::new(branches))
            }
        })
    }

    /// Directory relative host paths are declared against
    fn dir(&self) -> Option<&Path> {
        self.path.parent().filter(|dir| !dir.as_os_str().is_empty())
    }

    /// Host paths are relative to the buildfile's directory
    fn resolve(&self, path: &Path) -> PathBuf {
        match self.dir() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn invalid(path: &Path, reason: impl ToString) -> StrataError {
    StrataError::BuildfileInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::pipeline::BuildTarget;
    use crate::process::OutputRegistry;
    use tempfile::TempDir;

    const APP: &str = r#"
[[build]]
name = "app"
base = "alpine"
commit = "myapp:latest,v1"
format = "docker"

[[build.mounts]]
host = "/var/cache/apk"
guest = "/var/cache/apk"

[[build.steps]]
run = "apk add curl"
user = "root"
expect = [["password:", "secret\n"]]

[[build.steps]]
copy = ["src", "Cargo.toml", "/app"]

[[build.steps]]
mkdir = ["/app/data"]

[[build.steps]]
user = { name = "app", home = "/app", uid = 1000 }

[[build.steps]]
write = { path = "/etc/motd", content = "hello" }

[[build.steps]]
parallel = [{ run = "make a" }, { run = "make b" }]
"#;

    fn runner() -> ProcessRunner {
        let (registry, _) = OutputRegistry::capture();
        ProcessRunner::new(Arc::new(registry))
    }

    fn parse(content: &str) -> StrataResult<Buildfile> {
        Buildfile::parse(content, Path::new("/work/strata.toml"))
    }

    #[test]
    fn parse_every_step_kind() {
        let buildfile = parse(APP).unwrap();
        let spec = &buildfile.builds[0];
        assert_eq!(spec.steps.len(), 6);
        assert!(matches!(spec.steps[0], StepSpec::Run(_)));
        assert!(matches!(spec.steps[1], StepSpec::Copy(_)));
        assert!(matches!(spec.steps[2], StepSpec::Mkdir(_)));
        assert!(matches!(spec.steps[3], StepSpec::User(_)));
        assert!(matches!(spec.steps[4], StepSpec::Write(_)));
        assert!(matches!(spec.steps[5], StepSpec::Parallel(_)));
        assert_eq!(spec.format, Some(ImageFormat::Docker));
    }

    #[test]
    fn builds_carry_commit_and_steps() {
        let buildfile = parse(APP).unwrap();
        let builds = buildfile
            .builds(&Config::default(), &runner(), true, None)
            .unwrap();
        let build = &builds[0];

        assert_eq!(build.name(), "app");
        assert_eq!(
            build.target(),
            &BuildTarget::Container {
                base: "alpine".to_string()
            }
        );
        let commit = build.commit_target().unwrap();
        assert_eq!(commit.image.full_tags(), vec!["myapp:latest", "myapp:v1"]);
        assert_eq!(commit.format, ImageFormat::Docker);
        assert_eq!(build.backend().name(), "stub");

        let described: Vec<String> = build.steps().steps().iter().map(|s| s.describe()).collect();
        assert_eq!(described[0], "Run(apk add curl)");
        assert_eq!(described[5], "Parallel(2 branches)");
    }

    #[test]
    fn moving_the_project_keeps_copy_keys() {
        let key_at = |path: &str| {
            let buildfile = Buildfile::parse(APP, Path::new(path)).unwrap();
            let builds = buildfile
                .builds(&Config::default(), &runner(), true, None)
                .unwrap();
            builds[0].steps().steps()[1].cache_key()
        };
        let key = key_at("/work/strata.toml");
        assert_eq!(key, key_at("/elsewhere/strata.toml"));
        assert!(key.contains(r#""src""#), "{key}");
        assert!(!key.contains("/work"), "{key}");
    }

    #[test]
    fn name_defaults_to_commit_repository_then_base() {
        let buildfile = parse(
            r#"
[[build]]
base = "alpine"
commit = "registry:5000/web:v2"

[[build]]
base = "debian"
"#,
        )
        .unwrap();
        assert_eq!(buildfile.names(), vec!["registry:5000/web", "debian"]);
    }

    #[test]
    fn only_selects_one_build() {
        let buildfile = parse(
            r#"
[[build]]
name = "a"
base = "alpine"

[[build]]
name = "b"
base = "alpine"
"#,
        )
        .unwrap();
        let builds = buildfile
            .builds(&Config::default(), &runner(), true, Some("b"))
            .unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].name(), "b");

        let err = buildfile
            .builds(&Config::default(), &runner(), true, Some("c"))
            .unwrap_err();
        assert!(matches!(err, StrataError::UnknownBuild(name) if name == "c"));
    }

    #[test]
    fn container_build_needs_base() {
        let err = parse("[[build]]\nname = \"x\"\n").unwrap_err();
        assert!(matches!(err, StrataError::BuildfileInvalid { .. }));
    }

    #[test]
    fn localhost_build_cannot_commit() {
        let err = parse("[[build]]\ntarget = \"localhost\"\ncommit = \"x:y\"\n").unwrap_err();
        assert!(matches!(err, StrataError::BuildfileInvalid { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = parse("[[build]]\nbase = \"alpine\"\n[[build]]\nbase = \"alpine\"\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn builds_sharing_a_repository_are_rejected() {
        let err = parse(
            r#"
[[build]]
name = "dev"
base = "alpine"
commit = "app:dev"

[[build]]
name = "prod"
base = "alpine"
commit = "app:prod"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, StrataError::BuildfileInvalid { .. }));
        assert!(err.to_string().contains("both commit to \"app\""), "{err}");

        parse("[[build]]\nbase = \"alpine\"\ncommit = \"app:dev\"\n[[build]]\nbase = \"debian\"\ncommit = \"app-prod:v1\"\n")
            .unwrap();
    }

    #[test]
    fn unknown_step_is_rejected() {
        let err = parse("[[build]]\nbase = \"alpine\"\n[[build.steps]]\nfrobnicate = 1\n").unwrap_err();
        assert!(matches!(err, StrataError::BuildfileInvalid { .. }));
    }

    #[test]
    fn empty_buildfile_is_rejected() {
        assert!(parse("").is_err());
    }

    #[test]
    fn copy_without_destination_is_rejected() {
        let buildfile =
            parse("[[build]]\nbase = \"alpine\"\n[[build.steps]]\ncopy = [\"/app\"]\n").unwrap();
        let err = buildfile
            .builds(&Config::default(), &runner(), true, None)
            .unwrap_err();
        assert!(matches!(err, StrataError::BuildfileInvalid { .. }));
    }

    #[test]
    fn invalid_expect_pattern_is_rejected() {
        let buildfile = parse(
            "[[build]]\nbase = \"alpine\"\n[[build.steps]]\nrun = \"login\"\nexpect = [[\"(\", \"x\"]]\n",
        )
        .unwrap();
        let err = buildfile
            .builds(&Config::default(), &runner(), true, None)
            .unwrap_err();
        assert!(matches!(err, StrataError::BuildfileInvalid { .. }));
    }

    #[test]
    fn localhost_build_refuses_dry_run() {
        let buildfile =
            parse("[[build]]\ntarget = \"localhost\"\n[[build.steps]]\nrun = \"true\"\n").unwrap();
        assert!(buildfile
            .builds(&Config::default(), &runner(), true, None)
            .is_err());
        let builds = buildfile
            .builds(&Config::default(), &runner(), false, None)
            .unwrap();
        assert_eq!(builds[0].target(), &BuildTarget::Localhost);
    }

    #[tokio::test]
    async fn load_reads_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("strata.toml");
        tokio::fs::write(&path, APP).await.unwrap();

        let buildfile = Buildfile::load(&path).await.unwrap();
        assert_eq!(buildfile.path, path);
        assert_eq!(buildfile.names(), vec!["app"]);
    }

    #[tokio::test]
    async fn load_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = Buildfile::load(&temp.path().join("strata.toml")).await.unwrap_err();
        assert!(matches!(err, StrataError::BuildfileNotFound(_)));
    }
}
