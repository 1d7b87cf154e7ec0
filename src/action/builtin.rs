//! Built-in actions

use crate::action::{Action, CacheKey, Context};
use crate::error::{StrataError, StrataResult};
use crate::process::{Exec, Expect};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Longest script excerpt shown in step notifications
const DESCRIBE_WIDTH: usize = 60;

/// Run a shell script on the target
#[derive(Debug, Clone)]
pub struct Run {
    script: String,
    user: Option<String>,
    quiet: bool,
    expects: Vec<Expect>,
}

impl Run {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            user: None,
            quiet: false,
            expects: Vec::new(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Answer prompts while the script runs
    pub fn expecting(mut self, expects: Vec<Expect>) -> Self {
        self.expects = expects;
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

#[async_trait]
impl Action for Run {
    fn describe(&self) -> String {
        let first = self.script.lines().next().unwrap_or_default().trim();
        let mut text: String = first.chars().take(DESCRIBE_WIDTH).collect();
        if first.chars().count() > DESCRIBE_WIDTH || self.script.trim().lines().count() > 1 {
            text.push_str("...");
        }
        format!("Run({})", text)
    }

    // `quiet` only changes what is printed, so it stays out of the key
    fn cache_key(&self) -> String {
        let expects: Vec<(&str, &str)> = self
            .expects
            .iter()
            .map(|e| (e.pattern(), e.reply()))
            .collect();
        let key = CacheKey::new("Run")
            .arg(&self.script)
            .opt("user", self.user.as_deref());
        if expects.is_empty() {
            key.finish()
        } else {
            key.field("expect", expects).finish()
        }
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        let exec = Exec::shell(self.script.clone())
            .user(self.user.clone())
            .quiet(self.quiet)
            .expecting(self.expects.clone());
        ctx.exec(exec).await?;
        Ok(())
    }
}

/// Relative host paths resolve against `base` when one is set
fn host_path(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

/// Copy host paths into the target
///
/// The cache key holds the sources as declared, so a project keeps its
/// layers when moved.
#[derive(Debug, Clone)]
pub struct Copy {
    sources: Vec<PathBuf>,
    dest: PathBuf,
    base: Option<PathBuf>,
}

impl Copy {
    pub fn new(sources: Vec<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            dest: dest.into(),
            base: None,
        }
    }

    /// Resolve relative sources against `dir` when copying
    pub fn relative_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base = Some(dir.into());
        self
    }
}

#[async_trait]
impl Action for Copy {
    fn describe(&self) -> String {
        let sources: Vec<String> = self
            .sources
            .iter()
            .map(|s| s.display().to_string())
            .collect();
        format!("Copy({} -> {})", sources.join(", "), self.dest.display())
    }

    fn cache_key(&self) -> String {
        let mut key = CacheKey::new("Copy");
        for source in &self.sources {
            key = key.arg(source);
        }
        key.field("dest", &self.dest).finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        if self.sources.is_empty() {
            return Err(StrataError::action(self.describe(), "nothing to copy"));
        }
        let sources: Vec<PathBuf> = self
            .sources
            .iter()
            .map(|s| host_path(self.base.as_deref(), s))
            .collect();
        ctx.copy(&sources, &self.dest).await
    }
}

/// Create directories on the target
#[derive(Debug, Clone)]
pub struct Mkdir {
    paths: Vec<PathBuf>,
}

impl Mkdir {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Action for Mkdir {
    fn describe(&self) -> String {
        let paths: Vec<String> = self.paths.iter().map(|p| p.display().to_string()).collect();
        format!("Mkdir({})", paths.join(", "))
    }

    fn cache_key(&self) -> String {
        self.paths
            .iter()
            .fold(CacheKey::new("Mkdir"), |key, path| key.arg(path))
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        ctx.mkdir(&self.paths).await
    }
}

/// Bind-mount a host directory into the target for the rest of the run
///
/// Mounts are not part of a committed layer and are set up again on resume.
#[derive(Debug, Clone)]
pub struct Mount {
    host: PathBuf,
    guest: PathBuf,
    base: Option<PathBuf>,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
            base: None,
        }
    }

    /// Resolve a relative host path against `dir` when mounting
    pub fn relative_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base = Some(dir.into());
        self
    }

    async fn apply(&self, ctx: &Context<'_>) -> StrataResult<()> {
        ctx.mount(&host_path(self.base.as_deref(), &self.host), &self.guest)
            .await
    }
}

#[async_trait]
impl Action for Mount {
    fn describe(&self) -> String {
        format!("Mount({} -> {})", self.host.display(), self.guest.display())
    }

    fn cache_key(&self) -> String {
        CacheKey::new("Mount")
            .arg(&self.host)
            .arg(&self.guest)
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        self.apply(ctx).await
    }

    async fn replay(&self, ctx: &Context<'_>) -> StrataResult<()> {
        self.apply(ctx).await
    }
}

/// Create a user, or rename the one already holding `uid`
#[derive(Debug, Clone)]
pub struct User {
    name: String,
    home: PathBuf,
    uid: u32,
}

impl User {
    pub fn new(name: impl Into<String>, home: impl Into<PathBuf>, uid: u32) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
            uid,
        }
    }

    /// User name out of `id` output: `uid=1000(name) gid=...`
    fn existing_name(id_output: &str) -> Option<&str> {
        let (_, rest) = id_output.split_once('(')?;
        let (name, _) = rest.split_once(')')?;
        Some(name)
    }
}

#[async_trait]
impl Action for User {
    fn describe(&self) -> String {
        format!("User({}, {}, {})", self.name, self.home.display(), self.uid)
    }

    fn cache_key(&self) -> String {
        CacheKey::new("User")
            .arg(&self.name)
            .arg(&self.home)
            .arg(self.uid)
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        let uid = self.uid.to_string();
        let home = self.home.display().to_string();

        let id = ctx
            .rexec(Exec::new(["id", uid.as_str()]).raises(false))
            .await?;
        if id.success() {
            let old = Self::existing_name(&id.stdout).ok_or_else(|| {
                StrataError::action(self.describe(), format!("unexpected id output: {}", id.stdout))
            })?;
            ctx.rexec(Exec::new([
                "usermod",
                "-d",
                home.as_str(),
                "-l",
                self.name.as_str(),
                old,
            ]))
            .await?;
        } else {
            ctx.rexec(Exec::new([
                "useradd",
                "-d",
                home.as_str(),
                "-u",
                uid.as_str(),
                self.name.as_str(),
            ]))
            .await?;
        }

        ctx.mkdir(std::slice::from_ref(&self.home)).await?;
        ctx.rexec(Exec::new(["chown", uid.as_str(), home.as_str()]))
            .await?;
        Ok(())
    }
}

/// Write a file on the target
#[derive(Debug, Clone)]
pub struct WriteFile {
    path: PathBuf,
    content: String,
}

impl WriteFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
impl Action for WriteFile {
    fn describe(&self) -> String {
        format!("Write({})", self.path.display())
    }

    fn cache_key(&self) -> String {
        CacheKey::new("Write")
            .arg(&self.path)
            .arg(&self.content)
            .finish()
    }

    async fn execute(&self, ctx: &Context<'_>) -> StrataResult<()> {
        ctx.write(&self.path, &self.content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, StubBackend};
    use crate::pipeline::ResultLog;
    use crate::process::{OutputRegistry, ProcessRunner};
    use crate::target::Container;
    use std::sync::Arc;

    async fn container(stub: &StubBackend) -> Container {
        let (registry, _) = OutputRegistry::capture();
        let runner = ProcessRunner::new(Arc::new(registry));
        let backend: Arc<dyn Backend> = Arc::new(stub.clone());
        Container::acquire(backend, "alpine", "test", runner)
            .await
            .unwrap()
    }

    #[test]
    fn run_key_ignores_quiet() {
        let loud = Run::new("make");
        let quiet = Run::new("make").quiet(true);
        assert_eq!(loud.cache_key(), quiet.cache_key());
        assert_ne!(loud.cache_key(), Run::new("make").user("root").cache_key());
    }

    #[test]
    fn run_key_includes_expectations() {
        let plain = Run::new("passwd");
        let scripted =
            Run::new("passwd").expecting(vec![Expect::new("password:", "x\n").unwrap()]);
        assert_ne!(plain.cache_key(), scripted.cache_key());
    }

    #[test]
    fn run_describe_truncates() {
        assert_eq!(Run::new("echo hi").describe(), "Run(echo hi)");
        assert_eq!(Run::new("a\nb").describe(), "Run(a...)");
        let long = "x".repeat(100);
        assert!(Run::new(long).describe().ends_with("...)"));
    }

    #[test]
    fn copy_key_covers_sources_and_dest() {
        let a = Copy::new(vec!["src".into()], "/app");
        let b = Copy::new(vec!["src".into()], "/srv");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), r#"Copy("src", dest="/app")"#);
    }

    #[test]
    fn copy_key_keeps_declared_sources() {
        let here = Copy::new(vec!["src".into()], "/app").relative_to("/work");
        let moved = Copy::new(vec!["src".into()], "/app").relative_to("/elsewhere");
        assert_eq!(here.cache_key(), moved.cache_key());
        assert_eq!(here.cache_key(), r#"Copy("src", dest="/app")"#);
    }

    #[tokio::test]
    async fn copy_resolves_relative_sources_when_run() {
        let stub = StubBackend::new();
        let target = container(&stub).await;
        let ctx = Context::new(&target, ResultLog::new());

        Copy::new(vec!["src".into(), "/etc/hosts".into()], "/app")
            .relative_to("/work")
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(
            stub.calls_to("host"),
            vec!["host cp -a /work/src /etc/hosts /stub/stub-ctr-1/app"]
        );
    }

    #[tokio::test]
    async fn mount_replays_on_resume() {
        let stub = StubBackend::new();
        let target = container(&stub).await;
        let ctx = Context::new(&target, ResultLog::new());
        let mount = Mount::new("cache", "/var/cache/apk").relative_to("/work");

        assert_eq!(mount.cache_key(), r#"Mount("cache", "/var/cache/apk")"#);
        mount.replay(&ctx).await.unwrap();
        assert_eq!(
            stub.calls_to("mount"),
            vec!["mount /work/cache /stub/stub-ctr-1/var/cache/apk"]
        );
    }

    #[test]
    fn existing_user_name_parsed() {
        assert_eq!(
            User::existing_name("uid=1000(node) gid=1000(node) groups=1000(node)"),
            Some("node")
        );
        assert_eq!(User::existing_name("garbage"), None);
    }

    #[tokio::test]
    async fn user_created_when_uid_is_free() {
        // `id` exits 1 in the stub, so the user is added
        let stub = StubBackend::new().fail_on("id 1000");
        let target = container(&stub).await;
        let ctx = Context::new(&target, ResultLog::new());

        User::new("app", "/app", 1000).execute(&ctx).await.unwrap();

        let execs = stub.calls_to("exec");
        assert!(execs[1].contains("useradd -d /app -u 1000 app"));
        assert!(execs[2].contains("chown 1000 /app"));
        assert_eq!(stub.calls_to("host"), vec!["host mkdir -p /stub/stub-ctr-1/app"]);
    }

    #[tokio::test]
    async fn run_executes_inside_container() {
        let stub = StubBackend::new();
        let target = container(&stub).await;
        let ctx = Context::new(&target, ResultLog::new());

        Run::new("apk add curl").user("root").execute(&ctx).await.unwrap();
        assert_eq!(
            stub.calls_to("exec"),
            vec!["exec stub-ctr-1 sh -euc 'apk add curl'"]
        );
    }

    #[tokio::test]
    async fn empty_copy_is_a_logic_error() {
        let stub = StubBackend::new();
        let target = container(&stub).await;
        let ctx = Context::new(&target, ResultLog::new());

        let err = Copy::new(Vec::new(), "/app").execute(&ctx).await.unwrap_err();
        assert!(matches!(err, StrataError::ActionLogic { .. }));
    }
}
