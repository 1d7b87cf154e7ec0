//! Capabilities handed to a running action

use crate::error::StrataResult;
use crate::pipeline::ResultLog;
use crate::process::{shell_quote, Exec, ProcessOutput, ProcessRunner};
use crate::target::Target;
use std::path::{Path, PathBuf};

/// Marker closing a heredoc written by [`Context::write`]
const HEREDOC_END: &str = "STRATA_EOF";

/// What an action may touch: one target and the invocation's result log
#[derive(Clone)]
pub struct Context<'a> {
    target: &'a dyn Target,
    results: ResultLog,
}

impl<'a> Context<'a> {
    pub fn new(target: &'a dyn Target, results: ResultLog) -> Self {
        Self { target, results }
    }

    /// Same target, different result log (used to fork parallel branches)
    pub fn with_results(&self, results: ResultLog) -> Context<'a> {
        Context {
            target: self.target,
            results,
        }
    }

    /// Same result log, different target
    pub fn with_target<'b>(&self, target: &'b dyn Target) -> Context<'b> {
        Context {
            target,
            results: self.results.clone(),
        }
    }

    pub fn target(&self) -> &'a dyn Target {
        self.target
    }

    pub fn label(&self) -> &str {
        self.target.label()
    }

    pub fn results(&self) -> &ResultLog {
        &self.results
    }

    pub fn runner(&self) -> &ProcessRunner {
        self.target.runner()
    }

    pub async fn exec(&self, exec: Exec) -> StrataResult<ProcessOutput> {
        self.target.exec(exec).await
    }

    /// Run `exec` as root
    pub async fn rexec(&self, exec: Exec) -> StrataResult<ProcessOutput> {
        self.target.exec(exec.user(Some("root".to_string()))).await
    }

    pub async fn mount(&self, host: &Path, guest: &Path) -> StrataResult<()> {
        self.target.mount(host, guest).await
    }

    pub async fn copy(&self, sources: &[PathBuf], dest: &Path) -> StrataResult<()> {
        self.target.copy(sources, dest).await
    }

    pub async fn mkdir(&self, paths: &[PathBuf]) -> StrataResult<()> {
        self.target.mkdir(paths).await
    }

    /// Replace the contents of `path` on the target
    pub async fn write(&self, path: &Path, content: &str) -> StrataResult<()> {
        let script = format!(
            "cat > {} <<'{end}'\n{}\n{end}",
            shell_quote(&path.display().to_string()),
            content,
            end = HEREDOC_END,
        );
        self.target.exec(Exec::shell(script)).await?;
        Ok(())
    }
}
