//! External process execution
//!
//! [`ProcessRunner`] launches a command, streams stdout and stderr as they
//! arrive through the shared [`OutputRegistry`], answers scripted prompts and
//! captures everything for the caller.

pub mod output;

pub use output::{CaptureBuffer, ColorRules, Event, LineBuffer, OutputRegistry};

use crate::error::{StrataError, StrataResult};
use regex::Regex;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::debug;

const READ_CHUNK: usize = 8192;

/// One scripted interaction: when output matches `pattern`, write `reply` to stdin
#[derive(Debug, Clone)]
pub struct Expect {
    pattern: Regex,
    reply: String,
}

impl Expect {
    pub fn new(pattern: &str, reply: impl Into<String>) -> StrataResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| StrataError::User(format!("invalid expect pattern {pattern:?}: {e}")))?;
        Ok(Self {
            pattern,
            reply: reply.into(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn reply(&self) -> &str {
        &self.reply
    }
}

/// Description of a command to launch
#[derive(Debug, Clone)]
pub struct Exec {
    pub args: Vec<String>,
    pub user: Option<String>,
    pub raises: bool,
    pub quiet: bool,
    pub expects: Vec<Expect>,
    pub prefix: Option<String>,
}

impl Exec {
    /// Run `args` directly, failing on nonzero exit
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            user: None,
            raises: true,
            quiet: false,
            expects: Vec::new(),
            prefix: None,
        }
    }

    /// Run a script through `sh -euc`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(["sh".to_string(), "-euc".to_string(), script.into()])
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn raises(mut self, raises: bool) -> Self {
        self.raises = raises;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn expecting(mut self, expects: Vec<Expect>) -> Self {
        self.expects = expects;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Same options, different argument vector
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Shell-quoted command line
    pub fn display(&self) -> String {
        shell_join(&self.args)
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Quote arguments for display the way a POSIX shell would read them back
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote one argument for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

/// Cursor over the expectations of one process
struct Script<'a> {
    expects: &'a [Expect],
    cursor: usize,
    seen: String,
}

impl<'a> Script<'a> {
    fn new(expects: &'a [Expect]) -> Self {
        Self {
            expects,
            cursor: 0,
            seen: String::new(),
        }
    }

    fn finished(&self) -> bool {
        self.cursor >= self.expects.len()
    }

    /// Feed output; returns the reply to send when the current pattern matches
    fn feed(&mut self, chunk: &[u8]) -> Option<&'a str> {
        let expects = self.expects;
        let expect = expects.get(self.cursor)?;
        self.seen.push_str(&String::from_utf8_lossy(chunk));
        if expect.pattern.is_match(&self.seen) {
            self.seen.clear();
            self.cursor += 1;
            Some(expect.reply.as_str())
        } else {
            None
        }
    }
}

/// Launches processes and streams their output through the registry
#[derive(Clone)]
pub struct ProcessRunner {
    registry: Arc<OutputRegistry>,
    quiet: bool,
}

impl ProcessRunner {
    pub fn new(registry: Arc<OutputRegistry>) -> Self {
        Self {
            registry,
            quiet: false,
        }
    }

    /// Force quiet mode for every command started by this runner
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn registry(&self) -> &Arc<OutputRegistry> {
        &self.registry
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Run a command to completion
    ///
    /// With `exec.raises` a nonzero exit becomes [`StrataError::CommandFailure`]
    /// carrying the captured output; otherwise the exit code is returned.
    pub async fn run(&self, exec: &Exec) -> StrataResult<ProcessOutput> {
        let (program, args) = exec
            .args
            .split_first()
            .ok_or_else(|| StrataError::Internal("empty command".to_string()))?;
        let command = exec.display();
        let quiet = self.quiet || exec.quiet;
        let prefix = exec.prefix.as_deref();

        if !quiet {
            self.registry.command(prefix, &command);
        }
        debug!("Executing: {}", command);

        let mut child = Command::new(program)
            .args(args)
            .stdin(if exec.expects.is_empty() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StrataError::command_spawn(command.clone(), e))?;

        let mut stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| StrataError::Internal("stdout not piped".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| StrataError::Internal("stderr not piped".to_string()))?;

        let mut script = Script::new(&exec.expects);
        let mut out_lines = LineBuffer::default();
        let mut err_lines = LineBuffer::default();
        let mut captured_out = Vec::new();
        let mut captured_err = Vec::new();
        let mut out_chunk = [0u8; READ_CHUNK];
        let mut err_chunk = [0u8; READ_CHUNK];
        let mut out_done = false;
        let mut err_done = false;

        while !out_done || !err_done {
            tokio::select! {
                read = stdout.read(&mut out_chunk), if !out_done => match read {
                    Ok(0) | Err(_) => out_done = true,
                    Ok(n) => {
                        let data = &out_chunk[..n];
                        captured_out.extend_from_slice(data);
                        if !quiet {
                            for line in out_lines.push(data) {
                                self.registry.line(prefix, &line);
                            }
                        }
                        answer(&mut script, data, &mut stdin).await;
                    }
                },
                read = stderr.read(&mut err_chunk), if !err_done => match read {
                    Ok(0) | Err(_) => err_done = true,
                    Ok(n) => {
                        let data = &err_chunk[..n];
                        captured_err.extend_from_slice(data);
                        if !quiet {
                            for line in err_lines.push(data) {
                                self.registry.line(prefix, &line);
                            }
                        }
                        answer(&mut script, data, &mut stdin).await;
                    }
                },
            }
        }

        if !quiet {
            for line in [out_lines.finish(), err_lines.finish()].into_iter().flatten() {
                self.registry.line(prefix, &line);
            }
        }
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| StrataError::io(format!("waiting for {}", command), e))?;
        let output = ProcessOutput {
            command,
            stdout: String::from_utf8_lossy(&captured_out).trim().to_string(),
            stderr: String::from_utf8_lossy(&captured_err).trim().to_string(),
            // Killed by a signal
            exit_code: status.code().unwrap_or(-1),
        };

        if exec.raises && !output.success() {
            return Err(StrataError::CommandFailure {
                command: output.command,
                code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

/// Reply to a matched prompt; stdin closes once the script is exhausted
async fn answer(script: &mut Script<'_>, data: &[u8], stdin: &mut Option<ChildStdin>) {
    let Some(reply) = script.feed(data) else {
        return;
    };
    if let Some(pipe) = stdin.as_mut() {
        let written = async {
            pipe.write_all(reply.as_bytes()).await?;
            pipe.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!("Process closed stdin before reply: {}", e);
        }
    }
    if script.finished() {
        stdin.take();
    }
}
