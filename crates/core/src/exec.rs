//! External Command Execution
//!
//! Every Android SDK tool invocation and every detached spawn goes through
//! the [`CommandRunner`] and [`Spawner`] traits defined here.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::process::{ExitStatus, ProcessHandle};

/// Tool invocation errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(PathBuf),
    #[error("`{command}` timed out after {after:?}")]
    TimedOut { command: String, after: Duration },
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("IO error running {program}: {source}")]
    Io {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    fn from_spawn(program: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ToolError::NotFound(program.to_path_buf())
        } else {
            ToolError::Io {
                program: program.to_path_buf(),
                source,
            }
        }
    }

    /// Whether the tool binary itself is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, ToolError::NotFound(_))
    }
}

/// A command to run: program, arguments, optional stdin and time limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed this text to the child's stdin, then close it
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Short tool name, e.g. `adb` for `/sdk/platform-tools/adb.exe`
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// `tool arg arg ...`, used for logging and for matching in tests
    pub fn display_line(&self) -> String {
        let mut line = self.tool_name();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Full argument vector including the program path
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`ToolError::Failed`]
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                command: spec.display_line(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs one-shot commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError>;
}

/// Starts long-lived processes that outlive the spawning call
pub trait Spawner: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ToolError>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    env: HashMap<String, String>,
}

impl SystemRunner {
    /// Create a runner that sets `env` on every child
    pub fn new(env: HashMap<String, String>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        debug!("run: {}", spec.display_line());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::from_spawn(&spec.program, e))?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            // The tool may exit before reading everything we offer it.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    return Err(ToolError::Io {
                        program: spec.program.clone(),
                        source: e,
                    });
                }
            }
        }

        let finished = child.wait_with_output();
        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, finished)
                .await
                .map_err(|_| ToolError::TimedOut {
                    command: spec.display_line(),
                    after: limit,
                })?,
            None => finished.await,
        }
        .map_err(|source| ToolError::Io {
            program: spec.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// [`Spawner`] backed by `tokio::process`
///
/// Children get null stdio and their own process group, and are not killed
/// when the handle is dropped.
#[derive(Debug, Clone, Default)]
pub struct SystemSpawner {
    env: HashMap<String, String>,
}

impl SystemSpawner {
    pub fn new(env: HashMap<String, String>) -> Self {
        Self { env }
    }

    /// Bare program names are looked up on PATH (including our additions)
    fn resolve(&self, program: &Path) -> Result<PathBuf, ToolError> {
        if program.components().count() > 1 {
            return Ok(program.to_path_buf());
        }

        let search_path = self
            .env
            .get("PATH")
            .map(std::ffi::OsString::from)
            .or_else(|| std::env::var_os("PATH"));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        which::which_in(program, search_path, cwd)
            .map_err(|_| ToolError::NotFound(program.to_path_buf()))
    }
}

impl Spawner for SystemSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ToolError> {
        let program = self.resolve(&spec.program)?;
        debug!("spawn: {}", spec.display_line());

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| ToolError::from_spawn(&program, e))?;
        Ok(Box::new(ChildHandle { child }))
    }
}

/// [`ProcessHandle`] over a real child process
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.child.id() else {
                // Already reaped
                return Ok(());
            };
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
                Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
            }
        }

        #[cfg(not(unix))]
        {
            tracing::warn!("No graceful termination on this platform, killing instead");
            self.child.start_kill()
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        Ok(ExitStatus {
            code: status.code(),
        })
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ExitStatus { code: status.code() }))
    }
}
