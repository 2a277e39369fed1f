//! Managed Processes
//!
//! A [`ManagedProcess`] owns the handle of one spawned OS process for a
//! single role (the emulator, the Appium server). Only the lifecycle that
//! spawned it may signal or wait on it.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::exec::{CommandSpec, Spawner, ToolError};

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally, `None` if killed by a signal
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A handle to control a running process
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM or equivalent)
    async fn terminate(&mut self) -> io::Result<()>;

    /// Forcefully stop the process (SIGKILL or equivalent)
    async fn kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> io::Result<ExitStatus>;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

/// Lifecycle state of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminating,
    Stopped,
}

/// Why a stop escalated to a forced kill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillReason {
    /// The process was still alive when the grace period ran out
    GraceExpired(Duration),
    /// The terminate signal could not be delivered
    TerminateFailed(String),
    /// Waiting for exit failed
    WaitFailed(String),
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillReason::GraceExpired(grace) => write!(f, "did not exit within {:?}", grace),
            KillReason::TerminateFailed(e) => write!(f, "terminate failed: {}", e),
            KillReason::WaitFailed(e) => write!(f, "wait failed: {}", e),
        }
    }
}

/// Result of a graceful-then-forceful stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was spawned by this instance
    NotOwned,
    /// Exited within the grace period
    Exited { code: Option<i32> },
    /// Force killed after the graceful attempt failed
    Killed { reason: KillReason },
    /// Even the forced kill failed
    KillFailed { reason: KillReason, error: String },
}

impl StopOutcome {
    /// True unless the process may still be running
    pub fn is_stopped(&self) -> bool {
        !matches!(self, StopOutcome::KillFailed { .. })
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NotOwned => write!(f, "not owned, left running"),
            StopOutcome::Exited { code } => write!(f, "exited ({:?})", code),
            StopOutcome::Killed { reason } => write!(f, "force killed ({})", reason),
            StopOutcome::KillFailed { reason, error } => {
                write!(f, "kill failed after {}: {}", reason, error)
            }
        }
    }
}

/// One spawned OS process under our control
pub struct ManagedProcess {
    role: &'static str,
    command: Vec<String>,
    handle: Option<Box<dyn ProcessHandle>>,
    state: ProcessState,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("role", &self.role)
            .field("command", &self.command)
            .field("pid", &self.pid())
            .field("state", &self.state)
            .finish()
    }
}

impl ManagedProcess {
    /// Empty slot for `role`
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            command: Vec::new(),
            handle: None,
            state: ProcessState::NotStarted,
        }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Argument vector of the last spawn
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.id())
    }

    /// Whether this instance holds a handle at all
    pub fn is_owned(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the owned process is still alive; reaps it if it has exited
    pub fn is_live(&mut self) -> bool {
        self.reap().is_none() && self.handle.is_some()
    }

    /// Non-blocking exit check, releasing the handle once the process is gone
    pub fn reap(&mut self) -> Option<ExitStatus> {
        let handle = self.handle.as_mut()?;
        match handle.try_wait() {
            Ok(Some(status)) => {
                debug!("{} process exited on its own ({:?})", self.role, status.code);
                self.release();
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Could not poll {} process: {}", self.role, e);
                None
            }
        }
    }

    /// Spawn `spec` unless a live process already occupies this slot
    ///
    /// Returns `Ok(false)` when the existing process was kept.
    pub fn spawn(&mut self, spawner: &dyn Spawner, spec: &CommandSpec) -> Result<bool, ToolError> {
        if self.is_live() {
            debug!("{} process already running, not spawning again", self.role);
            return Ok(false);
        }

        let handle = spawner.spawn(spec)?;
        self.command = spec.argv();
        info!(
            "Spawned {} process (pid {:?}): {}",
            self.role,
            handle.id(),
            spec.display_line()
        );
        self.handle = Some(handle);
        self.state = ProcessState::Running;
        Ok(true)
    }

    /// Terminate, wait up to `grace`, then escalate to a forced kill
    ///
    /// Never fails; the outcome says how far it got.
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        let Some(mut handle) = self.handle.take() else {
            return StopOutcome::NotOwned;
        };
        self.state = ProcessState::Terminating;

        let reason = match handle.terminate().await {
            Ok(()) => match tokio::time::timeout(grace, handle.wait()).await {
                Ok(Ok(status)) => {
                    info!("{} process stopped ({:?})", self.role, status.code);
                    self.state = ProcessState::Stopped;
                    return StopOutcome::Exited { code: status.code };
                }
                Ok(Err(e)) => KillReason::WaitFailed(e.to_string()),
                Err(_) => KillReason::GraceExpired(grace),
            },
            Err(e) => KillReason::TerminateFailed(e.to_string()),
        };

        warn!("{} process {}", self.role, reason);
        warn!("Escalating to forced kill of {} process", self.role);

        match handle.kill().await {
            Ok(()) => {
                info!("{} process force killed", self.role);
                self.state = ProcessState::Stopped;
                StopOutcome::Killed { reason }
            }
            Err(e) => {
                error!("Failed to force kill {} process: {}", self.role, e);
                self.handle = Some(handle);
                StopOutcome::KillFailed {
                    reason,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Drop the handle without signalling; the process keeps running detached
    pub fn release(&mut self) {
        self.handle = None;
        self.state = ProcessState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturedLogs, FakeBehavior, FakeSpawner};

    fn spec() -> CommandSpec {
        CommandSpec::new("appium")
    }

    #[tokio::test]
    async fn test_spawn_is_idempotent_while_live() {
        let spawner = FakeSpawner::new();
        let mut process = ManagedProcess::new("appium");
        assert_eq!(process.state(), ProcessState::NotStarted);

        assert!(process.spawn(&spawner, &spec()).unwrap());
        assert!(!process.spawn(&spawner, &spec()).unwrap());
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(process.state(), ProcessState::Running);
        assert_eq!(process.command(), ["appium".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_without_process_is_noop() {
        let mut process = ManagedProcess::new("appium");
        assert_eq!(process.stop(Duration::from_secs(5)).await, StopOutcome::NotOwned);
        assert_eq!(process.state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn test_graceful_stop_releases_handle() {
        let spawner = FakeSpawner::new();
        let mut process = ManagedProcess::new("appium");
        process.spawn(&spawner, &spec()).unwrap();

        let outcome = process.stop(Duration::from_secs(5)).await;
        assert_eq!(outcome, StopOutcome::Exited { code: Some(0) });
        assert!(!process.is_owned());
        assert_eq!(process.state(), ProcessState::Stopped);
        assert_eq!(spawner.stats().kills(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_escalates_once() {
        let spawner = FakeSpawner::with_behavior(FakeBehavior {
            ignores_terminate: true,
            ..Default::default()
        });
        let mut process = ManagedProcess::new("appium");
        process.spawn(&spawner, &spec()).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = process.stop(Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            StopOutcome::Killed {
                reason: KillReason::GraceExpired(Duration::from_secs(5))
            }
        );
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(spawner.stats().terminates(), 1);
        assert_eq!(spawner.stats().kills(), 1);
        assert!(!process.is_owned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_and_escalation_are_logged_once() {
        let logs = CapturedLogs::new();
        let _guard = logs.install();
        let spawner = FakeSpawner::with_behavior(FakeBehavior {
            ignores_terminate: true,
            ..Default::default()
        });
        let mut process = ManagedProcess::new("appium");
        process.spawn(&spawner, &spec()).unwrap();

        process.stop(Duration::from_secs(5)).await;

        assert_eq!(logs.count("appium process did not exit within 5s"), 1);
        assert_eq!(logs.count("Escalating to forced kill of appium process"), 1);
        let text = logs.contents();
        let grace = text.find("did not exit within").unwrap();
        let escalation = text.find("Escalating to forced kill").unwrap();
        assert!(grace < escalation);
    }

    #[tokio::test]
    async fn test_graceful_stop_logs_no_escalation() {
        let logs = CapturedLogs::new();
        let _guard = logs.install();
        let spawner = FakeSpawner::new();
        let mut process = ManagedProcess::new("appium");
        process.spawn(&spawner, &spec()).unwrap();

        process.stop(Duration::from_secs(5)).await;

        assert_eq!(logs.count("did not exit within"), 0);
        assert_eq!(logs.count("Escalating to forced kill"), 0);
    }

    #[tokio::test]
    async fn test_failed_kill_keeps_handle() {
        let spawner = FakeSpawner::with_behavior(FakeBehavior {
            terminate_fails: true,
            kill_fails: true,
            ..Default::default()
        });
        let mut process = ManagedProcess::new("appium");
        process.spawn(&spawner, &spec()).unwrap();

        let outcome = process.stop(Duration::from_secs(5)).await;
        assert!(matches!(
            outcome,
            StopOutcome::KillFailed {
                reason: KillReason::TerminateFailed(_),
                ..
            }
        ));
        assert!(!outcome.is_stopped());
        assert!(process.is_owned());
        assert_eq!(process.state(), ProcessState::Terminating);
    }

    #[tokio::test]
    async fn test_reap_after_external_exit() {
        let spawner = FakeSpawner::new();
        let mut process = ManagedProcess::new("emulator");
        process.spawn(&spawner, &spec()).unwrap();

        spawner.exit_all();
        assert!(!process.is_live());
        assert!(!process.is_owned());
        assert!(process.spawn(&spawner, &spec()).unwrap());
        assert_eq!(spawner.spawn_count(), 2);
    }
}
