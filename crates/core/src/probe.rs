//! Readiness Probes
//!
//! A probe answers "is it up yet?" without ever failing: any transport or
//! lookup error means "not ready". [`wait`] turns a probe into a bounded
//! polling loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::exec::{CommandRunner, CommandSpec};

/// A repeatable readiness check
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One attempt; `true` means ready
    async fn probe(&self) -> bool;

    /// Short description for log lines
    fn describe(&self) -> String;
}

/// Ready when a TCP connect to `host:port` succeeds
#[derive(Debug, Clone)]
pub struct PortProbe {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl PortProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl HealthProbe for PortProbe {
    async fn probe(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!("{}:{} not accepting connections: {}", self.host, self.port, e);
                false
            }
            Err(_) => {
                debug!("{}:{} connect timed out", self.host, self.port);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Ready when a query command prints the expected value
///
/// Stdout is trimmed before comparison. A missing tool, non-zero exit or
/// timeout all read as "not ready".
#[derive(Clone)]
pub struct PropertyProbe {
    runner: Arc<dyn CommandRunner>,
    command: CommandSpec,
    expected: String,
}

impl PropertyProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, command: CommandSpec, expected: impl Into<String>) -> Self {
        Self {
            runner,
            command,
            expected: expected.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for PropertyProbe {
    async fn probe(&self) -> bool {
        match self.runner.run(&self.command).await {
            Ok(output) if output.success() => output.stdout.trim() == self.expected,
            Ok(output) => {
                debug!(
                    "`{}` exited with {:?}",
                    self.command.display_line(),
                    output.code
                );
                false
            }
            Err(e) => {
                debug!("`{}` failed: {}", self.command.display_line(), e);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("`{}` == {:?}", self.command.display_line(), self.expected)
    }
}

/// When a polling loop gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitLimit {
    /// Stop once this much wall-clock time has elapsed
    Deadline(Duration),
    /// Stop after this many probe attempts
    Attempts(u32),
}

/// Fixed-interval polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub limit: WaitLimit,
}

impl WaitPolicy {
    pub fn deadline(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            limit: WaitLimit::Deadline(timeout),
        }
    }

    pub fn attempts(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            limit: WaitLimit::Attempts(max_attempts),
        }
    }

    /// Upper bound on the time spent sleeping
    pub fn budget(&self) -> Duration {
        match self.limit {
            WaitLimit::Deadline(timeout) => timeout,
            WaitLimit::Attempts(n) => self.interval * n,
        }
    }
}

/// How a polling loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            WaitOutcome::Ready { attempts }
            | WaitOutcome::TimedOut { attempts }
            | WaitOutcome::Cancelled { attempts } => attempts,
        }
    }
}

/// Probe, then sleep `policy.interval` after every failed attempt, until the
/// probe succeeds, the limit is reached, or `cancel` fires.
///
/// With a deadline `T` and interval `I`, a probe that never succeeds is
/// attempted `ceil(T / I)` times and the loop returns after `ceil(T / I) * I`.
/// A single attempt never runs past `T`: one still pending at the deadline
/// is dropped and the loop returns at `T`.
/// With an attempt limit `n` it is attempted exactly `n` times, sleeping after
/// each one.
pub async fn wait(
    probe: &dyn HealthProbe,
    policy: &WaitPolicy,
    cancel: Option<&CancellationToken>,
) -> WaitOutcome {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if attempt(probe, policy, started).await {
            debug!("{} ready after {} attempt(s)", probe.describe(), attempts);
            return WaitOutcome::Ready { attempts };
        }
        debug!("{} not ready (attempt {})", probe.describe(), attempts);

        if let WaitLimit::Deadline(timeout) = policy.limit {
            if started.elapsed() >= timeout {
                return WaitOutcome::TimedOut { attempts };
            }
        }

        if pause(policy.interval, cancel).await {
            debug!("Wait on {} cancelled", probe.describe());
            return WaitOutcome::Cancelled { attempts };
        }

        let exhausted = match policy.limit {
            WaitLimit::Deadline(timeout) => started.elapsed() >= timeout,
            WaitLimit::Attempts(max) => attempts >= max,
        };
        if exhausted {
            return WaitOutcome::TimedOut { attempts };
        }
    }
}

/// One probe call; under a deadline it is cut off when the deadline passes
/// and counts as not ready.
async fn attempt(probe: &dyn HealthProbe, policy: &WaitPolicy, started: Instant) -> bool {
    let WaitLimit::Deadline(timeout) = policy.limit else {
        return probe.probe().await;
    };

    let remaining = timeout.saturating_sub(started.elapsed());
    match tokio::time::timeout(remaining, probe.probe()).await {
        Ok(ready) => ready,
        Err(_) => {
            debug!("{} still pending at the deadline", probe.describe());
            false
        }
    }
}

/// Poll `probe` every `interval` until ready or `timeout` has elapsed
pub async fn wait_until_ready(probe: &dyn HealthProbe, interval: Duration, timeout: Duration) -> bool {
    wait(probe, &WaitPolicy::deadline(interval, timeout), None)
        .await
        .is_ready()
}

/// Sleep for `interval`; returns `true` if cancelled first
async fn pause(interval: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = token.cancelled() => true,
        },
        None => {
            tokio::time::sleep(interval).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::exec::CommandOutput;
    use crate::testing::{ScriptedProbe, ScriptedRunner};

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_stops_at_deadline() {
        let probe = ScriptedProbe::never();
        let started = Instant::now();

        let ready = wait_until_ready(&probe, Duration::from_secs(5), Duration::from_secs(12)).await;

        assert!(!ready);
        // ceil(12 / 5) attempts
        assert_eq!(probe.attempts(), 3);
        assert!(started.elapsed() >= Duration::from_secs(12));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_exact_multiple() {
        let probe = ScriptedProbe::never();
        let started = Instant::now();

        let ready = wait_until_ready(&probe, Duration::from_secs(5), Duration::from_secs(10)).await;

        assert!(!ready);
        assert_eq!(probe.attempts(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_kth_attempt() {
        let probe = ScriptedProbe::ready_after(4);
        let started = Instant::now();

        let ready = wait_until_ready(&probe, Duration::from_secs(2), Duration::from_secs(60)).await;

        assert!(ready);
        assert_eq!(probe.attempts(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_limit() {
        let probe = ScriptedProbe::never();
        let started = Instant::now();

        let outcome = wait(&probe, &WaitPolicy::attempts(Duration::from_secs(2), 30), None).await;

        assert_eq!(outcome, WaitOutcome::TimedOut { attempts: 30 });
        assert_eq!(probe.attempts(), 30);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_wait() {
        let probe = ScriptedProbe::never();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            canceller.cancel();
        });

        let outcome = wait(
            &probe,
            &WaitPolicy::deadline(Duration::from_secs(5), Duration::from_secs(120)),
            Some(&token),
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Cancelled { attempts: 2 });
    }

    struct NeverAnswers {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for NeverAnswers {
        async fn probe(&self) -> bool {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<bool>().await
        }

        fn describe(&self) -> String {
            "never answers".to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_is_cut_off_at_deadline() {
        let probe = NeverAnswers {
            attempts: AtomicUsize::new(0),
        };
        let started = Instant::now();

        let outcome = wait(
            &probe,
            &WaitPolicy::deadline(Duration::from_secs(5), Duration::from_secs(120)),
            None,
        )
        .await;

        assert_eq!(outcome, WaitOutcome::TimedOut { attempts: 1 });
        assert_eq!(probe.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_port_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::new("127.0.0.1", port);
        assert!(probe.probe().await);

        drop(listener);
        assert!(!probe.probe().await);
    }

    #[tokio::test]
    async fn test_property_probe_compares_trimmed_output() {
        let runner = Arc::new(ScriptedRunner::new());
        let line = "adb shell getprop sys.boot_completed";
        runner.ok(line, "\n");
        runner.ok(line, "1\r\n");
        runner.respond(
            line,
            CommandOutput {
                code: Some(1),
                stdout: "1\n".into(),
                stderr: "error: no devices/emulators found".into(),
            },
        );

        let command = CommandSpec::new("/sdk/platform-tools/adb").args(["shell", "getprop", "sys.boot_completed"]);
        let probe = PropertyProbe::new(runner.clone(), command, "1");

        assert!(!probe.probe().await);
        assert!(probe.probe().await);
        // Non-zero exit is not ready even if stdout matches
        assert!(!probe.probe().await);
        assert_eq!(runner.count(line), 3);
    }

    #[tokio::test]
    async fn test_property_probe_missing_tool() {
        let runner = Arc::new(ScriptedRunner::new());
        let command = CommandSpec::new("/sdk/platform-tools/adb").args(["shell", "getprop", "sys.boot_completed"]);
        let probe = PropertyProbe::new(runner, command, "1");
        assert!(!probe.probe().await);
    }
}
