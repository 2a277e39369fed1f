//! Test doubles for the process and probe seams
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! the tests of crates that depend on it.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing_subscriber::fmt::MakeWriter;

use crate::exec::{CommandOutput, CommandRunner, CommandSpec, Spawner, ToolError};
use crate::probe::HealthProbe;
use crate::process::{ExitStatus, ProcessHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A canned reply for one command line
#[derive(Debug, Clone)]
pub enum Scripted {
    Output(CommandOutput),
    /// The tool binary is missing
    Missing,
    /// The invocation exceeded its time limit
    TimedOut,
    /// The tool never answers; the call sleeps out the command's timeout first
    Hang,
}

/// Ordered record of calls shared between fakes
///
/// Lets a test assert the order of operations that went through different
/// seams, e.g. a process signal before a tool invocation.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Index of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e == entry)
    }
}

/// [`CommandRunner`] answering from per-command-line queues
///
/// Commands are matched on [`CommandSpec::display_line`]. Replies are
/// consumed in order and the last one repeats. Unscripted commands behave
/// like a missing tool.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<CommandSpec>>,
    log: CallLog,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record every command line into `log`
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn push(&self, line: &str, reply: Scripted) -> &Self {
        lock(&self.replies)
            .entry(line.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn respond(&self, line: &str, output: CommandOutput) -> &Self {
        self.push(line, Scripted::Output(output))
    }

    /// Exit 0 with `stdout`
    pub fn ok(&self, line: &str, stdout: &str) -> &Self {
        self.respond(
            line,
            CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        )
    }

    /// Exit `code` with `stderr`
    pub fn fail(&self, line: &str, code: i32, stderr: &str) -> &Self {
        self.respond(
            line,
            CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        )
    }

    pub fn missing(&self, line: &str) -> &Self {
        self.push(line, Scripted::Missing)
    }

    pub fn hang(&self, line: &str) -> &Self {
        self.push(line, Scripted::Hang)
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).iter().map(CommandSpec::display_line).collect()
    }

    /// Every spec run so far, in order
    pub fn specs(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    /// How many times `line` was run
    pub fn count(&self, line: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|spec| spec.display_line() == line)
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        let line = spec.display_line();
        lock(&self.calls).push(spec.clone());
        self.log.record(line.clone());

        let reply = {
            let mut replies = lock(&self.replies);
            match replies.get_mut(&line) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::TimedOut) => Err(ToolError::TimedOut {
                command: line,
                after: spec.timeout.unwrap_or_default(),
            }),
            Some(Scripted::Hang) => match spec.timeout {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    Err(ToolError::TimedOut { command: line, after })
                }
                None => std::future::pending().await,
            },
            Some(Scripted::Missing) | None => Err(ToolError::NotFound(spec.program.clone())),
        }
    }
}

/// How handles from a [`FakeSpawner`] react to signals
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeBehavior {
    /// Terminate succeeds but the process keeps running
    pub ignores_terminate: bool,
    /// Terminate returns an error
    pub terminate_fails: bool,
    /// Kill returns an error
    pub kill_fails: bool,
    /// Spawning fails as if the binary were missing
    pub missing_binary: bool,
}

/// Signal counters shared by all handles of one spawner
#[derive(Debug, Default)]
pub struct HandleStats {
    terminates: AtomicUsize,
    kills: AtomicUsize,
}

impl HandleStats {
    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

/// [`Spawner`] that hands out in-memory processes
#[derive(Debug, Default)]
pub struct FakeSpawner {
    behavior: FakeBehavior,
    stats: Arc<HandleStats>,
    spawned: Mutex<Vec<CommandSpec>>,
    alive_flags: Mutex<Vec<Arc<AtomicBool>>>,
    next_pid: AtomicU32,
    log: CallLog,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::with_behavior(FakeBehavior::default())
    }

    pub fn with_behavior(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            next_pid: AtomicU32::new(4000),
            ..Default::default()
        }
    }

    /// Also record spawns and signals (`terminate <tool>`, `kill <tool>`) into `log`
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.spawned).len()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        lock(&self.spawned).clone()
    }

    pub fn stats(&self) -> &HandleStats {
        &self.stats
    }

    /// Make every process spawned so far exit, as if killed from outside
    pub fn exit_all(&self) {
        for alive in lock(&self.alive_flags).iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ToolError> {
        if self.behavior.missing_binary {
            return Err(ToolError::NotFound(spec.program.clone()));
        }

        lock(&self.spawned).push(spec.clone());
        self.log.record(format!("spawn {}", spec.display_line()));
        let alive = Arc::new(AtomicBool::new(true));
        lock(&self.alive_flags).push(alive.clone());

        Ok(Box::new(FakeHandle {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive,
            behavior: self.behavior,
            stats: self.stats.clone(),
            tool: spec.tool_name(),
            log: self.log.clone(),
        }))
    }
}

#[derive(Debug)]
struct FakeHandle {
    pid: u32,
    alive: Arc<AtomicBool>,
    behavior: FakeBehavior,
    stats: Arc<HandleStats>,
    tool: String,
    log: CallLog,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.stats.terminates.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("terminate {}", self.tool));
        if self.behavior.terminate_fails {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "terminate refused"));
        }
        if !self.behavior.ignores_terminate {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.stats.kills.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("kill {}", self.tool));
        if self.behavior.kill_fails {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "kill refused"));
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        if self.alive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(ExitStatus { code: Some(0) })
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Ok(Some(ExitStatus { code: Some(0) }))
        }
    }
}

/// [`HealthProbe`] replaying a fixed sequence of answers
///
/// The last answer repeats once the sequence is exhausted.
#[derive(Debug)]
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    attempts: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn never() -> Self {
        Self::new([false])
    }

    pub fn always() -> Self {
        Self::new([true])
    }

    /// Not ready for `k - 1` attempts, ready from the k-th on
    pub fn ready_after(k: usize) -> Self {
        let mut answers = vec![false; k.saturating_sub(1)];
        answers.push(true);
        Self::new(answers)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut answers = lock(&self.answers);
        if answers.len() > 1 {
            answers.pop_front().unwrap_or(false)
        } else {
            answers.front().copied().unwrap_or(false)
        }
    }

    fn describe(&self) -> String {
        "scripted probe".to_string()
    }
}

/// Collects formatted `tracing` output for assertions
///
/// Install with [`CapturedLogs::install`] on a current-thread runtime; the
/// capture lasts as long as the returned guard.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buffer)).into_owned()
    }

    /// How many captured lines contain `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|line| line.contains(needle)).count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.buffer).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
