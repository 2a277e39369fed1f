//! droid-testbed core - configuration, process plumbing and readiness probes
//!
//! This crate provides the pieces every lifecycle in the workspace is built
//! from: running SDK tools, owning spawned processes, and polling for
//! readiness.

pub mod config;
pub mod error;
pub mod exec;
pub mod probe;
pub mod process;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{HarnessConfig, SystemImage};
pub use error::{HarnessError, Result};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, Spawner, SystemRunner, SystemSpawner, ToolError};
pub use probe::{HealthProbe, PortProbe, PropertyProbe, WaitLimit, WaitOutcome, WaitPolicy};
pub use process::{ExitStatus, ManagedProcess, ProcessHandle, ProcessState, StopOutcome};

/// droid-testbed version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
