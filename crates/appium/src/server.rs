//! Appium Server Lifecycle
//!
//! Starts the Appium server unless something already listens on its port,
//! and stops only a server this instance spawned.

use std::sync::Arc;
use std::time::Duration;

use droid_testbed_core::config::ServerConfig;
use droid_testbed_core::probe::{self, WaitOutcome, WaitPolicy};
use droid_testbed_core::{CommandSpec, HealthProbe, ManagedProcess, PortProbe, Spawner, StopOutcome};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Last observed reachability of the server endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerState {
    /// Not probed yet
    Unknown,
    Reachable,
    Unreachable,
}

/// Start/stop of one Appium server endpoint
pub struct AutomationServerLifecycle {
    probe: Arc<dyn HealthProbe>,
    spawner: Arc<dyn Spawner>,
    process: ManagedProcess,
    command: Vec<String>,
    host: String,
    port: u16,
    start_policy: WaitPolicy,
    stop_grace: Duration,
    state: ServerState,
    cancel: Option<CancellationToken>,
}

impl AutomationServerLifecycle {
    pub fn new(config: &ServerConfig, spawner: Arc<dyn Spawner>) -> Self {
        let probe = PortProbe::new(config.host.clone(), config.port)
            .with_connect_timeout(config.connect_timeout());

        Self {
            probe: Arc::new(probe),
            spawner,
            process: ManagedProcess::new("appium"),
            command: config.command.clone(),
            host: config.host.clone(),
            port: config.port,
            start_policy: config.start_policy(),
            stop_grace: config.stop_grace(),
            state: ServerState::Unknown,
            cancel: None,
        }
    }

    /// Replace the readiness check
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Abort the startup poll early when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    /// Base URL clients connect to
    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Whether the server port accepts connections
    pub async fn is_running(&mut self) -> bool {
        let reachable = self.probe.probe().await;
        self.state = if reachable {
            ServerState::Reachable
        } else {
            ServerState::Unreachable
        };
        reachable
    }

    /// Start the server if it is not already reachable
    ///
    /// Returns whether the server ended up reachable. Failures are logged,
    /// never raised.
    pub async fn start(&mut self) -> bool {
        if self.is_running().await {
            info!("Appium server is already running at {}", self.endpoint_url());
            return true;
        }

        let Some((program, args)) = self.command.split_first() else {
            error!("No Appium launch command configured");
            return false;
        };
        let spec = CommandSpec::new(program).args(args.iter().cloned());

        info!("Starting Appium server...");
        if let Err(e) = self.process.spawn(self.spawner.as_ref(), &spec) {
            error!("Failed to start Appium server: {}", e);
            return false;
        }

        let outcome = probe::wait(self.probe.as_ref(), &self.start_policy, self.cancel.as_ref()).await;
        self.state = if outcome.is_ready() {
            ServerState::Reachable
        } else {
            ServerState::Unreachable
        };

        match outcome {
            WaitOutcome::Ready { attempts } => {
                info!("Appium server started successfully ({} check(s))", attempts);
                true
            }
            WaitOutcome::TimedOut { attempts } => {
                error!(
                    "Appium server failed to start after {} attempts ({:?})",
                    attempts,
                    self.start_policy.budget()
                );
                false
            }
            WaitOutcome::Cancelled { attempts } => {
                warn!("Appium startup wait cancelled after {} check(s)", attempts);
                false
            }
        }
    }

    /// Stop the server if this instance spawned it
    ///
    /// Terminates, waits out the grace period, then force kills once.
    pub async fn stop(&mut self) -> StopOutcome {
        if !self.process.is_owned() {
            info!("No Appium server process owned by this session; leaving it alone");
            return StopOutcome::NotOwned;
        }

        info!("Stopping Appium server...");
        let outcome = self.process.stop(self.stop_grace).await;
        if outcome.is_stopped() {
            info!("Appium server stopped: {}", outcome);
            self.state = ServerState::Unknown;
        } else {
            error!("Appium server may still be running: {}", outcome);
        }
        outcome
    }
}
