//! Test session orchestration
//!
//! [`SessionOrchestrator`] brings the virtual device and the Appium server
//! up in order, and takes them down in reverse.
//!
//! Setup aborts on prerequisite, creation or boot failures. A server that
//! does not come up only degrades the session. Teardown always runs every
//! step and reports what happened instead of failing.

use std::fmt;
use std::sync::Arc;

use droid_testbed_android_toolchain::SdkEnvironment;
use droid_testbed_appium::AutomationServerLifecycle;
use droid_testbed_core::config::HarnessConfig;
use droid_testbed_core::{HarnessError, Result, StopOutcome, SystemImage, SystemRunner, SystemSpawner};
use droid_testbed_emulator_bridge::{EmulatorStopOutcome, VirtualDeviceLifecycle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::prerequisite::{ArtifactPresence, Prerequisite};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    DeviceEnsured,
    DeviceBooted,
    ServerReady,
    /// Device booted but the server never became reachable
    ServerDegraded,
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::DeviceEnsured => "device ensured",
            SessionState::DeviceBooted => "device booted",
            SessionState::ServerReady => "server ready",
            SessionState::ServerDegraded => "server degraded",
            SessionState::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Outcome of each teardown step, in the order they ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub server: StopOutcome,
    pub device: EmulatorStopOutcome,
}

impl TeardownReport {
    /// Every step ended with its process gone or asked to go
    pub fn is_clean(&self) -> bool {
        self.server.is_stopped() && self.device.is_ok()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "appium server: {}; emulator: {}", self.server, self.device)
    }
}

/// Composes the device and server lifecycles into one session
pub struct SessionOrchestrator {
    device: VirtualDeviceLifecycle,
    server: AutomationServerLifecycle,
    prerequisites: Vec<Box<dyn Prerequisite>>,
    avd_name: String,
    image: SystemImage,
    boot_timeout_secs: u64,
    state: SessionState,
}

impl SessionOrchestrator {
    pub fn new(device: VirtualDeviceLifecycle, server: AutomationServerLifecycle, config: &HarnessConfig) -> Self {
        Self {
            device,
            server,
            prerequisites: Vec::new(),
            avd_name: config.device.name.clone(),
            image: config.device.image.clone(),
            boot_timeout_secs: config.boot.timeout_secs,
            state: SessionState::Idle,
        }
    }

    /// Wire real SDK tools and processes from `config`
    ///
    /// `cancel` cuts the boot and server waits short.
    pub fn from_config(config: &HarnessConfig, cancel: CancellationToken) -> Self {
        let env = SdkEnvironment::resolve(config.android.sdk_root.as_deref());
        info!("Using Android SDK at {}", env.sdk_root().display());

        let vars = env.command_env();
        let runner = Arc::new(SystemRunner::new(vars.clone()));
        let spawner = Arc::new(SystemSpawner::new(vars));

        let device = VirtualDeviceLifecycle::new(&env, config, runner, spawner.clone())
            .with_cancellation(cancel.clone());
        let server = AutomationServerLifecycle::new(&config.server, spawner).with_cancellation(cancel);

        Self::new(device, server, config)
            .with_prerequisite(Box::new(ArtifactPresence::from_config(&config.artifact)))
    }

    pub fn with_prerequisite(mut self, prerequisite: Box<dyn Prerequisite>) -> Self {
        self.prerequisites.push(prerequisite);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn avd_name(&self) -> &str {
        &self.avd_name
    }

    pub fn device(&self) -> &VirtualDeviceLifecycle {
        &self.device
    }

    pub fn server(&self) -> &AutomationServerLifecycle {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut AutomationServerLifecycle {
        &mut self.server
    }

    /// Bring the device and server up
    ///
    /// Safe to call again: every start re-probes before spawning.
    pub async fn setup(&mut self) -> Result<SessionState> {
        info!("Setting up test session for AVD {}", self.avd_name);

        for prerequisite in &self.prerequisites {
            if let Err(e) = prerequisite.check().await {
                error!("Prerequisite {} failed: {}", prerequisite.name(), e);
                return Err(e);
            }
        }

        self.device.ensure_created(&self.avd_name, &self.image).await?;
        self.state = SessionState::DeviceEnsured;

        if !self.device.start(&self.avd_name).await? {
            error!("Emulator failed to start.");
            return Err(HarnessError::BootTimeout {
                name: self.avd_name.clone(),
                waited_secs: self.boot_timeout_secs,
            });
        }
        self.state = SessionState::DeviceBooted;

        self.state = if self.server.start().await {
            SessionState::ServerReady
        } else {
            warn!("Continuing without a reachable Appium server");
            SessionState::ServerDegraded
        };

        info!("Test session is {}", self.state);
        Ok(self.state)
    }

    /// Stop the server, then the device. Never fails.
    pub async fn teardown(&mut self) -> TeardownReport {
        info!("Stopping Appium server and emulator...");

        let server = self.server.stop().await;
        let device = self.device.stop().await;
        let report = TeardownReport { server, device };

        if report.is_clean() {
            info!("Teardown complete: {}", report);
        } else {
            warn!("Teardown finished with problems: {}", report);
        }

        self.state = SessionState::TornDown;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use droid_testbed_core::testing::{CallLog, FakeSpawner, ScriptedProbe, ScriptedRunner};
    use tokio::time::Instant;

    const LIST: &str = "emulator -list-avds";
    const DEVICES: &str = "adb devices";
    const BOOT: &str = "adb shell getprop sys.boot_completed";
    const EMU_KILL: &str = "adb emu kill";

    const NO_DEVICES: &str = "List of devices attached\n\n";
    const ONE_EMULATOR: &str = "List of devices attached\nemulator-5554\tdevice\n\n";

    struct Harness {
        runner: Arc<ScriptedRunner>,
        spawner: Arc<FakeSpawner>,
        probe: Arc<ScriptedProbe>,
        log: CallLog,
        session: SessionOrchestrator,
    }

    fn harness(probe: ScriptedProbe) -> Harness {
        let config = HarnessConfig::default();
        let log = CallLog::new();
        let runner = Arc::new(ScriptedRunner::new().with_log(log.clone()));
        let spawner = Arc::new(FakeSpawner::new().with_log(log.clone()));
        let probe = Arc::new(probe);

        let device = VirtualDeviceLifecycle::new(
            &SdkEnvironment::new("/sdk"),
            &config,
            runner.clone(),
            spawner.clone(),
        );
        let server = AutomationServerLifecycle::new(&config.server, spawner.clone()).with_probe(probe.clone());

        Harness {
            runner,
            spawner,
            probe,
            log,
            session: SessionOrchestrator::new(device, server, &config),
        }
    }

    struct Failing;

    #[async_trait]
    impl Prerequisite for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn check(&self) -> Result<()> {
            Err(HarnessError::Prerequisite {
                name: "failing".to_string(),
                detail: "always fails".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_boots_device_then_server() {
        let mut h = harness(ScriptedProbe::always());
        h.runner.ok(LIST, "test_device\n");
        h.runner.ok(DEVICES, NO_DEVICES);
        h.runner.ok(BOOT, "");
        h.runner.ok(BOOT, "0");
        h.runner.ok(BOOT, "1");

        let started = Instant::now();
        let state = h.session.setup().await.unwrap();

        assert_eq!(state, SessionState::ServerReady);
        assert_eq!(h.runner.count(BOOT), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        // Emulator spawned, pre-existing server left alone
        assert_eq!(h.spawner.spawn_count(), 1);
        assert_eq!(h.probe.attempts(), 1);
        assert_eq!(h.runner.calls()[..2], [LIST.to_string(), DEVICES.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_prerequisite_aborts_before_device_work() {
        let mut h = harness(ScriptedProbe::always());
        h.session = h.session.with_prerequisite(Box::new(Failing));

        let err = h.session.setup().await.unwrap_err();

        assert!(matches!(err, HarnessError::Prerequisite { .. }));
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_creation_failure_aborts() {
        let mut h = harness(ScriptedProbe::always());
        h.runner.ok(LIST, "");

        let err = h.session.setup().await.unwrap_err();

        assert!(matches!(err, HarnessError::DeviceCreation { .. }));
        assert_eq!(h.spawner.spawn_count(), 0);
        assert_eq!(h.probe.attempts(), 0);
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_timeout_aborts_without_server() {
        let mut h = harness(ScriptedProbe::always());
        h.runner.ok(LIST, "test_device\n");
        h.runner.ok(DEVICES, NO_DEVICES);
        h.runner.ok(BOOT, "0");

        let err = h.session.setup().await.unwrap_err();

        assert!(matches!(
            err,
            HarnessError::BootTimeout { ref name, waited_secs: 120 } if name == "test_device"
        ));
        assert_eq!(h.probe.attempts(), 0);
        assert_eq!(h.session.state(), SessionState::DeviceEnsured);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_degrades_session() {
        let mut h = harness(ScriptedProbe::never());
        h.runner.ok(LIST, "test_device\n");
        h.runner.ok(DEVICES, ONE_EMULATOR);

        let started = Instant::now();
        let state = h.session.setup().await.unwrap();

        assert_eq!(state, SessionState::ServerDegraded);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(h.probe.attempts(), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_setup_does_not_respawn() {
        let mut h = harness(ScriptedProbe::ready_after(2));
        h.runner.ok(LIST, "test_device\n");
        h.runner.ok(DEVICES, NO_DEVICES);
        h.runner.ok(DEVICES, ONE_EMULATOR);
        h.runner.ok(BOOT, "1");

        assert_eq!(h.session.setup().await.unwrap(), SessionState::ServerReady);
        assert_eq!(h.session.setup().await.unwrap(), SessionState::ServerReady);

        // One emulator, one appium
        assert_eq!(h.spawner.spawn_count(), 2);
        assert_eq!(h.runner.count(BOOT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_server_then_device() {
        let mut h = harness(ScriptedProbe::ready_after(2));
        h.runner.ok(LIST, "test_device\n");
        h.runner.ok(DEVICES, ONE_EMULATOR);
        h.runner.ok(EMU_KILL, "OK: killing emulator, bye bye\n");
        h.session.setup().await.unwrap();

        let report = h.session.teardown().await;

        assert_eq!(report.server, StopOutcome::Exited { code: Some(0) });
        assert_eq!(report.device, EmulatorStopOutcome::KillRequested);
        assert!(report.is_clean());
        assert_eq!(h.spawner.stats().terminates(), 1);
        assert_eq!(h.runner.count(EMU_KILL), 1);
        assert_eq!(h.session.state(), SessionState::TornDown);

        let server_stop = h.log.position("terminate appium").unwrap();
        let device_stop = h.log.position(EMU_KILL).unwrap();
        assert!(
            server_stop < device_stop,
            "server must stop before the emulator: {:?}",
            h.log.entries()
        );
        assert_eq!(h.log.entries().last().map(String::as_str), Some(EMU_KILL));
    }

    #[tokio::test]
    async fn test_teardown_never_fails() {
        let mut h = harness(ScriptedProbe::never());

        let report = h.session.teardown().await;

        assert_eq!(report.server, StopOutcome::NotOwned);
        assert!(matches!(report.device, EmulatorStopOutcome::Failed { .. }));
        assert!(!report.is_clean());
        assert_eq!(h.session.state(), SessionState::TornDown);
    }
}
