//! Emulator Lifecycle
//!
//! Creates, boots and stops the virtual device. Every decision is made
//! against what the SDK tools report right now, never against remembered
//! state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use droid_testbed_android_toolchain::{SdkEnvironment, SdkManager};
use droid_testbed_core::config::HarnessConfig;
use droid_testbed_core::probe::{self, PropertyProbe, WaitOutcome, WaitPolicy};
use droid_testbed_core::{CommandRunner, CommandSpec, HarnessError, ManagedProcess, Result, Spawner, SystemImage, ToolError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adb::AdbClient;
use crate::avd::{AvdConfig, AvdInfo, AvdManager};
use crate::device::VirtualDeviceState;

/// Emulator errors
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("Emulator not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to start emulator: {0}")]
    StartFailed(String),
}

impl From<ToolError> for EmulatorError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(path) => EmulatorError::NotFound(path),
            other => EmulatorError::StartFailed(other.to_string()),
        }
    }
}

impl From<EmulatorError> for HarnessError {
    fn from(e: EmulatorError) -> Self {
        match e {
            EmulatorError::NotFound(path) => HarnessError::Tool(ToolError::NotFound(path)),
            EmulatorError::StartFailed(msg) => HarnessError::Emulator(msg),
        }
    }
}

/// Emulator launch options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmulatorOptions {
    /// Disable audio
    pub no_audio: bool,
    /// Run without a window
    pub no_window: bool,
    /// GPU mode (auto, host, swiftshader_indirect, etc.)
    pub gpu: Option<String>,
    /// Additional arguments
    pub extra_args: Vec<String>,
}

impl EmulatorOptions {
    /// Options for headless/CI environments
    pub fn headless(gpu: &str) -> Self {
        Self {
            no_audio: true,
            no_window: true,
            gpu: Some(gpu.to_string()),
            extra_args: Vec::new(),
        }
    }

    /// Convert to command line arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.no_audio {
            args.push("-no-audio".to_string());
        }

        if self.no_window {
            args.push("-no-window".to_string());
        }

        if let Some(ref gpu) = self.gpu {
            args.push("-gpu".to_string());
            args.push(gpu.clone());
        }

        args.extend(self.extra_args.iter().cloned());

        args
    }
}

/// Result of asking the emulator to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorStopOutcome {
    /// `emu kill` was accepted
    KillRequested,
    /// `emu kill` failed; the emulator may still be running
    Failed { error: String },
}

impl EmulatorStopOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, EmulatorStopOutcome::KillRequested)
    }
}

impl std::fmt::Display for EmulatorStopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmulatorStopOutcome::KillRequested => write!(f, "kill requested"),
            EmulatorStopOutcome::Failed { error } => write!(f, "kill failed: {}", error),
        }
    }
}

/// Creation, boot and shutdown of one virtual device
pub struct VirtualDeviceLifecycle {
    avd: AvdManager,
    sdk: SdkManager,
    adb: AdbClient,
    spawner: Arc<dyn Spawner>,
    emulator_path: PathBuf,
    options: EmulatorOptions,
    profile: String,
    boot: WaitPolicy,
    process: ManagedProcess,
    stop_requested: bool,
    cancel: Option<CancellationToken>,
}

impl VirtualDeviceLifecycle {
    pub fn new(
        env: &SdkEnvironment,
        config: &HarnessConfig,
        runner: Arc<dyn CommandRunner>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let timeout = config.tools.command_timeout();
        let mut options = EmulatorOptions::headless(&config.device.gpu);
        options.extra_args = config.device.extra_args.clone();

        Self {
            avd: AvdManager::new(runner.clone(), env.emulator_path(), env.avdmanager_path())
                .with_timeout(timeout),
            sdk: SdkManager::new(runner.clone(), env.sdkmanager_path())
                .with_timeout(timeout)
                .with_license_answers(config.tools.license_accept_count),
            adb: AdbClient::new(runner, env.adb_path())
                .with_serial(config.device.serial.clone())
                .with_timeout(timeout),
            spawner,
            emulator_path: env.emulator_path(),
            options,
            profile: config.device.profile.clone(),
            boot: config.boot.policy(),
            process: ManagedProcess::new("emulator"),
            stop_requested: false,
            cancel: None,
        }
    }

    /// Abort boot waits early when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Read AVD details from `avd_home` instead of the default location
    pub fn with_avd_home(mut self, avd_home: PathBuf) -> Self {
        self.avd = self.avd.with_avd_home(avd_home);
        self
    }

    pub fn boot_policy(&self) -> &WaitPolicy {
        &self.boot
    }

    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    /// AVD names known to the emulator; empty when the tool is unavailable
    pub async fn list_existing(&self) -> Vec<String> {
        match self.avd.list_avds().await {
            Ok(avds) => {
                debug!("Existing AVDs: {:?}", avds);
                avds
            }
            Err(e) => {
                warn!("Could not list AVDs: {}", e);
                Vec::new()
            }
        }
    }

    /// Create `name` from `image` unless it already exists
    ///
    /// Returns whether anything was created. Any failing step aborts with a
    /// [`HarnessError::DeviceCreation`] and later steps are not run.
    pub async fn ensure_created(&self, name: &str, image: &SystemImage) -> Result<bool> {
        if self.list_existing().await.iter().any(|avd| avd == name) {
            info!("AVD {} already exists", name);
            return Ok(false);
        }

        info!("Creating AVD {} from {}", name, image);

        self.sdk
            .install_system_image(image)
            .await
            .map_err(|e| creation_error("install system image", e))?;
        self.sdk
            .accept_licenses()
            .await
            .map_err(|e| creation_error("accept licenses", e))?;
        self.avd
            .create_avd(&AvdConfig::new(name, image.clone(), &self.profile))
            .await
            .map_err(|e| creation_error("create avd", e))?;

        Ok(true)
    }

    /// Boot `name` and wait for it
    ///
    /// Returns `Ok(true)` at once when an emulator is already attached.
    /// `Ok(false)` means the boot wait timed out.
    pub async fn start(&mut self, name: &str) -> Result<bool> {
        if self.is_running().await {
            info!("Emulator already running");
            return Ok(true);
        }

        let spec = CommandSpec::new(&self.emulator_path)
            .arg("-avd")
            .arg(name)
            .args(self.options.to_args());

        info!("Starting emulator {}...", name);
        self.process
            .spawn(self.spawner.as_ref(), &spec)
            .map_err(EmulatorError::from)?;
        self.stop_requested = false;

        match self.boot_outcome(self.boot).await {
            WaitOutcome::Ready { .. } => Ok(true),
            WaitOutcome::TimedOut { .. } => Ok(false),
            WaitOutcome::Cancelled { .. } => Err(HarnessError::Cancelled),
        }
    }

    /// Poll `sys.boot_completed` until it reads `1` or `timeout` elapses
    pub async fn wait_for_boot(&self, timeout: Duration) -> bool {
        let policy = WaitPolicy::deadline(self.boot.interval, timeout);
        self.boot_outcome(policy).await.is_ready()
    }

    async fn boot_outcome(&self, policy: WaitPolicy) -> WaitOutcome {
        info!("Waiting for emulator to boot...");
        let probe = PropertyProbe::new(
            self.adb.runner(),
            self.adb.getprop_command("sys.boot_completed"),
            "1",
        );

        let outcome = probe::wait(&probe, &policy, self.cancel.as_ref()).await;
        match outcome {
            WaitOutcome::Ready { attempts } => {
                info!("Emulator booted successfully after {} check(s)", attempts)
            }
            WaitOutcome::TimedOut { attempts } => error!(
                "Emulator failed to boot within {:?} ({} checks)",
                policy.budget(),
                attempts
            ),
            WaitOutcome::Cancelled { attempts } => {
                warn!("Boot wait cancelled after {} check(s)", attempts)
            }
        }
        outcome
    }

    /// Whether an emulator is attached to adb (the configured serial, if any)
    pub async fn is_running(&self) -> bool {
        match self.adb.devices().await {
            Ok(devices) => devices.iter().any(|device| match self.adb.serial() {
                Some(serial) => device.serial == serial,
                None => device.is_emulator(),
            }),
            Err(e) => {
                debug!("adb devices failed: {}", e);
                false
            }
        }
    }

    /// Ask the emulator to shut down; does not wait for it
    pub async fn stop(&mut self) -> EmulatorStopOutcome {
        info!("Stopping emulator...");
        let outcome = match self.adb.emu_kill().await {
            Ok(()) => {
                info!("Emulator stopped");
                self.stop_requested = true;
                EmulatorStopOutcome::KillRequested
            }
            Err(e) => {
                warn!("Failed to stop emulator: {}", e);
                EmulatorStopOutcome::Failed { error: e.to_string() }
            }
        };

        if self.process.is_owned() {
            match self.process.reap() {
                Some(status) => debug!("Emulator process exited ({:?})", status.code),
                None if outcome.is_ok() => {
                    // Shutting down on its own; stop tracking it
                    self.process.release();
                }
                None => {}
            }
        }

        outcome
    }

    /// Reconcile the state of `name` from the AVD listing and adb
    pub async fn observe(&self, name: &str) -> VirtualDeviceState {
        if !self.list_existing().await.iter().any(|avd| avd == name) {
            return VirtualDeviceState::Absent;
        }

        if !self.is_running().await {
            return if self.stop_requested {
                VirtualDeviceState::Stopped
            } else {
                VirtualDeviceState::Created
            };
        }

        match self.adb.get_prop("sys.boot_completed").await {
            Ok(value) if value == "1" => VirtualDeviceState::Booted,
            _ => VirtualDeviceState::Booting,
        }
    }

    /// On-disk details of `name`, if readable
    pub async fn details(&self, name: &str) -> Option<AvdInfo> {
        match self.avd.details(name).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("No details for AVD {}: {}", name, e);
                None
            }
        }
    }
}

fn creation_error(step: &str, e: impl std::fmt::Display) -> HarnessError {
    error!("AVD creation failed at {}: {}", step, e);
    HarnessError::DeviceCreation {
        step: step.to_string(),
        detail: e.to_string(),
    }
}
