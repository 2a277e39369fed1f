//! ADB (Android Debug Bridge) Client
//!
//! The three adb calls the device lifecycle needs: the device listing, a
//! property read, and the emulator console kill.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use droid_testbed_core::{CommandRunner, CommandSpec, HarnessError, ToolError};
use tracing::debug;

use crate::device::{parse_devices, Device};

/// ADB errors
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("ADB not found at {0}")]
    NotFound(PathBuf),
    #[error("ADB command failed: {0}")]
    CommandFailed(String),
    #[error(transparent)]
    Tool(ToolError),
}

impl From<ToolError> for AdbError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(path) => AdbError::NotFound(path),
            ToolError::Failed { command, code, stderr } => {
                AdbError::CommandFailed(format!("`{}` exited with {:?}: {}", command, code, stderr.trim()))
            }
            other => AdbError::Tool(other),
        }
    }
}

impl From<AdbError> for HarnessError {
    fn from(e: AdbError) -> Self {
        match e {
            AdbError::NotFound(path) => HarnessError::Tool(ToolError::NotFound(path)),
            AdbError::Tool(tool) => HarnessError::Tool(tool),
            AdbError::CommandFailed(msg) => HarnessError::Emulator(msg),
        }
    }
}

/// ADB Client
pub struct AdbClient {
    runner: Arc<dyn CommandRunner>,
    adb_path: PathBuf,
    serial: Option<String>,
    timeout: Duration,
}

impl AdbClient {
    /// Create a new ADB client
    pub fn new(runner: Arc<dyn CommandRunner>, adb_path: PathBuf) -> Self {
        Self {
            runner,
            adb_path,
            serial: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Target one device with `-s`
    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }

    /// Base command, device-scoped when a serial is set
    fn command(&self, device_scoped: bool) -> CommandSpec {
        let spec = CommandSpec::new(&self.adb_path).timeout(self.timeout);
        match (&self.serial, device_scoped) {
            (Some(serial), true) => spec.arg("-s").arg(serial),
            _ => spec,
        }
    }

    /// `adb [-s serial] shell getprop <prop>`
    pub fn getprop_command(&self, prop: &str) -> CommandSpec {
        self.command(true).args(["shell", "getprop", prop])
    }

    async fn run(&self, spec: CommandSpec) -> Result<String, AdbError> {
        debug!("{}", spec.display_line());
        let output = self.runner.run(&spec).await?.ensure_success(&spec)?;
        Ok(output.stdout)
    }

    /// List attached devices
    pub async fn devices(&self) -> Result<Vec<Device>, AdbError> {
        let output = self.run(self.command(false).arg("devices")).await?;
        Ok(parse_devices(&output))
    }

    /// Get device property, trimmed
    pub async fn get_prop(&self, prop: &str) -> Result<String, AdbError> {
        let output = self.run(self.getprop_command(prop)).await?;
        Ok(output.trim().to_string())
    }

    /// Ask the emulator to shut down through its console; does not wait
    pub async fn emu_kill(&self) -> Result<(), AdbError> {
        self.run(self.command(true).args(["emu", "kill"])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droid_testbed_core::testing::ScriptedRunner;

    fn client(runner: &Arc<ScriptedRunner>) -> AdbClient {
        AdbClient::new(runner.clone(), PathBuf::from("/sdk/platform-tools/adb"))
    }

    #[tokio::test]
    async fn test_devices() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("adb devices", "List of devices attached\nemulator-5554\tdevice\n\n");

        let devices = client(&runner).devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_emulator());
    }

    #[tokio::test]
    async fn test_serial_scopes_device_commands_only() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("adb devices", "List of devices attached\n");
        runner.ok("adb -s emulator-5556 shell getprop sys.boot_completed", "1\n");
        runner.ok("adb -s emulator-5556 emu kill", "OK: killing emulator, bye bye\n");

        let adb = client(&runner).with_serial(Some("emulator-5556".to_string()));
        adb.devices().await.unwrap();
        assert_eq!(adb.get_prop("sys.boot_completed").await.unwrap(), "1");
        adb.emu_kill().await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "adb devices",
                "adb -s emulator-5556 shell getprop sys.boot_completed",
                "adb -s emulator-5556 emu kill",
            ]
        );
    }

    #[tokio::test]
    async fn test_errors() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("adb emu kill", 1, "error: no emulator detected\n");

        let adb = client(&runner);
        assert!(matches!(adb.devices().await, Err(AdbError::NotFound(_))));
        match adb.emu_kill().await {
            Err(AdbError::CommandFailed(msg)) => assert!(msg.contains("no emulator detected")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
