//! SDK Manager
//!
//! Wraps `sdkmanager` to install the system image a virtual device needs
//! and to accept the SDK licenses non-interactively.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use droid_testbed_core::{CommandRunner, CommandSpec, HarnessError, SystemImage, ToolError};
use tracing::info;

/// SDK Manager errors
#[derive(Debug, thiserror::Error)]
pub enum SdkManagerError {
    #[error("sdkmanager not found at {0}")]
    SdkManagerNotFound(PathBuf),
    #[error("Command failed: {0}")]
    CommandFailed(String),
    #[error(transparent)]
    Tool(ToolError),
}

impl From<ToolError> for SdkManagerError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(path) => SdkManagerError::SdkManagerNotFound(path),
            ToolError::Failed { command, code, stderr } => {
                SdkManagerError::CommandFailed(format!("`{}` exited with {:?}: {}", command, code, stderr))
            }
            other => SdkManagerError::Tool(other),
        }
    }
}

impl From<SdkManagerError> for HarnessError {
    fn from(e: SdkManagerError) -> Self {
        match e {
            SdkManagerError::SdkManagerNotFound(path) => HarnessError::Tool(ToolError::NotFound(path)),
            SdkManagerError::Tool(tool) => HarnessError::Tool(tool),
            SdkManagerError::CommandFailed(msg) => HarnessError::AndroidSdk(msg),
        }
    }
}

/// Android SDK Manager wrapper
pub struct SdkManager {
    runner: Arc<dyn CommandRunner>,
    sdkmanager_path: PathBuf,
    timeout: Duration,
    license_answers: u32,
}

impl SdkManager {
    /// Create a new SDK manager
    pub fn new(runner: Arc<dyn CommandRunner>, sdkmanager_path: PathBuf) -> Self {
        Self {
            runner,
            sdkmanager_path,
            timeout: Duration::from_secs(600),
            license_answers: 20,
        }
    }

    /// Limit for each sdkmanager invocation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many `y` answers to feed license prompts
    pub fn with_license_answers(mut self, count: u32) -> Self {
        self.license_answers = count;
        self
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.sdkmanager_path)
            .stdin("y\n".repeat(self.license_answers as usize))
            .timeout(self.timeout)
    }

    /// Install (or confirm) one SDK package
    pub async fn install_package(&self, package: &str) -> Result<(), SdkManagerError> {
        info!("Installing SDK package: {}", package);
        let spec = self.command().arg(package);
        self.runner.run(&spec).await?.ensure_success(&spec)?;
        Ok(())
    }

    /// Install the system image backing a virtual device
    pub async fn install_system_image(&self, image: &SystemImage) -> Result<(), SdkManagerError> {
        self.install_package(&image.package()).await
    }

    /// Accept all licenses
    pub async fn accept_licenses(&self) -> Result<(), SdkManagerError> {
        info!("Accepting Android SDK licenses...");
        let spec = self.command().arg("--licenses");
        self.runner.run(&spec).await?.ensure_success(&spec)?;
        info!("Licenses accepted");
        Ok(())
    }

    pub fn sdkmanager_path(&self) -> &PathBuf {
        &self.sdkmanager_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droid_testbed_core::testing::ScriptedRunner;

    const IMAGE_LINE: &str = "sdkmanager system-images;android-30;google_apis;arm64-v8a";

    fn manager(runner: &Arc<ScriptedRunner>) -> SdkManager {
        SdkManager::new(runner.clone(), PathBuf::from("/sdk/cmdline-tools/latest/bin/sdkmanager"))
            .with_license_answers(3)
    }

    #[tokio::test]
    async fn test_install_system_image() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(IMAGE_LINE, "[=======================================] 100%\n");

        manager(&runner)
            .install_system_image(&SystemImage::default())
            .await
            .unwrap();

        let specs = runner.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].display_line(), IMAGE_LINE);
        assert_eq!(specs[0].stdin.as_deref(), Some("y\ny\ny\n"));
    }

    #[tokio::test]
    async fn test_licenses_feed_answers() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("sdkmanager --licenses", "All SDK package licenses accepted.\n");

        manager(&runner).accept_licenses().await.unwrap();
        assert_eq!(runner.calls(), vec!["sdkmanager --licenses".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_install_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(IMAGE_LINE, 1, "Failed to find package");

        let err = manager(&runner)
            .install_system_image(&SystemImage::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SdkManagerError::CommandFailed(ref msg) if msg.contains("Failed to find package")));
    }

    #[tokio::test]
    async fn test_missing_sdkmanager() {
        let runner = Arc::new(ScriptedRunner::new());
        let err = manager(&runner).accept_licenses().await.unwrap_err();
        assert!(matches!(err, SdkManagerError::SdkManagerNotFound(_)));
        assert!(matches!(HarnessError::from(err), HarnessError::Tool(ToolError::NotFound(_))));
    }
}
