//! AVD (Android Virtual Device) Manager
//!
//! Lists and creates Android Virtual Devices, and reads their on-disk
//! configuration for status reporting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use configparser::ini::Ini;
use droid_testbed_core::{CommandRunner, CommandSpec, HarnessError, SystemImage, ToolError};
use tracing::{debug, info};

/// AVD Manager errors
#[derive(Debug, thiserror::Error)]
pub enum AvdError {
    #[error("AVD not found: {0}")]
    NotFound(String),
    #[error("AVD tool not found at {0}. Is Android SDK installed?")]
    ToolNotFound(PathBuf),
    #[error("Failed to create AVD: {0}")]
    CreateFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Tool(ToolError),
}

impl From<ToolError> for AvdError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(path) => AvdError::ToolNotFound(path),
            other => AvdError::Tool(other),
        }
    }
}

impl From<AvdError> for HarnessError {
    fn from(e: AvdError) -> Self {
        match e {
            AvdError::ToolNotFound(path) => HarnessError::Tool(ToolError::NotFound(path)),
            AvdError::Tool(tool) => HarnessError::Tool(tool),
            AvdError::Io(io) => HarnessError::Io(io),
            other => HarnessError::Emulator(other.to_string()),
        }
    }
}

/// AVD information read from `<avd_home>/<name>.ini` and its `config.ini`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvdInfo {
    pub name: String,
    pub path: PathBuf,
    /// e.g. `android-30`
    pub target: String,
    pub abi: String,
    pub image_dir: Option<String>,
    pub device_name: Option<String>,
    pub ram_size: Option<u32>,
}

/// AVD configuration for creation
#[derive(Debug, Clone)]
pub struct AvdConfig {
    pub name: String,
    pub image: SystemImage,
    /// avdmanager device profile
    pub device: String,
    /// Overwrite an existing AVD of the same name
    pub force: bool,
}

impl AvdConfig {
    pub fn new(name: &str, image: SystemImage, device: &str) -> Self {
        Self {
            name: name.to_string(),
            image,
            device: device.to_string(),
            force: true,
        }
    }
}

/// AVD Manager
pub struct AvdManager {
    runner: Arc<dyn CommandRunner>,
    emulator_path: PathBuf,
    avdmanager_path: PathBuf,
    avd_home: PathBuf,
    timeout: Duration,
}

impl AvdManager {
    /// Create a new AVD manager
    pub fn new(runner: Arc<dyn CommandRunner>, emulator_path: PathBuf, avdmanager_path: PathBuf) -> Self {
        Self {
            runner,
            emulator_path,
            avdmanager_path,
            avd_home: Self::default_avd_home(),
            timeout: Duration::from_secs(600),
        }
    }

    /// `ANDROID_AVD_HOME`, else `~/.android/avd`
    pub fn default_avd_home() -> PathBuf {
        match std::env::var_os("ANDROID_AVD_HOME").filter(|v| !v.is_empty()) {
            Some(home) => PathBuf::from(home),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".android")
                .join("avd"),
        }
    }

    pub fn with_avd_home(mut self, avd_home: PathBuf) -> Self {
        self.avd_home = avd_home;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn avd_home(&self) -> &Path {
        &self.avd_home
    }

    /// Names printed by `emulator -list-avds`, one per non-empty line
    pub async fn list_avds(&self) -> Result<Vec<String>, AvdError> {
        let spec = CommandSpec::new(&self.emulator_path)
            .arg("-list-avds")
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await?.ensure_success(&spec)?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Create a new AVD
    pub async fn create_avd(&self, config: &AvdConfig) -> Result<(), AvdError> {
        info!("Creating AVD: {}", config.name);

        let mut spec = CommandSpec::new(&self.avdmanager_path)
            .args(["create", "avd"])
            .arg("-n")
            .arg(&config.name)
            .arg("-k")
            .arg(config.image.package())
            .arg("-d")
            .arg(&config.device);
        if config.force {
            spec = spec.arg("--force");
        }

        // Answer "no" to the custom hardware profile question
        let spec = spec.stdin("no\n").timeout(self.timeout);

        let output = self.runner.run(&spec).await?;
        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(AvdError::CreateFailed(format!("exit {:?}: {}", output.code, detail)));
        }

        info!("AVD created successfully: {}", config.name);
        Ok(())
    }

    /// Read on-disk details of `name`
    pub async fn details(&self, name: &str) -> Result<AvdInfo, AvdError> {
        let ini_path = self.avd_home.join(format!("{}.ini", name));
        if !ini_path.exists() {
            return Err(AvdError::NotFound(name.to_string()));
        }

        let ini = read_ini(&ini_path).await?;
        let avd_path = ini
            .get("default", "path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.avd_home.join(format!("{}.avd", name)));

        let mut info = AvdInfo {
            name: name.to_string(),
            path: avd_path.clone(),
            target: ini.get("default", "target").unwrap_or_default(),
            ..Default::default()
        };

        let config_path = avd_path.join("config.ini");
        if config_path.exists() {
            let config = read_ini(&config_path).await?;
            info.abi = config.get("default", "abi.type").unwrap_or_default();
            info.image_dir = config.get("default", "image.sysdir.1");
            info.device_name = config.get("default", "hw.device.name");
            info.ram_size = config
                .get("default", "hw.ramSize")
                .and_then(|s| s.trim_end_matches(['M', 'B']).parse().ok());
        } else {
            debug!("No config.ini for AVD {} at {:?}", name, config_path);
        }

        Ok(info)
    }
}

async fn read_ini(path: &Path) -> Result<Ini, AvdError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut ini = Ini::new();
    ini.read(content).map_err(AvdError::Parse)?;
    Ok(ini)
}

#[cfg(test)]
mod tests {
    use super::*;
    use droid_testbed_core::testing::ScriptedRunner;

    const CREATE_LINE: &str =
        "avdmanager create avd -n test_device -k system-images;android-30;google_apis;arm64-v8a -d pixel --force";

    fn manager(runner: &Arc<ScriptedRunner>) -> AvdManager {
        AvdManager::new(
            runner.clone(),
            PathBuf::from("/sdk/emulator/emulator"),
            PathBuf::from("/sdk/cmdline-tools/latest/bin/avdmanager"),
        )
    }

    #[tokio::test]
    async fn test_list_avds_trims_and_skips_blank_lines() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("emulator -list-avds", "Pixel_6_API_33\n  test_device  \n\n");

        let avds = manager(&runner).list_avds().await.unwrap();
        assert_eq!(avds, vec!["Pixel_6_API_33", "test_device"]);
    }

    #[tokio::test]
    async fn test_create_avd_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(CREATE_LINE, "");

        let config = AvdConfig::new("test_device", SystemImage::default(), "pixel");
        manager(&runner).create_avd(&config).await.unwrap();

        let specs = runner.specs();
        assert_eq!(specs[0].display_line(), CREATE_LINE);
        assert_eq!(specs[0].stdin.as_deref(), Some("no\n"));
    }

    #[tokio::test]
    async fn test_create_avd_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(CREATE_LINE, 1, "Error: Package path is not valid.");

        let config = AvdConfig::new("test_device", SystemImage::default(), "pixel");
        let err = manager(&runner).create_avd(&config).await.unwrap_err();
        assert!(matches!(err, AvdError::CreateFailed(ref msg) if msg.contains("Package path is not valid")));
    }

    #[tokio::test]
    async fn test_details_from_ini_files() {
        let home = tempfile::tempdir().unwrap();
        let avd_dir = home.path().join("test_device.avd");
        std::fs::create_dir_all(&avd_dir).unwrap();
        std::fs::write(
            home.path().join("test_device.ini"),
            format!("avd.ini.encoding=UTF-8\npath={}\ntarget=android-30\n", avd_dir.display()),
        )
        .unwrap();
        std::fs::write(
            avd_dir.join("config.ini"),
            "abi.type=arm64-v8a\nhw.device.name=pixel\nhw.ramSize=1536M\nimage.sysdir.1=system-images/android-30/google_apis/arm64-v8a/\n",
        )
        .unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let info = manager(&runner)
            .with_avd_home(home.path().to_path_buf())
            .details("test_device")
            .await
            .unwrap();

        assert_eq!(info.path, avd_dir);
        assert_eq!(info.target, "android-30");
        assert_eq!(info.abi, "arm64-v8a");
        assert_eq!(info.device_name.as_deref(), Some("pixel"));
        assert_eq!(info.ram_size, Some(1536));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_details_missing_avd() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let err = manager(&runner)
            .with_avd_home(home.path().to_path_buf())
            .details("test_device")
            .await
            .unwrap_err();
        assert!(matches!(err, AvdError::NotFound(_)));
    }
}
