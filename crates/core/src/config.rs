//! Harness Configuration
//!
//! Everything the lifecycles need to know about the host:
//! - Android SDK location
//! - Virtual device identity and emulator flags
//! - Boot and server polling parameters
//! - Appium launch command and endpoint
//! - Test artifact location

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::probe::WaitPolicy;

/// Environment variable overriding `device.name`
pub const ENV_AVD_NAME: &str = "DROID_TESTBED_AVD";

/// Environment variable overriding `server.port`
pub const ENV_APPIUM_PORT: &str = "DROID_TESTBED_APPIUM_PORT";

/// A system image package, e.g. `system-images;android-30;google_apis;arm64-v8a`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SystemImage {
    pub api_level: u32,
    /// google_apis, google_apis_playstore, default
    pub variant: String,
    /// x86_64, arm64-v8a, etc.
    pub abi: String,
}

impl SystemImage {
    pub fn new(api_level: u32, variant: &str, abi: &str) -> Self {
        Self {
            api_level,
            variant: variant.to_string(),
            abi: abi.to_string(),
        }
    }

    /// Get the package string for sdkmanager / avdmanager
    pub fn package(&self) -> String {
        format!("system-images;android-{};{};{}", self.api_level, self.variant, self.abi)
    }
}

impl Default for SystemImage {
    fn default() -> Self {
        Self::new(30, "google_apis", "arm64-v8a")
    }
}

impl fmt::Display for SystemImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package())
    }
}

impl FromStr for SystemImage {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || HarnessError::Config(format!("invalid system image reference: {:?}", s));

        let parts: Vec<&str> = s.trim().split(';').collect();
        let [prefix, platform, variant, abi] = parts.as_slice() else {
            return Err(invalid());
        };
        if *prefix != "system-images" || variant.is_empty() || abi.is_empty() {
            return Err(invalid());
        }
        let api_level = platform
            .strip_prefix("android-")
            .and_then(|level| level.parse().ok())
            .ok_or_else(invalid)?;

        Ok(Self::new(api_level, variant, abi))
    }
}

impl TryFrom<String> for SystemImage {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SystemImage> for String {
    fn from(image: SystemImage) -> Self {
        image.package()
    }
}

/// Android SDK configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Path to Android SDK; resolved from the environment when unset
    pub sdk_root: Option<PathBuf>,
}

/// One-shot tool invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Limit for sdkmanager, avdmanager and adb invocations
    pub command_timeout_secs: u64,
    /// How many `y` answers to feed `sdkmanager --licenses`
    pub license_accept_count: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 600,
            license_accept_count: 20,
        }
    }
}

impl ToolsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Virtual device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// AVD name
    pub name: String,
    /// System image backing the AVD
    pub image: SystemImage,
    /// avdmanager device profile
    pub profile: String,
    /// Emulator GPU mode (auto, host, swiftshader_indirect, etc.)
    pub gpu: String,
    /// adb serial to target; adb picks the only device when unset
    pub serial: Option<String>,
    /// Additional emulator arguments
    pub extra_args: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "test_device".to_string(),
            image: SystemImage::default(),
            profile: "pixel".to_string(),
            gpu: "swiftshader_indirect".to_string(),
            serial: None,
            extra_args: Vec::new(),
        }
    }
}

/// Boot wait configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_secs: 120,
        }
    }
}

impl BootConfig {
    pub fn policy(&self) -> WaitPolicy {
        WaitPolicy::deadline(
            Duration::from_secs(self.interval_secs),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

/// Appium server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Launch command; a bare program name is looked up on PATH
    pub command: Vec<String>,
    pub host: String,
    pub port: u16,
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    /// How long to wait after terminate before killing
    pub stop_grace_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: vec!["appium".to_string()],
            host: "127.0.0.1".to_string(),
            port: 4723,
            poll_interval_secs: 2,
            max_attempts: 30,
            stop_grace_secs: 5,
            connect_timeout_ms: 500,
        }
    }
}

impl ServerConfig {
    pub fn start_policy(&self) -> WaitPolicy {
        WaitPolicy::attempts(Duration::from_secs(self.poll_interval_secs), self.max_attempts)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Test artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// APK under test, relative paths resolve against the working directory
    pub path: PathBuf,
    /// Abort setup when the artifact is missing
    pub required: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("apps").join("ApiDemos-debug.apk"),
            required: true,
        }
    }
}

/// Main harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub android: AndroidConfig,
    pub tools: ToolsConfig,
    pub device: DeviceConfig,
    pub boot: BootConfig,
    pub server: ServerConfig,
    pub artifact: ArtifactConfig,
}

impl HarnessConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droid-testbed", "droid-testbed")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load from `path`, or from the default location, then apply
    /// environment overrides. A missing default file means defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading config from {:?}", path);
                Self::from_toml(&tokio::fs::read_to_string(path).await?)?
            }
            None => match Self::config_file().filter(|file| file.exists()) {
                Some(file) => {
                    debug!("Loading config from {:?}", file);
                    Self::from_toml(&tokio::fs::read_to_string(&file).await?)?
                }
                None => {
                    info!("Config file not found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject polling parameters that would spin or never probe
    pub fn validate(&self) -> Result<()> {
        if self.boot.interval_secs == 0 {
            return Err(HarnessError::Config("boot.interval_secs must be at least 1".into()));
        }
        if self.server.poll_interval_secs == 0 {
            return Err(HarnessError::Config(
                "server.poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.server.max_attempts == 0 {
            return Err(HarnessError::Config("server.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `DROID_TESTBED_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_AVD_NAME).filter(|n| !n.trim().is_empty()) {
            debug!("{} overrides device name: {}", ENV_AVD_NAME, name);
            self.device.name = name.trim().to_string();
        }

        if let Some(port) = lookup(ENV_APPIUM_PORT) {
            self.server.port = port.trim().parse().map_err(|_| {
                HarnessError::Config(format!("{} is not a port number: {:?}", ENV_APPIUM_PORT, port))
            })?;
        }

        Ok(())
    }
}
