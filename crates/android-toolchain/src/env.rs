//! SDK Environment
//!
//! Locates the Android SDK, derives tool paths from it, and builds the
//! environment handed to every child process.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the SDK root came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkRootSource {
    /// `android.sdk_root` in the config file
    Config,
    /// `ANDROID_HOME`
    AndroidHome,
    /// `ANDROID_SDK_ROOT`
    AndroidSdkRoot,
    /// An existing directory in a well-known location
    Detected,
    /// Nothing found; the documented default
    Fallback,
}

/// Resolved Android SDK layout
#[derive(Debug, Clone)]
pub struct SdkEnvironment {
    sdk_root: PathBuf,
    source: SdkRootSource,
}

impl SdkEnvironment {
    /// Use `sdk_root` as given
    pub fn new(sdk_root: impl Into<PathBuf>) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            source: SdkRootSource::Config,
        }
    }

    /// Resolve from config, then the process environment, then well-known paths
    pub fn resolve(configured: Option<&Path>) -> Self {
        Self::resolve_with(configured, |key| std::env::var_os(key), dirs::home_dir())
    }

    /// Resolution order: configured path, `ANDROID_HOME`, `ANDROID_SDK_ROOT`,
    /// the first existing well-known directory, then `~/Library/Android/sdk`.
    pub fn resolve_with<F>(configured: Option<&Path>, lookup: F, home: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(path) = configured {
            return Self::new(path);
        }

        for (key, source) in [
            ("ANDROID_HOME", SdkRootSource::AndroidHome),
            ("ANDROID_SDK_ROOT", SdkRootSource::AndroidSdkRoot),
        ] {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                debug!("Using {} for the Android SDK", key);
                return Self {
                    sdk_root: PathBuf::from(value),
                    source,
                };
            }
        }

        if let Some(found) = Self::candidates(home.as_deref()).into_iter().find(|p| p.is_dir()) {
            info!("Detected Android SDK at {:?}", found);
            return Self {
                sdk_root: found,
                source: SdkRootSource::Detected,
            };
        }

        let fallback = home
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Android")
            .join("sdk");
        warn!(
            "ANDROID_HOME is not set and no SDK was found, falling back to {:?}",
            fallback
        );
        Self {
            sdk_root: fallback,
            source: SdkRootSource::Fallback,
        }
    }

    /// Common install locations
    fn candidates(home: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(home) = home {
            candidates.push(home.join("Android").join("Sdk"));
            candidates.push(home.join("Library").join("Android").join("sdk"));
            if cfg!(windows) {
                candidates.push(home.join("AppData").join("Local").join("Android").join("Sdk"));
            }
        }

        if cfg!(unix) {
            candidates.push(PathBuf::from("/opt/android-sdk"));
            candidates.push(PathBuf::from("/usr/local/android-sdk"));
        }

        candidates
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    pub fn source(&self) -> SdkRootSource {
        self.source
    }

    fn platform_tools_dir(&self) -> PathBuf {
        self.sdk_root.join("platform-tools")
    }

    fn emulator_dir(&self) -> PathBuf {
        self.sdk_root.join("emulator")
    }

    fn cmdline_tools_dir(&self) -> PathBuf {
        self.sdk_root.join("cmdline-tools").join("latest").join("bin")
    }

    /// Get the ADB executable path
    pub fn adb_path(&self) -> PathBuf {
        self.platform_tools_dir()
            .join(if cfg!(windows) { "adb.exe" } else { "adb" })
    }

    /// Get the emulator executable path
    pub fn emulator_path(&self) -> PathBuf {
        self.emulator_dir()
            .join(if cfg!(windows) { "emulator.exe" } else { "emulator" })
    }

    /// Get the sdkmanager path
    pub fn sdkmanager_path(&self) -> PathBuf {
        self.cmdline_tools_dir()
            .join(if cfg!(windows) { "sdkmanager.bat" } else { "sdkmanager" })
    }

    /// Get the avdmanager path
    pub fn avdmanager_path(&self) -> PathBuf {
        self.cmdline_tools_dir()
            .join(if cfg!(windows) { "avdmanager.bat" } else { "avdmanager" })
    }

    /// Directories prepended to PATH for child processes
    pub fn path_additions(&self) -> Vec<PathBuf> {
        vec![
            self.platform_tools_dir(),
            self.emulator_dir(),
            self.cmdline_tools_dir(),
        ]
    }

    /// ANDROID_HOME, ANDROID_SDK_ROOT and PATH for child processes
    pub fn command_env(&self) -> HashMap<String, String> {
        self.command_env_with(std::env::var("PATH").ok())
    }

    fn command_env_with(&self, original_path: Option<String>) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let root = self.sdk_root.to_string_lossy().to_string();
        vars.insert("ANDROID_HOME".to_string(), root.clone());
        vars.insert("ANDROID_SDK_ROOT".to_string(), root);

        let path_sep = if cfg!(windows) { ";" } else { ":" };
        let original_path = original_path.unwrap_or_default();
        let mut entries: Vec<String> = self
            .path_additions()
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !original_path.split(path_sep).any(|existing| existing == p))
            .collect();
        if !original_path.is_empty() {
            entries.push(original_path);
        }
        vars.insert("PATH".to_string(), entries.join(path_sep));

        vars
    }

    /// Check which tools are present on disk
    pub fn validate(&self) -> EnvironmentValidation {
        EnvironmentValidation {
            sdk_valid: self.sdk_root.is_dir(),
            adb_available: self.adb_path().exists(),
            emulator_available: self.emulator_path().exists(),
            sdkmanager_available: self.sdkmanager_path().exists(),
            avdmanager_available: self.avdmanager_path().exists(),
        }
    }
}

/// Environment validation result
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvironmentValidation {
    pub sdk_valid: bool,
    pub adb_available: bool,
    pub emulator_available: bool,
    pub sdkmanager_available: bool,
    pub avdmanager_available: bool,
}

impl EnvironmentValidation {
    /// Everything needed to create and boot a device
    pub fn is_ready(&self) -> bool {
        self.missing_components().is_empty()
    }

    /// Get list of missing components
    pub fn missing_components(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if !self.sdk_valid {
            missing.push("Android SDK");
        }
        if !self.adb_available {
            missing.push("ADB (platform-tools)");
        }
        if !self.emulator_available {
            missing.push("Emulator");
        }
        if !self.sdkmanager_available {
            missing.push("sdkmanager (cmdline-tools)");
        }
        if !self.avdmanager_available {
            missing.push("avdmanager (cmdline-tools)");
        }

        missing
    }
}
