//! Session Capabilities
//!
//! The W3C capability document a WebDriver client posts to `/session` to
//! drive the booted emulator through UiAutomator2.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Android session capabilities (`appium:` vendor prefix for non-W3C keys)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "platformName")]
    pub platform_name: String,
    #[serde(rename = "appium:automationName")]
    pub automation_name: String,
    #[serde(rename = "appium:deviceName")]
    pub device_name: String,
    /// Absolute path of the APK under test
    #[serde(rename = "appium:app", default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

impl Capabilities {
    /// UiAutomator2 on Android targeting `device_name`
    pub fn android(device_name: &str) -> Self {
        Self {
            platform_name: "Android".to_string(),
            automation_name: "UiAutomator2".to_string(),
            device_name: device_name.to_string(),
            app: None,
        }
    }

    /// Attach the app under test if it exists; a missing file is only a warning
    pub fn with_app(mut self, app_path: &Path) -> Self {
        let absolute = if app_path.is_absolute() {
            app_path.to_path_buf()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(app_path),
                Err(_) => app_path.to_path_buf(),
            }
        };

        if absolute.exists() {
            info!("Using app at path: {}", absolute.display());
            self.app = Some(absolute.to_string_lossy().to_string());
        } else {
            warn!("App not found at path: {}", absolute.display());
        }
        self
    }

    /// Body of a W3C new-session request
    pub fn new_session_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(serde_json::json!({
            "capabilities": {
                "alwaysMatch": serde_json::to_value(self)?,
                "firstMatch": [{}],
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_android_defaults() {
        let caps = Capabilities::android("emulator-5554");
        let value = serde_json::to_value(&caps).unwrap();

        assert_eq!(value["platformName"], "Android");
        assert_eq!(value["appium:automationName"], "UiAutomator2");
        assert_eq!(value["appium:deviceName"], "emulator-5554");
        assert!(value.get("appium:app").is_none());
    }

    #[test]
    fn test_existing_app_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("ApiDemos-debug.apk");
        std::fs::write(&apk, b"PK").unwrap();

        let caps = Capabilities::android("emulator-5554").with_app(&apk);
        assert_eq!(caps.app.as_deref(), Some(apk.to_string_lossy().as_ref()));
    }

    #[test]
    fn test_missing_app_is_left_out() {
        let caps = Capabilities::android("emulator-5554").with_app(Path::new("apps/does-not-exist.apk"));
        assert_eq!(caps.app, None);
    }

    #[test]
    fn test_new_session_payload() {
        let payload = Capabilities::android("emulator-5554").new_session_payload().unwrap();
        assert_eq!(payload["capabilities"]["alwaysMatch"]["platformName"], "Android");
        assert_eq!(payload["capabilities"]["firstMatch"], serde_json::json!([{}]));
    }
}
