//! Error types for droid-testbed
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::exec::ToolError;

/// Main error type for droid-testbed
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Android SDK error: {0}")]
    AndroidSdk(String),

    #[error("Device creation failed at {step}: {detail}")]
    DeviceCreation { step: String, detail: String },

    #[error("Emulator error: {0}")]
    Emulator(String),

    #[error("Device {name} did not boot within {waited_secs}s")]
    BootTimeout { name: String, waited_secs: u64 },

    #[error("Prerequisite {name} failed: {detail}")]
    Prerequisite { name: String, detail: String },

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for droid-testbed operations
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            HarnessError::Io(e) => format!("File operation failed: {}", e),
            HarnessError::Config(msg) => format!("Configuration error: {}", msg),
            HarnessError::Tool(ToolError::NotFound(path)) => format!(
                "Required tool not found at {}. Check ANDROID_HOME / ANDROID_SDK_ROOT.",
                path.display()
            ),
            HarnessError::AndroidSdk(msg) => format!("Android SDK issue: {}", msg),
            HarnessError::DeviceCreation { step, detail } => {
                format!("Could not create the virtual device ({}): {}", step, detail)
            }
            HarnessError::BootTimeout { name, waited_secs } => format!(
                "Emulator {} failed to start within {} seconds",
                name, waited_secs
            ),
            HarnessError::Cancelled => "Operation was cancelled".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_user_message_for_boot_timeout() {
        let err = HarnessError::BootTimeout {
            name: "test_device".into(),
            waited_secs: 120,
        };
        assert_eq!(
            err.user_message(),
            "Emulator test_device failed to start within 120 seconds"
        );
    }

    #[test]
    fn test_user_message_for_missing_tool() {
        let err = HarnessError::from(ToolError::NotFound(PathBuf::from("/sdk/platform-tools/adb")));
        assert!(err.user_message().contains("/sdk/platform-tools/adb"));
    }
}
