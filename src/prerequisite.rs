//! Session prerequisites
//!
//! Pass/fail checks run before any device work starts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use droid_testbed_core::config::ArtifactConfig;
use droid_testbed_core::{HarnessError, Result};
use tracing::{info, warn};

/// A check that must pass before the session touches the device
#[async_trait]
pub trait Prerequisite: Send + Sync {
    /// Short name for log lines and errors
    fn name(&self) -> &str;

    /// `Err` aborts setup
    async fn check(&self) -> Result<()>;
}

/// The APK under test is present on disk
///
/// Nothing is downloaded; a missing artifact fails the session when it is
/// required and only warns otherwise.
#[derive(Debug, Clone)]
pub struct ArtifactPresence {
    path: PathBuf,
    required: bool,
}

impl ArtifactPresence {
    pub fn new(path: impl Into<PathBuf>, required: bool) -> Self {
        Self {
            path: path.into(),
            required,
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(config.path.clone(), config.required)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Prerequisite for ArtifactPresence {
    fn name(&self) -> &str {
        "artifact"
    }

    async fn check(&self) -> Result<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => {
                info!("Test artifact found at {}", self.path.display());
                Ok(())
            }
            _ if !self.required => {
                warn!("Test artifact not found at {}", self.path.display());
                Ok(())
            }
            Ok(_) => Err(HarnessError::Prerequisite {
                name: self.name().to_string(),
                detail: format!("{} is not a file", self.path.display()),
            }),
            Err(e) => Err(HarnessError::Prerequisite {
                name: self.name().to_string(),
                detail: format!("{}: {}", self.path.display(), e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_present_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("ApiDemos-debug.apk");
        std::fs::write(&apk, b"PK").unwrap();

        ArtifactPresence::new(&apk, true).check().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_required_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let check = ArtifactPresence::new(dir.path().join("missing.apk"), true);

        let err = check.check().await.unwrap_err();
        assert!(matches!(err, HarnessError::Prerequisite { ref name, .. } if name == "artifact"));
    }

    #[tokio::test]
    async fn test_directory_is_not_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ArtifactPresence::new(dir.path(), true).check().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_optional_artifact() {
        let dir = tempfile::tempdir().unwrap();
        ArtifactPresence::new(dir.path().join("missing.apk"), false)
            .check()
            .await
            .unwrap();
    }
}
