//! Android Toolchain
//!
//! Locates the Android SDK and wraps the `sdkmanager` steps a virtual
//! device depends on:
//! - SDK root resolution and tool paths
//! - Child-process environment (ANDROID_HOME, PATH)
//! - System image install and license acceptance

pub mod env;
pub mod sdk_manager;

pub use env::{EnvironmentValidation, SdkEnvironment, SdkRootSource};
pub use sdk_manager::{SdkManager, SdkManagerError};
