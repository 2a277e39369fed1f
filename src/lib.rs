//! droid-testbed - Android emulator and Appium server for test sessions
//!
//! Brings up a virtual device and an Appium server, waits until both are
//! observably ready, and tears them down afterward.
//!
//! ## Architecture
//!
//! droid-testbed is organized into specialized crates:
//!
//! - `droid-testbed-core`: configuration, process ownership, readiness probes
//! - `droid-testbed-android-toolchain`: SDK location and `sdkmanager`
//! - `droid-testbed-emulator-bridge`: AVD creation, emulator boot, adb
//! - `droid-testbed-appium`: Appium server lifecycle and capabilities
//!
//! This crate composes them into a [`session::SessionOrchestrator`].

#![warn(clippy::all)]

pub mod commands;
pub mod prerequisite;
pub mod session;

// Re-export main components for library usage
pub use droid_testbed_android_toolchain as toolchain;
pub use droid_testbed_appium as appium;
pub use droid_testbed_core as core;
pub use droid_testbed_emulator_bridge as emulator;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::prerequisite::{ArtifactPresence, Prerequisite};
    pub use crate::session::{SessionOrchestrator, SessionState, TeardownReport};
    pub use droid_testbed_android_toolchain::SdkEnvironment;
    pub use droid_testbed_appium::{AutomationServerLifecycle, Capabilities};
    pub use droid_testbed_core::{HarnessConfig, HarnessError, Result};
    pub use droid_testbed_emulator_bridge::VirtualDeviceLifecycle;
}
