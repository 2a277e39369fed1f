//! Android Emulator Bridge
//!
//! Manages the Android Virtual Device under test: creation through the SDK
//! tools, emulator boot and boot-completion polling, and shutdown.

pub mod adb;
pub mod avd;
pub mod device;
pub mod emulator;

pub use adb::{AdbClient, AdbError};
pub use avd::{AvdConfig, AvdError, AvdInfo, AvdManager};
pub use device::{parse_devices, Device, DeviceState, DeviceType, VirtualDeviceState};
pub use emulator::{EmulatorError, EmulatorOptions, EmulatorStopOutcome, VirtualDeviceLifecycle};

/// Serial of the first emulator adb attaches
pub const DEFAULT_EMULATOR_SERIAL: &str = "emulator-5554";
