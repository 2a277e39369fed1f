//! Device Types and State
//!
//! Devices as reported by `adb devices`, and the reconciled state of the
//! virtual device this workspace manages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Device is online and ready
    Online,
    /// Device is offline (an emulator early in boot shows up like this)
    Offline,
    /// Device is not authorized (need to accept on device)
    Unauthorized,
    /// Unknown state
    Unknown,
}

impl DeviceState {
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            _ => DeviceState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Unknown => "unknown",
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, DeviceState::Online)
    }
}

/// Device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Physical device connected via USB/WiFi
    Physical,
    /// Android emulator
    Emulator,
}

/// Device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device serial number
    pub serial: String,
    /// Device state
    pub state: DeviceState,
    /// Device type
    pub device_type: DeviceType,
    /// Device model (only with `adb devices -l`)
    pub model: Option<String>,
    /// Transport ID (only with `adb devices -l`)
    pub transport_id: Option<u32>,
}

impl Device {
    /// Check if device is online and usable
    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    /// Check if this is an emulator
    pub fn is_emulator(&self) -> bool {
        self.device_type == DeviceType::Emulator
    }

    /// Emulator console port encoded in the serial (`emulator-5554`)
    pub fn console_port(&self) -> Option<u16> {
        self.serial.strip_prefix("emulator-")?.parse().ok()
    }
}

/// Parse the output of `adb devices` (with or without `-l`)
///
/// The header line and daemon chatter (`* daemon started ...`) are skipped.
pub fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") || line.starts_with('*') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let serial = parts[0].to_string();
        let mut model = None;
        let mut transport_id = None;
        for part in parts.iter().skip(2) {
            if let Some(value) = part.strip_prefix("model:") {
                model = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("transport_id:") {
                transport_id = value.parse().ok();
            }
        }

        let device_type = if serial.starts_with("emulator-") {
            DeviceType::Emulator
        } else {
            DeviceType::Physical
        };

        devices.push(Device {
            serial,
            state: DeviceState::parse(parts[1]),
            device_type,
            model,
            transport_id,
        });
    }

    devices
}

/// Reconciled state of a named virtual device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VirtualDeviceState {
    /// Not in the AVD listing
    Absent,
    /// Listed but not running
    Created,
    /// Running, boot not completed
    Booting,
    /// Running with `sys.boot_completed` = 1
    Booted,
    /// Listed and not running after we asked it to stop
    Stopped,
}

impl VirtualDeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirtualDeviceState::Absent => "absent",
            VirtualDeviceState::Created => "created",
            VirtualDeviceState::Booting => "booting",
            VirtualDeviceState::Booted => "booted",
            VirtualDeviceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for VirtualDeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_listing() {
        let output = "List of devices attached\nemulator-5554\tdevice\nR58M123ABC\tunauthorized\n\n";
        let devices = parse_devices(output);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_emulator());
        assert!(devices[0].is_usable());
        assert_eq!(devices[0].console_port(), Some(5554));
        assert_eq!(devices[1].device_type, DeviceType::Physical);
        assert_eq!(devices[1].state, DeviceState::Unauthorized);
    }

    #[test]
    fn test_parse_long_listing() {
        let output = "* daemon not running; starting now at tcp:5037\n\
                      * daemon started successfully\n\
                      List of devices attached\n\
                      emulator-5556          offline product:sdk_gphone64_arm64 model:sdk_gphone64_arm64 transport_id:3\n";
        let devices = parse_devices(output);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].state, DeviceState::Offline);
        assert_eq!(devices[0].model.as_deref(), Some("sdk_gphone64_arm64"));
        assert_eq!(devices[0].transport_id, Some(3));
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
        assert!(parse_devices("").is_empty());
    }
}
