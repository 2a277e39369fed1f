//! CLI commands for droid-testbed
//!
//! Each command loads nothing itself; it gets the resolved configuration
//! from `main` and drives a [`SessionOrchestrator`] or its parts.

use anyhow::Result;
use droid_testbed_android_toolchain::SdkEnvironment;
use droid_testbed_appium::Capabilities;
use droid_testbed_core::config::HarnessConfig;
use droid_testbed_emulator_bridge::DEFAULT_EMULATOR_SERIAL;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::session::SessionOrchestrator;

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            token.cancel();
        }
    })
}

/// Bring the emulator and Appium server up
pub struct UpCommand {
    /// Keep the session until Ctrl-C, then tear it down
    pub hold: bool,
}

impl UpCommand {
    /// Execute the up command
    pub async fn execute(&self, config: &HarnessConfig) -> Result<()> {
        let cancel = CancellationToken::new();
        let ctrl_c = cancel_on_ctrl_c(cancel.clone());
        let mut session = SessionOrchestrator::from_config(config, cancel.clone());

        let state = match session.setup().await {
            Ok(state) => state,
            Err(e) => {
                error!("{}", e.user_message());
                let report = session.teardown().await;
                println!("Teardown: {}", report);
                ctrl_c.abort();
                return Err(e.into());
            }
        };

        println!("Session {}", state);
        println!("Appium endpoint: {}", session.server().endpoint_url());

        if self.hold {
            println!("Press Ctrl-C to tear down");
            cancel.cancelled().await;
            let report = session.teardown().await;
            println!("Teardown: {}", report);
        }

        ctrl_c.abort();
        Ok(())
    }
}

/// Stop whatever the session brought up
pub struct DownCommand;

impl DownCommand {
    /// Execute the down command
    pub async fn execute(&self, config: &HarnessConfig) -> Result<()> {
        let mut session = SessionOrchestrator::from_config(config, CancellationToken::new());
        let report = session.teardown().await;
        println!("Teardown: {}", report);
        Ok(())
    }
}

/// Report device and server state
pub struct StatusCommand;

impl StatusCommand {
    /// Execute the status command
    pub async fn execute(&self, config: &HarnessConfig) -> Result<()> {
        let env = SdkEnvironment::resolve(config.android.sdk_root.as_deref());
        let validation = env.validate();

        println!("Android SDK: {}", env.sdk_root().display());
        for missing in validation.missing_components() {
            println!("  missing: {}", missing);
        }

        let mut session = SessionOrchestrator::from_config(config, CancellationToken::new());
        let name = session.avd_name().to_string();
        let state = session.device().observe(&name).await;
        println!("AVD {}: {}", name, state);

        if let Some(details) = session.device().details(&name).await {
            println!("  path: {}", details.path.display());
            if !details.target.is_empty() {
                println!("  target: {}", details.target);
            }
            if !details.abi.is_empty() {
                println!("  abi: {}", details.abi);
            }
            if let Some(device) = &details.device_name {
                println!("  profile: {}", device);
            }
        }

        let endpoint = session.server().endpoint_url();
        let reachable = session.server_mut().is_running().await;
        println!(
            "Appium server {}: {}",
            endpoint,
            if reachable { "reachable" } else { "unreachable" }
        );

        Ok(())
    }
}

/// Print the new-session request a client should send
pub struct CapabilitiesCommand;

impl CapabilitiesCommand {
    /// Execute the capabilities command
    pub async fn execute(&self, config: &HarnessConfig) -> Result<()> {
        let serial = config.device.serial.as_deref().unwrap_or(DEFAULT_EMULATOR_SERIAL);
        let caps = Capabilities::android(serial).with_app(&config.artifact.path);

        println!("POST http://{}:{}/session", config.server.host, config.server.port);
        println!("{}", serde_json::to_string_pretty(&caps.new_session_payload()?)?);
        Ok(())
    }
}

/// Print the effective configuration
pub struct ConfigCommand;

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(&self, config: &HarnessConfig) -> Result<()> {
        if let Some(path) = HarnessConfig::config_file() {
            println!("# default location: {}", path.display());
        }
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
