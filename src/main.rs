//! droid-testbed command line
//!
//! `up`, `down`, `status`, `capabilities` and `config` over one resolved
//! configuration.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use droid_testbed::commands::{CapabilitiesCommand, ConfigCommand, DownCommand, StatusCommand, UpCommand};
use droid_testbed::core::HarnessConfig;

/// Application name
pub const APP_NAME: &str = "droid-testbed";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "droid-testbed")]
#[command(about = "Android emulator and Appium server for test sessions")]
#[command(version)]
struct Cli {
    /// Config file path.
    #[arg(short, long, global = true, env = "DROID_TESTBED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create and boot the emulator, then start Appium
    Up {
        /// Stay in the foreground and tear down on Ctrl-C
        #[arg(long)]
        hold: bool,
    },
    /// Stop the emulator (and an Appium server this process started)
    Down,
    /// Show SDK, emulator and Appium state
    Status,
    /// Print the new-session capabilities for a WebDriver client
    Capabilities,
    /// Print the effective configuration
    Config,
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    info!("{} v{} starting...", APP_NAME, droid_testbed::core::VERSION);

    let config = HarnessConfig::load(cli.config.as_deref()).await?;

    match cli.command {
        Command::Up { hold } => UpCommand { hold }.execute(&config).await,
        Command::Down => DownCommand.execute(&config).await,
        Command::Status => StatusCommand.execute(&config).await,
        Command::Capabilities => CapabilitiesCommand.execute(&config).await,
        Command::Config => ConfigCommand.execute(&config).await,
    }
}
