//! Appium Server Bridge
//!
//! Keeps an Appium server available for the test session and describes the
//! session a client should request from it.

pub mod capabilities;
pub mod server;

pub use capabilities::Capabilities;
pub use server::{AutomationServerLifecycle, ServerState};
