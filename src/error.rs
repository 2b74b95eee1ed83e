//! Error types for the `AirPods` connection monitor.
//!
//! Route-source, configuration and D-Bus failures all funnel into
//! [`MonitorError`]. The monitor itself never surfaces these to callers of
//! its query/lifecycle operations; they are logged and absorbed there.

use thiserror::Error;

use crate::route::SubscriptionId;

/// Main error type for the monitor and its collaborators.
#[derive(Error, Debug)]
pub enum MonitorError {
   #[error("Audio route unavailable")]
   RouteUnavailable,

   #[error("Subscription not found: {0}")]
   SubscriptionNotFound(SubscriptionId),

   #[error("Subscribe failed: {0}")]
   SubscribeFailed(String),

   #[error("Connection monitor already installed")]
   AlreadyInstalled,

   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `MonitorError`.
pub type Result<T> = std::result::Result<T, MonitorError>;
