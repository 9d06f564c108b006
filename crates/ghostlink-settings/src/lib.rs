//! ghostlink Settings Crate
//!
//! Client configuration for the device protocol stack: daemon address,
//! reconnect policy, protocol timers and diagnostic buffer sizes.

pub mod config;
pub mod error;

pub use config::{Config, ConnectionSettings, DiagnosticsSettings, ProtocolSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};
