//! Configuration module wiring for the TwinaOS installer.
//!
//! Keeps config types and I/O in separate files.

mod config_io;
mod config_types;

pub use config_io::{ConfigError, SYSTEM_CONFIG_PATH};
pub use config_types::*;
