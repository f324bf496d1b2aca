//! Shared types and configuration for the TwinaOS installer.

pub mod config;
pub mod control;
pub mod model;
pub mod request;
pub mod util;

pub use config::*;
pub use control::*;
pub use model::*;
pub use request::*;
