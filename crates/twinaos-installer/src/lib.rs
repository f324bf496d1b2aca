//! Installation pipeline for TwinaOS: disk provisioning, base system bootstrap,
//! account creation, and finalization, driven by a single-run orchestrator.

pub mod actions;
pub mod discovery;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod paths;

#[cfg(test)]
mod test_support;

pub use actions::{CommandRunner, DryRunRunner, SystemRunner};
pub use error::{DiscoveryError, StageError, StartError};
pub use events::EventSink;
pub use orchestrator::{Orchestrator, RunHandle};
