//! Error taxonomy for provisioning stages.
//!
//! Command failures are data until a stage decides to stop on them; each stage
//! then reports its own error type and the orchestrator tags it with the stage.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use twinaos_core::{PartitionMode, Stage};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{operation} failed: {detail}")]
    Failure { operation: String, detail: String },
    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}

/// A file could not be written into the target root.
#[derive(Debug, Error)]
#[error("failed to write {}: {source}", .path.display())]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("{} partitioning not implemented", .0.as_str())]
    UnsupportedMode(PartitionMode),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// One mountpoint that stayed mounted after cleanup.
#[derive(Debug)]
pub struct UnmountFailure {
    pub target: PathBuf,
    pub error: CommandError,
}

#[derive(Debug, Error)]
#[error("failed to unmount {}", summarize(.failures))]
pub struct UnmountError {
    pub failures: Vec<UnmountFailure>,
}

fn summarize(failures: &[UnmountFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.target.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Unmount(#[from] UnmountError),
    /// Settings failed to apply and cleanup also left mounts behind.
    #[error("{apply}; {unmount}")]
    ApplyAndUnmount {
        apply: Box<FinalizeError>,
        unmount: UnmountError,
    },
}

#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
}

#[derive(Debug, Error)]
#[error("{}: {source}", .stage.failure_label())]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: StageFailure,
}

/// Host discovery and network setup failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("unreadable lsblk output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid network name")]
    InvalidSsid,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("installation already running")]
    AlreadyRunning,
    #[error("failed to start installation worker: {0}")]
    Spawn(#[source] io::Error),
}
