//! Run state, stage identifiers, and the event payloads shared with observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zbus::zvariant::Type;

/// One ordered phase of the installation pipeline.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Partition,
    Bootstrap,
    Account,
    Finalize,
}

impl Stage {
    /// Pipeline order. Stages run strictly in this sequence.
    pub const ORDERED: [Stage; 4] = [
        Stage::Partition,
        Stage::Bootstrap,
        Stage::Account,
        Stage::Finalize,
    ];

    /// Progress value reported as the stage begins.
    pub fn checkpoint(self) -> u8 {
        match self {
            Stage::Partition => 10,
            Stage::Bootstrap => 30,
            Stage::Account => 70,
            Stage::Finalize => 90,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Partition => "partition",
            Stage::Bootstrap => "bootstrap",
            Stage::Account => "account",
            Stage::Finalize => "finalize",
        }
    }

    /// Observer-facing message published with the checkpoint.
    pub fn message(self) -> &'static str {
        match self {
            Stage::Partition => "Partitioning disk...",
            Stage::Bootstrap => "Installing base system...",
            Stage::Account => "Creating user account...",
            Stage::Finalize => "Finalizing installation...",
        }
    }

    /// Prefix for the observer-facing error when the stage fails.
    pub fn failure_label(self) -> &'static str {
        match self {
            Stage::Partition => "Partitioning failed",
            Stage::Bootstrap => "System installation failed",
            Stage::Account => "User creation failed",
            Stage::Finalize => "Finalization failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const COMPLETE_PROGRESS: u8 = 100;
pub const COMPLETE_MESSAGE: &str = "Installation completed successfully!";

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Ready,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Ready => "ready",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Progress record for the single installation a process may run at a time.
///
/// Mutated only by the orchestrator; everyone else sees clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub status: RunStatus,
    pub stage: Option<Stage>,
    pub progress: u8,
    /// Present only while `status` is `Failed`.
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Enter `Running` from any non-running state. Returns false when a run is active.
    pub fn begin(&mut self) -> bool {
        if self.status == RunStatus::Running {
            return false;
        }
        *self = RunState {
            status: RunStatus::Running,
            stage: None,
            progress: 0,
            error: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        true
    }

    /// Record the stage about to run. Progress never moves backwards.
    pub fn enter_stage(&mut self, stage: Stage) {
        self.stage = Some(stage);
        self.progress = self.progress.max(stage.checkpoint());
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.progress = COMPLETE_PROGRESS;
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn to_view(&self) -> RunStateView {
        RunStateView {
            status: self.status.as_str().to_string(),
            stage: self
                .stage
                .map(|stage| stage.as_str().to_string())
                .unwrap_or_default(),
            progress: self.progress,
            error: self.error.clone().unwrap_or_default(),
            started_at: format_timestamp(self.started_at),
            finished_at: format_timestamp(self.finished_at),
        }
    }
}

fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map(|ts| ts.to_rfc3339()).unwrap_or_default()
}

/// Bus-friendly run snapshot; empty strings stand in for absent values.
#[derive(Debug, Clone, Serialize, Deserialize, Type, PartialEq, Eq)]
pub struct RunStateView {
    pub status: String,
    pub stage: String,
    pub progress: u8,
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
}

/// Events published to observers while a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InstallEvent {
    Progress { percent: u8, message: String },
    Error { reason: String },
}

/// Block device offered as an install target.
#[derive(Debug, Clone, Serialize, Deserialize, Type, PartialEq, Eq)]
pub struct DiskInfo {
    pub name: String,
    pub size: String,
    pub path: String,
}

/// Wireless network seen by the last scan.
#[derive(Debug, Clone, Serialize, Deserialize, Type, PartialEq, Eq)]
pub struct WifiNetwork {
    pub ssid: String,
    pub signal: String,
    pub security: String,
}
