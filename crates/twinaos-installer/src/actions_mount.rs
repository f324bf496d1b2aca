//! Mount tracking for guaranteed cleanup.
//!
//! The plan is the only record of what this run mounted; entries are appended
//! after a mount succeeds and drained newest-first by cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{CommandError, UnmountError, UnmountFailure, WriteError};

use super::{ActionContext, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Device,
    Bind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub kind: MountKind,
}

#[derive(Debug, Default)]
pub struct MountPlan {
    entries: Vec<MountEntry>,
}

impl MountPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: MountEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, newest first. Each entry is handed out exactly once.
    pub fn drain_reverse(&mut self) -> Vec<MountEntry> {
        let mut drained = std::mem::take(&mut self.entries);
        drained.reverse();
        drained
    }
}

pub fn ensure_dir(path: &Path) -> Result<(), WriteError> {
    fs::create_dir_all(path).map_err(|source| WriteError {
        path: path.to_path_buf(),
        source,
    })
}

/// Mount a block device and record it once the kernel accepted the mount.
pub fn mount_device(
    ctx: &ActionContext,
    plan: &mut MountPlan,
    device: &str,
    target: &Path,
) -> Result<(), CommandError> {
    ctx.run(
        Operation::new("mount")
            .arg(device)
            .arg(target.display().to_string()),
    )?;
    info!(device, target = %target.display(), "mounted");
    plan.record(MountEntry {
        source: device.to_string(),
        target: target.to_path_buf(),
        kind: MountKind::Device,
    });
    Ok(())
}

/// Bind a host path into the target and record it.
pub fn bind_mount(
    ctx: &ActionContext,
    plan: &mut MountPlan,
    source: &str,
    target: &Path,
) -> Result<(), CommandError> {
    ctx.run(
        Operation::new("mount")
            .arg("--bind")
            .arg(source)
            .arg(target.display().to_string()),
    )?;
    info!(source, target = %target.display(), "bind mounted");
    plan.record(MountEntry {
        source: source.to_string(),
        target: target.to_path_buf(),
        kind: MountKind::Bind,
    });
    Ok(())
}

/// Unmount everything in the plan in reverse order, attempting every entry.
pub fn unmount_all(ctx: &ActionContext, plan: &mut MountPlan) -> Result<(), UnmountError> {
    let mut failures = Vec::new();
    for entry in plan.drain_reverse() {
        let target = entry.target.display().to_string();
        match ctx.run(Operation::new("umount").arg(target)) {
            Ok(_) => info!(target = %entry.target.display(), "unmounted"),
            Err(error) => {
                warn!(target = %entry.target.display(), %error, "unmount failed");
                failures.push(UnmountFailure {
                    target: entry.target,
                    error,
                });
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(UnmountError { failures })
    }
}
