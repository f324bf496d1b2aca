//! Destructive disk layout: wipe, GPT label, ESP plus root, then filesystems.
//!
//! None of these steps can be undone. The only guarantees are order and
//! stopping at the first failure; a disk left half-formatted stays that way
//! and the run reports failed.

use tracing::info;
use twinaos_core::PartitionMode;

use crate::error::PartitionError;
use crate::paths::partition_path;

use super::{ActionContext, Operation};

pub const ESP_START: &str = "1MiB";
pub const ESP_END: &str = "513MiB";

/// The fixed operation sequence for automatic partitioning.
///
/// Filesystems are created only after every `parted` call has rewritten the table.
pub fn partition_operations(disk: &str) -> Vec<Operation> {
    let parted = |args: &[&str]| {
        Operation::new("parted")
            .arg("-s")
            .arg(disk)
            .args(args.iter().copied())
    };
    vec![
        Operation::new("wipefs").arg("-a").arg(disk),
        parted(&["mklabel", "gpt"]),
        parted(&["mkpart", "primary", "fat32", ESP_START, ESP_END]),
        parted(&["set", "1", "esp", "on"]),
        parted(&["mkpart", "primary", "ext4", ESP_END, "100%"]),
        Operation::new("mkfs.fat")
            .arg("-F32")
            .arg(partition_path(disk, 1)),
        Operation::new("mkfs.ext4")
            .arg("-F")
            .arg(partition_path(disk, 2)),
    ]
}

pub fn partition_disk(
    ctx: &ActionContext,
    disk: &str,
    mode: PartitionMode,
) -> Result<(), PartitionError> {
    if mode != PartitionMode::Auto {
        return Err(PartitionError::UnsupportedMode(mode));
    }

    for operation in partition_operations(disk) {
        ctx.run(operation)?;
    }
    info!(disk, "disk partitioned and formatted");
    Ok(())
}
