//! Filesystem layout of the target system while it is mounted on the host.

use std::path::{Path, PathBuf};

/// Mountpoints inside the target root, relative to it.
pub const EFI_MOUNT_DIR: &str = "boot/efi";
/// Host pseudo-filesystems bound into the target before chrooting.
pub const PSEUDO_FILESYSTEMS: [&str; 3] = ["/dev", "/proc", "/sys"];

#[derive(Debug, Clone)]
pub struct TargetLayout {
    root: PathBuf,
}

impl TargetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn efi_dir(&self) -> PathBuf {
        self.root.join(EFI_MOUNT_DIR)
    }

    /// Host path of a file under the target's /etc.
    pub fn etc_file(&self, name: &str) -> PathBuf {
        self.root.join("etc").join(name)
    }

    /// Host path for an absolute path inside the target, e.g. `/proc`.
    pub fn inside(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }
}

/// Device path for partition `number` of `disk`.
///
/// Kernel naming inserts a `p` separator when the disk name ends in a digit
/// (`/dev/nvme0n1p1`, `/dev/mmcblk0p2`).
pub fn partition_path(disk: &str, number: u32) -> String {
    if disk.ends_with(|ch: char| ch.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_path_follows_kernel_naming() {
        assert_eq!(partition_path("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_path("/dev/vdb", 2), "/dev/vdb2");
        assert_eq!(partition_path("/dev/nvme0n1", 2), "/dev/nvme0n1p2");
        assert_eq!(partition_path("/dev/mmcblk0", 1), "/dev/mmcblk0p1");
    }

    #[test]
    fn layout_resolves_paths_under_root() {
        let layout = TargetLayout::new("/mnt/target");
        assert_eq!(layout.efi_dir(), PathBuf::from("/mnt/target/boot/efi"));
        assert_eq!(layout.etc_file("fstab"), PathBuf::from("/mnt/target/etc/fstab"));
        assert_eq!(layout.inside("/proc"), PathBuf::from("/mnt/target/proc"));
    }
}
