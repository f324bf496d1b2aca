//! Installer actions and shared exports.

#[path = "actions_account.rs"]
mod actions_account;
#[path = "actions_bootstrap.rs"]
mod actions_bootstrap;
#[path = "actions_disk.rs"]
mod actions_disk;
#[path = "actions_finalize.rs"]
mod actions_finalize;
#[path = "actions_mount.rs"]
mod actions_mount;
#[path = "actions_plan.rs"]
mod actions_plan;
#[path = "actions_process.rs"]
mod actions_process;
#[path = "actions_script.rs"]
mod actions_script;

pub use actions_account::{account_script, create_account, ACCOUNT_SCRIPT};
pub use actions_bootstrap::{bootloader_script, bootstrap_system, render_fstab, BOOTLOADER_SCRIPT};
pub use actions_disk::{partition_disk, partition_operations};
pub use actions_finalize::{apply_settings, finalize_install};
pub use actions_mount::{
    bind_mount, ensure_dir, mount_device, unmount_all, MountEntry, MountKind, MountPlan,
};
pub use actions_plan::run_stage;
pub use actions_process::{
    ActionContext, CommandResult, CommandRunner, DryRunRunner, Operation, SystemRunner,
};
pub use actions_script::{run_chroot_script, write_file, ChrootScript};
