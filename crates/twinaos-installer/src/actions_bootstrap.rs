//! Base system bootstrap: mount the new partitions, fetch a base tree, and
//! install the bootloader from inside the target.
//!
//! Failures here never unmount anything; the finalizer owns cleanup.

use tracing::info;
use twinaos_core::util::shell_quote;

use crate::error::BootstrapError;
use crate::paths::{partition_path, PSEUDO_FILESYSTEMS};

use super::{
    bind_mount, ensure_dir, mount_device, run_chroot_script, write_file, ActionContext,
    ChrootScript, MountPlan, Operation,
};

pub const BOOTLOADER_SCRIPT: &str = "install_grub.sh";

pub fn render_fstab(disk: &str) -> String {
    format!(
        "{} / ext4 defaults 0 1\n{} /boot/efi vfat defaults 0 2\n",
        partition_path(disk, 2),
        partition_path(disk, 1)
    )
}

pub fn bootloader_script(ctx: &ActionContext) -> ChrootScript {
    let packages = ctx
        .install
        .bootloader_packages
        .iter()
        .map(|package| shell_quote(package))
        .collect::<Vec<_>>()
        .join(" ");
    ChrootScript::new(BOOTLOADER_SCRIPT)
        .line("export DEBIAN_FRONTEND=noninteractive")
        .line("apt-get update")
        .line(format!("apt-get install -y {packages}"))
        .line(format!(
            "grub-install --target={} --efi-directory=/boot/efi",
            shell_quote(&ctx.install.efi_target)
        ))
        .line("update-grub")
}

pub fn bootstrap_system(
    ctx: &ActionContext,
    disk: &str,
    plan: &mut MountPlan,
) -> Result<(), BootstrapError> {
    let root = ctx.layout.root().to_path_buf();
    ensure_dir(&root)?;
    mount_device(ctx, plan, &partition_path(disk, 2), &root)?;

    let efi_dir = ctx.layout.efi_dir();
    ensure_dir(&efi_dir)?;
    mount_device(ctx, plan, &partition_path(disk, 1), &efi_dir)?;

    info!(suite = %ctx.install.suite, mirror = %ctx.install.mirror, "bootstrapping base system");
    ctx.run_with_timeout(
        Operation::new("debootstrap")
            .arg(format!("--arch={}", ctx.install.arch))
            .arg(&ctx.install.suite)
            .arg(root.display().to_string())
            .arg(&ctx.install.mirror),
        ctx.commands.bootstrap_timeout(),
    )?;

    write_file(&ctx.layout.etc_file("fstab"), &render_fstab(disk))?;

    // Root and ESP are mounted at this point; only now may host filesystems be bound in.
    for source in PSEUDO_FILESYSTEMS {
        let target = ctx.layout.inside(source);
        ensure_dir(&target)?;
        bind_mount(ctx, plan, source, &target)?;
    }

    run_chroot_script(ctx, &bootloader_script(ctx), None)?;
    info!(disk, "base system and bootloader installed");
    Ok(())
}
