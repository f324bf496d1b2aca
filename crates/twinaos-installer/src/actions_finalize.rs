//! System identity settings and teardown of everything the run mounted.
//!
//! Cleanup always runs, whether or not the settings applied.

use tracing::{info, warn};
use twinaos_core::InstallConfig;

use crate::error::FinalizeError;

use super::{unmount_all, write_file, ActionContext, MountPlan};

pub fn apply_settings(ctx: &ActionContext, config: &InstallConfig) -> Result<(), FinalizeError> {
    write_file(
        &ctx.layout.etc_file("hostname"),
        &format!("{}\n", config.hostname),
    )?;

    ctx.run(ctx.chroot_operation(
        "ln",
        [
            "-sf".to_string(),
            format!("/usr/share/zoneinfo/{}", config.timezone),
            "/etc/localtime".to_string(),
        ],
    ))?;

    write_file(
        &ctx.layout.etc_file("locale.gen"),
        &format!("{} UTF-8\n", config.locale),
    )?;
    ctx.run(ctx.chroot_operation("locale-gen", Vec::<String>::new()))?;

    info!(
        hostname = %config.hostname,
        timezone = %config.timezone,
        locale = %config.locale,
        "system settings applied"
    );
    Ok(())
}

pub fn finalize_install(
    ctx: &ActionContext,
    config: &InstallConfig,
    plan: &mut MountPlan,
) -> Result<(), FinalizeError> {
    let applied = apply_settings(ctx, config);
    if let Err(err) = applied.as_ref() {
        warn!(%err, "settings failed; unmounting anyway");
    }
    let unmounted = unmount_all(ctx, plan);

    match (applied, unmounted) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(apply), Ok(())) => Err(apply),
        (Ok(()), Err(unmount)) => Err(FinalizeError::Unmount(unmount)),
        (Err(apply), Err(unmount)) => Err(FinalizeError::ApplyAndUnmount {
            apply: Box::new(apply),
            unmount,
        }),
    }
}
