//! Stage dispatch for the installation pipeline.
//!
//! The stage order lives in [`Stage::ORDERED`]; this module only maps a stage
//! to the action that performs it.

use twinaos_core::{InstallConfig, Stage};

use crate::error::StageFailure;

use super::{
    bootstrap_system, create_account, finalize_install, partition_disk, ActionContext, MountPlan,
};

pub fn run_stage(
    stage: Stage,
    ctx: &ActionContext,
    config: &InstallConfig,
    plan: &mut MountPlan,
) -> Result<(), StageFailure> {
    match stage {
        Stage::Partition => partition_disk(ctx, &config.disk, config.mode)?,
        Stage::Bootstrap => bootstrap_system(ctx, &config.disk, plan)?,
        Stage::Account => create_account(
            ctx,
            &config.username,
            &config.password,
            &config.full_name,
        )?,
        Stage::Finalize => finalize_install(ctx, config, plan)?,
    }
    Ok(())
}
