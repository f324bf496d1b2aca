//! Primary user creation inside the installed system.

use tracing::info;
use twinaos_core::util::shell_quote;
use twinaos_core::Secret;

use crate::error::AccountError;

use super::{run_chroot_script, ActionContext, ChrootScript};

pub const ACCOUNT_SCRIPT: &str = "create_user.sh";

/// The password is read by `chpasswd` from stdin and never rendered here.
pub fn account_script(username: &str, full_name: &str, shell: &str, group: &str) -> ChrootScript {
    let user = shell_quote(username);
    ChrootScript::new(ACCOUNT_SCRIPT)
        .line(format!(
            "useradd -m -s {} -c {} {user}",
            shell_quote(shell),
            shell_quote(full_name)
        ))
        .line("chpasswd")
        .line(format!("usermod -aG {} {user}", shell_quote(group)))
}

pub fn create_account(
    ctx: &ActionContext,
    username: &str,
    password: &Secret,
    full_name: &str,
) -> Result<(), AccountError> {
    let script = account_script(
        username,
        full_name,
        &ctx.install.login_shell,
        &ctx.install.admin_group,
    );
    let credentials = Secret::new(format!("{username}:{}\n", password.expose()));
    run_chroot_script(ctx, &script, Some(credentials))?;
    info!(username, group = %ctx.install.admin_group, "account created");
    Ok(())
}
