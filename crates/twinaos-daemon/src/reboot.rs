//! Delayed reboot once the client has shown the completion screen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use twinaos_core::util::log_snippet;
use twinaos_installer::actions::Operation;
use twinaos_installer::{CommandRunner, Orchestrator};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RebootError {
    #[error("installation in progress")]
    RunInProgress,
    #[error("reboot already scheduled")]
    AlreadyScheduled,
}

pub struct RebootScheduler {
    runner: Arc<dyn CommandRunner>,
    delay: Duration,
    timeout: Duration,
    pending: AtomicBool,
}

impl RebootScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>, delay: Duration, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            runner,
            delay,
            timeout,
            pending: AtomicBool::new(false),
        })
    }

    /// Reboot after the grace period. Refused while an installation is running.
    pub fn schedule(self: &Arc<Self>, orchestrator: &Orchestrator) -> Result<(), RebootError> {
        if orchestrator.is_running() {
            warn!("reboot refused while installation is running");
            return Err(RebootError::RunInProgress);
        }
        if self.pending.swap(true, Ordering::SeqCst) {
            return Err(RebootError::AlreadyScheduled);
        }
        info!(delay_ms = delay_ms(self.delay), "reboot scheduled");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.reboot_after_delay().await });
        Ok(())
    }

    async fn reboot_after_delay(&self) {
        tokio::time::sleep(self.delay).await;
        let runner = Arc::clone(&self.runner);
        let timeout = self.timeout;
        let operation = Operation::new("systemctl").arg("reboot");
        let result =
            tokio::task::spawn_blocking(move || runner.execute(&operation, timeout)).await;
        match result {
            Ok(result) if result.success => info!("reboot requested"),
            Ok(result) => {
                warn!(stderr = %log_snippet(&result.stderr), "reboot command failed");
                self.pending.store(false, Ordering::SeqCst);
            }
            Err(err) => {
                error!(?err, "reboot worker failed");
                self.pending.store(false, Ordering::SeqCst);
            }
        }
    }
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
