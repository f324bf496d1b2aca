//! D-Bus server for com.twinaos.Installer and the event-to-signal bridge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twinaos_core::{
    BusKind, Config, DiskInfo, InstallConfig, InstallDefaults, InstallEvent, InstallRequest,
    RunStateView, Secret, WifiNetwork, INSTALLER_BUS_NAME, INSTALLER_OBJECT_PATH,
};
use twinaos_installer::discovery;
use twinaos_installer::{CommandRunner, DiscoveryError, Orchestrator, StartError};
use zbus::fdo::{RequestNameFlags, RequestNameReply};
use zbus::{interface, Connection, SignalContext};

use crate::reboot::RebootScheduler;

pub struct InstallerServer {
    orchestrator: Orchestrator,
    runner: Arc<dyn CommandRunner>,
    defaults: InstallDefaults,
    timeout: Duration,
    reboot: Arc<RebootScheduler>,
}

impl InstallerServer {
    pub fn new(
        orchestrator: Orchestrator,
        runner: Arc<dyn CommandRunner>,
        config: &Config,
        reboot: Arc<RebootScheduler>,
    ) -> Self {
        Self {
            orchestrator,
            runner,
            defaults: config.install.clone(),
            timeout: config.commands.timeout(),
            reboot,
        }
    }
}

#[interface(name = "com.twinaos.Installer")]
impl InstallerServer {
    async fn start_installation(&self, request: InstallRequest) -> zbus::fdo::Result<()> {
        debug!(?request, "installation requested");
        let config = InstallConfig::from_request(request, &self.defaults).map_err(|err| {
            warn!(%err, "install request rejected");
            zbus::fdo::Error::InvalidArgs(err.to_string())
        })?;
        match self.orchestrator.start(config) {
            // The worker runs detached; progress arrives as signals.
            Ok(_handle) => Ok(()),
            Err(err @ StartError::AlreadyRunning) => {
                Err(zbus::fdo::Error::LimitsExceeded(err.to_string()))
            }
            Err(err) => Err(zbus::fdo::Error::Failed(err.to_string())),
        }
    }

    async fn get_status(&self) -> RunStateView {
        self.orchestrator.snapshot().to_view()
    }

    async fn list_disks(&self) -> zbus::fdo::Result<Vec<DiskInfo>> {
        let runner = Arc::clone(&self.runner);
        let timeout = self.timeout;
        run_blocking(move || discovery::list_disks(runner.as_ref(), timeout)).await
    }

    async fn list_wifi_networks(&self) -> zbus::fdo::Result<Vec<WifiNetwork>> {
        let runner = Arc::clone(&self.runner);
        let timeout = self.timeout;
        run_blocking(move || discovery::list_wifi_networks(runner.as_ref(), timeout)).await
    }

    async fn connect_wifi(&self, ssid: &str, password: &str) -> zbus::fdo::Result<String> {
        let runner = Arc::clone(&self.runner);
        let timeout = self.timeout;
        let ssid = ssid.to_string();
        let password = Secret::new(password);
        run_blocking(move || discovery::connect_wifi(runner.as_ref(), timeout, &ssid, &password))
            .await
    }

    async fn reboot(&self) -> zbus::fdo::Result<()> {
        self.reboot
            .schedule(&self.orchestrator)
            .map_err(|err| zbus::fdo::Error::Failed(err.to_string()))
    }

    #[zbus(signal)]
    async fn install_progress(
        ctx: &SignalContext<'_>,
        percent: u8,
        message: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn install_error(ctx: &SignalContext<'_>, reason: &str) -> zbus::Result<()>;
}

/// Run blocking host discovery off the async executor.
async fn run_blocking<T, F>(task: F) -> zbus::fdo::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DiscoveryError> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            warn!(%err, "discovery request failed");
            Err(zbus::fdo::Error::Failed(err.to_string()))
        }
        Err(err) => Err(zbus::fdo::Error::Failed(format!(
            "discovery worker failed: {err}"
        ))),
    }
}

pub async fn connect_bus(kind: BusKind) -> Result<Connection> {
    match kind {
        BusKind::System => Connection::system()
            .await
            .context("connect to system bus"),
        BusKind::Session => Connection::session()
            .await
            .context("connect to session bus"),
    }
}

pub async fn request_installer_name(connection: &Connection) -> zbus::Result<RequestNameReply> {
    connection
        .request_name_with_flags(INSTALLER_BUS_NAME, RequestNameFlags::DoNotQueue.into())
        .await
}

/// Re-emit every orchestrator event as a D-Bus signal, in order.
pub fn spawn_event_forwarder(
    connection: Connection,
    mut events: broadcast::Receiver<InstallEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctx = match SignalContext::new(&connection, INSTALLER_OBJECT_PATH) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(?err, "cannot emit installer signals");
                return;
            }
        };
        loop {
            let emitted = match events.recv().await {
                Ok(InstallEvent::Progress { percent, message }) => {
                    InstallerServer::install_progress(&ctx, percent, &message).await
                }
                Ok(InstallEvent::Error { reason }) => {
                    InstallerServer::install_error(&ctx, &reason).await
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder lagged; clients should poll GetStatus");
                    continue;
                }
                Err(RecvError::Closed) => {
                    info!("event channel closed");
                    break;
                }
            };
            if let Err(err) = emitted {
                warn!(?err, "failed to emit installer signal");
            }
        }
    })
}
