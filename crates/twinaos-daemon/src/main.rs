//! Installer daemon entrypoint: owns the orchestrator and serves it on D-Bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use twinaos_core::{BusKind, Config, InstallEvent, INSTALLER_BUS_NAME, INSTALLER_OBJECT_PATH};
use twinaos_installer::{discovery, CommandRunner, DryRunRunner, Orchestrator, SystemRunner};
use zbus::fdo::RequestNameReply;

mod daemon;
mod reboot;
#[path = "runtime_config.rs"]
mod runtime_config;
#[path = "shutdown_signal.rs"]
mod shutdown_signal;

use crate::daemon::{connect_bus, request_installer_name, spawn_event_forwarder, InstallerServer};
use crate::reboot::RebootScheduler;
use crate::runtime_config::{init_tracing, load_config};
use crate::shutdown_signal::shutdown_signal;

/// Events buffered per subscriber before a slow forwarder starts lagging.
const EVENT_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to installer.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long)]
    check: bool,

    /// Log every operation instead of running it
    #[arg(long)]
    dry_run: bool,

    /// Serve on the session bus instead of the configured bus
    #[arg(long)]
    session: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args).context("load config")?;
    if args.dry_run {
        config.general.dry_run = true;
    }
    if args.session {
        config.general.bus = BusKind::Session;
    }

    init_tracing(&config);
    let config_source = if args.config.is_some() {
        "custom"
    } else {
        match Config::default_config_path() {
            Ok(path) if path.exists() => "default",
            _ => "builtin",
        }
    };
    info!(
        config_source,
        target_root = %config.install.target_root.display(),
        "configuration loaded"
    );
    if twinaos_core::util::diagnostic_mode() {
        info!(
            limit = twinaos_core::util::log_limit(),
            "diagnostic logging enabled (snippets capped; newlines stripped)"
        );
    }

    if args.check {
        info!("configuration loaded successfully");
        return Ok(());
    }

    let runner: Arc<dyn CommandRunner> = if config.general.dry_run {
        warn!("dry run enabled; host will not be modified");
        Arc::new(DryRunRunner)
    } else {
        let missing = discovery::missing_host_programs();
        if !missing.is_empty() {
            warn!(?missing, "host tools missing; installations will fail");
        }
        Arc::new(SystemRunner)
    };

    let (events, receiver) = broadcast::channel::<InstallEvent>(EVENT_CAPACITY);
    let orchestrator = Orchestrator::new(
        Arc::clone(&runner),
        Arc::new(events),
        config.install.clone(),
        config.commands.clone(),
    );
    let reboot = RebootScheduler::new(
        Arc::clone(&runner),
        config.reboot.delay(),
        config.commands.timeout(),
    );

    let connection = connect_bus(config.general.bus).await?;
    connection
        .object_server()
        .at(
            INSTALLER_OBJECT_PATH,
            InstallerServer::new(orchestrator.clone(), runner, &config, reboot),
        )
        .await
        .context("register installer object")?;

    match request_installer_name(&connection)
        .await
        .context("request installer bus name")?
    {
        RequestNameReply::PrimaryOwner => info!(INSTALLER_BUS_NAME, "acquired installer bus name"),
        RequestNameReply::AlreadyOwner => {
            info!(INSTALLER_BUS_NAME, "already owns installer bus name")
        }
        _ => {
            return Err(anyhow!(
                "installer bus name is already owned; another twinaos-daemon may be running"
            ));
        }
    }

    let forwarder = spawn_event_forwarder(connection.clone(), receiver);

    info!("twinaos-daemon running");
    let signal = shutdown_signal().await;
    info!(signal, "shutting down");
    if orchestrator.is_running() {
        warn!("installation still running; waiting for it to settle before exit");
        wait_for_run(orchestrator.clone()).await?;
    }
    forwarder.abort();

    Ok(())
}

/// Resolve once the active run has completed or failed and its mounts are released.
async fn wait_for_run(orchestrator: Orchestrator) -> Result<()> {
    tokio::task::spawn_blocking(move || orchestrator.wait_until_idle())
        .await
        .context("wait for installation")?;
    info!("installation settled");
    Ok(())
}
