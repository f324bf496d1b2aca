//! Command-line client for the TwinaOS installer D-Bus interface.

use std::io::{self, BufRead};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use twinaos_core::{InstallRequest, InstallerProxy, RunStateView, COMPLETE_PROGRESS};
use zbus::Connection;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Talk to a daemon on the session bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an installation
    Start {
        #[arg(long)]
        disk: String,
        #[arg(long, value_enum, default_value_t = Mode::Auto)]
        mode: Mode,
        #[arg(long)]
        username: String,
        /// Read the account password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
        #[arg(long, default_value = "")]
        full_name: String,
        #[arg(long, default_value = "")]
        hostname: String,
        #[arg(long, default_value = "")]
        timezone: String,
        #[arg(long, default_value = "")]
        locale: String,
        /// Follow progress until the run finishes
        #[arg(long)]
        watch: bool,
    },
    Status,
    /// Follow progress of the current run
    Watch,
    Disks,
    WifiList,
    WifiConnect {
        ssid: String,
        /// Read the network password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },
    Reboot,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Auto,
    Manual,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Manual => "manual",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let connection = if args.session {
        Connection::session()
            .await
            .context("connect to session bus")?
    } else {
        Connection::system().await.context("connect to system bus")?
    };
    let proxy = InstallerProxy::new(&connection)
        .await
        .context("connect to twinaos installer interface")?;

    match args.command {
        Command::Start {
            disk,
            mode,
            username,
            password_stdin,
            full_name,
            hostname,
            timezone,
            locale,
            watch,
        } => {
            if !password_stdin {
                bail!("an account password is required; pass it with --password-stdin");
            }
            let request = InstallRequest {
                disk,
                mode: mode.as_str().to_string(),
                username,
                password: read_secret_line()?,
                full_name,
                hostname,
                timezone,
                locale,
            };
            if watch {
                follow(&proxy, Some(request)).await?;
            } else {
                proxy
                    .start_installation(request)
                    .await
                    .context("start installation")?;
                println!("installation started");
            }
        }
        Command::Status => {
            let status = proxy.get_status().await?;
            print_status(&status);
        }
        Command::Watch => follow(&proxy, None).await?,
        Command::Disks => {
            let disks = proxy.list_disks().await?;
            println!("disks: {}", disks.len());
            for disk in disks {
                println!("- {path} ({size})", path = disk.path, size = disk.size);
            }
        }
        Command::WifiList => {
            let networks = proxy.list_wifi_networks().await?;
            println!("networks: {}", networks.len());
            for network in networks {
                let security = if network.security.is_empty() {
                    "open"
                } else {
                    network.security.as_str()
                };
                println!(
                    "- {ssid} [{signal}%] {security}",
                    ssid = network.ssid,
                    signal = network.signal
                );
            }
        }
        Command::WifiConnect {
            ssid,
            password_stdin,
        } => {
            let password = if password_stdin {
                read_secret_line()?
            } else {
                String::new()
            };
            let message = proxy.connect_wifi(&ssid, &password).await?;
            println!("{message}");
        }
        Command::Reboot => {
            proxy.reboot().await?;
            println!("reboot scheduled");
        }
    }

    Ok(())
}

fn read_secret_line() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password from stdin")?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(anyhow!("empty password on stdin"));
    }
    Ok(secret)
}

fn print_status(status: &RunStateView) {
    println!("status: {}", status.status);
    println!("progress: {}%", status.progress);
    if !status.stage.is_empty() {
        println!("stage: {}", status.stage);
    }
    if !status.error.is_empty() {
        println!("error: {}", status.error);
    }
    if !status.started_at.is_empty() {
        println!("started: {}", status.started_at);
    }
    if !status.finished_at.is_empty() {
        println!("finished: {}", status.finished_at);
    }
}

/// Follow progress until the run completes or fails. With `request`, start it
/// only after subscribing so no early checkpoint is missed.
async fn follow(proxy: &InstallerProxy<'_>, request: Option<InstallRequest>) -> Result<()> {
    let mut progress = proxy
        .receive_install_progress()
        .await
        .context("subscribe to progress")?;
    let mut errors = proxy
        .receive_install_error()
        .await
        .context("subscribe to errors")?;

    match request {
        Some(request) => {
            proxy
                .start_installation(request)
                .await
                .context("start installation")?;
            println!("installation started");
        }
        None => {
            let status = proxy.get_status().await?;
            print_status(&status);
            if status.status != "running" {
                return Ok(());
            }
        }
    }

    loop {
        tokio::select! {
            signal = progress.next() => {
                let Some(signal) = signal else {
                    bail!("progress stream ended");
                };
                let args = signal.args().context("decode progress signal")?;
                let percent = *args.percent();
                println!("[{percent:>3}%] {}", args.message());
                if percent >= COMPLETE_PROGRESS {
                    return Ok(());
                }
            }
            signal = errors.next() => {
                let Some(signal) = signal else {
                    bail!("error stream ended");
                };
                let args = signal.args().context("decode error signal")?;
                bail!("installation failed: {}", args.reason());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_defaults_leave_optional_fields_empty() {
        let args = Args::try_parse_from([
            "twinactl",
            "start",
            "--disk",
            "/dev/sda",
            "--username",
            "alice",
            "--password-stdin",
        ])
        .expect("parsed");
        match args.command {
            Command::Start {
                mode,
                hostname,
                timezone,
                locale,
                watch,
                ..
            } => {
                assert_eq!(mode, Mode::Auto);
                assert!(hostname.is_empty() && timezone.is_empty() && locale.is_empty());
                assert!(!watch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(!args.session);
    }

    #[test]
    fn wifi_connect_takes_ssid_positionally() {
        let args = Args::try_parse_from(["twinactl", "--session", "wifi-connect", "Cafe Wifi"])
            .expect("parsed");
        assert!(args.session);
        assert!(matches!(
            args.command,
            Command::WifiConnect { ref ssid, password_stdin: false } if ssid == "Cafe Wifi"
        ));
    }

    #[test]
    fn password_is_never_a_plain_flag() {
        assert!(Args::try_parse_from([
            "twinactl",
            "start",
            "--disk",
            "/dev/sda",
            "--username",
            "alice",
            "--password",
            "secret",
        ])
        .is_err());
    }
}
