//! Host discovery for the install client: target disks and wireless networks.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use twinaos_core::util::program_in_path;
use twinaos_core::{DiskInfo, Secret, WifiNetwork};

use crate::actions::{CommandResult, CommandRunner, Operation};
use crate::error::DiscoveryError;

const MAX_SSID_BYTES: usize = 32;

/// Host tools the pipeline and discovery invoke.
pub const HOST_PROGRAMS: [&str; 13] = [
    "wipefs",
    "parted",
    "mkfs.fat",
    "mkfs.ext4",
    "mount",
    "umount",
    "debootstrap",
    "chroot",
    "lsblk",
    "nmcli",
    "systemctl",
    "sh",
    "ln",
];

pub fn missing_host_programs() -> Vec<&'static str> {
    HOST_PROGRAMS
        .into_iter()
        .filter(|program| !program_in_path(program))
        .collect()
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    size: Value,
    #[serde(rename = "type", default)]
    kind: String,
}

fn run_checked(
    runner: &dyn CommandRunner,
    operation: Operation,
    timeout: Duration,
) -> Result<CommandResult, DiscoveryError> {
    debug!(operation = %operation, "running");
    Ok(runner
        .execute(&operation, timeout)
        .into_checked(&operation, timeout)?)
}

/// Whole disks from `lsblk -J` output. Partitions, loop devices, and ROMs are skipped.
pub fn parse_lsblk(json: &str) -> Result<Vec<DiskInfo>, DiscoveryError> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    Ok(output
        .blockdevices
        .into_iter()
        .filter(|device| device.kind == "disk")
        .map(|device| DiskInfo {
            path: format!("/dev/{}", device.name),
            size: match device.size {
                Value::String(size) => size,
                Value::Null => String::new(),
                other => other.to_string(),
            },
            name: device.name,
        })
        .collect())
}

pub fn list_disks(
    runner: &dyn CommandRunner,
    timeout: Duration,
) -> Result<Vec<DiskInfo>, DiscoveryError> {
    let result = run_checked(
        runner,
        Operation::new("lsblk").args(["-J", "-o", "NAME,SIZE,TYPE,MOUNTPOINT"]),
        timeout,
    )?;
    let disks = parse_lsblk(&result.stdout)?;
    info!(count = disks.len(), "disks listed");
    Ok(disks)
}

/// Split one terse nmcli line on unescaped `:`.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    if let Some(field) = fields.last_mut() {
                        field.push(escaped);
                    }
                }
            }
            ':' => fields.push(String::new()),
            other => {
                if let Some(field) = fields.last_mut() {
                    field.push(other);
                }
            }
        }
    }
    fields
}

/// Networks from `nmcli -t -f SSID,SIGNAL,SECURITY dev wifi`. Hidden networks are skipped.
pub fn parse_nmcli(output: &str) -> Vec<WifiNetwork> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = split_terse(line).into_iter();
            let ssid = fields.next()?;
            let signal = fields.next()?;
            let security = fields.next()?;
            if ssid.trim().is_empty() {
                return None;
            }
            Some(WifiNetwork {
                ssid,
                signal,
                security,
            })
        })
        .collect()
}

pub fn list_wifi_networks(
    runner: &dyn CommandRunner,
    timeout: Duration,
) -> Result<Vec<WifiNetwork>, DiscoveryError> {
    let result = run_checked(
        runner,
        Operation::new("nmcli").args(["-t", "-f", "SSID,SIGNAL,SECURITY", "dev", "wifi"]),
        timeout,
    )?;
    let networks = parse_nmcli(&result.stdout);
    info!(count = networks.len(), "wifi networks listed");
    Ok(networks)
}

/// Join `ssid`. An empty password joins an open network.
pub fn connect_wifi(
    runner: &dyn CommandRunner,
    timeout: Duration,
    ssid: &str,
    password: &Secret,
) -> Result<String, DiscoveryError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_BYTES || ssid.chars().any(char::is_control) {
        return Err(DiscoveryError::InvalidSsid);
    }
    let mut operation = Operation::new("nmcli");
    if !password.is_empty() {
        // `--ask` makes nmcli prompt for the secret on stdin instead of argv.
        operation = operation
            .arg("--ask")
            .stdin(Secret::new(format!("{}\n", password.expose())));
    }
    operation = operation.args(["dev", "wifi", "connect", ssid]);
    let result = run_checked(runner, operation, timeout)?;
    info!(ssid, "wifi connected");
    Ok(result.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRunner;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn lsblk_keeps_whole_disks_only() {
        let json = r#"{
            "blockdevices": [
                {"name": "sda", "size": "238.5G", "type": "disk", "mountpoint": null,
                 "children": [{"name": "sda1", "size": "512M", "type": "part", "mountpoint": "/boot/efi"}]},
                {"name": "sr0", "size": "1024M", "type": "rom", "mountpoint": null},
                {"name": "loop0", "size": "63.9M", "type": "loop", "mountpoint": "/snap/core"},
                {"name": "nvme0n1", "size": 512110190592, "type": "disk", "mountpoint": null}
            ]
        }"#;
        let disks = parse_lsblk(json).expect("parsed");
        assert_eq!(
            disks,
            vec![
                DiskInfo {
                    name: "sda".to_string(),
                    size: "238.5G".to_string(),
                    path: "/dev/sda".to_string(),
                },
                DiskInfo {
                    name: "nvme0n1".to_string(),
                    size: "512110190592".to_string(),
                    path: "/dev/nvme0n1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn lsblk_garbage_is_a_parse_error() {
        assert!(matches!(parse_lsblk("not json"), Err(DiscoveryError::Parse(_))));
    }

    #[test]
    fn nmcli_honours_escaped_colons_and_skips_hidden() {
        let output = "Home:82:WPA2\n:40:WPA2\nCafe\\: Guest:55:\nbroken-line\n";
        let networks = parse_nmcli(output);
        assert_eq!(
            networks,
            vec![
                WifiNetwork {
                    ssid: "Home".to_string(),
                    signal: "82".to_string(),
                    security: "WPA2".to_string(),
                },
                WifiNetwork {
                    ssid: "Cafe: Guest".to_string(),
                    signal: "55".to_string(),
                    security: String::new(),
                },
            ]
        );
    }

    #[test]
    fn list_disks_runs_lsblk_with_json_output() {
        let runner = FakeRunner::new().respond(
            "lsblk",
            r#"{"blockdevices":[{"name":"vda","size":"20G","type":"disk","mountpoint":null}]}"#,
        );
        let disks = list_disks(&runner, TIMEOUT).expect("disks");
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].path, "/dev/vda");
        assert_eq!(
            runner.command_lines(),
            vec!["lsblk -J -o NAME,SIZE,TYPE,MOUNTPOINT"]
        );
    }

    #[test]
    fn connect_passes_ssid_as_one_argument_and_password_on_stdin() {
        let runner = FakeRunner::new().respond("nmcli", "Device 'wlan0' successfully activated.\n");
        let message = connect_wifi(&runner, TIMEOUT, "Cafe Wifi", &Secret::new("hunter2"))
            .expect("connected");
        assert_eq!(message, "Device 'wlan0' successfully activated.");

        let calls = runner.calls();
        assert_eq!(
            calls[0].arguments(),
            ["--ask", "dev", "wifi", "connect", "Cafe Wifi"]
        );
        assert_eq!(
            calls[0].stdin_payload().map(Secret::expose),
            Some("hunter2\n")
        );
        assert!(calls[0].arguments().iter().all(|arg| !arg.contains("hunter2")));
        assert!(!format!("{:?}", calls[0]).contains("hunter2"));
    }

    #[test]
    fn open_network_omits_password_argument() {
        let runner = FakeRunner::new();
        connect_wifi(&runner, TIMEOUT, "Library", &Secret::default()).expect("connected");
        assert_eq!(runner.command_lines(), vec!["nmcli dev wifi connect Library"]);
        assert!(runner.calls()[0].stdin_payload().is_none());
    }

    #[test]
    fn invalid_ssid_runs_nothing() {
        let runner = FakeRunner::new();
        let too_long = "x".repeat(33);
        for ssid in ["", too_long.as_str(), "bad\nname"] {
            assert!(matches!(
                connect_wifi(&runner, TIMEOUT, ssid, &Secret::default()),
                Err(DiscoveryError::InvalidSsid)
            ));
        }
        assert!(runner.calls().is_empty());
    }
}
