//! Configuration types and defaults for the TwinaOS installer.
//!
//! Keeps schema definitions in one place for easier auditing.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from installer.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub install: InstallDefaults,
    pub commands: CommandConfig,
    pub reboot: RebootConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: Option<String>,
    pub bus: BusKind,
    /// Log operations instead of running them.
    pub dry_run: bool,
}

/// Which message bus the daemon serves on.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

/// Target layout and distribution settings for a run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallDefaults {
    pub target_root: PathBuf,
    pub suite: String,
    pub arch: String,
    pub mirror: String,
    pub hostname: String,
    pub timezone: String,
    pub locale: String,
    pub login_shell: String,
    pub admin_group: String,
    pub bootloader_packages: Vec<String>,
    pub efi_target: String,
}

impl Default for InstallDefaults {
    fn default() -> Self {
        Self {
            target_root: PathBuf::from("/mnt/target"),
            suite: "bookworm".to_string(),
            arch: "amd64".to_string(),
            mirror: "http://deb.debian.org/debian".to_string(),
            hostname: "twinaos".to_string(),
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            login_shell: "/bin/bash".to_string(),
            admin_group: "sudo".to_string(),
            bootloader_packages: vec![
                "grub-efi-amd64".to_string(),
                "linux-image-amd64".to_string(),
            ],
            efi_target: "x86_64-efi".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandConfig {
    pub timeout_secs: u64,
    /// Package bootstrap fetches a whole base system and needs more headroom.
    pub bootstrap_timeout_secs: u64,
}

impl CommandConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            bootstrap_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RebootConfig {
    pub delay_secs: u64,
}

impl RebootConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self { delay_secs: 3 }
    }
}
