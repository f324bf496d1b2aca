//! Install requests as received from a client and the validated run configuration.
//!
//! Every value here reaches an external command or a file in the target root, so
//! validation is strict and the password is wrapped to keep it out of logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zbus::zvariant::Type;

use crate::InstallDefaults;

/// Opaque secret. `Debug` never prints the value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Plaintext value, for handing to a process over stdin only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMode {
    Auto,
    Manual,
}

impl PartitionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PartitionMode::Auto => "auto",
            PartitionMode::Manual => "manual",
        }
    }
}

/// Client-supplied install choices. Empty strings mean "use the default".
#[derive(Clone, Default, Serialize, Deserialize, Type)]
pub struct InstallRequest {
    pub disk: String,
    pub mode: String,
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub hostname: String,
    pub timezone: String,
    pub locale: String,
}

impl fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallRequest")
            .field("disk", &self.disk)
            .field("mode", &self.mode)
            .field("username", &self.username)
            .field("password", &"***")
            .field("full_name", &self.full_name)
            .field("hostname", &self.hostname)
            .field("timezone", &self.timezone)
            .field("locale", &self.locale)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("target disk is required")]
    MissingDisk,
    #[error("invalid target disk path: {0}")]
    InvalidDisk(String),
    #[error("unknown partition mode: {0}")]
    UnknownMode(String),
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("password is required")]
    MissingPassword,
    #[error("password contains unsupported characters")]
    InvalidPassword,
    #[error("invalid full name")]
    InvalidFullName,
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("invalid locale: {0}")]
    InvalidLocale(String),
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub disk: String,
    pub mode: PartitionMode,
    pub username: String,
    pub password: Secret,
    pub full_name: String,
    pub hostname: String,
    pub timezone: String,
    pub locale: String,
}

impl InstallConfig {
    /// Validate a request and fill unset hostname, timezone, and locale from defaults.
    pub fn from_request(
        request: InstallRequest,
        defaults: &InstallDefaults,
    ) -> Result<Self, RequestError> {
        let disk = request.disk.trim().to_string();
        if disk.is_empty() {
            return Err(RequestError::MissingDisk);
        }
        validate_disk(&disk)?;

        let mode = match request.mode.trim() {
            "" | "auto" => PartitionMode::Auto,
            "manual" => PartitionMode::Manual,
            other => return Err(RequestError::UnknownMode(other.to_string())),
        };

        let username = request.username.trim().to_string();
        validate_username(&username)?;

        if request.password.is_empty() {
            return Err(RequestError::MissingPassword);
        }
        if request.password.chars().any(|ch| ch == '\n' || ch == '\r' || ch == '\0') {
            return Err(RequestError::InvalidPassword);
        }

        let full_name = request.full_name.trim().to_string();
        if full_name.len() > 128
            || full_name.chars().any(|ch| ch == ':' || ch.is_control())
        {
            return Err(RequestError::InvalidFullName);
        }

        let hostname = or_default(&request.hostname, &defaults.hostname);
        validate_hostname(&hostname)?;
        let timezone = or_default(&request.timezone, &defaults.timezone);
        validate_timezone(&timezone)?;
        let locale = or_default(&request.locale, &defaults.locale);
        validate_locale(&locale)?;

        Ok(Self {
            disk,
            mode,
            username,
            password: Secret::new(request.password),
            full_name,
            hostname,
            timezone,
            locale,
        })
    }
}

fn or_default(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

fn validate_disk(disk: &str) -> Result<(), RequestError> {
    let valid = disk.starts_with("/dev/")
        && disk.len() > "/dev/".len()
        && !disk.contains("..")
        && disk
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '/' | '_' | '-' | '.' | ':' | '+'));
    if valid {
        Ok(())
    } else {
        Err(RequestError::InvalidDisk(disk.to_string()))
    }
}

fn validate_username(username: &str) -> Result<(), RequestError> {
    let mut chars = username.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => chars
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-'),
        _ => false,
    };
    if !valid || username.len() > 32 || username == "root" {
        return Err(RequestError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

fn validate_hostname(hostname: &str) -> Result<(), RequestError> {
    let valid = !hostname.is_empty()
        && hostname.len() <= 253
        && hostname.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(RequestError::InvalidHostname(hostname.to_string()))
    }
}

fn validate_timezone(timezone: &str) -> Result<(), RequestError> {
    let valid = !timezone.starts_with('/')
        && !timezone.ends_with('/')
        && !timezone.contains("..")
        && timezone
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '/' | '_' | '+' | '-'));
    if valid {
        Ok(())
    } else {
        Err(RequestError::InvalidTimezone(timezone.to_string()))
    }
}

fn validate_locale(locale: &str) -> Result<(), RequestError> {
    let valid = locale
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '@' | '-'));
    if valid {
        Ok(())
    } else {
        Err(RequestError::InvalidLocale(locale.to_string()))
    }
}
