//! Configuration loading and tracing setup.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use twinaos_core::Config;

use super::Args;

pub(super) fn load_config(args: &Args) -> Result<Config> {
    match args.config.as_ref() {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("read config from {}", path.display())),
        None => Config::load_default().context("read default config"),
    }
}

/// `RUST_LOG` wins over the configured level.
pub(super) fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            config
                .general
                .log_level
                .as_deref()
                .unwrap_or("info"),
        )
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
