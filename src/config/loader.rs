// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::model::{MachineConfig, RawMachineConfig};
use crate::errors::{Result, StreamsheetError};

pub const ENV_MAX_BUFFER_SIZE: &str = "STREAMSHEETS_MAX_BUFFER_SIZE";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "STREAMSHEETS_REQUEST_TIMEOUT_MS";
pub const ENV_CYCLETIME: &str = "STREAMSHEETS_CYCLETIME";

/// Load a configuration file and return the raw, unvalidated config.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawMachineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Parse TOML text into a raw config.
pub fn parse_str(contents: &str) -> Result<RawMachineConfig> {
    let config: RawMachineConfig = toml::from_str(contents)?;
    Ok(config)
}

/// Load, apply environment overrides, then validate.
///
/// This is the entry point used by the binary.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<MachineConfig> {
    let mut raw = load_from_path(&path)?;
    apply_env_overrides(&mut raw, |key| std::env::var(key).ok())?;
    MachineConfig::try_from(raw)
}

/// Override tunables from the environment.
///
/// `lookup` is usually `std::env::var(..).ok()`; tests pass a map instead.
pub fn apply_env_overrides(
    cfg: &mut RawMachineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup(ENV_MAX_BUFFER_SIZE) {
        cfg.queue.max_buffer_size = parse_number(ENV_MAX_BUFFER_SIZE, &v)?;
        debug!(max_buffer_size = cfg.queue.max_buffer_size, "override from environment");
    }
    if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_MS) {
        cfg.queue.request_timeout_ms = parse_number(ENV_REQUEST_TIMEOUT_MS, &v)?;
        debug!(request_timeout_ms = cfg.queue.request_timeout_ms, "override from environment");
    }
    if let Some(v) = lookup(ENV_CYCLETIME) {
        cfg.machine.cycletime = parse_number(ENV_CYCLETIME, &v)?;
        debug!(cycletime = cfg.machine.cycletime, "override from environment");
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        warn!(key, value, "invalid numeric environment override");
        StreamsheetError::ConfigError(format!("{key} must be a non-negative integer (got '{value}')"))
    })
}
