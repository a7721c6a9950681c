//! Path resolution for provision
//!
//! # Environment Variables
//!
//! - `PROVISION_CONFIG_DIR` - Override the directory holding `.provision.yml`
//! - `PROVISION_CONFIG_PATH` - Override `config_path`, the root of the context registry
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `PROVISION_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/provision` (if set)
//! 3. `~/.config/provision`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "PROVISION_CONFIG_DIR";

/// Environment variable for context registry root override
pub const ENV_CONFIG_PATH: &str = "PROVISION_CONFIG_PATH";

/// Name of the application config file
pub const CONFIG_FILE: &str = ".provision.yml";

/// Get the provision config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("provision");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("provision");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Path of `.provision.yml`
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Resolve the registry root, letting `PROVISION_CONFIG_PATH` win over config
pub fn config_path(configured: &str) -> PathBuf {
    match std::env::var(ENV_CONFIG_PATH) {
        Ok(dir) if !dir.is_empty() => {
            log::debug!("Using config path from {}: {}", ENV_CONFIG_PATH, dir);
            expand(&dir)
        }
        _ => expand(configured),
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
