//! Application configuration (`.provision.yml`)
//!
//! ```yaml
//! config_path: ~/config
//! jobs: 4
//! hook_merge: deep
//! restart_timeout: 30
//! hooks:
//!   - name: redis
//!     hook: provision_drupal_services
//!     command: /usr/local/bin/provision-redis-services
//!     timeout: 10
//! ```

use anyhow::{Context, Result, bail};
use hostkit::{CommandContributor, ExtensionHookBus, MergePolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::paths;

const DEFAULT_HOOK_TIMEOUT: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the context registry (contexts live in `<config_path>/provision`)
    pub config_path: String,
    /// Targets verified in parallel
    pub jobs: usize,
    /// How extension hook contributions are combined
    pub hook_merge: MergePolicy,
    /// Seconds a service restart may take
    pub restart_timeout: u64,
    pub hooks: Vec<HookConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: "~/config".to_string(),
            jobs: 4,
            hook_merge: MergePolicy::Deep,
            restart_timeout: 30,
            hooks: Vec::new(),
        }
    }
}

/// An external command registered as a hook contributor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub name: String,
    pub hook: String,
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl AppConfig {
    /// Load from the config directory; a missing file means defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid config format in {}", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        for hook in &self.hooks {
            if hook.command.trim().is_empty() {
                bail!("hook '{}' has an empty command", hook.name);
            }
        }
        Ok(())
    }

    /// Registry root, after env override and expansion
    pub fn config_path(&self) -> PathBuf {
        paths::config_path(&self.config_path)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout)
    }

    /// Hook bus with every configured contributor, in file order
    pub fn hook_bus(&self) -> ExtensionHookBus {
        let mut bus = ExtensionHookBus::new(self.hook_merge);
        for hook in &self.hooks {
            bus.register(Arc::new(CommandContributor {
                name: hook.name.clone(),
                hook: hook.hook.clone(),
                command: hook.command.clone(),
                timeout: Duration::from_secs(hook.timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT)),
            }));
        }
        bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::load_from(&tmp.path().join(".provision.yml")).unwrap();
        assert_eq!(config.jobs, 4);
        assert_eq!(config.hook_merge, MergePolicy::Deep);
        assert_eq!(config.config_path, "~/config");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".provision.yml");
        fs::write(
            &path,
            "hook_merge: replace\nhooks:\n  - name: redis\n    hook: provision_drupal_services\n    command: echo '{}'\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.hook_merge, MergePolicy::Replace);
        assert_eq!(config.restart_timeout, 30);
        assert_eq!(config.hook_bus().len(), 1);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".provision.yml");

        fs::write(&path, "jobs: 0\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());

        fs::write(&path, "hook_merge: sometimes\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
