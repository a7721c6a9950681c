pub mod remove;
pub mod save;
pub mod services;
pub mod status;
pub mod verify;

use anyhow::{Result, bail};
use hostkit::{ContextStore, Generator, ServiceRegistry, TemplateRenderer, VerifyOrchestrator};
use std::sync::Arc;

use crate::AppContext;
use crate::config::AppConfig;

/// Everything a command needs: config, registry and the context store
pub struct Provisioner {
    pub config: AppConfig,
    pub store: ContextStore,
    pub registry: ServiceRegistry,
}

impl Provisioner {
    pub fn open() -> Result<Self> {
        let config = AppConfig::load()?;
        let store = ContextStore::new(config.config_path());
        log::debug!("Context registry: {}", store.root().display());
        Ok(Self {
            config,
            store,
            registry: ServiceRegistry::builtin(),
        })
    }

    pub fn orchestrator(&self) -> VerifyOrchestrator<'_> {
        let generator = Generator::new(
            Arc::new(self.config.hook_bus()),
            Arc::new(TemplateRenderer),
        );
        VerifyOrchestrator::new(&self.store, &self.registry, generator)
    }
}

/// The one `--target` a command acts on
pub fn single_target(ctx: &AppContext) -> Result<&str> {
    match ctx.targets.as_slice() {
        [name] => Ok(name),
        [] => bail!("No target given. Use --target <name>."),
        _ => bail!("This command takes a single --target"),
    }
}
