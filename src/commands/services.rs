use anyhow::{Result, bail};
use colored::Colorize;
use hostkit::{ContextType, ServiceBinding, ServiceRegistry};

use super::{Provisioner, single_target};
use crate::AppContext;
use crate::cli::{ServicesCommand, parse_pair};
use crate::ui;

pub fn run(ctx: &AppContext, cmd: ServicesCommand) -> Result<()> {
    match cmd {
        ServicesCommand::List => list(ctx),
        ServicesCommand::Add {
            capability,
            subtype,
            properties,
        } => add(ctx, &capability, &subtype, &properties),
        ServicesCommand::Remove { capability } => remove(ctx, &capability),
    }
}

/// Known services without a target, effective bindings with one
fn list(ctx: &AppContext) -> Result<()> {
    let p = Provisioner::open()?;
    if ctx.targets.is_empty() {
        print_registry(&p.registry);
        return Ok(());
    }

    for status in p.orchestrator().status(&ctx.targets)? {
        ui::section(&status.name);
        if status.services.is_empty() {
            ui::dim("no services");
        }
        let own = p
            .store
            .load(&status.name)
            .map(|c| c.services)
            .unwrap_or_default();
        for (capability, binding) in &status.services {
            let origin = if own.contains_key(capability) { "" } else { " (inherited)" };
            println!(
                "  {}: {}{}",
                capability.dimmed(),
                binding.subtype,
                origin.dimmed()
            );
            for (key, value) in &binding.properties {
                let value = serde_yaml::to_string(value)?;
                println!("    {} = {}", key.dimmed(), value.trim_end());
            }
        }
    }
    Ok(())
}

fn print_registry(registry: &ServiceRegistry) {
    ui::header("Services");
    for service in registry.iter() {
        println!();
        println!(
            "{} {}",
            service.id.bold(),
            format!("({}, {})", service.capability, service.name).dimmed()
        );
        for context_type in ContextType::ALL {
            let descriptors = service.configurations(context_type);
            if descriptors.is_empty() {
                continue;
            }
            let ids: Vec<&str> = descriptors.iter().map(|d| d.id()).collect();
            ui::kv(context_type.as_str(), &ids.join(", "));
        }
        if let Some(control) = &service.control {
            ui::kv("reload", control.action);
        }
    }
}

fn add(ctx: &AppContext, capability: &str, subtype: &str, properties: &[String]) -> Result<()> {
    let name = single_target(ctx)?;
    let p = Provisioner::open()?;
    let mut context = p.store.load(name)?;

    let mut binding = ServiceBinding::new(subtype);
    for raw in properties {
        let Some((key, value)) = parse_pair(raw) else {
            bail!("Invalid property '{}', expected KEY=VALUE", raw);
        };
        let value = serde_yaml::from_str::<serde_yaml::Value>(value)
            .unwrap_or_else(|_| serde_yaml::Value::from(value));
        binding = binding.with_property(key, value);
    }
    let service = p.registry.resolve(capability, &binding)?;

    let replaced = context.services.insert(capability.to_string(), binding);
    p.orchestrator().save(&context)?;

    match replaced {
        Some(old) if old.subtype != subtype => ui::success(&format!(
            "{}: {} replaced by {} on '{}'",
            capability, old.subtype, service.id, name
        )),
        _ => ui::success(&format!("{}: {} bound on '{}'", capability, service.id, name)),
    }
    ui::dim("Run 'provision verify' to write its configuration");
    Ok(())
}

fn remove(ctx: &AppContext, capability: &str) -> Result<()> {
    let name = single_target(ctx)?;
    let p = Provisioner::open()?;
    let mut context = p.store.load(name)?;

    let Some(old) = context.services.remove(capability) else {
        bail!("'{}' has no {} binding of its own", name, capability);
    };
    p.orchestrator().save(&context)?;
    ui::success(&format!("Removed {} ({}) from '{}'", capability, old.subtype, name));
    Ok(())
}
