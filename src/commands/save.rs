use anyhow::{Context as AnyhowContext, Result, bail};
use dialoguer::{Input, Select};
use hostkit::{Context, ContextKind, ContextType, ErrorKind, ServiceBinding};

use super::Provisioner;
use crate::AppContext;
use crate::cli::{SaveArgs, parse_pair};
use crate::ui;

/// Create or update the target context definition
pub fn run(ctx: &AppContext, args: SaveArgs) -> Result<()> {
    let p = Provisioner::open()?;

    let name = match ctx.targets.as_slice() {
        [name] => name.clone(),
        [] if console::user_attended() => Input::<String>::new()
            .with_prompt("Context name")
            .interact_text()
            .context("Failed to read context name")?,
        [] => bail!("No target given. Use --target <name>."),
        _ => bail!("save takes a single --target"),
    };

    let existing = match p.store.load(&name) {
        Ok(context) => Some(context),
        Err(e) if e.kind() == ErrorKind::ContextNotFound => None,
        Err(e) => return Err(e.into()),
    };

    let requested = args.context_type.map(ContextType::from);
    let mut context = match existing {
        Some(context) => {
            if let Some(t) = requested
                && t != context.context_type()
            {
                bail!("'{}' is already saved as a {}", name, context.context_type());
            }
            context
        }
        None => {
            let context_type = match requested {
                Some(t) => t,
                None => prompt_type()?,
            };
            new_context(&p, &name, context_type, &args)?
        }
    };

    apply_fields(&mut context, &args);

    for raw in &args.services {
        let Some((capability, subtype)) = parse_pair(raw) else {
            bail!("Invalid service '{}', expected CAPABILITY=SUBTYPE", raw);
        };
        let binding = context
            .services
            .get(capability)
            .filter(|b| b.subtype == subtype)
            .cloned()
            .unwrap_or_else(|| ServiceBinding::new(subtype));
        p.registry.resolve(capability, &binding)?;
        context.services.insert(capability.to_string(), binding);
    }

    let path = p.orchestrator().save(&context)?;

    ui::success(&format!("Saved {} '{}'", context.context_type(), context.name));
    ui::dim(&path.display().to_string());
    if ctx.verbose > 0 {
        for (capability, binding) in &context.services {
            ui::kv(capability, &binding.subtype);
        }
    }
    Ok(())
}

fn new_context(p: &Provisioner, name: &str, context_type: ContextType, args: &SaveArgs) -> Result<Context> {
    let context = match context_type {
        ContextType::Server => Context::server(name)?,
        ContextType::Platform => {
            let server = match &args.server {
                Some(server) => server.clone(),
                None => prompt_server(p)?,
            };
            let root = match &args.root {
                Some(root) => root.clone(),
                None if console::user_attended() => Input::<String>::new()
                    .with_prompt("Platform root")
                    .interact_text()
                    .context("Failed to read platform root")?
                    .into(),
                None => bail!("--root is required for a new platform"),
            };
            Context::platform(name, &server, root)?
        }
        ContextType::Site => {
            let platform = match &args.platform {
                Some(platform) => platform.clone(),
                None => prompt_platform(p)?,
            };
            let uri = args.uri.as_deref().unwrap_or(name);
            Context::site(name, &platform, uri)?
        }
    };
    Ok(context)
}

/// Overwrite typed fields given on the command line
fn apply_fields(context: &mut Context, args: &SaveArgs) {
    match &mut context.kind {
        ContextKind::Server(server) => {
            if let Some(host) = &args.remote_host {
                server.remote_host.clone_from(host);
            }
            if let Some(group) = &args.web_group {
                server.web_group.clone_from(group);
            }
            if let Some(user) = &args.script_user {
                server.script_user.clone_from(user);
            }
            if let Some(dir) = &args.config_dir {
                server.config_dir.clone_from(dir);
            }
        }
        ContextKind::Platform(platform) => {
            if let Some(server) = &args.server {
                platform.server.clone_from(server);
            }
            if let Some(root) = &args.root {
                platform.root.clone_from(root);
            }
        }
        ContextKind::Site(site) => {
            if let Some(platform) = &args.platform {
                site.platform.clone_from(platform);
            }
            if let Some(uri) = &args.uri {
                site.uri.clone_from(uri);
            }
        }
    }
}

fn prompt_type() -> Result<ContextType> {
    if !console::user_attended() {
        bail!("--type is required for a new context");
    }
    let labels: Vec<&str> = ContextType::ALL.iter().map(ContextType::as_str).collect();
    let idx = Select::new()
        .with_prompt("Context type")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to read context type")?;
    Ok(ContextType::ALL[idx])
}

/// Pick a hosting server among those providing http
fn prompt_server(p: &Provisioner) -> Result<String> {
    if !console::user_attended() {
        bail!("--server is required for a new platform");
    }
    let options = match p.store.server_options(Some("http")) {
        Ok(options) => options,
        Err(e) if e.kind() == ErrorKind::NoContextsFound => {
            bail!("No servers saved yet. Save one with 'provision save --type server -t <name> --service http=apache'")
        }
        Err(e) => return Err(e.into()),
    };
    if options.is_empty() {
        bail!("No saved server provides an http service");
    }

    let (names, labels): (Vec<&String>, Vec<&String>) = options.iter().unzip();
    let idx = Select::new()
        .with_prompt("Hosting server")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to read server selection")?;
    Ok(names[idx].clone())
}

fn prompt_platform(p: &Provisioner) -> Result<String> {
    if !console::user_attended() {
        bail!("--platform is required for a new site");
    }
    let platforms: Vec<String> = p
        .store
        .discover(None)?
        .into_values()
        .filter(|c| c.context_type() == ContextType::Platform)
        .map(|c| c.name)
        .collect();
    if platforms.is_empty() {
        bail!("No platforms saved yet");
    }

    let idx = Select::new()
        .with_prompt("Platform")
        .items(&platforms)
        .default(0)
        .interact()
        .context("Failed to read platform selection")?;
    Ok(platforms[idx].clone())
}
