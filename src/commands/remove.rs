use anyhow::{Context as AnyhowContext, Result, bail};
use dialoguer::Confirm;

use super::Provisioner;
use crate::AppContext;
use crate::ui;

/// Delete the target definitions; generated files stay on disk
pub fn run(ctx: &AppContext, yes: bool) -> Result<()> {
    if ctx.targets.is_empty() {
        bail!("No target given. Use --target <name>.");
    }
    let p = Provisioner::open()?;

    if !yes {
        if !console::user_attended() {
            bail!("Refusing to remove without --yes in a non-interactive session");
        }
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {}?", ctx.targets.join(", ")))
            .default(false)
            .interact()
            .context("Failed to read user input")?;
        if !confirmed {
            ui::info("Aborted. Nothing removed.");
            return Ok(());
        }
    }

    let mut failed = 0;
    for name in &ctx.targets {
        match p.store.remove(name) {
            Ok(path) => {
                ui::success(&format!("Removed '{}'", name));
                ui::dim(&path.display().to_string());
            }
            Err(e) => {
                ui::error(&e.to_string());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} not removed", ui::plural(failed, "context"));
    }
    Ok(())
}
