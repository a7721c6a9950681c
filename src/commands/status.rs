use anyhow::Result;
use colored::Colorize;
use hostkit::{Drift, TargetStatus, VerifyState};

use super::Provisioner;
use crate::AppContext;
use crate::cli::StatusArgs;
use crate::ui;

/// Declared configuration and the last verification of each target
pub fn run(ctx: &AppContext, args: StatusArgs) -> Result<()> {
    let p = Provisioner::open()?;
    let statuses = p.orchestrator().status(&ctx.targets)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    for status in &statuses {
        print_status(ctx, status);
    }

    let drifted = statuses
        .iter()
        .flat_map(|s| &s.declared)
        .filter(|d| matches!(d.drift, Drift::Modified | Drift::Missing))
        .count();
    println!();
    if drifted > 0 {
        ui::warn(&format!(
            "{} changed on disk since the last verify",
            ui::plural(drifted, "file")
        ));
    } else if !ctx.quiet {
        ui::info(&ui::plural(statuses.len(), "context"));
    }
    Ok(())
}

fn print_status(ctx: &AppContext, status: &TargetStatus) {
    let icon = match status.last.as_ref().map(|r| r.state) {
        Some(VerifyState::Verified) => "✓".green(),
        Some(VerifyState::Failed) => "✗".red(),
        _ => "○".dimmed(),
    };
    println!();
    println!(
        "{} {} {}",
        icon,
        status.name.bold(),
        format!("({})", status.context_type).dimmed()
    );

    if status.uri != status.name {
        ui::kv("uri", &status.uri);
    }
    if let Some(parent) = &status.parent {
        ui::kv("parent", parent);
    }
    if !status.saved {
        ui::kv("saved", &"no".yellow().to_string());
    }
    for (capability, binding) in &status.services {
        ui::kv(capability, &binding.subtype);
    }
    if let Some(problem) = &status.problem {
        println!("  {} {}", "⚠".yellow(), problem);
    }

    for declared in &status.declared {
        let marker = match declared.drift {
            Drift::InSync => "=".green(),
            Drift::Modified => "~".yellow(),
            Drift::Missing => "!".red(),
            Drift::Unrecorded => "?".dimmed(),
        };
        let path = declared
            .path
            .as_ref()
            .map_or_else(|| "(no path)".to_string(), |p| ui::truncate_path(&p.display().to_string(), 64));
        if ctx.verbose > 0 {
            println!("    {} {} {} {}", marker, declared.id, path, declared.description.dimmed());
        } else {
            println!("    {} {}", marker, path);
        }
    }

    match &status.last {
        Some(record) => {
            let when = record
                .verified_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string();
            ui::kv("last verify", &format!("{} at {}", record.state, when));
            if let Some(failure) = &record.failure {
                println!("    {}: {}", failure.kind.to_string().red(), failure.message);
            }
            for warning in &record.warnings {
                println!("    {} {}", "⚠".yellow(), warning);
            }
        }
        None => ui::dim("never verified"),
    }
}
