use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{CancelToken, DiffSummary};
use hostkit::{VerifyOptions, VerifyOrchestrator, VerifyReport, VerifyState};

use super::Provisioner;
use crate::AppContext;
use crate::cli::VerifyArgs;
use crate::progress::TargetProgress;
use crate::ui;

/// Regenerate, write and reload the configuration of the targets
pub fn run(ctx: &AppContext, args: VerifyArgs) -> Result<()> {
    let p = Provisioner::open()?;
    let opts = VerifyOptions {
        jobs: args.jobs.unwrap_or(p.config.jobs).max(1),
        dry_run: args.dry_run,
        fail_fast: args.fail_fast,
        restart_timeout: p.config.restart_timeout(),
        ..VerifyOptions::default()
    };
    let orchestrator = p.orchestrator();

    if opts.dry_run {
        return preview(ctx, &orchestrator, &opts);
    }

    if !ctx.quiet {
        ui::header("Verifying");
    }

    let progress = TargetProgress::new(ctx.quiet, ctx.verbose > 0);
    let report = orchestrator.verify(&ctx.targets, &opts, &progress, &CancelToken::new())?;
    progress.finish();

    print_report(ctx, &report);

    let total = report.outcomes.len();
    let failed = report.failed().count();
    if failed > 0 {
        bail!("{} of {} failed verification", failed, ui::plural(total, "target"));
    }
    ui::success(&format!("Verified {}", ui::plural(total, "target")));
    Ok(())
}

fn print_report(ctx: &AppContext, report: &VerifyReport) {
    for outcome in report.outcomes.values() {
        match outcome.state {
            VerifyState::Verified => {
                if ctx.quiet {
                    continue;
                }
                let detail = if outcome.changes == 0 {
                    "up to date".dimmed().to_string()
                } else {
                    format!("{} changed", ui::plural(outcome.changes, "file"))
                };
                println!("  {} {} ({})", "✓".green(), outcome.name.bold(), detail);
            }
            VerifyState::Unverified => {
                println!("  {} {} {}", "-".dimmed(), outcome.name, "(cancelled)".dimmed());
            }
            _ => {
                println!("  {} {}", "✗".red(), outcome.name.bold());
                if let Some(failure) = &outcome.failure {
                    println!("    {}: {}", failure.kind.to_string().red(), failure.message);
                }
            }
        }
        if !ctx.quiet {
            for warning in &outcome.warnings {
                println!("    {} {}", "⚠".yellow(), warning);
            }
        }
    }
}

/// `--dry-run`: per-file diffs, nothing written
fn preview(ctx: &AppContext, orchestrator: &VerifyOrchestrator<'_>, opts: &VerifyOptions) -> Result<()> {
    let preview = orchestrator.preview(&ctx.targets, opts)?;
    if preview.changes.is_empty() && preview.is_success() {
        ui::success("Nothing to change");
        return Ok(());
    }

    if !preview.changes.is_empty() {
        ui::header("Pending changes");
    }
    let mut current = "";
    for change in &preview.changes {
        if change.target != current {
            ui::section(&change.target);
            current = &change.target;
        }
        let marker = if change.diff.is_addition() {
            "+".green()
        } else {
            "~".yellow()
        };
        println!("  {} {}", marker, ui::truncate_path(&change.path.display().to_string(), 72));
        if ctx.verbose > 0 || !change.diff.is_addition() {
            ui::text_diff(change.before.as_deref().unwrap_or_default(), &change.after);
        }
    }

    for (name, failure) in &preview.failures {
        println!("  {} {}", "✗".red(), name.bold());
        println!("    {}: {}", failure.kind.to_string().red(), failure.message);
    }

    let diffs: Vec<_> = preview.changes.iter().map(|c| c.diff.clone()).collect();
    let summary = DiffSummary::from_diffs(&diffs);
    println!();
    ui::info(&format!(
        "{} to create, {} to modify (dry run)",
        summary.additions, summary.modifications
    ));
    if !preview.is_success() {
        bail!(
            "{} would fail verification",
            ui::plural(preview.failures.len(), "target")
        );
    }
    Ok(())
}
