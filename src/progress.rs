//! Progress reporting for verify runs

use colored::Colorize;
use declarative::{ApplyResult, PlanOutcome, PlanStatus, ProgressCallback};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress bar over targets, printing failures as they happen
pub struct TargetProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl TargetProgress {
    /// Hidden when quiet or when stderr is not a terminal
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let bar = ProgressBar::hidden();
        if !quiet && console::Term::stderr().is_term() {
            bar.set_draw_target(ProgressDrawTarget::stderr());
        }
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, verbose }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for TargetProgress {
    fn on_start(&self, plans: usize) {
        self.bar.set_length(plans as u64);
    }

    fn on_plan_start(&self, id: &str) {
        self.bar.set_message(id.to_string());
    }

    fn on_resource_complete(&self, plan: &str, resource: &str, result: &ApplyResult) {
        if !self.verbose {
            return;
        }
        let line = match result {
            ApplyResult::Created => format!("  {} {} {}", "+".green(), plan, resource),
            ApplyResult::Modified => format!("  {} {} {}", "~".yellow(), plan, resource),
            ApplyResult::Failed { error } => {
                format!("  {} {} {}: {}", "✗".red(), plan, resource, error)
            }
            _ => format!("  {} {} {}", "·".dimmed(), plan, resource),
        };
        self.bar.suspend(|| println!("{}", line));
    }

    fn on_plan_complete(&self, outcome: &PlanOutcome) {
        if outcome.status == PlanStatus::Failed {
            self.bar
                .suspend(|| println!("  {} {}", "✗".red(), outcome.id.bold()));
        }
        self.bar.inc(1);
    }
}
