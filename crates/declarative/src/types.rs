//! Core types for declarative resource convergence

use serde::{Deserialize, Serialize};

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Resource exists but differs from desired
    Modified { from: String, to: String },
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
    /// Apply failed, the rest of the plan still runs
    Failed { error: String },
    /// Apply was skipped
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Outcome of a single resource within a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub id: String,
    pub result: ApplyResult,
    /// Non-fatal problems the resource reported while applying
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Final status of one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    /// Every resource applied without failure
    Succeeded,
    /// At least one resource failed or the plan was aborted
    Failed,
    /// The plan never started because the run was cancelled
    Cancelled,
}

/// Outcome of one plan (one target)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    /// Plan identifier (the target name)
    pub id: String,
    pub status: PlanStatus,
    /// Per-resource results, in plan order
    pub resources: Vec<ResourceOutcome>,
    /// Error that aborted the plan, if any
    pub aborted: Option<String>,
    /// Post-action failures and other non-fatal problems
    pub warnings: Vec<String>,
}

impl PlanOutcome {
    /// Outcome for a plan that was never started
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: PlanStatus::Cancelled,
            resources: Vec::new(),
            aborted: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PlanStatus::Succeeded
    }

    /// Resources whose apply failed without aborting the plan
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.resources.iter().filter_map(|r| match &r.result {
            ApplyResult::Failed { error } => Some((r.id.as_str(), error.as_str())),
            _ => None,
        })
    }
}

/// Report for a whole run, one outcome per plan in input order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteReport {
    pub plans: Vec<PlanOutcome>,
}

impl ExecuteReport {
    /// AND of every plan outcome; a cancelled plan counts as not successful
    pub fn is_success(&self) -> bool {
        self.plans.iter().all(PlanOutcome::is_success)
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Number of worker threads plans are spread over
    pub jobs: usize,
    /// Verbose output
    pub verbose: bool,
    /// Cancel plans that have not started yet once one plan fails
    pub fail_fast: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            verbose: false,
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: PlanStatus) -> PlanOutcome {
        PlanOutcome {
            id: id.to_string(),
            status,
            resources: vec![ResourceOutcome {
                id: format!("{id}:file"),
                result: ApplyResult::Created,
                warnings: Vec::new(),
            }],
            aborted: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_report_success_is_and_of_plans() {
        let mut report = ExecuteReport {
            plans: vec![
                outcome("a", PlanStatus::Succeeded),
                outcome("b", PlanStatus::Succeeded),
            ],
        };
        assert!(report.is_success());

        report.plans.push(outcome("c", PlanStatus::Failed));
        assert!(!report.is_success());
        assert_eq!(report.plans.iter().filter(|p| p.status == PlanStatus::Failed).count(), 1);
    }

    #[test]
    fn test_cancelled_plan_is_not_success() {
        let report = ExecuteReport {
            plans: vec![PlanOutcome::cancelled("a")],
        };
        assert!(!report.is_success());
        assert_eq!(report.plans.iter().filter(|p| p.status == PlanStatus::Failed).count(), 0);
    }

    #[test]
    fn test_failures_lists_failed_resources() {
        let mut plan = outcome("a", PlanStatus::Failed);
        plan.resources.push(ResourceOutcome {
            id: "a:vhost".into(),
            result: ApplyResult::Failed {
                error: "boom".into(),
            },
            warnings: Vec::new(),
        });
        let failures: Vec<_> = plan.failures().collect();
        assert_eq!(failures, vec![("a:vhost", "boom")]);
    }
}
