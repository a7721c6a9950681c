//! Execution engine - converges plans with bounded parallelism and isolated failures

use crate::context::{ApplyContext, CancelToken, PathLocks, ProgressCallback};
use crate::planner::ExecutionPlan;
use crate::resource::Resource;
use crate::types::{
    ApplyResult, ExecuteOptions, ExecuteReport, PlanOutcome, PlanStatus, ResourceOutcome,
};
use anyhow::{Context, Result};
use rayon::prelude::*;

/// Execute plans with the given options, progress callback and cancel token
///
/// Plans are independent: each one is run start-to-finish by a single worker,
/// and a failure in one never stops another. Within a plan, resources apply
/// strictly in order. Cancellation is only observed between plans.
///
/// # Returns
/// One outcome per plan, in the same order as `plans`
pub fn execute<P: ProgressCallback>(
    plans: Vec<ExecutionPlan>,
    opts: &ExecuteOptions,
    progress: &P,
    cancel: &CancelToken,
) -> Result<ExecuteReport> {
    let locks = PathLocks::new();
    progress.on_start(plans.len());

    let run = |plan: &ExecutionPlan| {
        let outcome = if cancel.is_cancelled() {
            log::info!("Skipping {}: run cancelled", plan.id);
            PlanOutcome::cancelled(&plan.id)
        } else {
            let outcome = execute_plan(plan, opts, &locks, progress);
            if opts.fail_fast && outcome.status == PlanStatus::Failed {
                cancel.cancel();
            }
            outcome
        };
        progress.on_plan_complete(&outcome);
        outcome
    };

    let outcomes = if opts.jobs <= 1 || plans.len() <= 1 {
        plans.iter().map(run).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.jobs)
            .build()
            .context("Failed to create thread pool")?;
        pool.install(|| plans.par_iter().map(run).collect())
    };

    Ok(ExecuteReport { plans: outcomes })
}

/// Run one plan to completion
fn execute_plan<P: ProgressCallback>(
    plan: &ExecutionPlan,
    opts: &ExecuteOptions,
    locks: &PathLocks,
    progress: &P,
) -> PlanOutcome {
    progress.on_plan_start(&plan.id);
    let ctx = ApplyContext::new(opts.dry_run, opts.verbose, locks);

    let mut outcome = PlanOutcome {
        id: plan.id.clone(),
        status: PlanStatus::Succeeded,
        resources: Vec::with_capacity(plan.resources.len()),
        aborted: None,
        warnings: Vec::new(),
    };

    for resource in &plan.resources {
        match apply_resource(resource.as_ref(), &ctx) {
            Ok(result) => {
                progress.on_resource_complete(&plan.id, &resource.id(), &result);
                outcome.resources.push(ResourceOutcome {
                    id: resource.id(),
                    result,
                    warnings: ctx.take_warnings(),
                });
            }
            Err(e) => {
                let error = format!("{}: {:#}", resource.id(), e);
                log::error!("{} aborted: {}", plan.id, error);
                let result = ApplyResult::Failed {
                    error: format!("{:#}", e),
                };
                progress.on_resource_complete(&plan.id, &resource.id(), &result);
                outcome.resources.push(ResourceOutcome {
                    id: resource.id(),
                    result,
                    warnings: ctx.take_warnings(),
                });
                outcome.aborted = Some(error);
                break;
            }
        }
    }

    if outcome.aborted.is_none() && !opts.dry_run {
        for action in &plan.post_actions {
            log::debug!("{}: {}", plan.id, action.description());
            if let Err(e) = action.run(&ctx) {
                outcome
                    .warnings
                    .push(format!("{} failed: {:#}", action.description(), e));
            }
            outcome.warnings.extend(ctx.take_warnings());
        }
    }

    if outcome.aborted.is_some() || outcome.failures().next().is_some() {
        outcome.status = PlanStatus::Failed;
    }
    outcome
}

/// Apply a single resource, holding its path lock if it has one
fn apply_resource(resource: &dyn Resource, ctx: &ApplyContext) -> Result<ApplyResult> {
    match resource.lock_path() {
        Some(path) => ctx.locks.with_lock(&path, || resource.apply(ctx)),
        None => resource.apply(ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::resource::PostAction;
    use crate::types::ResourceState;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        Create,
        Unchanged,
        Fail,
        Abort,
    }

    #[derive(Debug)]
    struct TestResource {
        id: String,
        behaviour: Behaviour,
        applied: Arc<AtomicUsize>,
    }

    impl TestResource {
        fn boxed(id: &str, behaviour: Behaviour, applied: &Arc<AtomicUsize>) -> Box<Self> {
            Box::new(Self {
                id: id.to_string(),
                behaviour,
                applied: Arc::clone(applied),
            })
        }
    }

    impl Resource for TestResource {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn description(&self) -> String {
            format!("Test resource {}", self.id)
        }

        fn resource_type(&self) -> &'static str {
            "test"
        }

        fn current_state(&self) -> Result<ResourceState> {
            Ok(ResourceState::Absent)
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Present { details: None }
        }

        fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
            if ctx.dry_run {
                return Ok(ApplyResult::Skipped {
                    reason: "Dry run".into(),
                });
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Create => Ok(ApplyResult::Created),
                Behaviour::Unchanged => Ok(ApplyResult::NoChange),
                Behaviour::Fail => Ok(ApplyResult::Failed {
                    error: "render failed".into(),
                }),
                Behaviour::Abort => anyhow::bail!("permission denied"),
            }
        }
    }

    #[derive(Debug)]
    struct CountingAction {
        ran: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PostAction for CountingAction {
        fn id(&self) -> String {
            "restart".into()
        }

        fn description(&self) -> String {
            "Restart test service".into()
        }

        fn run(&self, _ctx: &ApplyContext) -> Result<()> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("timed out");
            }
            Ok(())
        }
    }

    fn run(plans: Vec<ExecutionPlan>, opts: &ExecuteOptions) -> Result<ExecuteReport> {
        execute(plans, opts, &NoProgress, &CancelToken::new())
    }

    fn find<'a>(report: &'a ExecuteReport, id: &str) -> &'a PlanOutcome {
        report.plans.iter().find(|p| p.id == id).unwrap()
    }

    fn plan(id: &str, behaviours: &[Behaviour], applied: &Arc<AtomicUsize>) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new(id);
        for (i, b) in behaviours.iter().enumerate() {
            plan.add_resource(TestResource::boxed(&format!("{id}:{i}"), *b, applied));
        }
        plan
    }

    #[test]
    fn test_execute_empty() {
        let report = run(Vec::new(), &ExecuteOptions::default()).unwrap();
        assert!(report.plans.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn test_outcomes_keep_plan_order() {
        let applied = Arc::new(AtomicUsize::new(0));
        let plans = (0..8)
            .map(|i| plan(&format!("t{i}"), &[Behaviour::Create], &applied))
            .collect();
        let report = run(plans, &ExecuteOptions::default()).unwrap();
        let ids: Vec<_> = report.plans.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"]);
        assert_eq!(applied.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_failed_resource_does_not_stop_plan() {
        let applied = Arc::new(AtomicUsize::new(0));
        let plans = vec![plan(
            "site1",
            &[Behaviour::Fail, Behaviour::Create],
            &applied,
        )];
        let report = run(plans, &ExecuteOptions::default()).unwrap();
        let outcome = find(&report, "site1");
        assert_eq!(outcome.status, PlanStatus::Failed);
        assert_eq!(outcome.resources.len(), 2);
        assert!(outcome.aborted.is_none());
        assert_eq!(applied.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abort_is_isolated_to_its_plan() {
        let applied = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let mut broken = plan("b", &[Behaviour::Abort, Behaviour::Create], &applied);
        broken.add_post_action(Box::new(CountingAction {
            ran: Arc::clone(&ran),
            fail: false,
        }));
        let plans = vec![
            plan("a", &[Behaviour::Create], &applied),
            broken,
            plan("c", &[Behaviour::Unchanged], &applied),
        ];

        let report = run(plans, &ExecuteOptions::default()).unwrap();
        assert!(!report.is_success());
        assert_eq!(find(&report, "a").status, PlanStatus::Succeeded);
        assert_eq!(find(&report, "c").status, PlanStatus::Succeeded);

        let b = find(&report, "b");
        assert_eq!(b.status, PlanStatus::Failed);
        assert_eq!(b.resources.len(), 1);
        assert!(b.aborted.as_deref().unwrap().contains("permission denied"));
        // aborted plans skip their post-actions
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_post_action_failure_is_a_warning() {
        let applied = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let mut p = plan("web1", &[Behaviour::Create], &applied);
        p.add_post_action(Box::new(CountingAction {
            ran: Arc::clone(&ran),
            fail: true,
        }));

        let report = run(vec![p], &ExecuteOptions::default()).unwrap();
        let outcome = find(&report, "web1");
        assert_eq!(outcome.status, PlanStatus::Succeeded);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("timed out"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let applied = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();
        cancel.cancel();
        let plans = vec![plan("a", &[Behaviour::Create], &applied)];
        let report = execute(plans, &ExecuteOptions::default(), &NoProgress, &cancel).unwrap();
        assert_eq!(report.plans[0].status, PlanStatus::Cancelled);
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fail_fast_cancels_remaining_plans() {
        let applied = Arc::new(AtomicUsize::new(0));
        let plans = vec![
            plan("a", &[Behaviour::Abort], &applied),
            plan("b", &[Behaviour::Create], &applied),
            plan("c", &[Behaviour::Create], &applied),
        ];
        let opts = ExecuteOptions {
            jobs: 1,
            fail_fast: true,
            ..Default::default()
        };
        let report = run(plans, &opts).unwrap();
        let statuses: Vec<_> = report.plans.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![PlanStatus::Failed, PlanStatus::Cancelled, PlanStatus::Cancelled]
        );
    }

    #[test]
    fn test_dry_run_skips_post_actions() {
        let applied = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let mut p = plan("web1", &[Behaviour::Create], &applied);
        p.add_post_action(Box::new(CountingAction {
            ran: Arc::clone(&ran),
            fail: false,
        }));
        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(vec![p], &opts).unwrap();
        assert!(report.is_success());
        assert_eq!(applied.load(Ordering::SeqCst), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
