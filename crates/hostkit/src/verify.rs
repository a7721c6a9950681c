//! Verification of targets
//!
//! `verify` turns every target into an execution plan (one resource per
//! configuration file, plus service restarts as post-actions), runs the plans
//! through the declarative executor and records the outcome on each context.
//! Targets are isolated from each other: a target that cannot even be planned
//! is failed on its own and the rest still run.

use crate::artifact::{ArtifactResource, Generator};
use crate::context::{Context, ContextType};
use crate::error::{Error, ErrorKind, Result};
use crate::executable::{RestartService, restart_command};
use crate::record::{ArtifactRecord, FailureRecord, VerificationRecord, VerifyState, digest};
use crate::scope::Scope;
use crate::service::{ServiceBinding, ServiceRegistry};
use crate::store::ContextStore;
use chrono::Utc;
use declarative::{
    ApplyResult, CancelToken, ExecuteOptions, ExecutionPlan, PlanOutcome, PlanStatus,
    ProgressCallback, ResourceDiff,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Binding property that overrides a service's restart command
pub const RESTART_COMMAND_PROPERTY: &str = "restart_command";

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Targets verified in parallel
    pub jobs: usize,
    pub dry_run: bool,
    /// Stop starting new targets after the first failure
    pub fail_fast: bool,
    pub restart_timeout: Duration,
    /// Search path for service control executables
    pub env_path: String,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            dry_run: false,
            fail_fast: false,
            restart_timeout: Duration::from_secs(30),
            env_path: std::env::var("PATH").unwrap_or_default(),
        }
    }
}

/// Result of verifying one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub name: String,
    pub state: VerifyState,
    pub failure: Option<FailureRecord>,
    pub warnings: Vec<String>,
    pub artifacts: Vec<ArtifactRecord>,
    /// Files created or modified
    pub changes: usize,
}

impl TargetOutcome {
    fn failed(name: &str, err: &Error) -> Self {
        Self {
            name: name.to_string(),
            state: VerifyState::Failed,
            failure: Some(FailureRecord {
                kind: err.kind(),
                message: err.to_string(),
            }),
            warnings: Vec::new(),
            artifacts: Vec::new(),
            changes: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == VerifyState::Verified
    }

    /// Whether the run was cancelled before this target started
    pub fn is_cancelled(&self) -> bool {
        self.state == VerifyState::Unverified
    }

    fn record(&self) -> VerificationRecord {
        VerificationRecord {
            state: self.state,
            verified_at: Utc::now(),
            failure: self.failure.clone(),
            warnings: self.warnings.clone(),
            artifacts: self.artifacts.clone(),
        }
    }
}

/// Per-target outcomes of one verify run
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub outcomes: BTreeMap<String, TargetOutcome>,
}

impl VerifyReport {
    /// AND of every target; cancelled targets count as failures
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(TargetOutcome::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.values().filter(|o| !o.is_success())
    }
}

/// Whether a file still matches what was last written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Drift {
    InSync,
    Modified,
    Missing,
    /// Never written by a recorded verify
    Unrecorded,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclaredArtifact {
    pub id: &'static str,
    pub description: &'static str,
    pub path: Option<PathBuf>,
    pub drift: Drift,
}

/// Read-only view of one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub name: String,
    pub context_type: ContextType,
    pub uri: String,
    pub parent: Option<String>,
    pub saved: bool,
    /// Effective bindings, inherited from the server where not overridden
    pub services: BTreeMap<String, ServiceBinding>,
    pub declared: Vec<DeclaredArtifact>,
    /// Why the declared configuration could not be resolved
    pub problem: Option<String>,
    pub last: Option<VerificationRecord>,
}

/// A file a verify would change
#[derive(Debug, Clone)]
pub struct ArtifactChange {
    pub target: String,
    pub diff: ResourceDiff,
    pub path: PathBuf,
    pub before: Option<String>,
    pub after: String,
}

/// What a dry run found
#[derive(Debug, Default)]
pub struct Preview {
    pub changes: Vec<ArtifactChange>,
    /// Targets a real verify would fail
    pub failures: BTreeMap<String, FailureRecord>,
}

impl Preview {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Keep the first failure seen for a target
    fn fail(&mut self, target: &str, err: &Error) {
        log::warn!("{}: {}", target, err);
        self.failures
            .entry(target.to_string())
            .or_insert_with(|| FailureRecord {
                kind: err.kind(),
                message: err.to_string(),
            });
    }
}

struct TargetPlan {
    plan: ExecutionPlan,
    handles: Vec<ArtifactResource>,
}

pub struct VerifyOrchestrator<'a> {
    store: &'a ContextStore,
    registry: &'a ServiceRegistry,
    generator: Generator,
}

impl<'a> VerifyOrchestrator<'a> {
    pub fn new(store: &'a ContextStore, registry: &'a ServiceRegistry, generator: Generator) -> Self {
        Self {
            store,
            registry,
            generator,
        }
    }

    /// Persist a context definition; artifacts are untouched
    pub fn save(&self, context: &Context) -> Result<PathBuf> {
        self.store.save(context)
    }

    /// Verify `targets` (every context when empty)
    pub fn verify<P: ProgressCallback>(
        &self,
        targets: &[String],
        opts: &VerifyOptions,
        progress: &P,
        cancel: &CancelToken,
    ) -> Result<VerifyReport> {
        let mut contexts = self.store.all()?;
        let names = select(&contexts, targets)?;

        let mut report = VerifyReport::default();
        let mut plans = Vec::new();
        let mut handles: HashMap<String, Vec<ArtifactResource>> = HashMap::new();
        let tracker = StateTracker::new(progress);

        for name in &names {
            match self.plan_target(&contexts, &contexts[name], opts) {
                Ok(tp) => {
                    handles.insert(name.clone(), tp.handles);
                    plans.push(tp.plan);
                }
                Err(e) => {
                    log::error!("{}: {}", name, e);
                    tracker.advance(name, VerifyState::Verifying);
                    tracker.advance(name, VerifyState::Failed);
                    report
                        .outcomes
                        .insert(name.clone(), TargetOutcome::failed(name, &e));
                    if opts.fail_fast {
                        cancel.cancel();
                    }
                }
            }
        }

        let exec = ExecuteOptions {
            dry_run: opts.dry_run,
            jobs: opts.jobs.max(1),
            verbose: false,
            fail_fast: opts.fail_fast,
        };
        let executed = declarative::execute(plans, &exec, &tracker, cancel)
            .map_err(|e| Error::io(self.store.root(), io::Error::other(format!("{:#}", e))))?;
        log::debug!("executor finished, all plans succeeded: {}", executed.is_success());

        for plan in executed.plans {
            let target_handles = handles.remove(&plan.id).unwrap_or_default();
            let state = tracker.state(&plan.id);
            let outcome = outcome_for(plan, state, &target_handles);
            report.outcomes.insert(outcome.name.clone(), outcome);
        }

        if !opts.dry_run {
            self.record(&mut contexts, &mut report);
        }
        Ok(report)
    }

    /// Persist each finished target's outcome onto its context
    fn record(&self, contexts: &mut BTreeMap<String, Context>, report: &mut VerifyReport) {
        for outcome in report.outcomes.values_mut() {
            if outcome.is_cancelled() {
                continue;
            }
            let Some(context) = contexts.get_mut(&outcome.name) else {
                continue;
            };
            context.verification = Some(outcome.record());
            if let Err(e) = self.store.save(context) {
                log::warn!("{}: could not record verification: {}", outcome.name, e);
                outcome
                    .warnings
                    .push(format!("could not record verification: {}", e));
            }
        }
    }

    fn plan_target(
        &self,
        contexts: &BTreeMap<String, Context>,
        target: &Context,
        opts: &VerifyOptions,
    ) -> Result<TargetPlan> {
        let scope = Arc::new(Scope::resolve(contexts, target)?);
        let mut plan = ExecutionPlan::new(&target.name);
        let mut handles = Vec::new();

        for (capability, binding) in &scope.bindings {
            let service = self.registry.resolve(capability, binding)?;
            let descriptors = service.configurations(target.context_type());
            if descriptors.is_empty() {
                continue;
            }

            for descriptor in descriptors {
                let resource = ArtifactResource::new(
                    &target.name,
                    *descriptor,
                    Arc::clone(&scope),
                    self.generator.clone(),
                );
                plan.add_resource(Box::new(resource.clone()));
                handles.push(resource);
            }

            let command = binding
                .property_str(RESTART_COMMAND_PROPERTY)
                .or_else(|| restart_command(service, &opts.env_path));
            if let Some(command) = command {
                plan.add_post_action(Box::new(RestartService {
                    service: service.id.to_string(),
                    command,
                    timeout: opts.restart_timeout,
                }));
            }
        }

        if plan.is_empty() {
            log::debug!("{}: no configuration declared", target.name);
        }
        Ok(TargetPlan { plan, handles })
    }

    /// Files a verify of `targets` would change, without writing anything
    ///
    /// Targets that cannot be planned or rendered are collected as failures,
    /// since a real verify would fail them.
    pub fn preview(&self, targets: &[String], opts: &VerifyOptions) -> Result<Preview> {
        let contexts = self.store.all()?;
        let mut preview = Preview::default();

        for name in select(&contexts, targets)? {
            let tp = match self.plan_target(&contexts, &contexts[&name], opts) {
                Ok(tp) => tp,
                Err(e) => {
                    preview.fail(&name, &e);
                    continue;
                }
            };
            for handle in tp.handles {
                let artifact = match handle.artifact() {
                    Ok(a) => a,
                    Err(e) => {
                        preview.fail(&name, e);
                        continue;
                    }
                };
                let diff = match ResourceDiff::from_resource(&handle) {
                    Ok(Some(diff)) => diff,
                    Ok(None) => continue,
                    Err(e) => {
                        let err = Error::io(&artifact.path, io::Error::other(format!("{:#}", e)));
                        preview.fail(&name, &err);
                        continue;
                    }
                };
                preview.changes.push(ArtifactChange {
                    target: name.clone(),
                    diff,
                    path: artifact.path.clone(),
                    before: fs::read_to_string(&artifact.path).ok(),
                    after: artifact.content.clone(),
                });
            }
        }
        Ok(preview)
    }

    /// Read-only report of declared configuration and the last outcome
    pub fn status(&self, targets: &[String]) -> Result<Vec<TargetStatus>> {
        let contexts = self.store.all()?;
        let names = select(&contexts, targets)?;

        Ok(names
            .iter()
            .map(|name| self.status_of(&contexts, &contexts[name]))
            .collect())
    }

    fn status_of(&self, contexts: &BTreeMap<String, Context>, target: &Context) -> TargetStatus {
        let mut status = TargetStatus {
            name: target.name.clone(),
            context_type: target.context_type(),
            uri: target.uri().to_string(),
            parent: target.parent().map(str::to_string),
            saved: self.store.is_saved(target),
            services: target.services.clone(),
            declared: Vec::new(),
            problem: None,
            last: target.verification.clone(),
        };

        let scope = match Scope::resolve(contexts, target) {
            Ok(scope) => scope,
            Err(e) => {
                status.problem = Some(e.to_string());
                return status;
            }
        };
        status.services = scope.bindings.clone();

        for (capability, binding) in &scope.bindings {
            let service = match self.registry.resolve(capability, binding) {
                Ok(s) => s,
                Err(e) => {
                    status.problem = Some(e.to_string());
                    continue;
                }
            };
            for descriptor in service.configurations(target.context_type()) {
                let path = descriptor.target_path(&scope).ok();
                let state = path
                    .as_ref()
                    .map_or(Drift::Unrecorded, |p| drift(descriptor.id(), p, status.last.as_ref()));
                status.declared.push(DeclaredArtifact {
                    id: descriptor.id(),
                    description: descriptor.description(),
                    path,
                    drift: state,
                });
            }
        }
        status
    }
}

/// Targets in request order, without duplicates; everything when empty
fn select(contexts: &BTreeMap<String, Context>, targets: &[String]) -> Result<Vec<String>> {
    if targets.is_empty() {
        return Ok(contexts.keys().cloned().collect());
    }
    let mut names: Vec<String> = Vec::with_capacity(targets.len());
    for name in targets {
        if !contexts.contains_key(name) {
            return Err(Error::ContextNotFound { name: name.clone() });
        }
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    Ok(names)
}

/// Per-target state while a run is in flight
///
/// Sits between the executor and the caller's progress callback: a plan
/// start moves its target to `Verifying`, a finished plan to `Verified` or
/// `Failed`. Cancelled plans never start and stay `Unverified`.
struct StateTracker<'p, P> {
    progress: &'p P,
    states: Mutex<HashMap<String, VerifyState>>,
}

impl<'p, P: ProgressCallback> StateTracker<'p, P> {
    fn new(progress: &'p P) -> Self {
        Self {
            progress,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Move `target` to `next`; illegal transitions are refused
    fn advance(&self, target: &str, next: VerifyState) -> bool {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let current = states
            .entry(target.to_string())
            .or_insert(VerifyState::Unverified);
        if current.can_transition_to(next) {
            log::debug!("{}: {} -> {}", target, current, next);
            *current = next;
            true
        } else {
            log::error!("{}: refusing state change {} -> {}", target, current, next);
            false
        }
    }

    fn state(&self, target: &str) -> VerifyState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .copied()
            .unwrap_or(VerifyState::Unverified)
    }
}

impl<P: ProgressCallback> ProgressCallback for StateTracker<'_, P> {
    fn on_start(&self, plans: usize) {
        self.progress.on_start(plans);
    }

    fn on_plan_start(&self, id: &str) {
        self.advance(id, VerifyState::Verifying);
        self.progress.on_plan_start(id);
    }

    fn on_resource_complete(&self, plan: &str, resource: &str, result: &ApplyResult) {
        self.progress.on_resource_complete(plan, resource, result);
    }

    fn on_plan_complete(&self, outcome: &PlanOutcome) {
        match outcome.status {
            PlanStatus::Succeeded => {
                self.advance(&outcome.id, VerifyState::Verified);
            }
            PlanStatus::Failed => {
                self.advance(&outcome.id, VerifyState::Failed);
            }
            PlanStatus::Cancelled => {}
        }
        self.progress.on_plan_complete(outcome);
    }
}

fn outcome_for(plan: PlanOutcome, state: VerifyState, handles: &[ArtifactResource]) -> TargetOutcome {
    let mut warnings: Vec<String> = plan
        .resources
        .iter()
        .flat_map(|r| r.warnings.iter().cloned())
        .collect();
    warnings.extend(plan.warnings.iter().cloned());

    let changes = plan
        .resources
        .iter()
        .filter(|r| r.result.is_change())
        .count();
    let artifacts = handles.iter().filter_map(|h| h.written().cloned()).collect();

    let (state, failure) = match state {
        VerifyState::Unverified => (VerifyState::Unverified, None),
        VerifyState::Verified => (VerifyState::Verified, None),
        VerifyState::Verifying => (
            VerifyState::Failed,
            Some(FailureRecord {
                kind: ErrorKind::Io,
                message: "verification did not finish".to_string(),
            }),
        ),
        VerifyState::Failed => {
            let failure = match &plan.aborted {
                Some(message) => FailureRecord {
                    kind: ErrorKind::WriteError,
                    message: message.clone(),
                },
                None => {
                    let kind = handles
                        .iter()
                        .find_map(|h| h.artifact().as_ref().err().map(Error::kind))
                        .unwrap_or(ErrorKind::RenderError);
                    let message = plan
                        .failures()
                        .map(|(id, err)| format!("{}: {}", id, err))
                        .collect::<Vec<_>>()
                        .join("; ");
                    FailureRecord { kind, message }
                }
            };
            (VerifyState::Failed, Some(failure))
        }
    };

    TargetOutcome {
        name: plan.id,
        state,
        failure,
        warnings,
        artifacts,
        changes,
    }
}

/// Compare a file on disk with the digest recorded when it was written
fn drift(id: &str, path: &std::path::Path, last: Option<&VerificationRecord>) -> Drift {
    let Some(recorded) = last
        .into_iter()
        .flat_map(|r| &r.artifacts)
        .find(|a| a.id == id && a.path == path)
    else {
        return Drift::Unrecorded;
    };
    match fs::read_to_string(path) {
        Ok(content) if digest(&content) == recorded.digest => Drift::InSync,
        Ok(_) => Drift::Modified,
        Err(_) => Drift::Missing,
    }
}
