//! # Declarative
//!
//! A framework for declarative resource convergence.
//!
//! This crate provides the core abstractions for declaring desired state,
//! detecting current state, and converging one or more independent targets
//! to match it.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with state that can be managed (a generated file, a setting)
//! - **ResourceState**: The current or desired state of a resource
//! - **PostAction**: Work that runs once every resource of a plan has been applied
//! - **ExecutionPlan**: Everything one target needs, applied in declaration order
//! - **Executor**: Fans plans out over a bounded worker pool, isolating failures per plan
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyContext, ApplyResult, CancelToken, ExecuteOptions, ExecutionPlan,
//!     NoProgress, Resource, ResourceState, execute,
//! };
//!
//! #[derive(Debug)]
//! struct FileResource { path: String, content: String }
//!
//! impl Resource for FileResource {
//!     fn id(&self) -> String { self.path.clone() }
//!     fn description(&self) -> String { format!("File: {}", self.path) }
//!     fn resource_type(&self) -> &'static str { "file" }
//!
//!     fn current_state(&self) -> anyhow::Result<ResourceState> {
//!         if std::path::Path::new(&self.path).exists() {
//!             Ok(ResourceState::Present { details: None })
//!         } else {
//!             Ok(ResourceState::Absent)
//!         }
//!     }
//!
//!     fn desired_state(&self) -> ResourceState {
//!         ResourceState::Present { details: None }
//!     }
//!
//!     fn apply(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
//!         if ctx.dry_run {
//!             return Ok(ApplyResult::Skipped { reason: "Dry run".into() });
//!         }
//!         std::fs::write(&self.path, &self.content)?;
//!         Ok(ApplyResult::Created)
//!     }
//! }
//!
//! let mut plan = ExecutionPlan::new("web1");
//! plan.add_resource(Box::new(FileResource {
//!     path: "/tmp/test.txt".into(),
//!     content: "hello".into(),
//! }));
//!
//! let report = execute(vec![plan], &ExecuteOptions::default(), &NoProgress, &CancelToken::new())?;
//! assert!(report.is_success());
//! ```
//!
//! ## Failure isolation
//!
//! A resource can fail in two ways:
//!
//! - returning `Ok(ApplyResult::Failed { .. })` records the failure and the
//!   plan continues with its next resource;
//! - returning `Err(..)` aborts the rest of that plan (post-actions included).
//!
//! Neither ever stops a sibling plan. Post-action failures are recorded as
//! warnings on the plan outcome.

pub mod context;
pub mod diff;
pub mod executor;
pub mod planner;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{ApplyContext, CancelToken, NoProgress, PathLocks, ProgressCallback};
pub use diff::{DiffSummary, ResourceDiff};
pub use executor::execute;
pub use planner::ExecutionPlan;
pub use resource::{BoxedPostAction, BoxedResource, PostAction, Resource};
pub use types::{
    ApplyResult, ExecuteOptions, ExecuteReport, PlanOutcome, PlanStatus, ResourceOutcome,
    ResourceState,
};
