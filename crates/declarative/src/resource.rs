//! Resource and post-action traits for declarative state management
//!
//! A Resource represents something that can be in a certain state,
//! and can be changed to reach a desired state. A PostAction runs once
//! after every resource of its plan has been applied.

use crate::context::ApplyContext;
use crate::types::{ApplyResult, ResourceState};
use anyhow::Result;
use std::fmt;
use std::path::PathBuf;

/// Core trait for declarative resources
///
/// Every resource provides:
/// - Identity (id, description, type)
/// - State detection (current vs desired)
/// - State convergence (apply)
/// - An optional path whose writes must be serialised across plans
///
/// # Example
///
/// ```ignore
/// use declarative::{Resource, ResourceState, ApplyResult, ApplyContext};
///
/// #[derive(Debug)]
/// struct FileResource {
///     path: String,
///     content: String,
/// }
///
/// impl Resource for FileResource {
///     fn id(&self) -> String {
///         self.path.clone()
///     }
///
///     fn description(&self) -> String {
///         format!("Ensure file exists at {}", self.path)
///     }
///
///     fn resource_type(&self) -> &'static str {
///         "file"
///     }
///
///     fn current_state(&self) -> Result<ResourceState> {
///         if std::path::Path::new(&self.path).exists() {
///             Ok(ResourceState::Present { details: None })
///         } else {
///             Ok(ResourceState::Absent)
///         }
///     }
///
///     fn desired_state(&self) -> ResourceState {
///         ResourceState::Present { details: None }
///     }
///
///     fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
///         if ctx.dry_run {
///             return Ok(ApplyResult::Skipped { reason: "Dry run".into() });
///         }
///         std::fs::write(&self.path, &self.content)?;
///         Ok(ApplyResult::Created)
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Unique identifier for this resource within its plan
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category, used for grouping and display
    fn resource_type(&self) -> &'static str;

    /// Detect the current state of this resource
    fn current_state(&self) -> Result<ResourceState>;

    /// Get the desired state for this resource
    fn desired_state(&self) -> ResourceState;

    /// Check if the resource needs changes to reach desired state
    fn needs_apply(&self) -> Result<bool> {
        let current = self.current_state()?;
        let desired = self.desired_state();
        Ok(current != desired)
    }

    /// Apply changes to reach the desired state
    ///
    /// Return `Ok(ApplyResult::Failed { .. })` for a failure local to this
    /// resource; return `Err` to abort the rest of the plan.
    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult>;

    /// Path this resource writes, if any
    ///
    /// The executor holds a per-path lock around `apply` so that no two
    /// plans ever write the same file concurrently.
    fn lock_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Work to run after all resources of a plan have been applied
pub trait PostAction: Send + Sync + fmt::Debug {
    /// Stable identifier, used to de-duplicate actions within a plan
    fn id(&self) -> String;

    /// Human-readable description
    fn description(&self) -> String;

    /// Run the action. Errors become warnings on the plan outcome.
    fn run(&self, ctx: &ApplyContext) -> Result<()>;
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// A boxed post-action for type-erased storage
pub type BoxedPostAction = Box<dyn PostAction>;
