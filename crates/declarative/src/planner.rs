//! Execution planner - one plan per target

use crate::resource::{BoxedPostAction, BoxedResource, Resource};

/// Everything needed to converge one target
///
/// Resources are applied in the order they were added. Post-actions run
/// afterwards, once each.
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Target identifier
    pub id: String,
    /// Resources, in application order
    pub resources: Vec<BoxedResource>,
    /// Post-apply actions (e.g., services to restart)
    pub post_actions: Vec<BoxedPostAction>,
}

impl ExecutionPlan {
    /// Create a new empty plan for a target
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resources: Vec::new(),
            post_actions: Vec::new(),
        }
    }

    /// Append a resource
    pub fn add_resource(&mut self, resource: BoxedResource) {
        self.resources.push(resource);
    }

    /// Add a post-apply action, ignoring duplicates by id
    pub fn add_post_action(&mut self, action: BoxedPostAction) {
        let id = action.id();
        if !self.post_actions.iter().any(|a| a.id() == id) {
            self.post_actions.push(action);
        }
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.post_actions.is_empty()
    }
}
