//! Diff computation for resources

use crate::resource::Resource;
use crate::types::ResourceState;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A diff between current and desired state of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Unique identifier of the resource
    pub resource_id: String,
    /// Type of the resource
    pub resource_type: String,
    /// Human-readable description
    pub description: String,
    /// Current state
    pub current: ResourceState,
    /// Desired state
    pub desired: ResourceState,
}

impl ResourceDiff {
    /// Create a diff from a resource, returning None if no changes needed
    pub fn from_resource(resource: &dyn Resource) -> Result<Option<Self>> {
        let current = resource.current_state()?;
        let desired = resource.desired_state();

        if current == desired {
            return Ok(None);
        }

        Ok(Some(Self {
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current,
            desired,
        }))
    }

    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Absent, ResourceState::Present { .. })
        )
    }

    /// Check if this diff represents a removal
    pub fn is_removal(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Present { .. }, ResourceState::Absent)
        )
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            if diff.is_addition() {
                summary.additions += 1;
            } else if diff.is_removal() {
                summary.removals += 1;
            } else {
                summary.modifications += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ApplyContext;
    use crate::types::ApplyResult;

    #[derive(Debug)]
    struct Fixed {
        current: ResourceState,
        desired: ResourceState,
    }

    impl Resource for Fixed {
        fn id(&self) -> String {
            "fixed".into()
        }

        fn description(&self) -> String {
            "Fixed state".into()
        }

        fn resource_type(&self) -> &'static str {
            "file"
        }

        fn current_state(&self) -> Result<ResourceState> {
            Ok(self.current.clone())
        }

        fn desired_state(&self) -> ResourceState {
            self.desired.clone()
        }

        fn apply(&self, _ctx: &ApplyContext) -> Result<ApplyResult> {
            Ok(ApplyResult::NoChange)
        }
    }

    fn present(details: &str) -> ResourceState {
        ResourceState::Present {
            details: Some(details.to_string()),
        }
    }

    #[test]
    fn test_in_sync_resources_have_no_diff() {
        let resources: Vec<Box<dyn Resource>> = vec![Box::new(Fixed {
            current: present("0440 abc"),
            desired: present("0440 abc"),
        })];
        let diffs: Vec<_> = resources
            .iter()
            .filter_map(|r| ResourceDiff::from_resource(r.as_ref()).unwrap())
            .collect();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_summary_counts_kinds() {
        let resources: Vec<Box<dyn Resource>> = vec![
            Box::new(Fixed {
                current: ResourceState::Absent,
                desired: present("0440 abc"),
            }),
            Box::new(Fixed {
                current: present("0644 abc"),
                desired: present("0440 abc"),
            }),
        ];
        let diffs: Vec<_> = resources
            .iter()
            .filter_map(|r| ResourceDiff::from_resource(r.as_ref()).unwrap())
            .collect();
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].is_addition());

        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.modifications, 1);
        assert!(summary.has_changes());
    }
}
