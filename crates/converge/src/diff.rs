//! Plan summaries for reporting

use crate::planner::{Action, Plan, PlanEntry};
use std::collections::BTreeMap;

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Resources to create
    pub additions: usize,
    /// Resources to delete
    pub removals: usize,
    /// Resources to update in place
    pub modifications: usize,
    /// Resources to replace
    pub replacements: usize,
    /// Resources left as they are
    pub unchanged: usize,
}

impl DiffSummary {
    /// Create a summary from a plan
    pub fn from_plan(plan: &Plan) -> Self {
        let mut summary = Self::default();
        for entry in plan.entries() {
            match entry.action {
                Action::Create => summary.additions += 1,
                Action::Delete => summary.removals += 1,
                Action::Update => summary.modifications += 1,
                Action::Replace(_) => summary.replacements += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.replacements
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group changing entries by resource kind
pub fn group_by_kind(plan: &Plan) -> BTreeMap<&str, Vec<&PlanEntry>> {
    let mut groups: BTreeMap<&str, Vec<&PlanEntry>> = BTreeMap::new();
    for entry in plan.changes() {
        groups.entry(entry.kind.as_str()).or_default().push(entry);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::node::{NodePath, ResourceNode};
    use crate::planner;
    use crate::provider::{ProviderRegistry, ResourceProvider};
    use crate::schema::KindSchema;
    use crate::state::StateRecord;
    use crate::testing::{MockProvider, path};
    use std::sync::Arc;

    #[test]
    fn test_summary_and_grouping() {
        let provider: Arc<dyn ResourceProvider> = Arc::new(MockProvider::new());
        let mut registry = ProviderRegistry::new();
        registry.register_all(
            [
                KindSchema::new("subnet").replaces(&["cidr"]),
                KindSchema::new("eip"),
            ],
            &provider,
        );

        let graph = Graph::build(vec![
            ResourceNode::new("subnet", path("a")).with_input("cidr", "10.0.1.0/24"),
            ResourceNode::new("subnet", path("b")).with_input("cidr", "10.0.2.0/24"),
        ])
        .unwrap();
        let mut prior = std::collections::BTreeMap::<NodePath, StateRecord>::new();
        prior.insert(path("old"), StateRecord::new("eip", "eip-1"));

        let plan = planner::plan(&graph, &prior, &registry).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.additions, 2);
        assert_eq!(summary.removals, 1);
        assert_eq!(summary.total(), 3);
        assert!(summary.has_changes());

        let groups = group_by_kind(&plan);
        assert_eq!(groups["subnet"].len(), 2);
        assert_eq!(groups["eip"].len(), 1);
    }
}
