//! Execution report

use crate::node::NodePath;
use crate::planner::Action;
use crate::value::Attributes;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Why an entry failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient provider error that outlived its retries
    Transient,
    /// Provider rejected the request
    Permanent,
    /// State record changed underneath the run
    Conflict,
    /// Inputs could not be resolved or the kind is unknown
    Validation,
    /// State store could not be read or written
    State,
    /// Call abandoned after cancellation
    Cancelled,
}

/// Failure details for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why an entry was never attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A dependency failed or was itself skipped
    DependencyFailed(NodePath),
    /// The run was cancelled or timed out first
    Cancelled,
    /// Dry run
    DryRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed(path) => write!(f, "dependency {path} did not succeed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::DryRun => f.write_str("dry run"),
        }
    }
}

/// Terminal status of a plan entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Succeeded,
    Failed(Failure),
    Skipped(SkipReason),
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Outcome of one entry
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub path: NodePath,
    pub kind: String,
    pub action: Action,
    pub status: Status,
    /// Provider calls made (0 for NoOp and skipped entries)
    pub attempts: u32,
    pub duration: Duration,
    /// Provider id after the action, if the resource exists
    pub resource_id: Option<String>,
}

/// Summary counts of an execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecuteSummary {
    /// Add one entry to the summary
    pub fn add(&mut self, report: &NodeReport) {
        match &report.status {
            Status::Failed(_) => self.failed += 1,
            Status::Skipped(_) => self.skipped += 1,
            Status::Succeeded => match report.action {
                Action::Create => self.created += 1,
                Action::Update => self.updated += 1,
                Action::Replace(_) => self.replaced += 1,
                Action::Delete => self.deleted += 1,
                Action::NoOp => self.unchanged += 1,
            },
        }
    }

    /// Entries that changed something in the provider
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }
}

/// Result of executing a plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// One report per plan entry, in plan order
    pub nodes: Vec<NodeReport>,
    /// Resolved outputs of every entry that succeeded and still exists
    pub outputs: BTreeMap<NodePath, Attributes>,
}

impl ExecutionReport {
    /// Whether no entry failed
    pub fn is_success(&self) -> bool {
        !self.nodes.iter().any(|n| n.status.is_failure())
    }

    pub fn node(&self, path: &NodePath) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.path == path)
    }

    pub fn status(&self, path: &NodePath) -> Option<&Status> {
        self.node(path).map(|n| &n.status)
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.status.is_failure())
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for node in &self.nodes {
            summary.add(node);
        }
        summary
    }
}
