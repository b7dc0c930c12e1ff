//! Error types for the convergence engine.
//!
//! Provider errors are categorized so the executor can decide whether a
//! failed call is worth retrying and how the failure is reported.

use crate::node::NodePath;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Categories of provider errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Timeouts, throttling, dropped connections (retryable)
    Transient,
    /// Rejected request, invalid input, quota exceeded
    Permanent,
    /// The resource does not exist in the provider
    NotFound,
    /// The call was abandoned because the run was cancelled
    Cancelled,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Transient provider error",
            Self::Permanent => "Provider rejected the request",
            Self::NotFound => "Resource not found",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Errors returned by resource providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeout, throttling or network failure
    #[error("transient provider error: {message}")]
    Transient {
        /// Message reported by the provider
        message: String,
    },

    /// Non-retryable failure
    #[error("provider error: {message}")]
    Permanent {
        /// Message reported by the provider
        message: String,
    },

    /// The provider has no resource with this id
    #[error("resource not found: {id}")]
    NotFound {
        /// Provider-assigned id that was looked up
        id: String,
    },

    /// The call observed the cancel token and gave up
    #[error("provider call cancelled")]
    Cancelled,

    /// No provider registered for the resource kind
    #[error("no provider registered for resource kind {kind}")]
    UnknownKind {
        /// The unregistered kind
        kind: String,
    },
}

impl ProviderError {
    /// Shorthand for a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } | Self::UnknownKind { .. } => ErrorCategory::Permanent,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Errors raised by a [`StateStore`](crate::StateStore).
#[derive(Debug, Error)]
pub enum StateError {
    /// Optimistic concurrency check failed
    #[error("state conflict at {path}: expected version {expected}, found {found}")]
    Conflict {
        path: NodePath,
        expected: u64,
        found: u64,
    },

    /// IO error from a persistent backend
    #[error("state store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted state could not be decoded
    #[error("state store is corrupt: {0}")]
    Corrupt(String),
}

/// A single problem found while validating declared nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Node the issue belongs to
    pub path: NodePath,
    /// What is wrong
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: &NodePath, message: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors that abort a graph build, plan or execution as a whole.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more declared nodes are invalid
    #[error("invalid declaration ({} issue(s)):\n{}", .0.len(), format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<NodePath>),

    /// Provider error outside of per-node execution
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// State store error outside of per-node execution
    #[error(transparent)]
    State(#[from] StateError),

    /// The run was cancelled before it started
    #[error("convergence cancelled")]
    Cancelled,

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),
}

impl Error {
    /// Validation issues carried by this error, if any
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation(issues) => issues,
            _ => &[],
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {issue}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_cycle(cycle: &[NodePath]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
