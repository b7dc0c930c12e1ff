//! # Converge
//!
//! A resource graph engine: declare desired resources, plan them against
//! the last recorded state, and converge the provider in dependency order.
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: one desired resource (kind, path, inputs, explicit dependencies)
//! - **OutputRef**: a pending reference to an attribute another node produces
//! - **Graph**: the DAG discovered from output references and `depends_on`
//! - **Plan**: per-node Create / Update / Replace / Delete / NoOp decisions
//! - **Executor**: runs a plan on a bounded worker pool and records results
//! - **StateStore**: durable, optimistically versioned record of what exists
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     Declaration, ExecuteOptions, Executor, MemoryStateStore, NodePath,
//!     ProviderContext, ProviderRegistry, ResourceNode, CancelToken, NoProgress,
//! };
//!
//! let mut decl = Declaration::new();
//! let net = decl.add(
//!     ResourceNode::new("network", NodePath::root("net")).with_input("cidr", "10.0.0.0/16"),
//! );
//! decl.add(
//!     ResourceNode::new("route", NodePath::root("route"))
//!         .with_input("gateway_id", net.output("gatewayId")),
//! );
//!
//! let store = MemoryStateStore::new();
//! let context = ProviderContext::new("shop", "dev", "eu-central-1");
//! let executor = Executor::new(&registry, &store, &context);
//! let run = executor.converge(
//!     decl,
//!     None,
//!     &ExecuteOptions::default(),
//!     &CancelToken::new(),
//!     &mut NoProgress,
//! )?;
//! assert!(run.report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`ResourceProvider`]: create / read / update / delete for one kind
//! - [`StateStore`]: where converged resources are recorded
//! - [`ProgressCallback`]: receives execution progress
//!
//! This keeps the engine free of any cloud SDK, storage backend or UI.

pub mod context;
pub mod declare;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod planner;
pub mod provider;
pub mod report;
pub mod retry;
pub mod run;
pub mod schema;
pub mod state;
pub mod tree;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{CallContext, CancelToken, NoProgress, ProgressCallback, ProviderContext};
pub use declare::{Declaration, ExportValue, Exports, NodeHandle};
pub use diff::{DiffSummary, group_by_kind};
pub use error::{Error, ErrorCategory, ProviderError, Result, StateError, ValidationIssue};
pub use executor::{ExecuteOptions, Executor};
pub use graph::Graph;
pub use node::{NodePath, ResourceNode};
pub use planner::{Action, After, Plan, PlanEntry, PropertyDiff, plan, plan_destroy};
pub use provider::{Created, ProviderRegistry, ResourceProvider};
pub use report::{
    ExecuteSummary, ExecutionReport, Failure, FailureKind, NodeReport, SkipReason, Status,
};
pub use retry::{Attempted, RetryConfig, with_retry};
pub use run::RunOutput;
pub use schema::{KindSchema, PropertyBehavior, ReplaceOrder};
pub use state::{MemoryStateStore, StateRecord, StateStore, check_version};
pub use tree::{ComponentTree, TreeEntry};
pub use value::{Attributes, ID_ATTRIBUTE, OutputRef, Secret, SecretMode, Value};
