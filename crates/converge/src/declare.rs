//! Declaring nodes, components and exports
//!
//! A [`Declaration`] collects the nodes of one convergence pass. Components
//! are only names in the tree: they group nodes under a common path prefix
//! and never become nodes themselves.

use crate::error::Result;
use crate::graph::Graph;
use crate::node::{NodePath, ResourceNode};
use crate::value::{Attributes, ID_ATTRIBUTE, OutputRef, SecretMode, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Handle to a declared node, used to wire its outputs into other nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    path: NodePath,
}

impl NodeHandle {
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Reference to one of the node's attributes
    pub fn output(&self, attribute: impl Into<String>) -> OutputRef {
        OutputRef::new(self.path.clone(), attribute)
    }

    /// Reference to the provider-assigned id
    pub fn id(&self) -> OutputRef {
        self.output(ID_ATTRIBUTE)
    }
}

/// Collected nodes, component types and exports
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    nodes: Vec<ResourceNode>,
    components: BTreeMap<NodePath, String>,
    exports: Exports,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component of `component_type` at `path`
    pub fn component(&mut self, component_type: impl Into<String>, path: NodePath) -> NodePath {
        self.components.insert(path.clone(), component_type.into());
        path
    }

    /// Declare a node
    pub fn add(&mut self, node: ResourceNode) -> NodeHandle {
        let handle = NodeHandle {
            path: node.path().clone(),
        };
        self.nodes.push(node);
        handle
    }

    /// Publish a stack output
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.exports.0.insert(name.into(), value.into());
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn components(&self) -> &BTreeMap<NodePath, String> {
        &self.components
    }

    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Build the dependency graph, labelling components in its tree
    pub fn build(self) -> Result<(Graph, Exports)> {
        let mut graph = Graph::build(self.nodes)?;
        graph.label_components(&self.components);
        Ok((graph, self.exports))
    }
}

/// Stack outputs by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exports(BTreeMap<String, Value>);

impl Exports {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve every export against converged outputs
    pub fn resolve(&self, outputs: &BTreeMap<NodePath, Attributes>) -> BTreeMap<String, ExportValue> {
        let lookup = |r: &OutputRef| {
            outputs
                .get(r.producer())
                .and_then(|attributes| attributes.get(r.attribute()))
                .cloned()
        };
        self.0
            .iter()
            .map(|(name, value)| {
                let resolved = if contains_secret(value) {
                    ExportValue::Redacted
                } else {
                    match value.resolve(&lookup, SecretMode::Fingerprint) {
                        Ok(json) => ExportValue::Resolved(json),
                        Err(missing) => ExportValue::Unresolved(missing),
                    }
                };
                (name.clone(), resolved)
            })
            .collect()
    }
}

/// A resolved stack output
#[derive(Debug, Clone, PartialEq)]
pub enum ExportValue {
    Resolved(serde_json::Value),
    /// Contains a secret; never shown
    Redacted,
    /// Its producer did not converge
    Unresolved(OutputRef),
}

impl fmt::Display for ExportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(serde_json::Value::String(s)) => f.write_str(s),
            Self::Resolved(json) => write!(f, "{json}"),
            Self::Redacted => f.write_str("[secret]"),
            Self::Unresolved(r) => write!(f, "<unresolved {r}>"),
        }
    }
}

fn contains_secret(value: &Value) -> bool {
    match value {
        Value::Secret(_) => true,
        Value::List(items) => items.iter().any(contains_secret),
        Value::Map(entries) => entries.values().any(contains_secret),
        _ => false,
    }
}
