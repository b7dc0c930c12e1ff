//! Resource nodes and their stable paths
//!
//! A node's identity is its path: the chain of component names it was
//! declared under plus its local name (`vpc/vpc-igw`). Paths are the keys of
//! the state store, so they must stay stable between runs.

use crate::value::{OutputRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '/';

/// Stable identity of a node or component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// A top-level path with a single segment
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Append a segment
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// Path of the owning component, `None` for top-level paths
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Local name (last segment)
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for NodePath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split(PATH_SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(format!("invalid node path '{s}': empty segment"));
        }
        Ok(Self(segments))
    }
}

impl TryFrom<String> for NodePath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

/// One desired-state resource record
///
/// Nodes are immutable snapshots for a single convergence pass; the next
/// declaration pass builds new ones instead of mutating these.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    path: NodePath,
    kind: String,
    inputs: BTreeMap<String, Value>,
    depends_on: BTreeSet<NodePath>,
    parent_required: bool,
}

impl ResourceNode {
    /// Create a node of `kind` at `path`; its parent is the path's owner
    pub fn new(kind: impl Into<String>, path: NodePath) -> Self {
        Self {
            path,
            kind: kind.into(),
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            parent_required: false,
        }
    }

    /// Set an input property
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Add an ordering-only dependency
    pub fn with_dependency(mut self, path: NodePath) -> Self {
        self.depends_on.insert(path);
        self
    }

    /// Promote the parent link from an ordering hint to a hard edge
    pub fn require_parent(mut self) -> Self {
        self.parent_required = true;
        self
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Explicit dependencies declared on this node
    pub fn explicit_dependencies(&self) -> &BTreeSet<NodePath> {
        &self.depends_on
    }

    pub fn parent(&self) -> Option<NodePath> {
        self.path.parent()
    }

    pub fn parent_required(&self) -> bool {
        self.parent_required
    }

    /// Reference to an attribute this node will produce
    pub fn output(&self, attribute: impl Into<String>) -> OutputRef {
        OutputRef::new(self.path.clone(), attribute)
    }

    /// Every output reference found anywhere in the inputs
    pub fn output_refs(&self) -> BTreeSet<OutputRef> {
        let mut refs = BTreeSet::new();
        for value in self.inputs.values() {
            value.visit_refs(&mut |r| {
                refs.insert(r.clone());
            });
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_round_trip_through_string() {
        let path = NodePath::root("vpc").child("vpc-igw");
        assert_eq!(path.to_string(), "vpc/vpc-igw");
        assert_eq!("vpc/vpc-igw".parse::<NodePath>().unwrap(), path);
        assert!("vpc//igw".parse::<NodePath>().is_err());
        assert!("".parse::<NodePath>().is_err());
    }

    #[test]
    fn test_path_parent_and_prefix() {
        let path = NodePath::root("nat").child("nat-eip-1");
        assert_eq!(path.parent(), Some(NodePath::root("nat")));
        assert_eq!(path.name(), "nat-eip-1");
        assert_eq!(path.depth(), 2);
        assert!(path.starts_with(&NodePath::root("nat")));
        assert!(!path.starts_with(&NodePath::root("vpc")));
        assert_eq!(NodePath::root("nat").parent(), None);
    }

    #[test]
    fn test_path_serializes_as_string() {
        let path = NodePath::root("db").child("db-instance");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"db/db-instance\"");
        let back: NodePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_output_refs_found_in_nested_inputs() {
        let vpc = ResourceNode::new("vpc", NodePath::root("vpc"));
        let sg = ResourceNode::new("sg", NodePath::root("sg"));
        let node = ResourceNode::new("lb", NodePath::root("lb"))
            .with_input("name", "edge")
            .with_input("security_groups", Value::list([sg.output("id")]))
            .with_input(
                "network",
                Value::map([("vpc_id", Value::from(vpc.output("id")))]),
            );

        let refs = node.output_refs();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&vpc.output("id")));
        assert!(refs.contains(&sg.output("id")));
    }
}
