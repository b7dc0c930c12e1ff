//! Component tree
//!
//! Grouping of nodes under the components that declared them. The tree is
//! derived from path prefixes and kept apart from the dependency graph:
//! being a child of a component never implies an ordering edge.

use crate::node::NodePath;
use std::collections::BTreeMap;

/// Entry in the component tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeEntry {
    /// Resource kind for nodes, component type for labelled components
    pub label: Option<String>,
    /// Whether the entry is a declared resource node
    pub is_resource: bool,
    /// Children in insertion order
    pub children: Vec<NodePath>,
}

/// Parent/child grouping of components and resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentTree {
    entries: BTreeMap<NodePath, TreeEntry>,
    roots: Vec<NodePath>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource node, creating its ancestors as needed
    pub fn insert_resource(&mut self, path: &NodePath, kind: &str) {
        let entry = self.ensure(path);
        entry.label = Some(kind.to_string());
        entry.is_resource = true;
    }

    /// Label a component with its type (creates it if absent)
    pub fn label_component(&mut self, path: &NodePath, component_type: &str) {
        let entry = self.ensure(path);
        if !entry.is_resource {
            entry.label = Some(component_type.to_string());
        }
    }

    fn ensure(&mut self, path: &NodePath) -> &mut TreeEntry {
        if !self.entries.contains_key(path) {
            match path.parent() {
                Some(parent) => {
                    self.ensure(&parent).children.push(path.clone());
                }
                None => self.roots.push(path.clone()),
            }
            self.entries.insert(path.clone(), TreeEntry::default());
        }
        self.entries.entry(path.clone()).or_default()
    }

    pub fn roots(&self) -> &[NodePath] {
        &self.roots
    }

    pub fn get(&self, path: &NodePath) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    pub fn children(&self, path: &NodePath) -> &[NodePath] {
        self.entries
            .get(path)
            .map_or(&[][..], |entry| entry.children.as_slice())
    }

    /// Every resource path at or below `path`
    pub fn resources_under(&self, path: &NodePath) -> Vec<NodePath> {
        let mut found = Vec::new();
        let mut stack = vec![path.clone()];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.entries.get(&current) {
                if entry.is_resource {
                    found.push(current.clone());
                }
                stack.extend(entry.children.iter().rev().cloned());
            }
        }
        found
    }

    /// Depth-first walk in insertion order; `f` receives the nesting level
    pub fn walk<F: FnMut(&NodePath, &TreeEntry, usize)>(&self, mut f: F) {
        let mut stack: Vec<(&NodePath, usize)> = self.roots.iter().rev().map(|p| (p, 0)).collect();
        while let Some((path, level)) = stack.pop() {
            let Some(entry) = self.entries.get(path) else {
                continue;
            };
            f(path, entry, level);
            stack.extend(entry.children.iter().rev().map(|c| (c, level + 1)));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
