//! Dependency graph builder
//!
//! Edges come from three places:
//!
//! - every [`OutputRef`](crate::OutputRef) in a node's inputs (producer -> consumer)
//! - explicit `depends_on` annotations
//! - the parent link, when the node requires its parent
//!
//! Plain parent links are only ordering hints: among nodes that are ready
//! at the same time, shallower paths go first.

use crate::error::{Error, Result, ValidationIssue};
use crate::node::{NodePath, ResourceNode};
use crate::tree::ComponentTree;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Immutable dependency graph over declared nodes
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<ResourceNode>,
    index: BTreeMap<NodePath, usize>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
    order: Vec<usize>,
    tree: ComponentTree,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

impl Graph {
    /// Build the graph, validating references and rejecting cycles
    pub fn build(nodes: Vec<ResourceNode>) -> Result<Self> {
        let mut index = BTreeMap::new();
        let mut issues = Vec::new();

        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.path().clone(), i).is_some() {
                issues.push(ValidationIssue::new(node.path(), "duplicate node path"));
            }
        }

        let mut dependencies = vec![BTreeSet::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for r in node.output_refs() {
                match index.get(r.producer()) {
                    Some(&producer) => {
                        dependencies[i].insert(producer);
                    }
                    None => issues.push(ValidationIssue::new(
                        node.path(),
                        format!("references undeclared node `{}`", r.producer()),
                    )),
                }
            }
            for target in node.explicit_dependencies() {
                match index.get(target) {
                    Some(&dep) => {
                        dependencies[i].insert(dep);
                    }
                    None => issues.push(ValidationIssue::new(
                        node.path(),
                        format!("depends on undeclared node `{target}`"),
                    )),
                }
            }
            if node.parent_required() {
                match node.parent().and_then(|p| index.get(&p).copied()) {
                    Some(parent) => {
                        dependencies[i].insert(parent);
                    }
                    None => issues.push(ValidationIssue::new(
                        node.path(),
                        "requires a parent resource that is not declared",
                    )),
                }
            }
        }

        if !issues.is_empty() {
            return Err(Error::Validation(issues));
        }

        detect_cycle(&nodes, &dependencies)?;

        let mut dependents = vec![BTreeSet::new(); nodes.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].insert(i);
            }
        }

        let order = topological_order(&nodes, &dependencies, &dependents);

        let mut tree = ComponentTree::new();
        for node in &nodes {
            tree.insert_resource(node.path(), node.kind());
        }

        log::debug!(
            "Built dependency graph: {} nodes, {} edges",
            nodes.len(),
            dependencies.iter().map(BTreeSet::len).sum::<usize>()
        );

        Ok(Self {
            nodes,
            index,
            dependencies,
            dependents,
            order,
            tree,
        })
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn node(&self, path: &NodePath) -> Option<&ResourceNode> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.index.contains_key(path)
    }

    /// Declaration index of a node
    pub fn position(&self, path: &NodePath) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Nodes in dependency order
    pub fn order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, path: &NodePath) -> BTreeSet<NodePath> {
        self.neighbours(path, &self.dependencies)
    }

    /// Direct dependents of a node
    pub fn dependents(&self, path: &NodePath) -> BTreeSet<NodePath> {
        self.neighbours(path, &self.dependents)
    }

    /// Everything that depends on `path`, directly or not
    pub fn transitive_dependents(&self, path: &NodePath) -> BTreeSet<NodePath> {
        self.reachable(path, &self.dependents)
    }

    /// Everything `path` depends on, directly or not
    pub fn transitive_dependencies(&self, path: &NodePath) -> BTreeSet<NodePath> {
        self.reachable(path, &self.dependencies)
    }

    /// All edges as (producer, consumer) pairs
    pub fn edges(&self) -> Vec<(NodePath, NodePath)> {
        let mut edges = Vec::new();
        for &i in &self.order {
            for &dep in &self.dependencies[i] {
                edges.push((self.nodes[dep].path().clone(), self.nodes[i].path().clone()));
            }
        }
        edges
    }

    /// Component grouping of the declared nodes
    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    /// Attach component types to the tree
    pub fn label_components<'a, I>(&mut self, components: I)
    where
        I: IntoIterator<Item = (&'a NodePath, &'a String)>,
    {
        for (path, component_type) in components {
            self.tree.label_component(path, component_type);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn neighbours(&self, path: &NodePath, adjacency: &[BTreeSet<usize>]) -> BTreeSet<NodePath> {
        self.index.get(path).map_or_else(BTreeSet::new, |&i| {
            adjacency[i]
                .iter()
                .map(|&j| self.nodes[j].path().clone())
                .collect()
        })
    }

    fn reachable(&self, path: &NodePath, adjacency: &[BTreeSet<usize>]) -> BTreeSet<NodePath> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(path) else {
            return BTreeSet::new();
        };
        let mut queue: VecDeque<usize> = adjacency[start].iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if seen.insert(i) {
                queue.extend(adjacency[i].iter().copied());
            }
        }
        seen.into_iter()
            .map(|i| self.nodes[i].path().clone())
            .collect()
    }
}

/// Three-colour DFS along dependency edges
fn detect_cycle(nodes: &[ResourceNode], dependencies: &[BTreeSet<usize>]) -> Result<()> {
    fn visit(
        i: usize,
        dependencies: &[BTreeSet<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[i] = Mark::Gray;
        stack.push(i);
        for &dep in &dependencies[i] {
            match marks[dep] {
                Mark::Gray => {
                    let start = stack.iter().position(|&s| s == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Mark::White => {
                    if let Some(cycle) = visit(dep, dependencies, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Black => {}
            }
        }
        stack.pop();
        marks[i] = Mark::Black;
        None
    }

    let mut marks = vec![Mark::White; nodes.len()];
    let mut stack = Vec::new();
    for i in 0..nodes.len() {
        if marks[i] == Mark::White {
            if let Some(cycle) = visit(i, dependencies, &mut marks, &mut stack) {
                return Err(Error::Cycle(
                    cycle.into_iter().map(|j| nodes[j].path().clone()).collect(),
                ));
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm; ready nodes are taken by (path depth, declaration index)
fn topological_order(
    nodes: &[ResourceNode],
    dependencies: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
) -> Vec<usize> {
    let mut remaining: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<(usize, usize)> = remaining
        .iter()
        .enumerate()
        .filter(|&(_, &n)| n == 0)
        .map(|(i, _)| (nodes[i].path().depth(), i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert((nodes[dependent].path().depth(), dependent));
            }
        }
    }
    order
}
