//! Planner - diffs declared nodes against recorded state
//!
//! Each declared node is compared with its state record and classified as
//! Create, Update, Replace or NoOp. Records whose node is no longer declared
//! become Delete entries. The resulting [`Plan`] lists entries in an order
//! that is valid for sequential execution and carries the execution edges
//! the executor schedules on.

use crate::diff::DiffSummary;
use crate::error::{Error, Result, ValidationIssue};
use crate::graph::Graph;
use crate::node::{NodePath, ResourceNode};
use crate::provider::ProviderRegistry;
use crate::schema::{KindSchema, PropertyBehavior, ReplaceOrder};
use crate::state::StateRecord;
use crate::value::{OutputRef, SecretMode, Value};
use serde_json::Value as Json;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What the executor will do with a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Replace(ReplaceOrder),
    Delete,
    NoOp,
}

impl Action {
    /// Whether the action calls the provider
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Short marker used in plan output
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace(ReplaceOrder::CreateBeforeDelete) => "+/-",
            Self::Replace(ReplaceOrder::DeleteBeforeCreate) => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace(_) => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(label)
    }
}

/// New value of a changed property
#[derive(Debug, Clone, PartialEq)]
pub enum After {
    /// Literal, or resolved from unchanged producers
    Known(Json),
    /// Depends on a producer that is being created or replaced
    Unknown,
    /// Property no longer set
    Removed,
}

/// One property that differs between record and declaration
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDiff {
    pub name: String,
    /// Recorded value (secrets fingerprinted)
    pub before: Option<Json>,
    pub after: After,
    pub behavior: PropertyBehavior,
}

impl PropertyDiff {
    pub fn forces_replacement(&self) -> bool {
        self.behavior == PropertyBehavior::ForcesReplacement
    }
}

/// A node (or orphaned record) paired with its action
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub path: NodePath,
    pub kind: String,
    pub action: Action,
    /// Declared node; `None` for deletions
    pub node: Option<ResourceNode>,
    /// Record the decision was made against
    pub prior: Option<StateRecord>,
    /// Property changes that motivated the action
    pub changes: Vec<PropertyDiff>,
    /// Entries that must succeed before this one runs
    pub depends_on: BTreeSet<NodePath>,
}

/// Ordered set of plan entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }

    pub fn entry(&self, path: &NodePath) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| &e.path == path)
    }

    /// Entries that call the provider
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action.is_change())
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_plan(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep entries matching a target plus everything they depend on
    ///
    /// Target format: a resource kind, or a node/component path prefix
    pub fn filter_target(self, target: Option<&str>) -> Self {
        let Some(target) = target else {
            return self;
        };
        let prefix = target.parse::<NodePath>().ok();

        let mut keep: BTreeSet<NodePath> = self
            .entries
            .iter()
            .filter(|e| e.kind == target || prefix.as_ref().is_some_and(|p| e.path.starts_with(p)))
            .map(|e| e.path.clone())
            .collect();

        let by_path: BTreeMap<&NodePath, &PlanEntry> =
            self.entries.iter().map(|e| (&e.path, e)).collect();
        let mut queue: Vec<NodePath> = keep.iter().cloned().collect();
        while let Some(path) = queue.pop() {
            if let Some(entry) = by_path.get(&path) {
                for dep in &entry.depends_on {
                    if keep.insert(dep.clone()) {
                        queue.push(dep.clone());
                    }
                }
            }
        }

        Self {
            entries: self
                .entries
                .into_iter()
                .filter(|e| keep.contains(&e.path))
                .collect(),
        }
    }
}

/// Compute the plan converging `prior` towards the nodes of `graph`
pub fn plan(
    graph: &Graph,
    prior: &BTreeMap<NodePath, StateRecord>,
    registry: &ProviderRegistry,
) -> Result<Plan> {
    let issues = validate(graph, registry);
    if !issues.is_empty() {
        return Err(Error::Validation(issues));
    }

    let mut planned: BTreeMap<NodePath, Action> = BTreeMap::new();
    let mut declared = Vec::with_capacity(graph.len());

    for node in graph.order() {
        let Some(schema) = registry.schema(node.kind()) else {
            continue;
        };
        let record = prior.get(node.path());
        let (action, changes) = match record {
            None => (Action::Create, creation_diffs(node, schema)),
            Some(record) => diff_node(node, record, schema, prior, &planned),
        };
        log::debug!("Planned {action} for {}", node.path());

        planned.insert(node.path().clone(), action);
        declared.push(PlanEntry {
            path: node.path().clone(),
            kind: node.kind().to_string(),
            action,
            node: Some(node.clone()),
            prior: record.cloned(),
            changes,
            depends_on: graph.dependencies(node.path()),
        });
    }

    let orphans: BTreeMap<&NodePath, &StateRecord> = prior
        .iter()
        .filter(|(path, _)| !graph.contains(path))
        .collect();

    Ok(assemble(declared, &orphans, registry))
}

/// Plan deleting every recorded resource
pub fn plan_destroy(
    prior: &BTreeMap<NodePath, StateRecord>,
    registry: &ProviderRegistry,
) -> Plan {
    let orphans: BTreeMap<&NodePath, &StateRecord> = prior.iter().collect();
    assemble(Vec::new(), &orphans, registry)
}

fn validate(graph: &Graph, registry: &ProviderRegistry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for node in graph.nodes() {
        let Some(schema) = registry.schema(node.kind()) else {
            issues.push(ValidationIssue::new(
                node.path(),
                format!("unknown resource kind `{}`", node.kind()),
            ));
            continue;
        };
        for required in schema.required() {
            if node.input(required).is_none_or(Value::is_null) {
                issues.push(ValidationIssue::new(
                    node.path(),
                    format!("required property `{required}` is missing"),
                ));
            }
        }
        for name in node.inputs().keys() {
            if !schema.declares(name) {
                issues.push(ValidationIssue::new(
                    node.path(),
                    format!("property `{name}` is not declared by kind `{}`", node.kind()),
                ));
            }
        }
    }
    issues
}

fn creation_diffs(node: &ResourceNode, schema: &KindSchema) -> Vec<PropertyDiff> {
    node.inputs()
        .iter()
        .map(|(name, value)| PropertyDiff {
            name: name.clone(),
            before: None,
            after: value
                .to_literal(SecretMode::Fingerprint)
                .map_or(After::Unknown, After::Known),
            behavior: schema.behavior_of(name),
        })
        .collect()
}

/// Desired value of one input, as far as it can be known at plan time
enum Desired {
    Known(Json),
    Unknown,
    /// References producers that are updated in place; not diffed
    Pending,
}

fn desired_value(
    value: &Value,
    prior: &BTreeMap<NodePath, StateRecord>,
    planned: &BTreeMap<NodePath, Action>,
) -> Desired {
    let refs = value.output_refs();
    let mut all_unchanged = true;
    for r in &refs {
        match planned.get(r.producer()) {
            Some(Action::NoOp) => {}
            Some(Action::Create | Action::Replace(_)) => return Desired::Unknown,
            _ => all_unchanged = false,
        }
    }
    if !all_unchanged {
        return Desired::Pending;
    }

    let lookup = |r: &OutputRef| {
        prior
            .get(r.producer())
            .and_then(|record| record.outputs().remove(r.attribute()))
    };
    value
        .resolve(&lookup, SecretMode::Fingerprint)
        .map_or(Desired::Unknown, Desired::Known)
}

fn diff_node(
    node: &ResourceNode,
    record: &StateRecord,
    schema: &KindSchema,
    prior: &BTreeMap<NodePath, StateRecord>,
    planned: &BTreeMap<NodePath, Action>,
) -> (Action, Vec<PropertyDiff>) {
    let names: BTreeSet<&String> = node.inputs().keys().chain(record.inputs.keys()).collect();

    let mut changes = Vec::new();
    for name in names {
        let before = record.inputs.get(name).cloned();
        let after = match node.input(name) {
            None if before.as_ref().is_none_or(Json::is_null) => continue,
            None => After::Removed,
            Some(value) => match desired_value(value, prior, planned) {
                Desired::Known(json) if before.as_ref().unwrap_or(&Json::Null) == &json => {
                    continue;
                }
                Desired::Known(json) => After::Known(json),
                Desired::Unknown => After::Unknown,
                Desired::Pending => continue,
            },
        };
        changes.push(PropertyDiff {
            name: name.clone(),
            before,
            after,
            behavior: schema.behavior_of(name),
        });
    }

    let action = if record.kind != node.kind() {
        log::debug!(
            "{} changed kind from {} to {}",
            node.path(),
            record.kind,
            node.kind()
        );
        Action::Replace(schema.replace_order())
    } else if changes.is_empty() {
        Action::NoOp
    } else if changes.iter().any(PropertyDiff::forces_replacement) {
        Action::Replace(schema.replace_order())
    } else {
        Action::Update
    };
    (action, changes)
}

/// Whether `record` must be deleted after `other` (it depends on or owns it)
fn records_dependency(record: &StateRecord, other: &NodePath) -> bool {
    record.dependencies.contains(other) || record.parent.as_ref() == Some(other)
}

/// Order orphan deletions dependants first, hoist delete-before-create kinds
fn assemble(
    mut declared: Vec<PlanEntry>,
    orphans: &BTreeMap<&NodePath, &StateRecord>,
    registry: &ProviderRegistry,
) -> Plan {
    let order = deletion_order(orphans);

    let mut hoisted: BTreeSet<&NodePath> = orphans
        .iter()
        .filter(|(_, record)| {
            registry
                .schema(&record.kind)
                .is_some_and(KindSchema::is_delete_before_create)
        })
        .map(|(path, _)| *path)
        .collect();
    loop {
        let before = hoisted.len();
        for (path, record) in orphans {
            if hoisted.iter().any(|h| records_dependency(record, h)) {
                hoisted.insert(*path);
            }
        }
        if hoisted.len() == before {
            break;
        }
    }

    let mut head = Vec::new();
    let mut tail = Vec::new();
    for path in order {
        let Some(record) = orphans.get(path) else {
            continue;
        };
        let mut depends_on: BTreeSet<NodePath> = orphans
            .iter()
            .filter(|(other, other_record)| *other != &path && records_dependency(other_record, path))
            .map(|(other, _)| (*other).clone())
            .collect();

        let is_hoisted = hoisted.contains(path);
        for entry in &mut declared {
            let referenced = entry
                .prior
                .as_ref()
                .is_some_and(|prior| records_dependency(prior, path));
            if !referenced {
                continue;
            }
            if is_hoisted {
                entry.depends_on.insert(path.clone());
            } else {
                depends_on.insert(entry.path.clone());
            }
        }

        log::debug!("Planned delete for orphaned {path}");
        let entry = PlanEntry {
            path: path.clone(),
            kind: record.kind.clone(),
            action: Action::Delete,
            node: None,
            prior: Some((*record).clone()),
            changes: Vec::new(),
            depends_on,
        };
        if is_hoisted {
            head.push(entry);
        } else {
            tail.push(entry);
        }
    }

    let mut entries = head;
    entries.append(&mut declared);
    entries.append(&mut tail);
    Plan { entries }
}

/// Kahn's algorithm over recorded dependencies, dependants deleted first
fn deletion_order<'a>(orphans: &BTreeMap<&'a NodePath, &StateRecord>) -> Vec<&'a NodePath> {
    let mut blockers: BTreeMap<&NodePath, usize> = orphans.keys().map(|p| (*p, 0)).collect();
    for record in orphans.values() {
        for path in orphans.keys() {
            if records_dependency(record, path) {
                if let Some(count) = blockers.get_mut(path) {
                    *count += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<(Reverse<usize>, &NodePath)> = blockers
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(path, _)| (Reverse(path.depth()), *path))
        .collect();

    let mut order = Vec::with_capacity(orphans.len());
    while let Some((_, path)) = ready.pop_first() {
        order.push(path);
        let Some(record) = orphans.get(path) else {
            continue;
        };
        for (dep, count) in &mut blockers {
            if records_dependency(record, dep) && *count > 0 {
                *count -= 1;
                if *count == 0 {
                    ready.insert((Reverse(dep.depth()), *dep));
                }
            }
        }
    }

    // Recorded dependencies never form cycles unless the state was edited by hand
    for path in orphans.keys() {
        if !order.contains(path) {
            order.push(*path);
        }
    }
    order
}
