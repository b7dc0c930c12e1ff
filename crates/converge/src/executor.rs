//! Execution engine - converges a plan with bounded parallelism
//!
//! The calling thread owns the per-entry state machine. Provider work runs
//! on a rayon pool and reports back over a channel, so progress callbacks
//! never need to be thread-safe.

use crate::context::{CallContext, CancelToken, ProgressCallback, ProviderContext};
use crate::error::{Error, ProviderError, Result, StateError};
use crate::node::{NodePath, ResourceNode};
use crate::planner::{Action, Plan, PlanEntry};
use crate::provider::{ProviderRegistry, ResourceProvider};
use crate::report::{ExecutionReport, Failure, FailureKind, NodeReport, SkipReason, Status};
use crate::retry::{RetryConfig, with_retry};
use crate::schema::ReplaceOrder;
use crate::state::{StateRecord, StateStore};
use crate::value::{Attributes, OutputRef, SecretMode};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::RwLock;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Options for plan execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of provider calls in flight
    pub parallelism: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Overall deadline; pending entries are skipped once it passes
    pub timeout: Option<Duration>,
    /// Report what would run without calling the provider
    pub dry_run: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            retry: RetryConfig::default(),
            timeout: None,
            dry_run: false,
        }
    }
}

type OutputTable = RwLock<BTreeMap<NodePath, Attributes>>;

enum Event {
    Retry {
        index: usize,
        attempt: u32,
        delay: Duration,
    },
    Done {
        index: usize,
        outcome: Outcome,
    },
}

struct Outcome {
    status: Status,
    attempts: u32,
    duration: Duration,
    resource_id: Option<String>,
}

impl Outcome {
    fn immediate(status: Status, resource_id: Option<String>) -> Self {
        Self {
            status,
            attempts: 0,
            duration: Duration::ZERO,
            resource_id,
        }
    }
}

/// Applies plans against a provider registry and a state store
pub struct Executor<'a> {
    pub(crate) registry: &'a ProviderRegistry,
    pub(crate) store: &'a dyn StateStore,
    pub(crate) context: &'a ProviderContext,
}

impl<'a> Executor<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        store: &'a dyn StateStore,
        context: &'a ProviderContext,
    ) -> Self {
        Self {
            registry,
            store,
            context,
        }
    }

    /// Execute a plan
    ///
    /// Node-level failures are reported in the [`ExecutionReport`]; an
    /// `Err` means the run could not start at all.
    pub fn execute<P: ProgressCallback>(
        &self,
        plan: &Plan,
        options: &ExecuteOptions,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<ExecutionReport> {
        let entries = plan.entries();
        progress.on_start(entries.len());

        if options.dry_run {
            let mut scheduler = Scheduler::new(entries);
            for index in 0..entries.len() {
                scheduler.settle(
                    index,
                    Outcome::immediate(Status::Skipped(SkipReason::DryRun), None),
                    progress,
                );
            }
            progress.on_finish();
            return Ok(scheduler.into_report(BTreeMap::new()));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallelism.max(1))
            .thread_name(|i| format!("converge-{i}"))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;

        let outputs: OutputTable = RwLock::new(BTreeMap::new());
        let mut scheduler = Scheduler::new(entries);
        let (tx, rx) = mpsc::channel::<Event>();
        let mut deadline = options.timeout.map(|t| Instant::now() + t);

        log::debug!(
            "Executing {} entries with parallelism {}",
            entries.len(),
            options.parallelism
        );

        pool.in_place_scope(|scope| {
            loop {
                if cancel.is_cancelled() {
                    scheduler.cancel_pending(progress);
                }

                while let Some(index) = scheduler.next_ready() {
                    let entry = &entries[index];
                    progress.on_entry_start(&entry.path, entry.action);

                    if entry.action == Action::NoOp {
                        let outcome = carry_forward(entry, &outputs);
                        scheduler.settle(index, outcome, progress);
                        continue;
                    }

                    scheduler.mark_running(index);
                    let tx = tx.clone();
                    let outputs = &outputs;
                    scope.spawn(move |_| {
                        let started = Instant::now();
                        let mut run = EntryRun {
                            registry: self.registry,
                            store: self.store,
                            context: self.context,
                            entry,
                            options,
                            cancel,
                            outputs,
                            events: &tx,
                            index,
                            attempts: 0,
                        };
                        let result = catch_unwind(AssertUnwindSafe(|| run.execute()));
                        let attempts = run.attempts;
                        let (status, resource_id) = match result {
                            Ok(Ok(id)) => (Status::Succeeded, id),
                            Ok(Err(status)) => (status, None),
                            Err(_) => (
                                Status::Failed(Failure::new(
                                    FailureKind::Permanent,
                                    "provider panicked",
                                )),
                                None,
                            ),
                        };
                        let outcome = Outcome {
                            status,
                            attempts,
                            duration: started.elapsed(),
                            resource_id,
                        };
                        // The receiver outlives the scope
                        let _ = tx.send(Event::Done { index, outcome });
                    });
                }

                if scheduler.is_finished() {
                    break;
                }
                if scheduler.running == 0 {
                    scheduler.fail_unreachable(progress);
                    break;
                }

                let event = match deadline {
                    Some(at) => {
                        match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                            Ok(event) => event,
                            Err(RecvTimeoutError::Timeout) => {
                                log::warn!("Execution timed out, cancelling pending work");
                                cancel.cancel();
                                deadline = None;
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    None => match rx.recv() {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                };

                match event {
                    Event::Retry {
                        index,
                        attempt,
                        delay,
                    } => progress.on_retry(&entries[index].path, attempt, delay),
                    Event::Done { index, outcome } => scheduler.settle(index, outcome, progress),
                }
            }
        });

        progress.on_finish();

        let outputs = match outputs.into_inner() {
            Ok(outputs) => outputs,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(scheduler.into_report(outputs))
    }
}

/// NoOp entries succeed immediately with their recorded outputs
fn carry_forward(entry: &PlanEntry, outputs: &OutputTable) -> Outcome {
    match &entry.prior {
        Some(record) => {
            publish(outputs, &entry.path, record.outputs());
            Outcome::immediate(Status::Succeeded, Some(record.id.clone()))
        }
        None => Outcome::immediate(
            Status::Failed(Failure::new(
                FailureKind::Validation,
                "no state record to carry forward",
            )),
            None,
        ),
    }
}

fn publish(outputs: &OutputTable, path: &NodePath, attributes: Attributes) {
    match outputs.write() {
        Ok(mut table) => table.insert(path.clone(), attributes),
        Err(poisoned) => poisoned.into_inner().insert(path.clone(), attributes),
    };
}

/// Per-entry state machine owned by the scheduling thread
struct Scheduler<'p> {
    entries: &'p [PlanEntry],
    blockers: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: VecDeque<usize>,
    is_running: Vec<bool>,
    running: usize,
    reports: Vec<Option<NodeReport>>,
    settled: usize,
}

impl<'p> Scheduler<'p> {
    fn new(entries: &'p [PlanEntry]) -> Self {
        let index: BTreeMap<&NodePath, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (&e.path, i))
            .collect();

        let mut blockers = vec![0; entries.len()];
        let mut dependents = vec![Vec::new(); entries.len()];
        for (i, entry) in entries.iter().enumerate() {
            for dep in &entry.depends_on {
                match index.get(dep) {
                    Some(&d) => {
                        blockers[i] += 1;
                        dependents[d].push(i);
                    }
                    None => log::debug!("{}: dependency {dep} is not in the plan", entry.path),
                }
            }
        }

        let ready = (0..entries.len()).filter(|&i| blockers[i] == 0).collect();

        Self {
            entries,
            blockers,
            dependents,
            ready,
            is_running: vec![false; entries.len()],
            running: 0,
            reports: vec![None; entries.len()],
            settled: 0,
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        while let Some(index) = self.ready.pop_front() {
            if self.reports[index].is_none() && !self.is_running[index] {
                return Some(index);
            }
        }
        None
    }

    fn mark_running(&mut self, index: usize) {
        self.is_running[index] = true;
        self.running += 1;
    }

    fn is_finished(&self) -> bool {
        self.settled == self.entries.len()
    }

    fn settle<P: ProgressCallback>(&mut self, index: usize, outcome: Outcome, progress: &mut P) {
        if self.reports[index].is_some() {
            return;
        }
        if self.is_running[index] {
            self.is_running[index] = false;
            self.running -= 1;
        }

        let entries = self.entries;
        let entry = &entries[index];
        log::debug!("{} {}: {:?}", entry.action, entry.path, outcome.status);
        progress.on_entry_complete(&entry.path, entry.action, &outcome.status);

        let reason = match &outcome.status {
            Status::Succeeded | Status::Skipped(SkipReason::DryRun) => None,
            Status::Skipped(SkipReason::Cancelled) => Some(SkipReason::Cancelled),
            _ => Some(SkipReason::DependencyFailed(entry.path.clone())),
        };
        self.reports[index] = Some(NodeReport {
            path: entry.path.clone(),
            kind: entry.kind.clone(),
            action: entry.action,
            status: outcome.status,
            attempts: outcome.attempts,
            duration: outcome.duration,
            resource_id: outcome.resource_id,
        });
        self.settled += 1;

        let dependents = self.dependents[index].clone();
        let Some(reason) = reason else {
            for d in dependents {
                self.blockers[d] -= 1;
                if self.blockers[d] == 0 {
                    self.ready.push_back(d);
                }
            }
            return;
        };
        for d in dependents {
            self.settle(
                d,
                Outcome::immediate(Status::Skipped(reason.clone()), None),
                progress,
            );
        }
    }

    fn cancel_pending<P: ProgressCallback>(&mut self, progress: &mut P) {
        self.ready.clear();
        for index in 0..self.entries.len() {
            if self.reports[index].is_none() && !self.is_running[index] {
                self.settle(
                    index,
                    Outcome::immediate(Status::Skipped(SkipReason::Cancelled), None),
                    progress,
                );
            }
        }
    }

    /// Entries whose dependencies can never settle (only reachable with a
    /// hand-built plan containing a cycle)
    fn fail_unreachable<P: ProgressCallback>(&mut self, progress: &mut P) {
        for index in 0..self.entries.len() {
            if self.reports[index].is_none() {
                self.settle(
                    index,
                    Outcome::immediate(
                        Status::Failed(Failure::new(
                            FailureKind::Validation,
                            "dependencies can never be satisfied",
                        )),
                        None,
                    ),
                    progress,
                );
            }
        }
    }

    fn into_report(self, outputs: BTreeMap<NodePath, Attributes>) -> ExecutionReport {
        ExecutionReport {
            nodes: self.reports.into_iter().flatten().collect(),
            outputs,
        }
    }
}

/// One entry's provider work, run on a pool thread
struct EntryRun<'a> {
    registry: &'a ProviderRegistry,
    store: &'a dyn StateStore,
    context: &'a ProviderContext,
    entry: &'a PlanEntry,
    options: &'a ExecuteOptions,
    cancel: &'a CancelToken,
    outputs: &'a OutputTable,
    events: &'a Sender<Event>,
    index: usize,
    attempts: u32,
}

impl<'a> EntryRun<'a> {
    /// Returns the resource id after the action, or the failure status
    fn execute(&mut self) -> std::result::Result<Option<String>, Status> {
        if self.cancel.is_cancelled() {
            return Err(Status::Skipped(SkipReason::Cancelled));
        }
        self.apply().map_err(Status::Failed)
    }

    fn apply(&mut self) -> std::result::Result<Option<String>, Failure> {
        match self.entry.action {
            Action::Create => self.create(0).map(Some),
            Action::Update => self.update().map(Some),
            Action::Replace(ReplaceOrder::CreateBeforeDelete) => {
                let prior = self.prior()?;
                let id = self.create(prior.version)?;
                self.retire(prior)?;
                Ok(Some(id))
            }
            Action::Replace(ReplaceOrder::DeleteBeforeCreate) => {
                self.delete_prior()?;
                self.forget()?;
                self.create(0).map(Some)
            }
            Action::Delete => {
                self.delete_prior()?;
                self.forget()?;
                Ok(None)
            }
            Action::NoOp => Ok(self.entry.prior.as_ref().map(|r| r.id.clone())),
        }
    }

    fn create(&mut self, version: u64) -> std::result::Result<String, Failure> {
        let node = self.node()?;
        let (inputs, snapshot) = self.resolve_inputs(node)?;
        let provider = self.provider(node.kind())?;

        let created = self
            .call(|ctx| provider.create(ctx, &inputs))
            .map_err(provider_failure)?;
        log::debug!("Created {} as {}", self.entry.path, created.id);

        let record = StateRecord {
            kind: node.kind().to_string(),
            id: created.id.clone(),
            inputs: snapshot,
            attributes: redacted(node, created.attributes),
            parent: node.parent(),
            dependencies: recorded_dependencies(node),
            version,
            updated_at: Utc::now(),
        };
        self.write(record).inspect_err(|_| {
            log::warn!(
                "{} was created as {} but its state record could not be written",
                self.entry.path,
                created.id
            );
        })?;
        Ok(created.id)
    }

    fn update(&mut self) -> std::result::Result<String, Failure> {
        let node = self.node()?;
        let prior = self.prior()?;
        let (inputs, snapshot) = self.resolve_inputs(node)?;
        let provider = self.provider(node.kind())?;

        let attributes = self
            .call(|ctx| provider.update(ctx, &prior.id, &inputs))
            .map_err(provider_failure)?;

        let record = StateRecord {
            kind: node.kind().to_string(),
            id: prior.id.clone(),
            inputs: snapshot,
            attributes: redacted(node, attributes),
            parent: node.parent(),
            dependencies: recorded_dependencies(node),
            version: prior.version,
            updated_at: Utc::now(),
        };
        self.write(record)?;
        Ok(prior.id.clone())
    }

    /// Delete the resource named by the prior record; already gone is fine
    fn delete_prior(&mut self) -> std::result::Result<(), Failure> {
        let prior = self.prior()?;
        let provider = self.provider(&prior.kind)?;
        match self.call(|ctx| provider.delete(ctx, &prior.id)) {
            Ok(()) => {
                log::debug!("Deleted {} ({})", self.entry.path, prior.id);
                Ok(())
            }
            Err(ProviderError::NotFound { .. }) => {
                log::debug!("{} ({}) was already gone", self.entry.path, prior.id);
                Ok(())
            }
            Err(e) => Err(provider_failure(e)),
        }
    }

    /// Delete the resource a create-before-delete replacement superseded
    ///
    /// Until the provider confirms the delete, the old resource stays
    /// recorded at its deposed path, where the next plan finds it as an
    /// orphan.
    fn retire(&mut self, prior: &StateRecord) -> std::result::Result<(), Failure> {
        let deposed = deposed_path(&self.entry.path, &prior.id);
        let record = StateRecord {
            version: 0,
            updated_at: Utc::now(),
            ..prior.clone()
        };
        self.store.put(&deposed, record).map_err(state_failure)?;
        self.delete_prior()?;
        self.store.delete(&deposed).map_err(state_failure)
    }

    /// Drop the state record of this entry
    fn forget(&self) -> std::result::Result<(), Failure> {
        self.store.delete(&self.entry.path).map_err(state_failure)
    }

    fn write(&self, record: StateRecord) -> std::result::Result<(), Failure> {
        let outputs = record.outputs();
        self.store
            .put(&self.entry.path, record)
            .map_err(state_failure)?;
        publish(self.outputs, &self.entry.path, outputs);
        Ok(())
    }

    fn call<T, F>(&mut self, mut op: F) -> std::result::Result<T, ProviderError>
    where
        F: FnMut(&CallContext<'_>) -> std::result::Result<T, ProviderError>,
    {
        let path = &self.entry.path;
        let events = self.events;
        let index = self.index;
        let attempted = with_retry(
            &self.options.retry,
            self.cancel,
            |attempt, err, delay| {
                log::warn!("{path}: {err}; retrying in {delay:?} (attempt {attempt})");
                let _ = events.send(Event::Retry {
                    index,
                    attempt,
                    delay,
                });
            },
            |attempt| {
                let ctx = CallContext {
                    config: self.context,
                    path,
                    cancel: self.cancel,
                    attempt,
                };
                op(&ctx)
            },
        );
        self.attempts += attempted.attempts;
        attempted.result
    }

    /// Inputs for the provider (secrets revealed) and for state (fingerprinted)
    fn resolve_inputs(
        &self,
        node: &ResourceNode,
    ) -> std::result::Result<(Attributes, Attributes), Failure> {
        let table = match self.outputs.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        let lookup = |r: &OutputRef| {
            table
                .get(r.producer())
                .and_then(|attributes| attributes.get(r.attribute()))
                .cloned()
        };

        let mut inputs = Attributes::new();
        let mut snapshot = Attributes::new();
        for (name, value) in node.inputs() {
            let unresolved = |r: OutputRef| {
                Failure::new(
                    FailureKind::Validation,
                    format!("input `{name}` references unresolved output {r}"),
                )
            };
            inputs.insert(
                name.clone(),
                value.resolve(&lookup, SecretMode::Reveal).map_err(unresolved)?,
            );
            snapshot.insert(
                name.clone(),
                value
                    .resolve(&lookup, SecretMode::Fingerprint)
                    .map_err(unresolved)?,
            );
        }
        Ok((inputs, snapshot))
    }

    fn node(&self) -> std::result::Result<&'a ResourceNode, Failure> {
        let entry: &'a PlanEntry = self.entry;
        entry.node.as_ref().ok_or_else(|| {
            Failure::new(
                FailureKind::Validation,
                format!("{} has no declared node", entry.path),
            )
        })
    }

    fn prior(&self) -> std::result::Result<&'a StateRecord, Failure> {
        let entry: &'a PlanEntry = self.entry;
        entry.prior.as_ref().ok_or_else(|| {
            Failure::new(
                FailureKind::Validation,
                format!("{} has no state record", entry.path),
            )
        })
    }

    fn provider(&self, kind: &str) -> std::result::Result<&'a dyn ResourceProvider, Failure> {
        let registry: &'a ProviderRegistry = self.registry;
        registry.provider(kind).map_err(provider_failure)
    }
}

/// Provider attributes with echoed secret plaintext fingerprinted
fn redacted(node: &ResourceNode, mut attributes: Attributes) -> Attributes {
    let secrets: Vec<_> = node.inputs().values().flat_map(|v| v.secrets()).collect();
    if !secrets.is_empty() {
        for value in attributes.values_mut() {
            for secret in &secrets {
                secret.redact(value);
            }
        }
    }
    attributes
}

/// Where a superseded resource is recorded while it awaits deletion
fn deposed_path(path: &NodePath, id: &str) -> NodePath {
    let name = format!("{}~{}", path.name(), id.replace('/', "_"));
    match path.parent() {
        Some(parent) => parent.child(name),
        None => NodePath::root(name),
    }
}

/// Dependencies recorded with the state, used to order later deletions
fn recorded_dependencies(node: &ResourceNode) -> Vec<NodePath> {
    let mut dependencies: Vec<NodePath> = node
        .output_refs()
        .into_iter()
        .map(|r| r.producer().clone())
        .chain(node.explicit_dependencies().iter().cloned())
        .collect();
    dependencies.sort();
    dependencies.dedup();
    dependencies
}

fn provider_failure(error: ProviderError) -> Failure {
    let kind = match &error {
        ProviderError::Transient { .. } => FailureKind::Transient,
        ProviderError::Permanent { .. } | ProviderError::NotFound { .. } => FailureKind::Permanent,
        ProviderError::Cancelled => FailureKind::Cancelled,
        ProviderError::UnknownKind { .. } => FailureKind::Validation,
    };
    Failure::new(kind, error.to_string())
}

fn state_failure(error: StateError) -> Failure {
    let kind = match &error {
        StateError::Conflict { .. } => FailureKind::Conflict,
        StateError::Io(_) | StateError::Corrupt(_) => FailureKind::State,
    };
    Failure::new(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::graph::Graph;
    use crate::planner;
    use crate::schema::KindSchema;
    use crate::state::MemoryStateStore;
    use crate::testing::{Call, MockProvider, Op, path};
    use crate::value::Value;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        provider: Arc<MockProvider>,
        registry: ProviderRegistry,
        store: MemoryStateStore,
        context: ProviderContext,
    }

    impl Harness {
        fn new() -> Self {
            let provider = Arc::new(MockProvider::new());
            let shared: Arc<dyn ResourceProvider> = provider.clone();
            let mut registry = ProviderRegistry::new();
            registry.register_all(
                [
                    KindSchema::new("network").replaces(&["cidr"]).mutable(&["name"]),
                    KindSchema::new("route")
                        .replaces(&["destination", "gateway_id"])
                        .mutable(&["tags"]),
                    KindSchema::new("address")
                        .mutable(&["tags"])
                        .delete_before_replace(),
                    KindSchema::new("password").replaces(&["value"]),
                ],
                &shared,
            );
            Self {
                provider,
                registry,
                store: MemoryStateStore::new(),
                context: ProviderContext::new("test", "dev", "local"),
            }
        }

        fn converge(&self, nodes: Vec<ResourceNode>) -> (Plan, ExecutionReport) {
            self.converge_with(nodes, &ExecuteOptions::default(), &CancelToken::new())
        }

        fn converge_with(
            &self,
            nodes: Vec<ResourceNode>,
            options: &ExecuteOptions,
            cancel: &CancelToken,
        ) -> (Plan, ExecutionReport) {
            let graph = Graph::build(nodes).unwrap();
            let prior = self.store.list_all().unwrap();
            let plan = planner::plan(&graph, &prior, &self.registry).unwrap();
            let executor = Executor::new(&self.registry, &self.store, &self.context);
            let report = executor
                .execute(&plan, options, cancel, &mut NoProgress)
                .unwrap();
            (plan, report)
        }
    }

    fn fast_retry() -> ExecuteOptions {
        ExecuteOptions {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        }
    }

    fn network() -> ResourceNode {
        ResourceNode::new("network", path("net")).with_input("cidr", "10.0.0.0/16")
    }

    fn route(net: &ResourceNode, destination: &str) -> ResourceNode {
        ResourceNode::new("route", path("route"))
            .with_input("destination", destination)
            .with_input("gateway_id", net.output("gatewayId"))
    }

    #[test]
    fn test_route_resolves_gateway_after_network() {
        let h = Harness::new();
        let net = network();
        let (plan, report) = h.converge(vec![net.clone(), route(&net, "0.0.0.0/0")]);

        assert_eq!(plan.entries()[0].action, Action::Create);
        assert!(report.is_success());

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::Create { path: created, .. } if created == &path("net")));
        let Call::Create { inputs, .. } = &calls[1] else {
            panic!("expected create, got {:?}", calls[1]);
        };
        let gateway = report.outputs[&path("net")]["gatewayId"].clone();
        assert_eq!(inputs["gateway_id"], gateway);

        let record = h.store.get(&path("route")).unwrap().unwrap();
        assert_eq!(record.inputs["gateway_id"], gateway);
        assert_eq!(record.dependencies, vec![path("net")]);
    }

    #[test]
    fn test_second_run_is_all_noop() {
        let h = Harness::new();
        let net = network();
        h.converge(vec![net.clone(), route(&net, "0.0.0.0/0")]);
        h.provider.clear_calls();

        let (plan, report) = h.converge(vec![net.clone(), route(&net, "0.0.0.0/0")]);
        assert!(!plan.has_changes());
        assert!(report.is_success());
        assert!(h.provider.calls().is_empty());
        assert_eq!(report.summary().unchanged, 2);
        assert!(report.outputs.contains_key(&path("route")));
    }

    #[test]
    fn test_failed_producer_skips_dependants() {
        let h = Harness::new();
        h.provider.fail(&path("net"), ProviderError::permanent("quota exceeded"));
        let net = network();
        let unrelated = ResourceNode::new("address", path("eip"));
        let (_, report) = h.converge(vec![net.clone(), route(&net, "0.0.0.0/0"), unrelated]);

        assert!(!report.is_success());
        assert!(matches!(
            report.status(&path("net")),
            Some(Status::Failed(Failure {
                kind: FailureKind::Permanent,
                ..
            }))
        ));
        assert_eq!(
            report.status(&path("route")),
            Some(&Status::Skipped(SkipReason::DependencyFailed(path("net"))))
        );
        assert_eq!(report.status(&path("eip")), Some(&Status::Succeeded));
        assert!(h.store.get(&path("route")).unwrap().is_none());
        assert_eq!(report.node(&path("route")).unwrap().attempts, 0);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let h = Harness::new();
        h.provider.fail_times(&path("net"), ProviderError::transient("throttled"), 2);
        let (_, report) = h.converge_with(vec![network()], &fast_retry(), &CancelToken::new());

        assert!(report.is_success());
        assert_eq!(report.node(&path("net")).unwrap().attempts, 3);
    }

    #[test]
    fn test_transient_errors_exhaust_retries() {
        let h = Harness::new();
        h.provider.fail(&path("net"), ProviderError::transient("timeout"));
        let (_, report) = h.converge_with(vec![network()], &fast_retry(), &CancelToken::new());

        let node = report.node(&path("net")).unwrap();
        assert_eq!(node.attempts, 3);
        assert!(matches!(
            &node.status,
            Status::Failed(Failure {
                kind: FailureKind::Transient,
                ..
            })
        ));
    }

    #[test]
    fn test_replace_create_before_delete() {
        let h = Harness::new();
        let net = network();
        h.converge(vec![net.clone(), route(&net, "0.0.0.0/0")]);
        let old_id = h.store.get(&path("route")).unwrap().unwrap().id;
        h.provider.clear_calls();

        let (plan, report) = h.converge(vec![net.clone(), route(&net, "10.1.0.0/16")]);
        assert_eq!(plan.entries()[0].action, Action::NoOp);
        assert!(report.is_success());

        let calls = h.provider.calls();
        assert!(matches!(&calls[0], Call::Create { .. }));
        assert!(matches!(&calls[1], Call::Delete { id, .. } if id == &old_id));

        let record = h.store.get(&path("route")).unwrap().unwrap();
        assert_ne!(record.id, old_id);
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_replace_with_unregistered_recorded_kind_fails() {
        let h = Harness::new();
        h.converge(vec![ResourceNode::new("address", path("eip")).with_input("tags", "a")]);
        let old_id = h.store.get(&path("eip")).unwrap().unwrap().id;
        h.provider.clear_calls();

        let mut state = h.store.get(&path("eip")).unwrap().unwrap();
        state.kind = "legacy-address".into();
        h.store.put(&path("eip"), state).unwrap();

        let (plan, report) =
            h.converge(vec![ResourceNode::new("address", path("eip")).with_input("tags", "a")]);
        assert_eq!(
            plan.entries()[0].action,
            Action::Replace(ReplaceOrder::DeleteBeforeCreate)
        );
        // The recorded kind is no longer registered, so the old delete fails
        assert!(!report.is_success());
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.store.get(&path("eip")).unwrap().unwrap().id, old_id);
    }

    #[test]
    fn test_replace_delete_before_create_order() {
        let h = Harness::new();
        h.converge(vec![ResourceNode::new("address", path("eip")).with_input("tags", "a")]);
        let old_id = h.store.get(&path("eip")).unwrap().unwrap().id;
        h.provider.clear_calls();

        // `address` only has mutable properties; an undeclared one forces replacement
        let mut state = h.store.get(&path("eip")).unwrap().unwrap();
        state.inputs.insert("zone".into(), json!("a"));
        h.store.put(&path("eip"), state).unwrap();

        let (_, report) =
            h.converge(vec![ResourceNode::new("address", path("eip")).with_input("tags", "a")]);
        assert!(report.is_success());
        let calls = h.provider.calls();
        assert!(matches!(&calls[0], Call::Delete { id, .. } if id == &old_id));
        assert!(matches!(&calls[1], Call::Create { .. }));
        assert_eq!(h.store.get(&path("eip")).unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_superseded_resource_stays_recorded_until_deleted() {
        let h = Harness::new();
        let net = network();
        h.converge(vec![net.clone(), route(&net, "0.0.0.0/0")]);
        let old_id = h.store.get(&path("route")).unwrap().unwrap().id;
        h.provider
            .fail_on(&path("route"), Op::Delete, ProviderError::permanent("delete denied"));

        let (_, report) = h.converge(vec![net.clone(), route(&net, "10.1.0.0/16")]);
        assert!(matches!(
            report.status(&path("route")),
            Some(Status::Failed(Failure {
                kind: FailureKind::Permanent,
                ..
            }))
        ));
        let new_id = h.store.get(&path("route")).unwrap().unwrap().id;
        assert_ne!(new_id, old_id);
        let deposed = deposed_path(&path("route"), &old_id);
        assert_eq!(deposed, path(&format!("route~{old_id}")));
        assert_eq!(h.store.get(&deposed).unwrap().unwrap().id, old_id);
        assert!(h.provider.live().contains(&old_id));

        // The next run deletes only the superseded resource
        let (plan, report) = h.converge(vec![net.clone(), route(&net, "10.1.0.0/16")]);
        assert!(report.is_success());
        let deleted: Vec<_> = plan
            .entries()
            .iter()
            .filter(|e| e.action == Action::Delete)
            .map(|e| e.path.clone())
            .collect();
        assert_eq!(deleted, vec![deposed.clone()]);
        assert_eq!(plan.summary().unchanged, 2);
        assert!(h.store.get(&deposed).unwrap().is_none());
        assert_eq!(h.provider.live().len(), 2);
        assert!(h.provider.live().contains(&new_id));
    }

    #[test]
    fn test_replace_leaves_no_deposed_record_on_success() {
        let h = Harness::new();
        let net = network();
        h.converge(vec![net.clone(), route(&net, "0.0.0.0/0")]);
        h.converge(vec![net.clone(), route(&net, "10.1.0.0/16")]);
        let paths: Vec<_> = h.store.list_all().unwrap().into_keys().collect();
        assert_eq!(paths, vec![path("net"), path("route")]);
    }

    #[test]
    fn test_failed_create_after_delete_plans_a_create() {
        let h = Harness::new();
        let eip = || ResourceNode::new("address", path("eip")).with_input("tags", "a");
        h.converge(vec![eip()]);
        let old_id = h.store.get(&path("eip")).unwrap().unwrap().id;

        let mut state = h.store.get(&path("eip")).unwrap().unwrap();
        state.inputs.insert("zone".into(), json!("a"));
        h.store.put(&path("eip"), state).unwrap();
        h.provider
            .fail_on(&path("eip"), Op::Create, ProviderError::permanent("no addresses left"));

        let (plan, report) = h.converge(vec![eip()]);
        assert_eq!(
            plan.entries()[0].action,
            Action::Replace(ReplaceOrder::DeleteBeforeCreate)
        );
        assert!(matches!(report.status(&path("eip")), Some(Status::Failed(_))));
        assert!(h.store.get(&path("eip")).unwrap().is_none());
        assert!(!h.provider.live().contains(&old_id));

        let graph = Graph::build(vec![eip()]).unwrap();
        let replan = planner::plan(&graph, &h.store.list_all().unwrap(), &h.registry).unwrap();
        assert_eq!(replan.entries()[0].action, Action::Create);
    }

    #[test]
    fn test_orphan_delete_tolerates_not_found() {
        let h = Harness::new();
        h.converge(vec![network()]);
        let id = h.store.get(&path("net")).unwrap().unwrap().id;
        h.provider.forget(&id);

        let (plan, report) = h.converge(Vec::new());
        assert_eq!(plan.entries()[0].action, Action::Delete);
        assert!(report.is_success());
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_conflicting_writer_fails_entry() {
        let h = Harness::new();
        let graph = Graph::build(vec![network()]).unwrap();
        let plan = planner::plan(&graph, &BTreeMap::new(), &h.registry).unwrap();

        // Someone else records the node between plan and apply
        h.store
            .put(&path("net"), StateRecord::new("network", "net-external"))
            .unwrap();

        let executor = Executor::new(&h.registry, &h.store, &h.context);
        let report = executor
            .execute(&plan, &ExecuteOptions::default(), &CancelToken::new(), &mut NoProgress)
            .unwrap();
        assert!(matches!(
            report.status(&path("net")),
            Some(Status::Failed(Failure {
                kind: FailureKind::Conflict,
                ..
            }))
        ));
        assert_eq!(h.store.get(&path("net")).unwrap().unwrap().id, "net-external");
    }

    #[test]
    fn test_secrets_reach_provider_but_not_state() {
        let h = Harness::new();
        let secret = crate::value::Secret::new("hunter2");
        let node = ResourceNode::new("password", path("db")).with_input("value", secret.clone());
        let (_, report) = h.converge(vec![node]);
        assert!(report.is_success());

        let Call::Create { inputs, .. } = &h.provider.calls()[0] else {
            panic!("expected create");
        };
        assert_eq!(inputs["value"], json!("hunter2"));

        let record = h.store.get(&path("db")).unwrap().unwrap();
        assert_eq!(record.inputs["value"], json!(secret.fingerprint()));
        // The provider echoes its inputs back as attributes
        assert_eq!(record.attributes["value"], json!(secret.fingerprint()));
        assert!(!serde_json::to_string(&record).unwrap().contains("hunter2"));
        assert!(!format!("{:?}", report.outputs).contains("hunter2"));
    }

    #[test]
    fn test_dry_run_skips_everything() {
        let h = Harness::new();
        let options = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let (_, report) = h.converge_with(vec![network()], &options, &CancelToken::new());
        assert!(report.is_success());
        assert_eq!(
            report.status(&path("net")),
            Some(&Status::Skipped(SkipReason::DryRun))
        );
        assert!(h.provider.calls().is_empty());
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_cancelled_before_start_is_an_error() {
        let h = Harness::new();
        let graph = Graph::build(vec![network()]).unwrap();
        let plan = planner::plan(&graph, &BTreeMap::new(), &h.registry).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let executor = Executor::new(&h.registry, &h.store, &h.context);
        let result = executor.execute(&plan, &ExecuteOptions::default(), &cancel, &mut NoProgress);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_timeout_cancels_pending_entries() {
        let h = Harness::new();
        h.provider.block_until_cancelled(&path("net"));
        let net = network();
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (_, report) = h.converge_with(
            vec![net.clone(), route(&net, "0.0.0.0/0")],
            &options,
            &CancelToken::new(),
        );

        assert!(matches!(
            report.status(&path("net")),
            Some(Status::Failed(Failure {
                kind: FailureKind::Cancelled,
                ..
            }))
        ));
        assert!(matches!(
            report.status(&path("route")),
            Some(Status::Skipped(_))
        ));
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_independent_entries_run_in_parallel() {
        let h = Harness::new();
        let nodes: Vec<ResourceNode> = (0..8)
            .map(|i| {
                ResourceNode::new("network", path(&format!("net-{i}")))
                    .with_input("cidr", Value::from(format!("10.{i}.0.0/16")))
            })
            .collect();
        let options = ExecuteOptions {
            parallelism: 8,
            ..Default::default()
        };
        let (_, report) = h.converge_with(nodes, &options, &CancelToken::new());
        assert!(report.is_success());
        assert_eq!(report.summary().created, 8);
        assert_eq!(h.store.len(), 8);
    }
}
