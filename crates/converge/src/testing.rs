//! Test doubles shared by the engine's unit tests

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::node::{NodePath, ResourceNode};
use crate::provider::{Created, ResourceProvider};
use crate::state::StateRecord;
use crate::value::{Attributes, OutputRef, SecretMode};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

pub fn path(s: &str) -> NodePath {
    s.parse().unwrap()
}

/// State record as if `node` had been created by [`MockProvider`]
///
/// Producers referenced by `node` must already be in `state`.
pub fn record_for(node: &ResourceNode, state: &BTreeMap<NodePath, StateRecord>) -> StateRecord {
    let lookup = |r: &OutputRef| {
        state
            .get(r.producer())
            .and_then(|record| record.outputs().remove(r.attribute()))
    };
    let mut record = StateRecord::new(node.kind(), format!("{}-id", node.path()));
    record.inputs = node
        .inputs()
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                value.resolve(&lookup, SecretMode::Fingerprint).unwrap(),
            )
        })
        .collect();
    record
        .attributes
        .insert("gatewayId".into(), json!(format!("gw-{}", node.path())));
    record.parent = node.parent();
    record.dependencies = node
        .output_refs()
        .into_iter()
        .map(|r| r.producer().clone())
        .collect();
    record.version = 1;
    record
}

/// A provider call as observed by [`MockProvider`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { path: NodePath, inputs: Attributes },
    Read { path: NodePath, id: String },
    Update { path: NodePath, id: String, inputs: Attributes },
    Delete { path: NodePath, id: String },
}

/// Provider operation a scripted failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Read,
    Update,
    Delete,
}

enum Script {
    Fail {
        error: ProviderError,
        remaining: Option<u32>,
        only: Option<Op>,
    },
    BlockUntilCancelled,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    resources: BTreeMap<String, Attributes>,
    calls: Vec<Call>,
    scripts: BTreeMap<NodePath, Script>,
}

/// In-memory provider that records calls and fails on request
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every call on `path` fails with `error`
    pub fn fail(&self, path: &NodePath, error: ProviderError) {
        self.lock().scripts.insert(
            path.clone(),
            Script::Fail {
                error,
                remaining: None,
                only: None,
            },
        );
    }

    /// The next `times` calls on `path` fail with `error`
    pub fn fail_times(&self, path: &NodePath, error: ProviderError, times: u32) {
        self.lock().scripts.insert(
            path.clone(),
            Script::Fail {
                error,
                remaining: Some(times),
                only: None,
            },
        );
    }

    /// Every `op` call on `path` fails with `error`; other calls succeed
    pub fn fail_on(&self, path: &NodePath, op: Op, error: ProviderError) {
        self.lock().scripts.insert(
            path.clone(),
            Script::Fail {
                error,
                remaining: None,
                only: Some(op),
            },
        );
    }

    /// Calls on `path` hang until the run is cancelled
    pub fn block_until_cancelled(&self, path: &NodePath) {
        self.lock()
            .scripts
            .insert(path.clone(), Script::BlockUntilCancelled);
    }

    /// Drop a resource behind the engine's back
    pub fn forget(&self, id: &str) {
        self.lock().resources.remove(id);
    }

    /// Ids of every resource the provider still holds
    pub fn live(&self) -> Vec<String> {
        self.lock().resources.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn scripted(&self, ctx: &CallContext<'_>, op: Op) -> Result<(), ProviderError> {
        let blocked = {
            let mut state = self.lock();
            match state.scripts.get_mut(ctx.path) {
                None => return Ok(()),
                Some(Script::BlockUntilCancelled) => true,
                Some(Script::Fail { only: Some(only), .. }) if *only != op => return Ok(()),
                Some(Script::Fail {
                    error, remaining, ..
                }) => {
                    let error = error.clone();
                    match remaining {
                        None => return Err(error),
                        Some(0) => return Ok(()),
                        Some(n) => {
                            *n -= 1;
                            return Err(error);
                        }
                    }
                }
            }
        };
        if blocked {
            while ctx.cancel.sleep(Duration::from_millis(5)) {}
            return Err(ProviderError::Cancelled);
        }
        Ok(())
    }
}

impl ResourceProvider for MockProvider {
    fn create(&self, ctx: &CallContext<'_>, inputs: &Attributes) -> Result<Created, ProviderError> {
        self.lock().calls.push(Call::Create {
            path: ctx.path.clone(),
            inputs: inputs.clone(),
        });
        self.scripted(ctx, Op::Create)?;

        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("{}-{}", ctx.path.name(), state.next_id);
        let mut attributes = inputs.clone();
        attributes.insert("gatewayId".into(), json!(format!("gw-{}", state.next_id)));
        attributes.insert("arn".into(), json!(format!("arn:mock:{id}")));
        state.resources.insert(id.clone(), attributes.clone());
        Ok(Created { id, attributes })
    }

    fn read(&self, ctx: &CallContext<'_>, id: &str) -> Result<Attributes, ProviderError> {
        self.lock().calls.push(Call::Read {
            path: ctx.path.clone(),
            id: id.to_string(),
        });
        self.scripted(ctx, Op::Read)?;
        self.lock()
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })
    }

    fn update(
        &self,
        ctx: &CallContext<'_>,
        id: &str,
        inputs: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.lock().calls.push(Call::Update {
            path: ctx.path.clone(),
            id: id.to_string(),
            inputs: inputs.clone(),
        });
        self.scripted(ctx, Op::Update)?;
        let mut state = self.lock();
        let attributes = state
            .resources
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })?;
        for (name, value) in inputs {
            attributes.insert(name.clone(), value.clone());
        }
        Ok(attributes.clone())
    }

    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        self.lock().calls.push(Call::Delete {
            path: ctx.path.clone(),
            id: id.to_string(),
        });
        self.scripted(ctx, Op::Delete)?;
        self.lock()
            .resources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })
    }
}
