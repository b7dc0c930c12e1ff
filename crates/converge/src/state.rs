//! State records and the state store interface
//!
//! A record's existence is the only evidence that a resource exists in the
//! provider. Writes are optimistic: each record carries the version it was
//! read at, and a put against a newer version fails with a conflict.

use crate::error::StateError;
use crate::node::NodePath;
use crate::value::{Attributes, ID_ATTRIBUTE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Persisted form of one converged resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource kind
    pub kind: String,
    /// Provider-assigned id
    pub id: String,
    /// Inputs as applied (secrets fingerprinted)
    #[serde(default)]
    pub inputs: Attributes,
    /// Attributes returned by the provider
    #[serde(default)]
    pub attributes: Attributes,
    /// Owning component or resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodePath>,
    /// Dependencies at the time of the last apply (used to order deletions)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<NodePath>,
    /// Store version this record was read at (0 = not stored yet)
    #[serde(default)]
    pub version: u64,
    /// Last successful write
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            inputs: Attributes::new(),
            attributes: Attributes::new(),
            parent: None,
            dependencies: Vec::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Values other nodes can reference: provider attributes plus `id`
    pub fn outputs(&self) -> Attributes {
        let mut outputs = self.attributes.clone();
        outputs.insert(
            ID_ATTRIBUTE.to_string(),
            serde_json::Value::String(self.id.clone()),
        );
        outputs
    }
}

/// Durable record of converged resources keyed by node path
pub trait StateStore: Send + Sync {
    /// Record at `path`, if any
    fn get(&self, path: &NodePath) -> Result<Option<StateRecord>, StateError>;

    /// Write `record`; its `version` must match the stored version (0 if
    /// absent). Returns the new version.
    fn put(&self, path: &NodePath, record: StateRecord) -> Result<u64, StateError>;

    /// Remove the record at `path` (absent is not an error)
    fn delete(&self, path: &NodePath) -> Result<(), StateError>;

    /// Every record
    fn list_all(&self) -> Result<BTreeMap<NodePath, StateRecord>, StateError>;
}

/// Optimistic version check shared by store implementations
pub fn check_version(
    path: &NodePath,
    current: Option<&StateRecord>,
    expected: u64,
) -> Result<u64, StateError> {
    let found = current.map_or(0, |r| r.version);
    if found != expected {
        return Err(StateError::Conflict {
            path: path.clone(),
            expected,
            found,
        });
    }
    Ok(found + 1)
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<NodePath, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. from a persisted snapshot
    pub fn with_records(records: BTreeMap<NodePath, StateRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodePath, StateRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, path: &NodePath) -> Result<Option<StateRecord>, StateError> {
        Ok(self.lock().get(path).cloned())
    }

    fn put(&self, path: &NodePath, mut record: StateRecord) -> Result<u64, StateError> {
        let mut records = self.lock();
        let version = check_version(path, records.get(path), record.version)?;
        record.version = version;
        records.insert(path.clone(), record);
        Ok(version)
    }

    fn delete(&self, path: &NodePath) -> Result<(), StateError> {
        self.lock().remove(path);
        Ok(())
    }

    fn list_all(&self) -> Result<BTreeMap<NodePath, StateRecord>, StateError> {
        Ok(self.lock().clone())
    }
}
