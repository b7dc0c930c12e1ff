//! JSON-file backed state store
//!
//! The whole snapshot lives in memory and is rewritten on every change,
//! through a temporary file and a rename so a crash never leaves a
//! half-written snapshot behind.

use chrono::{DateTime, Utc};
use converge::{NodePath, StateError, StateRecord, StateStore, check_version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    records: BTreeMap<NodePath, StateRecord>,
}

/// State snapshot persisted as one JSON file
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    records: Mutex<BTreeMap<NodePath, StateRecord>>,
}

impl FileStateStore {
    /// Open the snapshot at `path`; a missing file is an empty state
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let records = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&content)
                .map_err(|e| StateError::Corrupt(format!("{}: {e}", path.display())))?;
            if snapshot.format != SNAPSHOT_FORMAT {
                return Err(StateError::Corrupt(format!(
                    "{}: unsupported snapshot format {}",
                    path.display(),
                    snapshot.format
                )));
            }
            log::debug!(
                "Loaded {} state record(s) from {}",
                snapshot.records.len(),
                path.display()
            );
            snapshot.records
        } else {
            log::debug!("State file {} does not exist, starting empty", path.display());
            BTreeMap::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodePath, StateRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, records: &BTreeMap<NodePath, StateRecord>) -> Result<(), StateError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            updated_at: Utc::now(),
            records: records.clone(),
        };
        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StateError::Corrupt(format!("failed to encode snapshot: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        log::trace!("Wrote {} record(s) to {}", records.len(), self.path.display());
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, path: &NodePath) -> Result<Option<StateRecord>, StateError> {
        Ok(self.lock().get(path).cloned())
    }

    fn put(&self, path: &NodePath, mut record: StateRecord) -> Result<u64, StateError> {
        let mut records = self.lock();
        let version = check_version(path, records.get(path), record.version)?;
        record.version = version;
        let previous = records.insert(path.clone(), record);
        if let Err(e) = self.persist(&records) {
            // Keep memory in line with disk
            match previous {
                Some(previous) => records.insert(path.clone(), previous),
                None => records.remove(path),
            };
            return Err(e);
        }
        Ok(version)
    }

    fn delete(&self, path: &NodePath) -> Result<(), StateError> {
        let mut records = self.lock();
        let Some(previous) = records.remove(path) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&records) {
            records.insert(path.clone(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn list_all(&self) -> Result<BTreeMap<NodePath, StateRecord>, StateError> {
        Ok(self.lock().clone())
    }
}
