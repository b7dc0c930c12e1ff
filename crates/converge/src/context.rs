//! Provider context, cancellation and progress callbacks
//!
//! These types let the engine run without depending on a particular cloud
//! SDK, terminal UI or signal handling implementation.

use crate::node::NodePath;
use crate::planner::Action;
use crate::report::Status;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Process-wide settings handed to every provider call
///
/// Built once per run and never mutated; providers receive it by reference
/// instead of reading ambient global state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderContext {
    /// Project name (used for naming and tagging)
    pub project: String,
    /// Stack name (environment)
    pub stack: String,
    /// Target region
    pub region: String,
    /// Provider-specific settings
    pub settings: BTreeMap<String, String>,
}

impl ProviderContext {
    pub fn new(
        project: impl Into<String>,
        stack: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            region: region.into(),
            settings: BTreeMap::new(),
        }
    }

    /// Add a provider-specific setting
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

/// Per-call context passed to provider operations
pub struct CallContext<'a> {
    /// Run-wide settings
    pub config: &'a ProviderContext,
    /// Node the call is made for
    pub path: &'a NodePath,
    /// Cancel signal; long-running calls should poll it
    pub cancel: &'a CancelToken,
    /// Attempt number, starting at 1
    pub attempt: u32,
}

/// Shared cancellation signal
///
/// Cloning yields a handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every sleeper
    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        match flag.lock() {
            Ok(mut cancelled) => *cancelled = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        match flag.lock() {
            Ok(cancelled) => *cancelled,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `false` if the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = match flag.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = condvar.wait_timeout_while(guard, duration, |cancelled| !*cancelled);
        let cancelled = match result {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        };
        !cancelled
    }
}

/// Progress callback for execution
///
/// All methods are called from the scheduling thread, in completion order.
pub trait ProgressCallback {
    /// Called once before any entry runs
    fn on_start(&mut self, total: usize);

    /// Called when an entry starts running
    fn on_entry_start(&mut self, path: &NodePath, action: Action);

    /// Called when an entry reaches a terminal status
    fn on_entry_complete(&mut self, path: &NodePath, action: Action, status: &Status);

    /// Called when a transient failure is about to be retried
    fn on_retry(&mut self, _path: &NodePath, _attempt: u32, _delay: Duration) {}

    /// Called after the last entry settled
    fn on_finish(&mut self) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_entry_start(&mut self, _path: &NodePath, _action: Action) {}
    fn on_entry_complete(&mut self, _path: &NodePath, _action: Action, _status: &Status) {}
}
