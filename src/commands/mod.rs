//! Command implementations
//!
//! Every command opens a [`Session`]: the stack file, the state snapshot
//! and the simulated cloud for that stack, plus the provider registry and
//! context built from them.

pub mod apply;
pub mod destroy;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod state;

mod render;

use crate::Context;
use crate::config::StackConfig;
use crate::paths;
use crate::provider::{self, LATENCY_SETTING, SimulatedCloud, THROTTLE_SETTING};
use crate::state::FileStateStore;
use crate::topology::{self, TopologyInputs};
use anyhow::{Context as _, Result};
use converge::{
    Declaration, Executor, ExportValue, Exports, NodePath, ProviderContext, ProviderRegistry,
    StateRecord, StateStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a command needs to plan or converge one stack
pub struct Session {
    pub config: StackConfig,
    pub store: FileStateStore,
    pub cloud: Arc<SimulatedCloud>,
    pub registry: ProviderRegistry,
    pub context: ProviderContext,
}

impl Session {
    /// Open the stack selected by `--stack` and its state directory
    pub fn open(ctx: &Context) -> Result<Self> {
        let stack_path = paths::stack_file(ctx.stack.as_deref())?;
        let config = StackConfig::load(&stack_path)?;

        let dir = paths::state_dir()?;
        let state_path = paths::state_file(&dir, &config.name);
        let store = FileStateStore::open(&state_path)
            .with_context(|| format!("Failed to open state {}", state_path.display()))?;
        let cloud = SimulatedCloud::open(&paths::cloud_file(&dir, &config.name))?;
        log::info!(
            "Stack `{}` with state at {}",
            config.name,
            state_path.display()
        );

        Self::assemble(config, store, Arc::new(cloud))
    }

    pub fn assemble(
        config: StackConfig,
        store: FileStateStore,
        cloud: Arc<SimulatedCloud>,
    ) -> Result<Self> {
        let registry = provider::registry(&cloud);
        let context = provider_context(&config)?;
        Ok(Self {
            config,
            store,
            cloud,
            registry,
            context,
        })
    }

    /// The topology declared by the stack's `[config]`
    pub fn declaration(&self) -> Result<Declaration> {
        let inputs = TopologyInputs::from_config(&self.config)
            .with_context(|| format!("Invalid configuration in {}", self.config.path.display()))?;
        Ok(topology::declare(&inputs))
    }

    pub fn executor(&self) -> Executor<'_> {
        Executor::new(&self.registry, &self.store, &self.context)
    }

    /// Every recorded resource
    pub fn prior(&self) -> Result<BTreeMap<NodePath, StateRecord>> {
        self.store.list_all().context("Failed to read state")
    }

    /// Resolve exports against what state currently records
    pub fn resolve_exports(&self, exports: &Exports) -> Result<BTreeMap<String, ExportValue>> {
        let outputs = self
            .prior()?
            .into_iter()
            .map(|(path, record)| {
                let outputs = record.outputs();
                (path, outputs)
            })
            .collect();
        Ok(exports.resolve(&outputs))
    }
}

/// Provider context from `[config]`, including simulated cloud behaviour
fn provider_context(config: &StackConfig) -> Result<ProviderContext> {
    let mut context = ProviderContext::new(
        config.require_str("projectName")?,
        &config.name,
        config.require_str("awsRegion")?,
    );
    let settings = [
        ("simulatedLatencyMs", LATENCY_SETTING),
        ("simulatedThrottleEvery", THROTTLE_SETTING),
    ];
    for (key, setting) in settings {
        if let Some(value) = config.get_f64(key)? {
            anyhow::ensure!(
                value >= 0.0 && value.fract() == 0.0,
                "{key} must be a whole, non-negative number"
            );
            context = context.with_setting(setting, format!("{}", value as u64));
        }
    }
    Ok(context)
}
