//! Simulated AWS provider
//!
//! One [`SimulatedCloud`] backs every kind; each kind is registered with its
//! own [`KindProvider`] so calls arrive tagged with the kind they are for.

mod cloud;
mod kinds;

pub use cloud::{LATENCY_SETTING, SimulatedCloud, THROTTLE_SETTING};
pub use kinds::AwsKind;

use converge::{Attributes, CallContext, Created, ProviderError, ProviderRegistry, ResourceProvider};
use std::sync::Arc;

/// The simulated cloud seen through one resource kind
pub struct KindProvider {
    kind: AwsKind,
    cloud: Arc<SimulatedCloud>,
}

impl ResourceProvider for KindProvider {
    fn create(&self, ctx: &CallContext<'_>, inputs: &Attributes) -> Result<Created, ProviderError> {
        self.cloud.create(self.kind, ctx, inputs)
    }

    fn read(&self, ctx: &CallContext<'_>, id: &str) -> Result<Attributes, ProviderError> {
        self.cloud.read(self.kind, ctx, id)
    }

    fn update(
        &self,
        ctx: &CallContext<'_>,
        id: &str,
        inputs: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.cloud.update(self.kind, ctx, id, inputs)
    }

    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        self.cloud.delete(self.kind, ctx, id)
    }
}

/// Registry with every topology kind served by `cloud`
pub fn registry(cloud: &Arc<SimulatedCloud>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for kind in AwsKind::ALL {
        let provider = KindProvider {
            kind,
            cloud: Arc::clone(cloud),
        };
        registry.register(kind.schema(), Arc::new(provider));
    }
    log::debug!("Registered {} simulated resource kinds", registry.len());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_kind() {
        let cloud = Arc::new(SimulatedCloud::in_memory());
        let registry = registry(&cloud);
        assert_eq!(registry.len(), AwsKind::ALL.len());
        for kind in AwsKind::ALL {
            assert!(registry.schema(kind.as_str()).is_some());
            assert!(registry.provider(kind.as_str()).is_ok());
        }
    }
}
