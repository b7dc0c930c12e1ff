//! Provider operations and the per-kind registry
//!
//! The executor only depends on the four-operation capability set of
//! [`ResourceProvider`]; which cloud API sits behind it is up to the
//! implementation registered for each kind.

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::KindSchema;
use crate::value::Attributes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a successful create
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Provider-assigned id
    pub id: String,
    /// Attributes reported by the provider
    pub attributes: Attributes,
}

/// CRUD operations for one resource kind
pub trait ResourceProvider: Send + Sync {
    /// Create the resource from fully resolved inputs
    fn create(&self, ctx: &CallContext<'_>, inputs: &Attributes) -> Result<Created, ProviderError>;

    /// Read current attributes; `ProviderError::NotFound` if gone
    fn read(&self, ctx: &CallContext<'_>, id: &str) -> Result<Attributes, ProviderError>;

    /// Update mutable properties in place
    fn update(
        &self,
        ctx: &CallContext<'_>,
        id: &str,
        inputs: &Attributes,
    ) -> Result<Attributes, ProviderError>;

    /// Delete the resource
    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError>;
}

struct Registration {
    schema: KindSchema,
    provider: Arc<dyn ResourceProvider>,
}

/// Maps resource kinds to their schema and provider
#[derive(Default)]
pub struct ProviderRegistry {
    kinds: BTreeMap<String, Registration>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind; a later registration for the same kind wins
    pub fn register(&mut self, schema: KindSchema, provider: Arc<dyn ResourceProvider>) {
        let kind = schema.kind().to_string();
        if self.kinds.contains_key(&kind) {
            log::debug!("Replacing provider registration for {kind}");
        }
        self.kinds.insert(kind, Registration { schema, provider });
    }

    /// Register several kinds served by the same provider
    pub fn register_all(
        &mut self,
        schemas: impl IntoIterator<Item = KindSchema>,
        provider: &Arc<dyn ResourceProvider>,
    ) {
        for schema in schemas {
            self.register(schema, Arc::clone(provider));
        }
    }

    pub fn schema(&self, kind: &str) -> Option<&KindSchema> {
        self.kinds.get(kind).map(|r| &r.schema)
    }

    /// Provider for a kind, or `UnknownKind`
    pub fn provider(&self, kind: &str) -> Result<&dyn ResourceProvider, ProviderError> {
        self.kinds
            .get(kind)
            .map(|r| r.provider.as_ref())
            .ok_or_else(|| ProviderError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_unknown_kind_is_an_error() {
        let registry = ProviderRegistry::new();
        let Err(err) = registry.provider("aws:ec2/vpc:Vpc") else {
            panic!("expected UnknownKind");
        };
        assert!(matches!(err, ProviderError::UnknownKind { .. }));
        assert!(registry.schema("aws:ec2/vpc:Vpc").is_none());
    }

    #[test]
    fn test_register_all_shares_provider() {
        let provider: Arc<dyn ResourceProvider> = Arc::new(MockProvider::new());
        let mut registry = ProviderRegistry::new();
        registry.register_all(
            [KindSchema::new("network"), KindSchema::new("route")],
            &provider,
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["network", "route"]);
        assert!(registry.provider("route").is_ok());
    }
}
