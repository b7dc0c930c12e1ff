//! One-call convergence: build, plan, execute, resolve exports

use crate::context::{CancelToken, ProgressCallback};
use crate::declare::{Declaration, ExportValue};
use crate::error::Result;
use crate::executor::{ExecuteOptions, Executor};
use crate::planner::{self, Plan};
use crate::report::ExecutionReport;
use std::collections::BTreeMap;

/// Everything a convergence pass produced
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub plan: Plan,
    pub report: ExecutionReport,
    pub exports: BTreeMap<String, ExportValue>,
}

impl Executor<'_> {
    /// Converge the state store towards `declaration`
    ///
    /// `target` restricts the plan to matching entries and their
    /// dependencies (see [`Plan::filter_target`]).
    pub fn converge<P: ProgressCallback>(
        &self,
        declaration: Declaration,
        target: Option<&str>,
        options: &ExecuteOptions,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<RunOutput> {
        let (graph, exports) = declaration.build()?;
        let prior = self.store.list_all()?;
        let plan = planner::plan(&graph, &prior, self.registry)?.filter_target(target);
        let report = self.execute(&plan, options, cancel, progress)?;

        // Exports of entries outside a targeted plan come from state
        let mut outputs: BTreeMap<_, _> = self
            .store
            .list_all()?
            .into_iter()
            .map(|(path, record)| {
                let outputs = record.outputs();
                (path, outputs)
            })
            .collect();
        outputs.extend(report.outputs.clone());

        Ok(RunOutput {
            exports: exports.resolve(&outputs),
            plan,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NoProgress, ProviderContext};
    use crate::node::ResourceNode;
    use crate::provider::{ProviderRegistry, ResourceProvider};
    use crate::schema::KindSchema;
    use crate::state::{MemoryStateStore, StateStore};
    use crate::testing::{MockProvider, path};
    use std::sync::Arc;

    fn declaration(cidr: &str) -> Declaration {
        let mut decl = Declaration::new();
        let vpc = decl.component("tier:network:Vpc", path("vpc"));
        let net = decl.add(ResourceNode::new("network", vpc.child("vpc")).with_input("cidr", cidr));
        let route = decl.add(
            ResourceNode::new("route", vpc.child("route")).with_input("gateway_id", net.output("gatewayId")),
        );
        decl.export("gateway", net.output("gatewayId"));
        decl.export("routeId", route.id());
        decl
    }

    #[test]
    fn test_converge_twice_is_stable() {
        let provider: Arc<dyn ResourceProvider> = Arc::new(MockProvider::new());
        let mut registry = ProviderRegistry::new();
        registry.register_all(
            [
                KindSchema::new("network").replaces(&["cidr"]),
                KindSchema::new("route").replaces(&["gateway_id"]),
            ],
            &provider,
        );
        let store = MemoryStateStore::new();
        let context = ProviderContext::new("shop", "dev", "local");
        let executor = Executor::new(&registry, &store, &context);
        let options = ExecuteOptions::default();
        let cancel = CancelToken::new();

        let first = executor
            .converge(declaration("10.0.0.0/16"), None, &options, &cancel, &mut NoProgress)
            .unwrap();
        assert!(first.report.is_success());
        assert_eq!(first.report.summary().created, 2);
        assert!(matches!(first.exports["gateway"], ExportValue::Resolved(_)));
        let route_id = store.get(&path("vpc/route")).unwrap().unwrap().id;
        assert_eq!(first.exports["routeId"].to_string(), route_id);

        let second = executor
            .converge(declaration("10.0.0.0/16"), None, &options, &cancel, &mut NoProgress)
            .unwrap();
        assert!(!second.plan.has_changes());
        assert_eq!(second.exports, first.exports);

        // Targeting only the network still resolves the route's export from state
        let third = executor
            .converge(
                declaration("10.0.0.0/16"),
                Some("vpc/vpc"),
                &options,
                &cancel,
                &mut NoProgress,
            )
            .unwrap();
        assert_eq!(third.plan.len(), 1);
        assert_eq!(third.exports["routeId"].to_string(), route_id);
    }
}
