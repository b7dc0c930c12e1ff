use super::{Session, render};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::BarProgress;
use crate::ui;
use anyhow::{Result, bail};
use converge::{
    CancelToken, ExecuteOptions, ExecutionReport, ExportValue, Plan, ProgressCallback,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Converge the stack, asking first unless `--yes`
pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let plan = super::plan::compute(&session, args.target.as_deref())?;
    render::plan(&plan, "Apply", ctx.verbose > 0);

    if !plan.has_changes() {
        let exports = session.resolve_exports(session.declaration()?.exports())?;
        render::exports(&exports);
        return Ok(());
    }

    if !args.yes && !args.dry_run && !ui::confirm("Apply these changes?")? {
        ui::warn("Aborted");
        return Ok(());
    }

    let options = options(&session, args);
    let mut progress = BarProgress::new(ctx.quiet, ctx.verbose > 0);
    let (report, exports) = execute(&session, &plan, &options, &mut progress)?;

    if options.dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(());
    }
    render::report(&report, "Apply");
    render::exports(&exports);
    log::debug!("Simulated cloud holds {} resource(s)", session.cloud.len());

    if !report.is_success() {
        bail!("{} resource(s) failed to apply", report.summary().failed);
    }
    Ok(())
}

/// `[engine]` options with command-line overrides
fn options(session: &Session, args: &ApplyArgs) -> ExecuteOptions {
    let mut options = session.config.execute_options();
    if let Some(jobs) = args.jobs {
        options.parallelism = jobs.max(1);
    }
    if let Some(secs) = args.timeout {
        options.timeout = Some(Duration::from_secs(secs));
    }
    options.dry_run = args.dry_run;
    options
}

/// Execute an approved plan and resolve exports from the resulting state
pub fn execute<P: ProgressCallback>(
    session: &Session,
    plan: &Plan,
    options: &ExecuteOptions,
    progress: &mut P,
) -> Result<(ExecutionReport, BTreeMap<String, ExportValue>)> {
    let declaration = session.declaration()?;
    let report = session
        .executor()
        .execute(plan, options, &CancelToken::new(), progress)?;
    let exports = session.resolve_exports(declaration.exports())?;
    Ok((report, exports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{STACK, session};
    use crate::commands::{Session, plan};
    use crate::config::StackConfig;
    use crate::state::FileStateStore;
    use converge::{Action, NoProgress, StateStore, Status};
    use std::path::Path;
    use std::sync::Arc;

    fn converge(
        session: &Session,
        options: &ExecuteOptions,
    ) -> (ExecutionReport, BTreeMap<String, ExportValue>) {
        let plan = plan::compute(session, None).unwrap();
        execute(session, &plan, options, &mut NoProgress).unwrap()
    }

    fn fast() -> ExecuteOptions {
        let mut options = ExecuteOptions::default();
        options.retry.base_delay = Duration::from_millis(1);
        options.retry.max_delay = Duration::from_millis(2);
        options
    }

    /// Reopen the stack in `dir` against the same cloud, as a second CLI run would
    fn reopen(dir: &Path, stack: &str, cloud: &Arc<crate::provider::SimulatedCloud>) -> Session {
        let stack_path = dir.join("stack.toml");
        std::fs::write(&stack_path, stack).unwrap();
        Session::assemble(
            StackConfig::load(&stack_path).unwrap(),
            FileStateStore::open(dir.join("dev.state.json")).unwrap(),
            Arc::clone(cloud),
        )
        .unwrap()
    }

    #[test]
    fn test_apply_then_replan_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), STACK);
        let (report, exports) = converge(&session, &fast());
        assert!(report.is_success(), "{:?}", report.failures().collect::<Vec<_>>());
        assert_eq!(report.summary().created, 42);
        assert_eq!(session.cloud.len(), 42);

        let ExportValue::Resolved(dns) = &exports["albDns"] else {
            panic!("albDns should resolve");
        };
        assert!(dns.as_str().unwrap().starts_with("shop-alb-"));
        assert!(matches!(exports["dbEndpoint"], ExportValue::Resolved(_)));

        let replan = plan::compute(&session, None).unwrap();
        assert!(!replan.has_changes());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = session(dir.path(), STACK);
        converge(&first, &fast());

        let second = reopen(dir.path(), STACK, &first.cloud);
        assert_eq!(second.store.list_all().unwrap().len(), 42);
        assert!(!plan::compute(&second, None).unwrap().has_changes());
    }

    #[test]
    fn test_scaling_change_updates_group_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let first = session(dir.path(), STACK);
        converge(&first, &fast());

        let grown = STACK.replace("keyName = \"shop-key\"", "keyName = \"shop-key\"\nwebMaxSize = 6");
        let second = reopen(dir.path(), &grown, &first.cloud);
        let plan = plan::compute(&second, None).unwrap();
        let changing: Vec<(String, Action)> = plan
            .changes()
            .map(|e| (e.path.to_string(), e.action))
            .collect();
        assert_eq!(changing, vec![("web/web_asg".to_string(), Action::Update)]);

        let (report, _) = execute(&second, &plan, &fast(), &mut NoProgress).unwrap();
        assert_eq!(report.summary().updated, 1);
    }

    #[test]
    fn test_throttling_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let stack = STACK.replace(
            "keyName = \"shop-key\"",
            "keyName = \"shop-key\"\nsimulatedThrottleEvery = 5",
        );
        let session = session(dir.path(), &stack);
        let mut options = fast();
        options.retry.max_attempts = 10;
        let (report, _) = converge(&session, &options);
        assert!(report.is_success());
        assert!(report.nodes.iter().any(|n| n.attempts > 1));
    }

    #[test]
    fn test_invalid_scaling_fails_only_the_web_tier() {
        let dir = tempfile::tempdir().unwrap();
        // min > max passes local checks but the provider rejects the group
        let stack = STACK.replace(
            "keyName = \"shop-key\"",
            "keyName = \"shop-key\"\nwebMinSize = 5\nwebMaxSize = 3",
        );
        let session = session(dir.path(), &stack);
        let (report, exports) = converge(&session, &fast());
        assert!(!report.is_success());

        let status = |p: &str| report.status(&p.parse().unwrap()).cloned();
        assert!(matches!(status("web/web_asg"), Some(Status::Failed(_))));
        assert!(matches!(status("web/cpu_target"), Some(Status::Skipped(_))));
        assert_eq!(status("db/db"), Some(Status::Succeeded));
        assert!(matches!(exports["albDns"], ExportValue::Resolved(_)));
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), STACK);
        let options = ExecuteOptions {
            dry_run: true,
            ..fast()
        };
        let (report, _) = converge(&session, &options);
        assert_eq!(report.summary().skipped, 42);
        assert!(session.cloud.is_empty());
        assert!(session.prior().unwrap().is_empty());
    }
}
