use super::{Session, render};
use crate::Context;
use anyhow::Result;
use converge::Plan;

/// Show what `apply` would change
pub fn run(ctx: &Context, target: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;
    let plan = compute(&session, target)?;
    render::plan(&plan, "Plan", ctx.verbose > 0);
    Ok(())
}

/// Plan the declared topology against recorded state
pub fn compute(session: &Session, target: Option<&str>) -> Result<Plan> {
    let (graph, _) = session.declaration()?.build()?;
    let prior = session.prior()?;
    let plan = converge::plan(&graph, &prior, &session.registry)?.filter_target(target);
    log::info!(
        "Planned {} entries ({} changing) for stack `{}`",
        plan.len(),
        plan.summary().total(),
        session.config.name
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{STACK, session};
    use converge::Action;

    #[test]
    fn test_empty_state_creates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), STACK);
        let plan = compute(&session, None).unwrap();
        assert_eq!(plan.len(), 42);
        assert!(plan.entries().iter().all(|e| e.action == Action::Create));
    }

    #[test]
    fn test_target_keeps_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), STACK);
        let plan = compute(&session, Some("db")).unwrap();
        let paths: Vec<String> = plan.entries().iter().map(|e| e.path.to_string()).collect();
        assert!(paths.contains(&"db/db".to_string()));
        assert!(paths.contains(&"vpc/vpc".to_string()));
        assert!(paths.contains(&"secGroup/db_sec_group".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with("web/")));
    }
}
