use super::{Session, render};
use crate::Context;
use anyhow::Result;

/// Show stack exports as recorded by the last apply
pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let declaration = session.declaration()?;
    let exports = session.resolve_exports(declaration.exports())?;
    render::exports(&exports);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::{STACK, session};
    use crate::commands::{apply, plan};
    use converge::{ExportValue, NoProgress};

    #[test]
    fn test_outputs_unresolved_before_apply() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), STACK);
        let declaration = session.declaration().unwrap();
        let exports = session.resolve_exports(declaration.exports()).unwrap();
        assert!(matches!(exports["albDns"], ExportValue::Unresolved(_)));
    }

    #[test]
    fn test_outputs_follow_state() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), STACK);
        let plan = plan::compute(&session, Some("alb")).unwrap();
        let options = session.config.execute_options();
        apply::execute(&session, &plan, &options, &mut NoProgress).unwrap();

        let declaration = session.declaration().unwrap();
        let exports = session.resolve_exports(declaration.exports()).unwrap();
        assert!(matches!(exports["albDns"], ExportValue::Resolved(_)));
        assert_eq!(
            exports["albZoneId"],
            ExportValue::Resolved(serde_json::json!("Z35SXDOTRQ7X7K"))
        );
        // The database was outside the targeted apply
        assert!(matches!(exports["dbEndpoint"], ExportValue::Unresolved(_)));
    }
}
