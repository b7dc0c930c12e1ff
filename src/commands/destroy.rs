use super::{Session, render};
use crate::Context;
use crate::cli::DestroyArgs;
use crate::progress::BarProgress;
use crate::ui;
use anyhow::{Result, bail};
use converge::{CancelToken, ExecuteOptions, ExecutionReport, ProgressCallback};

/// Delete every recorded resource, dependants first
pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let prior = session.prior()?;
    if prior.is_empty() {
        ui::info(&format!("Stack `{}` has no resources", session.config.name));
        return Ok(());
    }

    let plan = converge::plan_destroy(&prior, &session.registry);
    render::plan(&plan, "Destroy", ctx.verbose > 0);

    let prompt = format!(
        "Delete all {} resources of stack `{}`?",
        plan.len(),
        session.config.name
    );
    if !args.yes && !ui::confirm(&prompt)? {
        ui::warn("Aborted");
        return Ok(());
    }

    let mut options = session.config.execute_options();
    if let Some(jobs) = args.jobs {
        options.parallelism = jobs.max(1);
    }
    let mut progress = BarProgress::new(ctx.quiet, ctx.verbose > 0);
    let report = destroy(&session, &options, &mut progress)?;
    render::report(&report, "Destroy");

    if !report.is_success() {
        bail!("{} resource(s) could not be deleted", report.summary().failed);
    }
    Ok(())
}

pub fn destroy<P: ProgressCallback>(
    session: &Session,
    options: &ExecuteOptions,
    progress: &mut P,
) -> Result<ExecutionReport> {
    let plan = converge::plan_destroy(&session.prior()?, &session.registry);
    log::info!("Destroying {} resource(s)", plan.len());
    let report = session
        .executor()
        .execute(&plan, options, &CancelToken::new(), progress)?;
    Ok(report)
}
