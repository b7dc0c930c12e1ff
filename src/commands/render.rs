//! Plan, report and output rendering

use crate::ui;
use colored::{ColoredString, Colorize};
use converge::{
    Action, After, ExecuteSummary, ExecutionReport, ExportValue, Plan, PlanEntry, Status,
    group_by_kind,
};
use std::collections::BTreeMap;

fn symbol(action: Action) -> ColoredString {
    let symbol = format!("{:<3}", action.symbol());
    match action {
        Action::Create => symbol.green(),
        Action::Delete => symbol.red(),
        Action::Update => symbol.yellow(),
        Action::Replace(_) => symbol.magenta(),
        Action::NoOp => symbol.dimmed(),
    }
}

/// Display the changing entries of a plan, grouped by kind
pub fn plan(plan: &Plan, title: &str, verbose: bool) {
    let summary = plan.summary();
    if !summary.has_changes() {
        println!();
        println!("  {} No changes. Infrastructure matches the stack.", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        title.bold()
    );
    println!("│");

    for (kind, entries) in group_by_kind(plan) {
        println!("│ {}", kind.bold());
        for entry in entries {
            println!(
                "│   {} {:<34} {}",
                symbol(entry.action),
                entry.path.to_string(),
                entry.action.to_string().dimmed()
            );
            if verbose || !matches!(entry.action, Action::Create) {
                changes(entry);
            }
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to add, {} to change, {} to replace, {} to destroy ({} unchanged)",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.replacements.to_string().magenta(),
        summary.removals.to_string().red(),
        summary.unchanged
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn changes(entry: &PlanEntry) {
    for change in &entry.changes {
        let before = change
            .before
            .as_ref()
            .map_or_else(|| "(unset)".to_string(), ui::compact);
        let after = match &change.after {
            After::Known(value) => ui::compact(value),
            After::Unknown => "(known after apply)".to_string(),
            After::Removed => "(removed)".to_string(),
        };
        let forces = if change.forces_replacement() && matches!(entry.action, Action::Replace(_)) {
            " # forces replacement".red().to_string()
        } else {
            String::new()
        };
        let line = if entry.action == Action::Create {
            format!("{} = {after}", change.name)
        } else {
            format!("{}: {before} → {after}", change.name)
        };
        println!("│         {}{forces}", line.dimmed());
    }
}

/// Print the final summary of an execution
pub fn report(report: &ExecutionReport, what: &str) {
    let summary = report.summary();
    println!();
    if report.is_success() {
        println!("  {} {what} completed successfully!", "✓".green().bold());
    } else {
        println!("  {} {what} completed with errors", "⚠".yellow().bold());
    }
    if summary.changed() == 0 && summary.failed == 0 {
        ui::dim("No resources changed");
    }
    counts(&summary);

    for node in report.failures() {
        if let Status::Failed(failure) = &node.status {
            println!(
                "    {} {} {} ({}): {failure}",
                "✗".red(),
                node.action,
                node.path,
                node.kind.dimmed()
            );
        }
    }
}

fn counts(summary: &ExecuteSummary) {
    let lines = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.skipped, "skipped"),
    ];
    for (count, label) in lines {
        if count > 0 {
            println!("    • {count} resources {label}");
        }
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

/// Print resolved stack outputs
pub fn exports(exports: &BTreeMap<String, ExportValue>) {
    if exports.is_empty() {
        ui::dim("No outputs");
        return;
    }
    ui::header("Outputs");
    for (name, value) in exports {
        match value {
            ExportValue::Unresolved(_) => ui::kv(name, &value.to_string().dimmed().to_string()),
            _ => ui::kv(name, &value.to_string()),
        }
    }
}
