use super::Session;
use crate::Context;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use converge::Graph;
use std::fmt::Write as _;

/// Print the component tree, or the dependency graph as DOT
pub fn run(ctx: &Context, dot: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let (graph, _) = session.declaration()?.build()?;

    if dot {
        print!("{}", to_dot(&graph));
        return Ok(());
    }

    let prior = session.prior()?;
    ui::header(&format!("Stack `{}`", session.config.name));
    graph.tree().walk(|path, entry, level| {
        let indent = "  ".repeat(level + 1);
        let label = entry.label.as_deref().unwrap_or_default();
        if entry.is_resource {
            let marker = match prior.get(path) {
                Some(_) => "●".green(),
                None => "○".dimmed(),
            };
            println!("{indent}{marker} {} {}", path.name(), label.dimmed());
        } else {
            println!("{indent}{} {}", path.name().bold(), label.cyan());
        }
    });
    println!();
    ui::dim(&format!(
        "{} resources, {} dependency edges (● recorded in state)",
        graph.len(),
        graph.edges().len()
    ));
    Ok(())
}

/// Graphviz rendering: one cluster per top-level component, edges producer to consumer
pub fn to_dot(graph: &Graph) -> String {
    let mut out = String::from("digraph tierstack {\n  rankdir=LR;\n  node [shape=box];\n");
    for (index, root) in graph.tree().roots().iter().enumerate() {
        let label = graph
            .tree()
            .get(root)
            .and_then(|e| e.label.clone())
            .unwrap_or_else(|| root.to_string());
        let _ = writeln!(out, "  subgraph cluster_{index} {{");
        let _ = writeln!(out, "    label=\"{root} ({label})\";");
        for path in graph.tree().resources_under(root) {
            let _ = writeln!(out, "    \"{path}\";");
        }
        out.push_str("  }\n");
    }
    for (producer, consumer) in graph.edges() {
        let _ = writeln!(out, "  \"{producer}\" -> \"{consumer}\";");
    }
    out.push_str("}\n");
    out
}
