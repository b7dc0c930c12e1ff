//! `state list`, `state show` and `state rm`

use super::Session;
use crate::Context;
use crate::ui;
use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use converge::{
    Attributes, CallContext, CancelToken, NodePath, ProviderError, StateRecord, StateStore,
};
use serde_json::Value as Json;
use std::collections::BTreeSet;

pub fn list(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let prior = session.prior()?;
    if prior.is_empty() {
        ui::info(&format!("Stack `{}` has no resources", session.config.name));
        return Ok(());
    }

    ui::header(&format!("State of `{}` ({} resources)", session.config.name, prior.len()));
    let live = session.cloud.resources();
    let width = prior.keys().map(|p| p.to_string().len()).max().unwrap_or(0);
    let mut missing = 0;
    for (path, record) in &prior {
        let marker = if live.contains_key(&record.id) {
            "●".green()
        } else {
            missing += 1;
            "○".red()
        };
        println!(
            "  {marker} {:<width$}  {}  {}",
            path.to_string(),
            record.id,
            record.kind.dimmed()
        );
    }
    if missing > 0 {
        println!();
        ui::warn(&format!("{missing} recorded resource(s) no longer exist in the cloud"));
    }
    Ok(())
}

pub fn show(ctx: &Context, path: &str, refresh: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let path = parse_path(path)?;
    let record = recorded(&session, &path)?;

    ui::header(&path.to_string());
    ui::kv("kind", &record.kind);
    ui::kv("id", &record.id);
    ui::kv("version", &record.version.to_string());
    ui::kv("updated", &record.updated_at.to_rfc3339());
    if !record.dependencies.is_empty() {
        let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
        ui::kv("depends on", &deps.join(", "));
    }
    section("Inputs", &record.inputs);
    section("Attributes", &record.attributes);

    if refresh {
        println!();
        match read_live(&session, &path, &record) {
            Ok(live) => {
                let drift = drift(&record.attributes, &live);
                if drift.is_empty() {
                    ui::success("Live resource matches state");
                } else {
                    ui::warn(&format!("{} attribute(s) drifted", drift.len()));
                    for d in &drift {
                        println!("    {} {}", "~".yellow(), d);
                    }
                }
            }
            Err(ProviderError::NotFound { .. }) => {
                ui::warn("Resource no longer exists; the next apply recreates it");
            }
            Err(e) => return Err(e).context("Failed to read the live resource"),
        }
    }
    Ok(())
}

pub fn rm(ctx: &Context, path: &str, yes: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let path = parse_path(path)?;
    let record = recorded(&session, &path)?;

    let prompt = format!("Forget {path} ({})? The resource itself is kept.", record.id);
    if !yes && !ui::confirm(&prompt)? {
        ui::warn("Aborted");
        return Ok(());
    }
    session.store.delete(&path).context("Failed to update state")?;
    ui::success(&format!("Removed {path} from state"));
    Ok(())
}

fn parse_path(path: &str) -> Result<NodePath> {
    path.parse().map_err(anyhow::Error::msg)
}

fn recorded(session: &Session, path: &NodePath) -> Result<StateRecord> {
    match session.store.get(path).context("Failed to read state")? {
        Some(record) => Ok(record),
        None => bail!("No resource recorded at {path}"),
    }
}

fn section(title: &str, values: &Attributes) {
    if values.is_empty() {
        return;
    }
    println!();
    println!("  {}", title.cyan().bold());
    for (name, value) in values {
        println!("    {}: {}", name.dimmed(), ui::compact(value));
    }
}

/// Attributes of the live resource, read through its provider
fn read_live(
    session: &Session,
    path: &NodePath,
    record: &StateRecord,
) -> Result<Attributes, ProviderError> {
    let provider = session.registry.provider(&record.kind)?;
    let cancel = CancelToken::new();
    let call = CallContext {
        config: &session.context,
        path,
        cancel: &cancel,
        attempt: 1,
    };
    log::debug!("Reading {} {} for {path}", record.kind, record.id);
    provider.read(&call, &record.id)
}

/// One attribute that differs between state and the live resource
#[derive(Debug, Clone, PartialEq)]
pub struct Drift {
    pub name: String,
    pub recorded: Option<Json>,
    pub live: Option<Json>,
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Json>| v.as_ref().map_or_else(|| "(unset)".to_string(), ui::compact);
        write!(f, "{}: {} → {}", self.name, show(&self.recorded), show(&self.live))
    }
}

/// Attributes whose live value differs from the recorded one
pub fn drift(recorded: &Attributes, live: &Attributes) -> Vec<Drift> {
    let names: BTreeSet<&String> = recorded.keys().chain(live.keys()).collect();
    names
        .into_iter()
        .filter(|name| recorded.get(*name) != live.get(*name))
        .map(|name| Drift {
            name: name.clone(),
            recorded: recorded.get(name).cloned(),
            live: live.get(name).cloned(),
        })
        .collect()
}
