//! Inspect recorded state

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{ResourceRecord, StateStore};
use serde_json::Value;

use super::Workspace;
use crate::Context;
use crate::ui;

/// Keys whose values never leave the state file.
const SECRET_KEYS: &[&str] = &[
    "password",
    "private_key",
    "api_token_value",
    "value",
    "kubeconfig",
];

const REDACTED: &str = "<redacted>";

pub fn list(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let state = workspace.store().load()?;

    ui::header(&format!("Stack {}", state.stack));
    ui::kv("State file", &workspace.state_file.display().to_string());
    ui::kv(
        "Last updated",
        &state.last_updated.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    println!();

    if state.resources.is_empty() {
        ui::dim("No resources recorded");
        return Ok(());
    }
    for (name, record) in &state.resources {
        let protect = if record.protect {
            format!(" {}", "[protected]".yellow())
        } else {
            String::new()
        };
        println!(
            "  {:<32} {:<18} {}{}",
            name,
            record.resource_type.cyan(),
            record.id.dimmed(),
            protect
        );
    }
    println!();
    ui::dim(&format!("{} resources", state.resources.len()));
    Ok(())
}

pub fn show(ctx: &Context, name: &str) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let state = workspace.store().load()?;
    let record = state
        .get(name)
        .with_context(|| format!("No resource named '{name}' in stack {}", state.stack))?;

    ui::header(name);
    println!("{}", serde_json::to_string_pretty(&redacted(record))?);
    Ok(())
}

/// The record as JSON with every secret value replaced.
pub fn redacted(record: &ResourceRecord) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    redact(&mut value);
    value
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && !item.is_null() {
                    *item = Value::String(REDACTED.to_string());
                } else {
                    redact(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
