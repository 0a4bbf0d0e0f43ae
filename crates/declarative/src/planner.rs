//! Preview: what apply or destroy would do, without running any provider

use crate::diff::{Change, Plan, PlannedChange};
use crate::graph::ResourceGraph;
use crate::output::{Outcome, OutputError};
use crate::provider::{ErasedProvider, UpdateStrategy};
use crate::resource::{Node, Stack};
use crate::state::{ResourceRecord, StackState, StateStore};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Classify every declared and recorded resource.
///
/// Resources that will not change expose their recorded outputs to
/// dependents; resources that will change expose unknown outputs, so a
/// dependent whose inputs derive from them is reported as [`Change::Unknown`].
/// A recorded dependent of a replaced resource is replaced with it.
pub fn preview(stack: Stack, store: &dyn StateStore) -> Result<Plan> {
    let state = store.load()?;
    let (stack_name, _, nodes, graph) = stack.into_parts();
    let levels = graph.levels()?;

    let declared: BTreeSet<String> = nodes.iter().map(|n| n.name.clone()).collect();
    let mut nodes: HashMap<String, Node> = nodes.into_iter().map(|n| (n.name.clone(), n)).collect();
    let mut changes = Vec::with_capacity(nodes.len());
    let mut replacing = BTreeSet::new();

    for name in levels.into_iter().flatten() {
        let Some(node) = nodes.remove(&name) else {
            continue;
        };
        let Node {
            name,
            provider,
            inputs,
            protect,
            resolver,
            ..
        } = node;

        let record = state.get(&name);
        let inputs = inputs.peek();
        let mut change = classify(provider.as_ref(), record, inputs.as_ref())
            .with_context(|| format!("Failed to plan '{name}'"))?;
        if record.is_some_and(|r| depends_on_any(r, &replacing)) {
            change = Change::Replace;
        }
        if change == Change::Replace && !protect {
            replacing.insert(name.clone());
        }

        match (change, record) {
            (Change::NoChange, Some(record)) => resolver.resolve(record.outputs.clone()),
            _ => resolver.reject(OutputError::unknown()),
        }

        let description = match &inputs {
            Some(Ok(inputs)) => provider.describe(inputs),
            _ => provider.resource_type().to_string(),
        };
        changes.push(PlannedChange {
            name,
            resource_type: provider.resource_type().to_string(),
            description,
            change,
            protect,
        });
    }

    for name in teardown_order(&state, |n| !declared.contains(n))?
        .into_iter()
        .flatten()
    {
        if let Some(record) = state.get(&name) {
            changes.push(deletion(name, record));
        }
    }

    Ok(Plan {
        stack: stack_name,
        changes,
    })
}

/// Every recorded resource, in the order destroy would delete them.
pub fn preview_destroy(store: &dyn StateStore) -> Result<Plan> {
    let state = store.load()?;
    let mut changes = Vec::with_capacity(state.resources.len());
    for name in teardown_order(&state, |_| true)?.into_iter().flatten() {
        if let Some(record) = state.get(&name) {
            changes.push(deletion(name, record));
        }
    }
    Ok(Plan {
        stack: state.stack,
        changes,
    })
}

fn depends_on_any(record: &ResourceRecord, names: &BTreeSet<String>) -> bool {
    record.parent.as_ref().is_some_and(|p| names.contains(p))
        || record.depends_on.iter().any(|d| names.contains(d))
}

fn deletion(name: String, record: &ResourceRecord) -> PlannedChange {
    PlannedChange {
        description: format!("{} ({})", record.resource_type, record.id),
        resource_type: record.resource_type.clone(),
        name,
        change: Change::Delete,
        protect: record.protect,
    }
}

fn classify(
    provider: &dyn ErasedProvider,
    record: Option<&ResourceRecord>,
    inputs: Option<&Outcome<Value>>,
) -> Result<Change> {
    let Some(record) = record else {
        return match inputs {
            Some(Err(e)) if !e.is_unknown() => Err(e.clone().into()),
            _ => Ok(Change::Create),
        };
    };

    if record.resource_type != provider.resource_type() {
        return Ok(Change::Replace);
    }

    match inputs {
        None => Ok(Change::Unknown),
        Some(Err(e)) if e.is_unknown() => Ok(Change::Unknown),
        Some(Err(e)) => Err(e.clone().into()),
        Some(Ok(inputs)) if *inputs == record.inputs => Ok(Change::NoChange),
        Some(Ok(inputs)) => match strategy(provider, &record.inputs, inputs) {
            UpdateStrategy::InPlace => Ok(Change::Update),
            UpdateStrategy::Replace => Ok(Change::Replace),
        },
    }
}

/// How the provider would converge, falling back to replacement when the
/// recorded inputs no longer fit the provider's input type.
pub(crate) fn strategy(provider: &dyn ErasedProvider, old: &Value, new: &Value) -> UpdateStrategy {
    provider.update_strategy(old, new).unwrap_or_else(|e| {
        log::debug!("{}: {e:#}; planning replacement", provider.resource_type());
        UpdateStrategy::Replace
    })
}

/// Deletion levels for the recorded resources selected by `include`.
///
/// Dependents come before what they depend on; edges to resources outside
/// the selection are ignored.
pub(crate) fn teardown_order(
    state: &StackState,
    include: impl Fn(&str) -> bool,
) -> Result<Vec<Vec<String>>> {
    let mut graph = ResourceGraph::new();
    for (name, record) in state.resources.iter().filter(|(n, _)| include(n)) {
        graph.add(name, record.parent.as_deref(), record.depends_on.iter().cloned())?;
    }
    graph.prune_unknown();
    Ok(graph.teardown_levels()?)
}
