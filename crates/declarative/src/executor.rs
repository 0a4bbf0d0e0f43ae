//! Execution engine - applies a stack level by level with bounded parallelism

use crate::context::ProgressCallback;
use crate::graph::ResourceGraph;
use crate::output::OutputError;
use crate::planner::{strategy, teardown_order};
use crate::provider::{ErasedProvider, ProviderRegistry, Removal, UpdateStrategy};
use crate::resource::{Node, Stack};
use crate::state::{ResourceRecord, StackState, StateStore};
use crate::types::{ApplyResult, ExecuteOptions, ExecuteSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use rayon::ThreadPool;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// What one resource's execution did to its state record.
enum RecordChange {
    Keep,
    Put(ResourceRecord),
    Remove,
}

struct NodeOutcome {
    name: String,
    result: ApplyResult,
    record: RecordChange,
}

impl NodeOutcome {
    fn failed(name: String, error: &anyhow::Error) -> Self {
        Self {
            name,
            result: ApplyResult::failed(error),
            record: RecordChange::Keep,
        }
    }
}

/// Converge recorded state on the declared stack.
///
/// Levels run one after another; resources within a level run on a pool of
/// `opts.jobs` threads. A failure lets the rest of its level finish, then
/// every later resource is skipped and orphans are left in place. State is
/// saved after every level, so resources that succeeded stay recorded.
///
/// Before a level replaces anything, the recorded dependents of what it
/// replaces are deleted, dependents first. Declared dependents are then
/// created again in their own level and reported as replaced.
pub fn apply(
    stack: Stack,
    store: &dyn StateStore,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> Result<ExecuteSummary> {
    let mut state = store.load()?;
    let (stack_name, registry, nodes, graph) = stack.into_parts();
    let levels = graph.levels()?;
    let pool = build_pool(opts.jobs)?;

    let declared: HashMap<String, bool> = nodes.iter().map(|n| (n.name.clone(), n.protect)).collect();
    let mut pending: HashMap<String, Node> = nodes.into_iter().map(|n| (n.name.clone(), n)).collect();
    let mut cascaded = BTreeSet::new();
    let mut summary = ExecuteSummary::default();
    let mut failed = false;

    log::info!("Applying stack '{stack_name}' ({} resources)", declared.len());

    for (index, level) in levels.into_iter().enumerate() {
        let batch: Vec<Node> = level.iter().filter_map(|name| pending.remove(name)).collect();
        if failed {
            skip_all(batch.iter().map(|n| n.name.as_str()), progress, &mut summary);
            continue;
        }

        let replacing: BTreeSet<&str> = batch
            .iter()
            .filter(|node| replaces(node, &state))
            .map(|node| node.name.as_str())
            .collect();
        let dependents = recorded_dependents(&state, &replacing)?;
        if !dependents.is_empty() {
            log::info!(
                "Removing {} dependent(s) of {} before replacing",
                dependents.len(),
                replacing.into_iter().collect::<Vec<_>>().join(", ")
            );
            let order = teardown_order(&state, |name| dependents.contains(name))?;
            failed = run_cascade(order, &declared, &mut state, &registry, &pool, progress, &mut summary);
            store.save(&state)?;
            if failed {
                skip_all(batch.iter().map(|n| n.name.as_str()), progress, &mut summary);
                continue;
            }
            cascaded.extend(dependents.into_iter().filter(|name| declared.contains_key(name)));
        }

        progress.on_level_start(index, batch.len());
        let snapshot = &state;
        let registry = &registry;
        let recreate = &cascaded;
        let outcomes: Vec<NodeOutcome> = pool.install(|| {
            batch
                .into_par_iter()
                .map(|node| {
                    let recreated = recreate.contains(&node.name);
                    apply_node(node, snapshot, registry, recreated, progress)
                })
                .collect()
        });
        failed = record_outcomes(outcomes, &mut state, &mut summary, progress);
        store.save(&state)?;
        progress.on_level_complete(index);
    }

    let orphans = teardown_order(&state, |name| !declared.contains_key(name))?;
    if failed {
        skip_all(orphans.iter().flatten().map(String::as_str), progress, &mut summary);
        return Ok(summary);
    }

    run_deletes(orphans, &mut state, &registry, &pool, store, progress, &mut summary)?;
    Ok(summary)
}

/// Delete every recorded resource, dependents before their dependencies.
pub fn destroy(
    stack: Stack,
    store: &dyn StateStore,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> Result<ExecuteSummary> {
    let mut state = store.load()?;
    let (stack_name, registry, _, _) = stack.into_parts();
    let pool = build_pool(opts.jobs)?;
    let levels = teardown_order(&state, |_| true)?;
    let mut summary = ExecuteSummary::default();

    log::info!(
        "Destroying stack '{stack_name}' ({} resources)",
        state.resources.len()
    );
    run_deletes(levels, &mut state, &registry, &pool, store, progress, &mut summary)?;
    Ok(summary)
}

fn build_pool(jobs: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("Failed to create apply thread pool")
}

/// Whether applying `node` will delete and recreate its recorded resource.
fn replaces(node: &Node, state: &StackState) -> bool {
    let Some(previous) = state.get(&node.name) else {
        return false;
    };
    if node.protect {
        return false;
    }
    if previous.resource_type != node.provider.resource_type() {
        return true;
    }
    match node.inputs.peek() {
        Some(Ok(inputs)) => {
            inputs != previous.inputs
                && strategy(node.provider.as_ref(), &previous.inputs, &inputs)
                    == UpdateStrategy::Replace
        }
        _ => false,
    }
}

/// Recorded resources that depend on any of `roots`, directly or through
/// other recorded resources.
fn recorded_dependents(state: &StackState, roots: &BTreeSet<&str>) -> Result<BTreeSet<String>> {
    if roots.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut graph = ResourceGraph::new();
    for (name, record) in &state.resources {
        graph.add(name, record.parent.as_deref(), record.depends_on.iter().cloned())?;
    }
    Ok(roots
        .iter()
        .flat_map(|root| graph.dependents_of(root))
        .filter(|name| !roots.contains(name.as_str()))
        .collect())
}

/// Delete the dependents of resources about to be replaced; returns whether
/// any delete failed.
///
/// A declared dependent is created again later, so its removal is counted
/// there. Dependents that are no longer declared count as removed here.
fn run_cascade(
    levels: Vec<Vec<String>>,
    declared: &HashMap<String, bool>,
    state: &mut StackState,
    registry: &ProviderRegistry,
    pool: &ThreadPool,
    progress: &dyn ProgressCallback,
    summary: &mut ExecuteSummary,
) -> bool {
    for level in levels {
        let snapshot = &*state;
        let outcomes: Vec<NodeOutcome> = pool.install(|| {
            level
                .into_par_iter()
                .filter_map(|name| {
                    let record = snapshot.get(&name)?;
                    let protect = declared.get(&name).copied().unwrap_or(record.protect);
                    Some(delete_record(name, record, protect, registry, progress))
                })
                .collect()
        });
        let (recreated, reported): (Vec<_>, Vec<_>) = outcomes
            .into_iter()
            .partition(|o| declared.contains_key(&o.name) && o.result.is_success());
        for outcome in recreated {
            log::debug!("{}: removed ahead of its replaced dependency", outcome.name);
            if matches!(outcome.record, RecordChange::Remove) {
                state.remove(&outcome.name);
            }
        }
        if record_outcomes(reported, state, summary, progress) {
            return true;
        }
    }
    false
}

fn run_deletes(
    levels: Vec<Vec<String>>,
    state: &mut StackState,
    registry: &ProviderRegistry,
    pool: &ThreadPool,
    store: &dyn StateStore,
    progress: &dyn ProgressCallback,
    summary: &mut ExecuteSummary,
) -> Result<()> {
    let mut failed = false;
    for (index, level) in levels.into_iter().enumerate() {
        if failed {
            skip_all(level.iter().map(String::as_str), progress, summary);
            continue;
        }

        progress.on_level_start(index, level.len());
        let snapshot = &*state;
        let outcomes: Vec<NodeOutcome> = pool.install(|| {
            level
                .into_par_iter()
                .map(|name| match snapshot.get(&name) {
                    Some(record) => {
                        let protect = record.protect;
                        delete_record(name, record, protect, registry, progress)
                    }
                    None => NodeOutcome {
                        name,
                        result: ApplyResult::NoChange,
                        record: RecordChange::Keep,
                    },
                })
                .collect()
        });
        failed = record_outcomes(outcomes, state, summary, progress);
        store.save(state)?;
        progress.on_level_complete(index);
    }
    Ok(())
}

fn apply_node(
    node: Node,
    state: &StackState,
    registry: &ProviderRegistry,
    recreated: bool,
    progress: &dyn ProgressCallback,
) -> NodeOutcome {
    let Node {
        name,
        provider,
        inputs,
        parent,
        depends_on,
        protect,
        resolver,
    } = node;

    let inputs = match inputs.peek() {
        Some(Ok(inputs)) => inputs,
        Some(Err(e)) => {
            let error = anyhow::anyhow!("inputs unavailable: {e}");
            resolver.reject(OutputError::failed(&e));
            return NodeOutcome::failed(name, &error);
        }
        None => {
            let error = anyhow::anyhow!(
                "inputs depend on a value that no declared dependency produces"
            );
            resolver.reject(OutputError::failed(&error));
            return NodeOutcome::failed(name, &error);
        }
    };

    progress.on_resource_start(&name, &provider.describe(&inputs));
    let previous = state.get(&name);

    let converged = converge(&name, provider.as_ref(), registry, previous, &inputs, protect);
    let (result, id, outputs) = match converged {
        Ok((ApplyResult::Created, id, outputs)) if recreated => (ApplyResult::Replaced, id, outputs),
        Ok(converged) => converged,
        Err(e) => {
            resolver.reject(OutputError::failed(format!("{e:#}")));
            return NodeOutcome::failed(name, &e);
        }
    };
    resolver.resolve(outputs.clone());

    let now = Utc::now();
    let record = ResourceRecord {
        resource_type: provider.resource_type().to_string(),
        id,
        inputs,
        outputs,
        parent,
        depends_on: depends_on.into_iter().collect(),
        protect,
        created_at: now,
        updated_at: match (&result, previous) {
            (ApplyResult::NoChange, Some(previous)) => previous.updated_at,
            _ => now,
        },
    };

    NodeOutcome {
        name,
        result,
        record: RecordChange::Put(record),
    }
}

/// Run the provider call that moves `previous` to `inputs`.
///
/// `protect` is the declared flag: a resource that is no longer declared
/// protected may be replaced even though its record still says protected.
fn converge(
    name: &str,
    provider: &dyn ErasedProvider,
    registry: &ProviderRegistry,
    previous: Option<&ResourceRecord>,
    inputs: &Value,
    protect: bool,
) -> Result<(ApplyResult, String, Value)> {
    let Some(previous) = previous else {
        log::debug!("{name}: create");
        let (id, outputs) = provider.create(inputs)?;
        return Ok((ApplyResult::Created, id, outputs));
    };

    if previous.resource_type != provider.resource_type() {
        if protect {
            anyhow::bail!("'{name}' is protected and cannot change type");
        }
        log::debug!(
            "{name}: type changed from {} to {}",
            previous.resource_type,
            provider.resource_type()
        );
        let old = registry
            .get(&previous.resource_type)
            .with_context(|| format!("no provider for recorded type {}", previous.resource_type))?;
        old.delete(&previous.id, &previous.inputs, &previous.outputs)?;
        let (id, outputs) = provider.create(inputs)?;
        return Ok((ApplyResult::Replaced, id, outputs));
    }

    if previous.inputs == *inputs {
        return Ok((
            ApplyResult::NoChange,
            previous.id.clone(),
            previous.outputs.clone(),
        ));
    }

    let result = match strategy(provider, &previous.inputs, inputs) {
        UpdateStrategy::InPlace => ApplyResult::Modified,
        UpdateStrategy::Replace if protect => {
            anyhow::bail!("'{name}' is protected and cannot be replaced")
        }
        UpdateStrategy::Replace => ApplyResult::Replaced,
    };
    log::debug!("{name}: update ({result:?})");
    let (id, outputs) = provider.update(&previous.id, &previous.inputs, &previous.outputs, inputs)?;
    Ok((result, id, outputs))
}

fn delete_record(
    name: String,
    record: &ResourceRecord,
    protect: bool,
    registry: &ProviderRegistry,
    progress: &dyn ProgressCallback,
) -> NodeOutcome {
    progress.on_resource_start(&name, &format!("delete {} ({})", record.resource_type, record.id));
    if protect {
        let error = anyhow::anyhow!("'{name}' is protected and cannot be deleted");
        return NodeOutcome::failed(name, &error);
    }

    let removal = registry
        .get(&record.resource_type)
        .with_context(|| format!("no provider for recorded type {}", record.resource_type))
        .and_then(|provider| provider.delete(&record.id, &record.inputs, &record.outputs));

    match removal {
        Ok(Removal::Removed) => NodeOutcome {
            name,
            result: ApplyResult::Removed,
            record: RecordChange::Remove,
        },
        Ok(Removal::AlreadyAbsent) => {
            log::debug!("{name}: already absent");
            NodeOutcome {
                name,
                result: ApplyResult::Removed,
                record: RecordChange::Remove,
            }
        }
        Ok(Removal::Retained { reason }) => NodeOutcome {
            name,
            result: ApplyResult::skipped(format!("left in place: {reason}")),
            record: RecordChange::Remove,
        },
        Err(e) => NodeOutcome::failed(name, &e),
    }
}
