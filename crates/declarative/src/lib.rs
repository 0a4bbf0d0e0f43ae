//! # Declarative
//!
//! A framework for declaring side-effecting resources as a dependency graph.
//!
//! ## Core Concepts
//!
//! - **Provider**: the create/update/delete contract for one kind of remote effect
//! - **Stack**: the set of declared resources, each a provider bound to inputs
//! - **Resource**: the declarative handle; its outputs are an [`Output`] that
//!   resolves once the provider has run
//! - **Output**: a deferred value with `map`/`then` continuations; outputs
//!   consumed as inputs become dependency edges
//! - **Engine**: [`preview`], [`apply`] and [`destroy`] against a [`StateStore`]
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{apply, ExecuteOptions, JsonStateStore, NoProgress, ResourceOptions, Stack};
//!
//! let mut stack = Stack::new("lab");
//! let vm = stack.register("vm-start", &vm_start, inputs, ResourceOptions::new())?;
//! let ip_inputs = vm.output(|started| IpInputs { vmid: started.vmid, ..base });
//! stack.register("vm-ip", &ip_discovery, ip_inputs, ResourceOptions::new().parent(&vm))?;
//!
//! let store = JsonStateStore::new("lab", "state/lab.json");
//! let summary = apply(stack, &store, &ExecuteOptions::default(), &NoProgress)?;
//! ```
//!
//! ## Callbacks
//!
//! - [`ProgressCallback`]: receives progress updates from worker threads
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks.

pub mod context;
pub mod diff;
pub mod executor;
pub mod graph;
pub mod output;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{Change, DiffSummary, Plan, PlannedChange};
pub use executor::{apply, destroy};
pub use graph::{GraphError, ResourceGraph};
pub use output::{Outcome, Output, OutputError, Resolver};
pub use planner::{preview, preview_destroy};
pub use provider::{Created, ErasedProvider, Provider, ProviderRegistry, Removal, UpdateStrategy};
pub use resource::{Resource, ResourceHandle, ResourceOptions, Stack};
pub use state::{
    JsonStateStore, MemoryStateStore, ResourceRecord, STATE_VERSION, StackState, StateStore,
    write_private,
};
pub use types::{ApplyResult, ExecuteOptions, ExecuteSummary};
