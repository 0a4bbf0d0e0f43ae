//! Deferred values.
//!
//! An [`Output`] is a value that may not be known yet: a resource's outputs
//! exist only after its provider has run, and anything derived from them is
//! expressed as a continuation with [`Output::map`] or [`Output::then`].
//! Continuations run on whichever thread settles the value, so registering
//! one never blocks the caller.
//!
//! Every output also remembers which resources it was derived from. The
//! engine turns that set into dependency edges, so a resource consuming
//! another resource's outputs is never started before its producer.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Why an output has no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OutputError {
    message: Arc<str>,
    unknown: bool,
}

impl OutputError {
    /// The producer failed.
    pub fn failed(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string().into(),
            unknown: false,
        }
    }

    /// The value will only be known once changes are applied.
    pub fn unknown() -> Self {
        Self {
            message: "known after apply".into(),
            unknown: true,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.unknown
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Settled state of an output.
pub type Outcome<T> = Result<T, OutputError>;

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum Slot<T> {
    Pending(Vec<Continuation<T>>),
    Settled(Outcome<T>),
}

struct Cell<T> {
    slot: Mutex<Slot<T>>,
    settled: Condvar,
}

impl<T> Cell<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A value that becomes available later.
pub struct Output<T> {
    cell: Arc<Cell<T>>,
    sources: Arc<BTreeSet<String>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            sources: Arc::clone(&self.sources),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.cell.lock() {
            Slot::Pending(_) => "pending",
            Slot::Settled(Ok(_)) => "resolved",
            Slot::Settled(Err(_)) => "failed",
        };
        f.debug_struct("Output")
            .field("state", &state)
            .field("sources", &self.sources)
            .finish()
    }
}

/// Settles a pending [`Output`].
///
/// Dropping a resolver without settling it fails the output, so waiters
/// are never left hanging.
pub struct Resolver<T: Clone> {
    cell: Option<Arc<Cell<T>>>,
}

impl<T: Clone> Resolver<T> {
    /// Settle with a value.
    pub fn resolve(mut self, value: T) {
        self.settle(Ok(value));
    }

    /// Settle with a failure.
    pub fn reject(mut self, error: OutputError) {
        self.settle(Err(error));
    }

    fn settle(&mut self, outcome: Outcome<T>) {
        let Some(cell) = self.cell.take() else {
            return;
        };
        let continuations = {
            let mut slot = cell.lock();
            match std::mem::replace(&mut *slot, Slot::Settled(outcome.clone())) {
                Slot::Pending(continuations) => continuations,
                Slot::Settled(previous) => {
                    *slot = Slot::Settled(previous);
                    Vec::new()
                }
            }
        };
        cell.settled.notify_all();
        for continuation in continuations {
            continuation(&outcome);
        }
    }
}

impl<T: Clone> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.cell.is_some() {
            self.settle(Err(OutputError::failed("producer finished without a value")));
        }
    }
}

impl<T: Clone + Send + 'static> Output<T> {
    fn with_slot(slot: Slot<T>, sources: BTreeSet<String>) -> Self {
        Self {
            cell: Arc::new(Cell {
                slot: Mutex::new(slot),
                settled: Condvar::new(),
            }),
            sources: Arc::new(sources),
        }
    }

    /// An output that is already known.
    pub fn known(value: T) -> Self {
        Self::with_slot(Slot::Settled(Ok(value)), BTreeSet::new())
    }

    /// An output that has already failed.
    pub fn failed(error: OutputError) -> Self {
        Self::with_slot(Slot::Settled(Err(error)), BTreeSet::new())
    }

    /// A pending output and the resolver that settles it.
    pub fn pending() -> (Self, Resolver<T>) {
        let output = Self::with_slot(Slot::Pending(Vec::new()), BTreeSet::new());
        let resolver = Resolver {
            cell: Some(Arc::clone(&output.cell)),
        };
        (output, resolver)
    }

    /// Mark this output as derived from the named resource.
    pub fn from_resource(mut self, name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.sources).insert(name.into());
        self
    }

    /// Names of the resources this output was derived from.
    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    fn merged_sources(&self, other: &BTreeSet<String>) -> BTreeSet<String> {
        self.sources.union(other).cloned().collect()
    }

    /// The settled outcome, if any, without blocking.
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &*self.cell.lock() {
            Slot::Pending(_) => None,
            Slot::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }

    /// Block the current thread until the output settles or `timeout` passes.
    ///
    /// Only for code already running on a worker; everything else should use
    /// a continuation.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let slot = self.cell.lock();
        let (slot, _) = self
            .cell
            .settled
            .wait_timeout_while(slot, timeout, |s| matches!(s, Slot::Pending(_)))
            .unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Slot::Pending(_) => None,
            Slot::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Run `f` once the output settles (immediately if it already has).
    pub fn on_settled(&self, f: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let settled = {
            let mut slot = self.cell.lock();
            match &mut *slot {
                Slot::Pending(continuations) => {
                    continuations.push(Box::new(f));
                    return;
                }
                Slot::Settled(outcome) => outcome.clone(),
            }
        };
        f(&settled);
    }

    /// Derive a new output by transforming the value.
    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |v| Ok::<U, Infallible>(f(v)))
    }

    /// Derive a new output with a transformation that may fail.
    pub fn try_map<U, E, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + 'static,
        E: fmt::Display,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let (derived, resolver) = Output::pending();
        let derived = Output {
            sources: Arc::clone(&self.sources),
            ..derived
        };
        self.on_settled(move |outcome| match outcome {
            Ok(value) => match f(value.clone()) {
                Ok(mapped) => resolver.resolve(mapped),
                Err(e) => resolver.reject(OutputError::failed(e)),
            },
            Err(e) => resolver.reject(e.clone()),
        });
        derived
    }

    /// Chain a computation that itself produces an output.
    ///
    /// The result only records the sources of `self`; outputs returned by
    /// `f` must come from resources that are already dependencies.
    pub fn then<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Output<U> + Send + 'static,
    {
        let (derived, resolver) = Output::pending();
        let derived = Output {
            sources: Arc::clone(&self.sources),
            ..derived
        };
        self.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let inner = f(value.clone());
                inner.on_settled(move |inner_outcome| match inner_outcome {
                    Ok(v) => resolver.resolve(v.clone()),
                    Err(e) => resolver.reject(e.clone()),
                });
            }
            Err(e) => resolver.reject(e.clone()),
        });
        derived
    }

    /// Combine two outputs into a pair.
    pub fn zip<U>(&self, other: &Output<U>) -> Output<(T, U)>
    where
        U: Clone + Send + 'static,
    {
        let sources = self.merged_sources(&other.sources);
        let other = other.clone();
        let zipped = self.then(move |left| other.map(move |right| (left, right)));
        Output {
            sources: Arc::new(sources),
            ..zipped
        }
    }

    /// Combine many outputs into one, preserving order.
    pub fn all(outputs: Vec<Output<T>>) -> Output<Vec<T>> {
        let mut combined = Output::known(Vec::with_capacity(outputs.len()));
        for output in outputs {
            combined = combined.zip(&output).map(|(mut values, value)| {
                values.push(value);
                values
            });
        }
        combined
    }
}

impl<T: Clone + Send + 'static> From<T> for Output<T> {
    fn from(value: T) -> Self {
        Self::known(value)
    }
}

impl From<&str> for Output<String> {
    fn from(value: &str) -> Self {
        Self::known(value.to_string())
    }
}
