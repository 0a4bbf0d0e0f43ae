//! Planned changes and their summary

use serde::{Deserialize, Serialize};
use std::fmt;

/// What apply would do to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Change {
    /// Declared but not recorded
    Create,
    /// Inputs changed; the provider converges in place
    Update,
    /// Inputs or type changed; the resource is deleted and created again
    Replace,
    /// Declared inputs match the recorded ones
    NoChange,
    /// Inputs depend on a resource that will change, so drift is only known during apply
    Unknown,
    /// Recorded but no longer declared
    Delete,
}

impl Change {
    pub fn is_change(self) -> bool {
        !matches!(self, Self::NoChange)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "±",
            Self::NoChange => "○",
            Self::Unknown => "?",
            Self::Delete => "-",
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::NoChange => "no change",
            Self::Unknown => "unknown",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// One line of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub name: String,
    pub resource_type: String,
    pub description: String,
    pub change: Change,
    /// Protected resources refuse replacement and deletion
    pub protect: bool,
}

impl PlannedChange {
    /// Whether apply will refuse this change.
    pub fn is_blocked(&self) -> bool {
        self.protect && matches!(self.change, Change::Replace | Change::Delete)
    }
}

/// The changes apply or destroy would make, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub stack: String,
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.change.is_change())
    }

    /// Changes other than no-change
    pub fn pending(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.change.is_change())
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_changes(&self.changes)
    }

    pub fn get(&self, name: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.name == name)
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub unknown: usize,
    pub unchanged: usize,
    /// Changes refused because the resource is protected
    pub blocked: usize,
}

impl DiffSummary {
    pub fn from_changes(changes: &[PlannedChange]) -> Self {
        let mut summary = Self::default();
        for planned in changes {
            match planned.change {
                Change::Create => summary.creates += 1,
                Change::Update => summary.updates += 1,
                Change::Replace => summary.replaces += 1,
                Change::Delete => summary.deletes += 1,
                Change::Unknown => summary.unknown += 1,
                Change::NoChange => summary.unchanged += 1,
            }
            if planned.is_blocked() {
                summary.blocked += 1;
            }
        }
        summary
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.creates + self.updates + self.replaces + self.deletes + self.unknown > 0
    }
}
