//! Recorded state: what was created, with which inputs, and what it returned.

use crate::graph::ResourceGraph;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// State Structures
// ============================================================================

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// One applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: String,
    /// Identifier returned by the provider's create.
    pub id: String,
    pub inputs: Value,
    pub outputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub protect: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All recorded resources of one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub version: u32,
    pub stack: String,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    pub last_updated: DateTime<Utc>,
}

impl StackState {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            stack: stack.into(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Insert or replace a record, keeping the original creation time on replace.
    pub fn put(&mut self, name: &str, mut record: ResourceRecord) {
        if let Some(existing) = self.resources.get(name)
            && existing.id == record.id
        {
            record.created_at = existing.created_at;
        }
        self.resources.insert(name.to_string(), record);
        self.last_updated = Utc::now();
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceRecord> {
        let removed = self.resources.remove(name);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Dependency graph of the recorded resources.
    ///
    /// Edges to resources that are no longer recorded are dropped.
    pub fn graph(&self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();
        for (name, record) in &self.resources {
            graph.add(name, record.parent.as_deref(), record.depends_on.iter().cloned())?;
        }
        graph.prune_unknown();
        graph.validate()?;
        Ok(graph)
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Where stack state is loaded from and saved to.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<StackState>;
    fn save(&self, state: &StackState) -> Result<()>;
}

/// State kept in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    stack: String,
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(stack: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            stack: stack.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    /// Load state from disk, or return an empty state if the file doesn't exist.
    fn load(&self) -> Result<StackState> {
        if !self.path.exists() {
            log::debug!("State file {} does not exist, starting empty", self.path.display());
            return Ok(StackState::new(&self.stack));
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let state: StackState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        if state.version > STATE_VERSION {
            anyhow::bail!(
                "State file {} has version {}, newer than supported {}",
                self.path.display(),
                state.version,
                STATE_VERSION
            );
        }
        if state.stack != self.stack {
            anyhow::bail!(
                "State file {} belongs to stack '{}', not '{}'",
                self.path.display(),
                state.stack,
                self.stack
            );
        }

        log::debug!("Loaded {} resources from {}", state.resources.len(), self.path.display());
        Ok(state)
    }

    /// Save state to disk, readable only by the owner since outputs may hold secrets.
    fn save(&self, state: &StackState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        write_private(&self.path, &content)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        log::debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

/// Replace `path` with `content`, readable only by the owner.
pub fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(content.as_bytes())
    }
    #[cfg(not(unix))]
    {
        fs::write(path, content)
    }
}

/// State kept in memory; clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    state: Arc<Mutex<StackState>>,
}

impl MemoryStateStore {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StackState::new(stack))),
        }
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> StackState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StackState> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &StackState) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, parent: Option<&str>) -> ResourceRecord {
        let now = Utc::now();
        ResourceRecord {
            resource_type: "test".into(),
            id: id.into(),
            inputs: json!({}),
            outputs: json!({}),
            parent: parent.map(str::to_string),
            depends_on: vec![],
            protect: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new("lab", dir.path().join("state/lab.json"));

        let mut state = store.load().unwrap();
        assert!(state.resources.is_empty());

        state.put("vm", record("501", None));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("vm").unwrap().id, "501");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_json_store_rejects_other_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        JsonStateStore::new("lab", &path)
            .save(&StackState::new("lab"))
            .unwrap();

        let err = JsonStateStore::new("prod", &path).load().unwrap_err();
        assert!(err.to_string().contains("belongs to stack 'lab'"));
    }

    #[test]
    fn test_put_keeps_creation_time() {
        let mut state = StackState::new("lab");
        let first = record("501", None);
        let created = first.created_at;
        state.put("vm", first);

        let mut second = record("501", None);
        second.created_at = created + chrono::Duration::seconds(60);
        state.put("vm", second);
        assert_eq!(state.get("vm").unwrap().created_at, created);
    }

    #[test]
    fn test_graph_prunes_missing_parents() {
        let mut state = StackState::new("lab");
        state.put("child", record("c", Some("gone")));
        state.put("other", record("o", Some("child")));
        let graph = state.graph().unwrap();
        assert_eq!(
            graph.teardown_levels().unwrap(),
            vec![vec!["other".to_string()], vec!["child".to_string()]]
        );
    }
}
