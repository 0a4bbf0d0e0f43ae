//! Dependency graph of resources.
//!
//! Built once from declared (or recorded) resources, then validated.
//! `parent` and `depends_on` both mean "do not create me before them";
//! teardown runs in the opposite order, so children and dependents are
//! deleted before what they rely on.

use std::collections::{BTreeMap, BTreeSet};

/// Graph construction and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("resource '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("resource '{from}' references unknown {relation} '{to}'")]
    UnknownReference {
        from: String,
        to: String,
        relation: &'static str,
    },

    #[error("dependency cycle between: {}", members.join(", "))]
    Cycle { members: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Edges {
    parent: Option<String>,
    depends_on: BTreeSet<String>,
}

impl Edges {
    fn prerequisites(&self) -> impl Iterator<Item = &String> {
        self.parent.iter().chain(self.depends_on.iter())
    }
}

/// A directed acyclic graph of resource names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, Edges>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its parent and explicit dependencies.
    pub fn add<I, S>(&mut self, name: &str, parent: Option<&str>, depends_on: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.nodes.contains_key(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        let mut depends_on: BTreeSet<String> = depends_on.into_iter().map(Into::into).collect();
        depends_on.remove(name);
        self.nodes.insert(
            name.to_string(),
            Edges {
                parent: parent.map(str::to_string),
                depends_on,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop edges that point at nodes not in the graph.
    ///
    /// Used for recorded state, where a dependency may already be gone.
    pub fn prune_unknown(&mut self) {
        let names: BTreeSet<String> = self.nodes.keys().cloned().collect();
        for edges in self.nodes.values_mut() {
            if edges.parent.as_ref().is_some_and(|p| !names.contains(p)) {
                edges.parent = None;
            }
            edges.depends_on.retain(|d| names.contains(d));
        }
    }

    /// Check that every reference resolves and there are no cycles.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (name, edges) in &self.nodes {
            if let Some(parent) = &edges.parent
                && !self.nodes.contains_key(parent)
            {
                return Err(GraphError::UnknownReference {
                    from: name.clone(),
                    to: parent.clone(),
                    relation: "parent",
                });
            }
            if let Some(dep) = edges.depends_on.iter().find(|d| !self.nodes.contains_key(*d)) {
                return Err(GraphError::UnknownReference {
                    from: name.clone(),
                    to: dep.clone(),
                    relation: "dependency",
                });
            }
        }
        self.levels().map(|_| ())
    }

    /// Group nodes into levels: every node's prerequisites are in earlier levels.
    ///
    /// Nodes within a level are independent and may run concurrently.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .nodes
            .iter()
            .map(|(name, edges)| {
                let prereqs = edges
                    .prerequisites()
                    .map(String::as_str)
                    .filter(|p| self.nodes.contains_key(*p))
                    .collect();
                (name.as_str(), prereqs)
            })
            .collect();

        let mut levels = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, prereqs)| prereqs.is_empty())
                .map(|(name, _)| *name)
                .collect();

            if ready.is_empty() {
                return Err(GraphError::Cycle {
                    members: remaining.keys().map(|s| (*s).to_string()).collect(),
                });
            }

            for name in &ready {
                remaining.remove(name);
            }
            for prereqs in remaining.values_mut() {
                for name in &ready {
                    prereqs.remove(name);
                }
            }
            levels.push(ready.into_iter().map(str::to_string).collect());
        }
        Ok(levels)
    }

    /// Levels for deletion: dependents before the things they depend on.
    pub fn teardown_levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut levels = self.levels()?;
        levels.reverse();
        Ok(levels)
    }

    /// Every node that transitively depends on `name`.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for (candidate, edges) in &self.nodes {
                if edges.prerequisites().any(|p| *p == current) && found.insert(candidate.clone()) {
                    frontier.push(candidate.clone());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, Option<&str>, &[&str])]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for (name, parent, deps) in edges {
            g.add(name, *parent, deps.iter().copied()).unwrap();
        }
        g
    }

    #[test]
    fn test_levels_respect_parent_and_depends_on() {
        let g = graph(&[
            ("vm", None, &["iso"]),
            ("iso", None, &[]),
            ("start", Some("vm"), &[]),
            ("ip", None, &["start"]),
            ("other-vm", None, &[]),
        ]);
        g.validate().unwrap();
        assert_eq!(
            g.levels().unwrap(),
            vec![
                vec!["iso".to_string(), "other-vm".to_string()],
                vec!["vm".to_string()],
                vec!["start".to_string()],
                vec!["ip".to_string()],
            ]
        );
    }

    #[test]
    fn test_teardown_deletes_children_first() {
        let g = graph(&[("base", None, &[]), ("child", Some("base"), &[])]);
        assert_eq!(
            g.teardown_levels().unwrap(),
            vec![vec!["child".to_string()], vec!["base".to_string()]]
        );
    }

    #[test]
    fn test_duplicate_name() {
        let mut g = ResourceGraph::new();
        g.add("a", None, Vec::<String>::new()).unwrap();
        assert_eq!(
            g.add("a", None, Vec::<String>::new()),
            Err(GraphError::DuplicateName("a".to_string()))
        );
    }

    #[test]
    fn test_unknown_reference() {
        let g = graph(&[("a", Some("ghost"), &[])]);
        assert!(matches!(
            g.validate(),
            Err(GraphError::UnknownReference { relation: "parent", .. })
        ));

        let mut g = graph(&[("a", None, &["ghost"])]);
        assert!(matches!(
            g.validate(),
            Err(GraphError::UnknownReference { relation: "dependency", .. })
        ));
        g.prune_unknown();
        g.validate().unwrap();
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(&[("a", None, &["b"]), ("b", None, &["c"]), ("c", Some("a"), &[]), ("d", None, &[])]);
        match g.validate() {
            Err(GraphError::Cycle { members }) => assert_eq!(members, vec!["a", "b", "c"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dependents_of() {
        let g = graph(&[
            ("a", None, &[]),
            ("b", Some("a"), &[]),
            ("c", None, &["b"]),
            ("d", None, &[]),
        ]);
        let deps: Vec<_> = g.dependents_of("a").into_iter().collect();
        assert_eq!(deps, vec!["b", "c"]);
    }
}
