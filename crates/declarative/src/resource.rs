//! Resource wrapper and the stack that collects declared resources.
//!
//! Registering a resource binds a provider to declared inputs and hands
//! back a [`Resource`] whose outputs are deferred until the engine has run
//! the provider. Dependents consume those outputs through continuations.

use crate::graph::ResourceGraph;
use crate::output::{Output, Resolver};
use crate::provider::{ErasedProvider, Provider, ProviderRegistry};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Anything that names a registered resource.
pub trait ResourceHandle {
    fn name(&self) -> &str;
}

/// Ordering and lifecycle options for one resource.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    /// Lifecycle owner: created before, deleted after this resource.
    pub parent: Option<String>,
    /// Pure ordering: created before this resource, deleted after it.
    pub depends_on: BTreeSet<String>,
    /// Refuse to delete or replace this resource.
    pub protect: bool,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, parent: &impl ResourceHandle) -> Self {
        self.parent = Some(parent.name().to_string());
        self
    }

    pub fn depends_on(mut self, dependency: &impl ResourceHandle) -> Self {
        self.depends_on.insert(dependency.name().to_string());
        self
    }

    pub fn depends_on_all<'a, H: ResourceHandle + 'a>(
        mut self,
        dependencies: impl IntoIterator<Item = &'a H>,
    ) -> Self {
        self.depends_on
            .extend(dependencies.into_iter().map(|d| d.name().to_string()));
        self
    }

    pub fn protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }
}

/// Declarative handle to a registered resource.
pub struct Resource<O> {
    name: String,
    resource_type: &'static str,
    outputs: Output<O>,
}

impl<O> Clone for Resource<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            resource_type: self.resource_type,
            outputs: self.outputs.clone(),
        }
    }
}

impl<O> fmt::Debug for Resource<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("resource_type", &self.resource_type)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl<O: Clone + Send + 'static> Resource<O> {
    pub fn resource_type(&self) -> &'static str {
        self.resource_type
    }

    /// Outputs, available once the provider has run.
    pub fn outputs(&self) -> &Output<O> {
        &self.outputs
    }

    /// Derive a value from the outputs.
    pub fn output<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(O) -> U + Send + 'static,
    {
        self.outputs.map(f)
    }
}

impl<O> ResourceHandle for Resource<O> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl ResourceHandle for str {
    fn name(&self) -> &str {
        self
    }
}

impl ResourceHandle for String {
    fn name(&self) -> &str {
        self
    }
}

/// A registered resource as the engine sees it.
pub struct Node {
    pub name: String,
    pub provider: Arc<dyn ErasedProvider>,
    pub inputs: Output<Value>,
    pub parent: Option<String>,
    /// Explicit dependencies plus every resource the inputs derive from.
    pub depends_on: BTreeSet<String>,
    pub protect: bool,
    pub(crate) resolver: Resolver<Value>,
}

impl Node {
    pub fn resource_type(&self) -> &'static str {
        self.provider.resource_type()
    }
}

/// A declared set of resources, ready to be previewed, applied or destroyed.
pub struct Stack {
    name: String,
    registry: ProviderRegistry,
    nodes: Vec<Node>,
    graph: ResourceGraph,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: ProviderRegistry::new(),
            nodes: Vec::new(),
            graph: ResourceGraph::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make a provider available for recorded resources even if nothing declares it.
    pub fn add_provider<P: Provider>(&mut self, provider: &Arc<P>) {
        self.registry.register(Arc::clone(provider));
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Declare a resource.
    ///
    /// Fails at once on a duplicate name or a reference to an undeclared
    /// parent or dependency, so mistakes surface before anything runs.
    pub fn register<P: Provider>(
        &mut self,
        name: impl Into<String>,
        provider: &Arc<P>,
        inputs: impl Into<Output<P::Inputs>>,
        options: ResourceOptions,
    ) -> Result<Resource<P::Outputs>> {
        let name = name.into();
        let inputs: Output<P::Inputs> = inputs.into();

        let mut depends_on = options.depends_on;
        depends_on.extend(inputs.sources().iter().cloned());
        for reference in options.parent.iter().chain(depends_on.iter()) {
            if !self.graph.contains(reference) {
                anyhow::bail!(
                    "resource '{name}' references '{reference}', which is not declared before it"
                );
            }
        }
        self.graph
            .add(&name, options.parent.as_deref(), depends_on.iter().cloned())?;

        let provider = self.registry.register(Arc::clone(provider));
        let resource_type = provider.resource_type();
        let inputs = inputs.try_map(serde_json::to_value);

        let (raw_outputs, resolver) = Output::<Value>::pending();
        let raw_outputs = raw_outputs.from_resource(&name);
        let outputs = raw_outputs.try_map(serde_json::from_value::<P::Outputs>);

        log::debug!("registered {resource_type} '{name}'");
        self.nodes.push(Node {
            name: name.clone(),
            provider,
            inputs,
            parent: options.parent,
            depends_on,
            protect: options.protect,
            resolver,
        });

        Ok(Resource {
            name,
            resource_type,
            outputs,
        })
    }

    /// Dependency graph of the declared resources.
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn into_parts(self) -> (String, ProviderRegistry, Vec<Node>, ResourceGraph) {
        (self.name, self.registry, self.nodes, self.graph)
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("name", &self.name)
            .field("resources", &self.nodes.iter().map(|n| &n.name).collect::<Vec<_>>())
            .finish()
    }
}
