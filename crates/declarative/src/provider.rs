//! Provider contract.
//!
//! A provider turns declared inputs into a remote side effect. The engine
//! calls [`Provider::create`] once per logical resource, [`Provider::update`]
//! when declared inputs drift from the recorded ones, and
//! [`Provider::delete`] when the resource is no longer declared.
//!
//! Inputs and outputs are typed structs. They cross the state-file boundary
//! as JSON and are validated on the way back in, so providers should derive
//! `Deserialize` with `#[serde(deny_unknown_fields)]`.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result of a successful create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created<O> {
    /// Stable identifier of the remote object.
    pub id: String,
    pub outputs: O,
}

impl<O> Created<O> {
    pub fn new(id: impl Into<String>, outputs: O) -> Self {
        Self {
            id: id.into(),
            outputs,
        }
    }
}

/// What a delete actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The remote object was removed.
    Removed,
    /// The remote object was already gone.
    AlreadyAbsent,
    /// The provider has no delete action; the remote effect stays in place.
    Retained { reason: String },
}

impl Removal {
    /// Inert delete with the given reason.
    pub fn retained(reason: impl Into<String>) -> Self {
        Self::Retained {
            reason: reason.into(),
        }
    }
}

/// How a provider converges on changed inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Modify the remote object without destroying it.
    InPlace,
    /// Delete the old object, then create a new one.
    Replace,
}

/// The polymorphic interface every provisioning action implements.
pub trait Provider: Send + Sync + 'static {
    type Inputs: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Outputs: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static;

    /// Type token recorded in state, e.g. `proxmox:vm-start`.
    fn resource_type(&self) -> &'static str;

    /// Human-readable description of one resource.
    fn describe(&self, inputs: &Self::Inputs) -> String {
        let _ = inputs;
        self.resource_type().to_string()
    }

    /// Perform the remote mutation and return an identifier plus outputs.
    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>>;

    /// How [`Provider::update`] will converge from `old` to `new`.
    fn update_strategy(&self, old: &Self::Inputs, new: &Self::Inputs) -> UpdateStrategy {
        let _ = (old, new);
        UpdateStrategy::Replace
    }

    /// Converge an existing resource on new inputs.
    ///
    /// The default deletes the old resource and creates a new one. This is
    /// convergence by destroy-and-recreate, not in-place mutation; providers
    /// that can do better override this together with
    /// [`Provider::update_strategy`].
    fn update(
        &self,
        id: &str,
        old: &Self::Inputs,
        old_outputs: &Self::Outputs,
        new: &Self::Inputs,
    ) -> Result<Created<Self::Outputs>> {
        self.delete(id, old, old_outputs)?;
        self.create(new)
    }

    /// Remove the remote object.
    ///
    /// Must succeed when the object is already gone.
    fn delete(&self, id: &str, inputs: &Self::Inputs, outputs: &Self::Outputs) -> Result<Removal>;
}

/// A provider with inputs and outputs erased to JSON.
pub trait ErasedProvider: Send + Sync {
    fn resource_type(&self) -> &'static str;
    fn describe(&self, inputs: &Value) -> String;
    fn create(&self, inputs: &Value) -> Result<(String, Value)>;
    fn update_strategy(&self, old: &Value, new: &Value) -> Result<UpdateStrategy>;
    fn update(&self, id: &str, old: &Value, old_outputs: &Value, new: &Value) -> Result<(String, Value)>;
    fn delete(&self, id: &str, inputs: &Value, outputs: &Value) -> Result<Removal>;
}

struct Erased<P>(Arc<P>);

impl<P: Provider> Erased<P> {
    fn inputs(&self, value: &Value) -> Result<P::Inputs> {
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid inputs for {}", self.0.resource_type()))
    }

    fn outputs(&self, value: &Value) -> Result<P::Outputs> {
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid recorded outputs for {}", self.0.resource_type()))
    }

    fn erase(created: Created<P::Outputs>) -> Result<(String, Value)> {
        Ok((created.id, serde_json::to_value(created.outputs)?))
    }
}

impl<P: Provider> ErasedProvider for Erased<P> {
    fn resource_type(&self) -> &'static str {
        self.0.resource_type()
    }

    fn describe(&self, inputs: &Value) -> String {
        match self.inputs(inputs) {
            Ok(inputs) => self.0.describe(&inputs),
            Err(_) => self.0.resource_type().to_string(),
        }
    }

    fn create(&self, inputs: &Value) -> Result<(String, Value)> {
        let inputs = self.inputs(inputs)?;
        Self::erase(self.0.create(&inputs)?)
    }

    fn update_strategy(&self, old: &Value, new: &Value) -> Result<UpdateStrategy> {
        Ok(self.0.update_strategy(&self.inputs(old)?, &self.inputs(new)?))
    }

    fn update(&self, id: &str, old: &Value, old_outputs: &Value, new: &Value) -> Result<(String, Value)> {
        let old = self.inputs(old)?;
        let old_outputs = self.outputs(old_outputs)?;
        let new = self.inputs(new)?;
        Self::erase(self.0.update(id, &old, &old_outputs, &new)?)
    }

    fn delete(&self, id: &str, inputs: &Value, outputs: &Value) -> Result<Removal> {
        self.0.delete(id, &self.inputs(inputs)?, &self.outputs(outputs)?)
    }
}

/// Providers by resource type, used to act on recorded state.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn ErasedProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; the first registration for a type wins.
    pub fn register<P: Provider>(&mut self, provider: Arc<P>) -> Arc<dyn ErasedProvider> {
        let resource_type = provider.resource_type();
        Arc::clone(
            self.providers
                .entry(resource_type)
                .or_insert_with(|| Arc::new(Erased(provider))),
        )
    }

    /// Look up the provider for a recorded resource type.
    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn ErasedProvider>> {
        self.providers.get(resource_type).cloned()
    }

    /// Registered resource types, sorted.
    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.providers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Inputs {
        name: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Outputs {
        greeting: String,
    }

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl Provider for Recording {
        type Inputs = Inputs;
        type Outputs = Outputs;

        fn resource_type(&self) -> &'static str {
            "test:greeting"
        }

        fn create(&self, inputs: &Inputs) -> Result<Created<Outputs>> {
            self.calls.lock().unwrap().push(format!("create {}", inputs.name));
            Ok(Created::new(
                inputs.name.clone(),
                Outputs {
                    greeting: format!("hello {}", inputs.name),
                },
            ))
        }

        fn delete(&self, id: &str, _: &Inputs, _: &Outputs) -> Result<Removal> {
            self.calls.lock().unwrap().push(format!("delete {id}"));
            Ok(Removal::Removed)
        }
    }

    #[test]
    fn test_default_update_deletes_before_create() {
        let provider = Recording::default();
        let old = Inputs { name: "a".into() };
        let outputs = provider.create(&old).unwrap().outputs;
        let new = Inputs { name: "b".into() };

        let updated = provider.update("a", &old, &outputs, &new).unwrap();
        assert_eq!(updated.id, "b");
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec!["create a", "delete a", "create b"]
        );
        assert_eq!(provider.update_strategy(&old, &new), UpdateStrategy::Replace);
    }

    #[test]
    fn test_erased_rejects_unknown_keys() {
        let mut registry = ProviderRegistry::new();
        let erased = registry.register(Arc::new(Recording::default()));

        let err = erased
            .create(&serde_json::json!({"name": "a", "extra": true}))
            .unwrap_err();
        assert!(err.to_string().contains("invalid inputs for test:greeting"));

        let err = erased.create(&serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("invalid inputs"));
    }

    #[test]
    fn test_erased_round_trip() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Recording::default()));
        let erased = registry.get("test:greeting").unwrap();

        let (id, outputs) = erased.create(&serde_json::json!({"name": "pve"})).unwrap();
        assert_eq!(id, "pve");
        assert_eq!(outputs["greeting"], "hello pve");
        assert_eq!(registry.types(), vec!["test:greeting"]);
    }
}
