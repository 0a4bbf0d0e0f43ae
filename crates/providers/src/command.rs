//! Command composition.
//!
//! A resource's create, update and delete bodies are each one shell string
//! built from ordered fragments. Fragments may be deferred (an IP address
//! that is only known after a VM boots), so composition happens inside an
//! [`Output`] continuation.

use declarative::Output;
use remote::shell;
use serde::{Deserialize, Serialize};

/// Join fragments with `&&`, in order, once all of them are known.
///
/// With `use_sudo` every fragment gets its own `sudo` prefix: privilege does
/// not carry across `&&` for a non-root login.
pub fn compose<I, F>(fragments: I, use_sudo: bool) -> Output<String>
where
    I: IntoIterator<Item = F>,
    F: Into<Output<String>>,
{
    let fragments: Vec<Output<String>> = fragments.into_iter().map(Into::into).collect();
    Output::all(fragments).map(move |parts| shell::chain(&parts, use_sudo))
}

/// Update body for an operation without an explicit one: delete, then create.
///
/// This converges by destroy-and-recreate rather than in-place mutation.
/// Both bodies already carry their privilege prefixes.
pub fn synthesize_update(create: &str, delete: &str) -> String {
    shell::chain(&[delete, create], false)
}

/// The shell bodies of one remote operation.
///
/// No `delete` means the operation cannot be undone; teardown records it as
/// left in place instead of running anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSet {
    pub create: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

impl CommandSet {
    pub fn new(create: impl Into<String>) -> Self {
        Self {
            create: create.into(),
            update: None,
            delete: None,
        }
    }

    pub fn with_update(mut self, update: impl Into<String>) -> Self {
        self.update = Some(update.into());
        self
    }

    pub fn with_delete(mut self, delete: impl Into<String>) -> Self {
        self.delete = Some(delete.into());
        self
    }

    /// Whether `update` was written by hand rather than synthesized.
    pub fn has_explicit_update(&self) -> bool {
        self.update.is_some()
    }

    /// The update body: explicit, else delete then create, else create alone.
    pub fn update_body(&self) -> String {
        self.update_from(self)
    }

    /// The body that converges `previous` on `self`.
    ///
    /// Without an explicit update, `previous` is deleted with its own delete
    /// body before `self` is created.
    pub fn update_from(&self, previous: &CommandSet) -> String {
        match (&self.update, &previous.delete) {
            (Some(update), _) => update.clone(),
            (None, Some(delete)) => synthesize_update(&self.create, delete),
            (None, None) => self.create.clone(),
        }
    }
}

/// Builds a [`CommandSet`] from possibly deferred fragments.
#[derive(Default)]
pub struct Commands {
    create: Vec<Output<String>>,
    update: Option<Vec<Output<String>>>,
    delete: Option<Vec<Output<String>>>,
    use_sudo: bool,
}

impl Commands {
    pub fn new(use_sudo: bool) -> Self {
        Self {
            use_sudo,
            ..Self::default()
        }
    }

    pub fn create<F: Into<Output<String>>>(mut self, fragment: F) -> Self {
        self.create.push(fragment.into());
        self
    }

    pub fn update<F: Into<Output<String>>>(mut self, fragment: F) -> Self {
        self.update.get_or_insert_with(Vec::new).push(fragment.into());
        self
    }

    pub fn delete<F: Into<Output<String>>>(mut self, fragment: F) -> Self {
        self.delete.get_or_insert_with(Vec::new).push(fragment.into());
        self
    }

    /// Compose every body; resolves once all fragments are known.
    pub fn build(self) -> Output<CommandSet> {
        let use_sudo = self.use_sudo;
        let optional = |body: Option<Vec<Output<String>>>| match body {
            Some(fragments) => compose(fragments, use_sudo).map(Some),
            None => Output::known(None),
        };
        let create = compose(self.create, use_sudo);
        let update = optional(self.update);
        let delete = optional(self.delete);
        create
            .zip(&update)
            .zip(&delete)
            .map(|((create, update), delete)| CommandSet {
                create,
                update,
                delete,
            })
    }
}
