//! Files placed on remote hosts.

use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal, UpdateStrategy};
use remote::{Effector, FileMode, RemoteFile, SshConnection, upload_content};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveFileInputs {
    pub connection: SshConnection,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub mode: FileMode,
    #[serde(default)]
    pub use_sudo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFileOutputs {
    pub path: String,
}

/// Uploads text content with a validated permission mode.
pub struct SaveFileProvider {
    effector: Arc<dyn Effector>,
}

impl SaveFileProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }
}

impl Provider for SaveFileProvider {
    type Inputs = SaveFileInputs;
    type Outputs = SaveFileOutputs;

    fn resource_type(&self) -> &'static str {
        "host:file"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("{}:{} ({})", inputs.connection.host, inputs.path, inputs.mode)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let mut session = self.effector.connect(&inputs.connection)?;
        upload_content(
            session.as_mut(),
            &inputs.content,
            &inputs.path,
            inputs.mode.as_str(),
            inputs.use_sudo,
        )
        .with_context(|| format!("Failed to write {} on {}", inputs.path, inputs.connection.host))?;
        Ok(Created::new(
            format!("{}:{}", inputs.connection.host, inputs.path),
            SaveFileOutputs {
                path: inputs.path.clone(),
            },
        ))
    }

    /// Rewriting the same file in place is safe: the upload replaces it.
    fn update_strategy(&self, old: &Self::Inputs, new: &Self::Inputs) -> UpdateStrategy {
        if old.connection == new.connection && old.path == new.path {
            UpdateStrategy::InPlace
        } else {
            UpdateStrategy::Replace
        }
    }

    fn update(
        &self,
        id: &str,
        old: &Self::Inputs,
        old_outputs: &Self::Outputs,
        new: &Self::Inputs,
    ) -> Result<Created<Self::Outputs>> {
        if self.update_strategy(old, new) == UpdateStrategy::Replace {
            self.delete(id, old, old_outputs)?;
        }
        self.create(new)
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        let file = RemoteFile {
            path: inputs.path.clone(),
            content: String::new(),
            mode: inputs.mode.clone(),
            use_sudo: inputs.use_sudo,
        };
        self.effector.run(&inputs.connection, &file.remove_command())?;
        Ok(Removal::Removed)
    }
}
