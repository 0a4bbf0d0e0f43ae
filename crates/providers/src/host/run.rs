//! Arbitrary remote commands as resources.

use crate::command::CommandSet;
use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal, UpdateStrategy};
use remote::{CommandOutput, Effector, SshConnection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteCommandInputs {
    pub connection: SshConnection,
    pub commands: CommandSet,
    /// Any change here re-runs the update body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommandOutputs {
    pub stdout: String,
    pub stderr: String,
}

impl From<CommandOutput> for RemoteCommandOutputs {
    fn from(out: CommandOutput) -> Self {
        Self {
            stdout: out.stdout,
            stderr: out.stderr,
        }
    }
}

/// Runs one composed command per lifecycle step over SSH.
pub struct RemoteCommandProvider {
    effector: Arc<dyn Effector>,
}

impl RemoteCommandProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }

    fn run(&self, connection: &SshConnection, command: &str) -> Result<RemoteCommandOutputs> {
        let out = self
            .effector
            .run(connection, command)
            .with_context(|| format!("command failed on {}", connection.host))?;
        Ok(out.into())
    }
}

/// Stable id for a command on a host.
pub(crate) fn command_id(host: &str, command: &str) -> String {
    let hash = blake3::hash(command.as_bytes()).to_hex();
    format!("{host}:{}", &hash[..12])
}

impl Provider for RemoteCommandProvider {
    type Inputs = RemoteCommandInputs;
    type Outputs = RemoteCommandOutputs;

    fn resource_type(&self) -> &'static str {
        "host:command"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("run on {}: {}", inputs.connection.host, inputs.commands.create)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let outputs = self.run(&inputs.connection, &inputs.commands.create)?;
        Ok(Created::new(
            command_id(&inputs.connection.host, &inputs.commands.create),
            outputs,
        ))
    }

    fn update_strategy(&self, old: &Self::Inputs, new: &Self::Inputs) -> UpdateStrategy {
        if old.connection == new.connection && new.commands.has_explicit_update() {
            UpdateStrategy::InPlace
        } else {
            UpdateStrategy::Replace
        }
    }

    /// Runs the update body as one unit on the same host; a new host gets
    /// a delete on the old one and a create on the new one.
    fn update(
        &self,
        id: &str,
        old: &Self::Inputs,
        old_outputs: &Self::Outputs,
        new: &Self::Inputs,
    ) -> Result<Created<Self::Outputs>> {
        if old.connection != new.connection {
            self.delete(id, old, old_outputs)?;
            return self.create(new);
        }
        let outputs = self.run(&new.connection, &new.commands.update_from(&old.commands))?;
        Ok(Created::new(
            command_id(&new.connection.host, &new.commands.create),
            outputs,
        ))
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        match &inputs.commands.delete {
            Some(command) => {
                self.run(&inputs.connection, command)?;
                Ok(Removal::Removed)
            }
            None => Ok(Removal::retained("no delete command")),
        }
    }
}
