//! Effector traits: one blocking remote action per call.
//!
//! An [`Effector`] opens a [`Session`] to a host; a session runs shell
//! commands and returns their raw output. Nothing here knows about
//! dependency order or idempotency: the command text is responsible for
//! being safe to re-run.

use crate::connection::SshConnection;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failed output with the given status and stderr.
    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_status,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turn a non-zero exit into [`Error::RemoteCommand`].
    pub fn into_result(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::RemoteCommand {
                command: command.to_string(),
                exit_status: self.exit_status,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// An authenticated session on a remote host.
pub trait Session: Send {
    /// Host this session is connected to.
    fn host(&self) -> &str;

    /// Run one shell command and capture its output.
    ///
    /// A non-zero exit status is returned as data, not as an error; use
    /// [`Session::run`] to fail on it.
    fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    /// Run one shell command, failing with [`Error::RemoteCommand`] on non-zero exit.
    fn run(&mut self, command: &str) -> Result<CommandOutput> {
        self.exec(command)?.into_result(command)
    }
}

/// Opens sessions to remote hosts.
///
/// Implementations must be safe to share across worker threads that act on
/// independent hosts.
pub trait Effector: Send + Sync {
    /// Authenticate and open a session.
    ///
    /// Uses the private key when present, else the password, and fails with
    /// [`Error::Authentication`] when neither is supplied.
    fn connect(&self, connection: &SshConnection) -> Result<Box<dyn Session>>;

    /// Connect, run one command and fail on non-zero exit.
    fn run(&self, connection: &SshConnection, command: &str) -> Result<CommandOutput> {
        let mut session = self.connect(connection)?;
        session.run(command)
    }
}

/// Error for a connection that carries no usable credential.
pub(crate) fn missing_credential(connection: &SshConnection) -> Error {
    Error::Authentication {
        host: connection.host.clone(),
        user: connection.user.clone(),
        message: "neither a private key nor a password was supplied".to_string(),
    }
}
