//! Local effector: runs commands through `sh -c` on this machine.

use crate::connection::SshConnection;
use crate::effector::{CommandOutput, Effector, Session};
use crate::error::Result;
use std::process::{Command, Stdio};

/// Effector that ignores the target host and runs everything locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEffector;

impl LocalEffector {
    pub fn new() -> Self {
        Self
    }
}

impl Effector for LocalEffector {
    fn connect(&self, _connection: &SshConnection) -> Result<Box<dyn Session>> {
        Ok(Box::new(LocalSession))
    }
}

/// A session on the local machine.
#[derive(Debug, Default)]
pub struct LocalSession;

impl Session for LocalSession {
    fn host(&self) -> &str {
        "localhost"
    }

    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        log::debug!("[localhost] exec: {command}");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}
