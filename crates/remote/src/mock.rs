//! In-memory effector for tests.
//!
//! [`MockEffector`] records every connect and exec, returns scripted
//! command output, and can simulate hosts that refuse connections for a
//! while (booting, rebooting) or forever.
//!
//! ```
//! use remote::{CommandOutput, Effector, MockEffector, SshConnection};
//!
//! let mock = MockEffector::new();
//! mock.respond("hostname", CommandOutput::ok("pve\n"));
//!
//! let conn = SshConnection::with_password("10.0.0.5", "root", "x");
//! let out = mock.run(&conn, "hostname").unwrap();
//! assert_eq!(out.stdout, "pve\n");
//! assert_eq!(mock.commands(), vec!["hostname".to_string()]);
//! ```

use crate::connection::SshConnection;
use crate::effector::{CommandOutput, Effector, Session, missing_credential};
use crate::error::{ConnectionFailure, Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded `exec` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    pub host: String,
    pub command: String,
}

#[derive(Debug, Default)]
struct MockState {
    connect_attempts: u32,
    pending_failures: Vec<ConnectionFailure>,
    unreachable: bool,
    reject_auth: bool,
    responses: Vec<(String, CommandOutput)>,
    outages: Vec<(String, u32)>,
    execs: Vec<ExecRecord>,
}

/// Mock effector for testing without network access.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MockEffector {
    state: Arc<Mutex<MockState>>,
}

impl MockEffector {
    /// Create a mock where every host is reachable and every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` connection attempts with `kind`.
    pub fn fail_connects(&self, count: u32, kind: ConnectionFailure) {
        let mut state = self.lock();
        state
            .pending_failures
            .extend(std::iter::repeat_n(kind, count as usize));
    }

    /// Refuse every connection attempt until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Reject credentials on every connection attempt.
    pub fn reject_auth(&self) {
        self.lock().reject_auth = true;
    }

    /// Return `output` for any command containing `pattern`.
    ///
    /// Patterns are checked in registration order; unmatched commands
    /// succeed with empty output.
    pub fn respond(&self, pattern: impl Into<String>, output: CommandOutput) {
        self.lock().responses.push((pattern.into(), output));
    }

    /// After a command containing `pattern` runs, refuse the next `attempts` connections.
    ///
    /// Simulates a host going down after a reboot command.
    pub fn outage_after(&self, pattern: impl Into<String>, attempts: u32) {
        self.lock().outages.push((pattern.into(), attempts));
    }

    /// Number of connection attempts so far.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// All recorded exec calls, in order.
    pub fn exec_calls(&self) -> Vec<ExecRecord> {
        self.lock().execs.clone()
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().execs.iter().map(|e| e.command.clone()).collect()
    }
}

impl Effector for MockEffector {
    fn connect(&self, conn: &SshConnection) -> Result<Box<dyn Session>> {
        if conn.credential().is_none() {
            return Err(missing_credential(conn));
        }

        let mut state = self.lock();
        state.connect_attempts += 1;

        let failure = if state.unreachable {
            Some(ConnectionFailure::Refused)
        } else if state.pending_failures.is_empty() {
            None
        } else {
            Some(state.pending_failures.remove(0))
        };
        if let Some(kind) = failure {
            return Err(Error::Connection {
                host: conn.host.clone(),
                port: conn.port,
                kind,
                message: format!("mock {kind}"),
            });
        }

        if state.reject_auth {
            return Err(Error::Authentication {
                host: conn.host.clone(),
                user: conn.user.clone(),
                message: "mock rejected credentials".to_string(),
            });
        }

        Ok(Box::new(MockSession {
            host: conn.host.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    host: String,
    state: Arc<Mutex<MockState>>,
}

impl Session for MockSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.execs.push(ExecRecord {
            host: self.host.clone(),
            command: command.to_string(),
        });

        let outage: u32 = state
            .outages
            .iter()
            .filter(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, attempts)| *attempts)
            .sum();
        state
            .pending_failures
            .extend(std::iter::repeat_n(ConnectionFailure::Refused, outage as usize));

        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}
