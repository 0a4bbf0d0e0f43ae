//! SSH effector backed by libssh2.
//!
//! Host keys are accepted without consulting `known_hosts`. This is a
//! trust-on-first-use simplification for machines on a private lab network;
//! do not reuse it where the network path is not trusted.

use crate::connection::{Credential, SshConnection};
use crate::effector::{CommandOutput, Effector, Session, missing_credential};
use crate::error::{ConnectionFailure, Error, Result};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};

/// Effector that opens real SSH sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshEffector;

impl SshEffector {
    pub fn new() -> Self {
        Self
    }
}

fn connection_error(conn: &SshConnection, kind: ConnectionFailure, message: String) -> Error {
    Error::Connection {
        host: conn.host.clone(),
        port: conn.port,
        kind,
        message,
    }
}

impl Effector for SshEffector {
    fn connect(&self, conn: &SshConnection) -> Result<Box<dyn Session>> {
        let credential = conn.credential().ok_or_else(|| missing_credential(conn))?;
        let timeout = conn.connect_timeout();

        log::debug!("connecting to {}@{}:{}", conn.user, conn.host, conn.port);

        let addr = (conn.host.as_str(), conn.port)
            .to_socket_addrs()
            .map_err(|e| connection_error(conn, ConnectionFailure::Other, e.to_string()))?
            .next()
            .ok_or_else(|| {
                connection_error(
                    conn,
                    ConnectionFailure::Other,
                    "host resolved to no addresses".to_string(),
                )
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| connection_error(conn, ConnectionFailure::from_io(&e), e.to_string()))?;

        let mut session = ssh2::Session::new()
            .map_err(|e| connection_error(conn, ConnectionFailure::Handshake, e.to_string()))?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connection_error(conn, ConnectionFailure::Handshake, e.to_string()))?;

        let auth = match credential {
            Credential::PrivateKey(key) => session.userauth_pubkey_memory(&conn.user, None, key, None),
            Credential::Password(password) => session.userauth_password(&conn.user, password),
        };
        if let Err(e) = auth {
            return Err(Error::Authentication {
                host: conn.host.clone(),
                user: conn.user.clone(),
                message: e.message().to_string(),
            });
        }
        if !session.authenticated() {
            return Err(Error::Authentication {
                host: conn.host.clone(),
                user: conn.user.clone(),
                message: "credential rejected".to_string(),
            });
        }

        // Commands may legitimately run for minutes (package installs, clones).
        session.set_timeout(0);

        Ok(Box::new(SshSession {
            host: conn.host.clone(),
            session,
        }))
    }
}

/// An authenticated libssh2 session.
pub struct SshSession {
    host: String,
    session: ssh2::Session,
}

impl SshSession {
    fn session_error(&self, err: impl std::fmt::Display) -> Error {
        Error::Session {
            host: self.host.clone(),
            message: err.to_string(),
        }
    }
}

impl Session for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        log::debug!("[{}] exec: {}", self.host, command);

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.session_error(e))?;
        channel.exec(command).map_err(|e| self.session_error(e))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| self.session_error(e))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| self.session_error(e))?;

        channel.wait_close().map_err(|e| self.session_error(e))?;
        let exit_status = channel.exit_status().map_err(|e| self.session_error(e))?;

        log::debug!("[{}] exit status {}", self.host, exit_status);

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status,
        })
    }
}
