//! Connection descriptors for SSH and HTTP API targets.
//!
//! Descriptors are plain values. They are never mutated after construction
//! and their `Debug` output never contains secret material.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default timeout for a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default Proxmox API port.
pub const DEFAULT_API_PORT: u16 = 8006;

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

/// How to reach a host over SSH.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConnection {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Password, used only when no private key is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// PEM-encoded private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Timeout for a single connection attempt, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// The credential chosen for a connection attempt.
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    PrivateKey(&'a str),
    Password(&'a str),
}

impl SshConnection {
    /// Connection authenticated with a password.
    pub fn with_password(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            password: Some(password.into()),
            private_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Connection authenticated with a private key.
    pub fn with_private_key(
        host: impl Into<String>,
        user: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            password: None,
            private_key: Some(private_key.into()),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Same target, different port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Same target, different host.
    pub fn at_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }

    /// Same target, different user and credential.
    pub fn as_user(&self, user: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
            private_key: Some(private_key.into()),
            ..self.clone()
        }
    }

    /// Timeout for a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pick the credential to authenticate with: private key first, else password.
    pub fn credential(&self) -> Option<Credential<'_>> {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|v| !v.is_empty())
        }
        non_empty(&self.private_key)
            .map(Credential::PrivateKey)
            .or_else(|| non_empty(&self.password).map(Credential::Password))
    }
}

impl fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// How to reach a token-authenticated HTTP API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConnection {
    /// Hostname or IP address.
    pub host: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// API user including realm, e.g. `automation@pve`.
    pub api_user: String,
    /// Token name.
    pub api_token_name: String,
    /// Token secret.
    pub api_token_value: String,
    /// Verify the server certificate.
    #[serde(default)]
    pub verify_ssl: bool,
}

impl ApiConnection {
    /// Base URL of the JSON API.
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.api_user, self.api_token_name, self.api_token_value
        )
    }
}

impl fmt::Debug for ApiConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_user", &self.api_user)
            .field("api_token_name", &self.api_token_name)
            .field("api_token_value", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_key_preferred() {
        let mut conn = SshConnection::with_password("10.0.0.5", "root", "x");
        assert!(matches!(conn.credential(), Some(Credential::Password("x"))));

        conn.private_key = Some("-----BEGIN KEY-----".into());
        assert!(matches!(conn.credential(), Some(Credential::PrivateKey(_))));
    }

    #[test]
    fn test_empty_credentials_are_absent() {
        let mut conn = SshConnection::with_password("10.0.0.5", "root", "");
        assert!(conn.credential().is_none());
        conn.password = None;
        assert!(conn.credential().is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let conn = SshConnection::with_password("10.0.0.5", "root", "hunter2");
        let debug = format!("{conn:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("10.0.0.5"));

        let api = ApiConnection {
            host: "pve".into(),
            port: DEFAULT_API_PORT,
            api_user: "automation@pve".into(),
            api_token_name: "ops".into(),
            api_token_value: "secret-uuid".into(),
            verify_ssl: false,
        };
        assert!(!format!("{api:?}").contains("secret-uuid"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"host":"h","user":"u","pasword":"typo"}"#;
        assert!(serde_json::from_str::<SshConnection>(json).is_err());

        let json = r#"{"host":"h","user":"u","password":"p"}"#;
        let conn: SshConnection = serde_json::from_str(json).unwrap();
        assert_eq!(conn.port, 22);
        assert_eq!(conn.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_api_authorization_header() {
        let api = ApiConnection {
            host: "192.168.1.10".into(),
            port: DEFAULT_API_PORT,
            api_user: "automation@pve".into(),
            api_token_name: "ops".into(),
            api_token_value: "abc".into(),
            verify_ssl: false,
        };
        assert_eq!(api.authorization(), "PVEAPIToken=automation@pve!ops=abc");
        assert_eq!(api.base_url(), "https://192.168.1.10:8006/api2/json");
    }
}
