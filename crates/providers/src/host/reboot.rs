//! Reboot and reachability as resources.
//!
//! Neither can be undone, so both report their deletes as left in place.

use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal};
use remote::{
    Effector, ReachabilityConfig, RebootConfig, SshConnection, reboot_and_wait, wait_until_reachable,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const fn default_grace_secs() -> u64 {
    30
}

const fn default_reboot_timeout_secs() -> u64 {
    120
}

const fn default_wait_timeout_secs() -> u64 {
    300
}

const fn default_backoff_secs() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebootInputs {
    pub connection: SshConnection,
    #[serde(default)]
    pub use_sudo: bool,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_reboot_timeout_secs")]
    pub timeout_secs: u64,
    /// Any change here reboots again.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
}

impl RebootInputs {
    pub fn new(connection: SshConnection) -> Self {
        Self {
            connection,
            use_sudo: false,
            grace_secs: default_grace_secs(),
            timeout_secs: default_reboot_timeout_secs(),
            triggers: Vec::new(),
        }
    }

    pub fn config(&self) -> RebootConfig {
        RebootConfig {
            grace: Duration::from_secs(self.grace_secs),
            reconnect: ReachabilityConfig::with_timeout(Duration::from_secs(self.timeout_secs)),
            use_sudo: self.use_sudo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElapsedOutputs {
    pub host: String,
    pub elapsed_secs: f64,
}

/// Reboots a host and waits for it to come back.
pub struct RebootProvider {
    effector: Arc<dyn Effector>,
}

impl RebootProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }
}

impl Provider for RebootProvider {
    type Inputs = RebootInputs;
    type Outputs = ElapsedOutputs;

    fn resource_type(&self) -> &'static str {
        "host:reboot"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("reboot {}", inputs.connection.host)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let elapsed = reboot_and_wait(self.effector.as_ref(), &inputs.connection, &inputs.config())
            .with_context(|| format!("Failed to reboot {}", inputs.connection.host))?;
        Ok(Created::new(
            inputs.connection.host.clone(),
            ElapsedOutputs {
                host: inputs.connection.host.clone(),
                elapsed_secs: elapsed.as_secs_f64(),
            },
        ))
    }

    fn delete(&self, _id: &str, _inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        Ok(Removal::retained("a reboot cannot be undone"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitForHostInputs {
    pub connection: SshConnection,
    #[serde(default = "default_wait_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl WaitForHostInputs {
    pub fn new(connection: SshConnection) -> Self {
        Self {
            connection,
            timeout_secs: default_wait_timeout_secs(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

/// Blocks until a host accepts SSH connections.
pub struct WaitForHostProvider {
    effector: Arc<dyn Effector>,
}

impl WaitForHostProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }
}

impl Provider for WaitForHostProvider {
    type Inputs = WaitForHostInputs;
    type Outputs = ElapsedOutputs;

    fn resource_type(&self) -> &'static str {
        "host:wait"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("wait for {}:{}", inputs.connection.host, inputs.connection.port)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let config = ReachabilityConfig {
            backoff: Duration::from_secs(inputs.backoff_secs),
            timeout: Duration::from_secs(inputs.timeout_secs),
        };
        let elapsed = wait_until_reachable(self.effector.as_ref(), &inputs.connection, &config)?;
        Ok(Created::new(
            inputs.connection.host.clone(),
            ElapsedOutputs {
                host: inputs.connection.host.clone(),
                elapsed_secs: elapsed.as_secs_f64(),
            },
        ))
    }

    fn delete(&self, _id: &str, _inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        Ok(Removal::retained("nothing to undo"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::MockEffector;

    fn conn() -> SshConnection {
        SshConnection::with_password("10.0.0.5", "root", "x")
    }

    #[test]
    fn test_reboot_waits_for_host() {
        let mock = MockEffector::new();
        let provider = RebootProvider::new(Arc::new(mock.clone()));

        let mut inputs = RebootInputs::new(conn());
        inputs.grace_secs = 0;
        inputs.timeout_secs = 30;
        inputs.use_sudo = true;

        let created = provider.create(&inputs).unwrap();
        assert_eq!(created.id, "10.0.0.5");
        assert_eq!(mock.connect_attempts(), 2);
        assert_eq!(
            mock.commands(),
            vec!["sudo /sbin/reboot -f > /dev/null 2>&1 &".to_string()]
        );
        assert_eq!(
            provider.delete(&created.id, &inputs, &created.outputs).unwrap(),
            Removal::retained("a reboot cannot be undone")
        );
    }

    #[test]
    fn test_wait_for_host_times_out_as_unreachable() {
        let mock = MockEffector::new();
        mock.set_unreachable(true);
        let provider = WaitForHostProvider::new(Arc::new(mock));
        let inputs = WaitForHostInputs {
            connection: conn(),
            timeout_secs: 0,
            backoff_secs: 1,
        };
        let err = provider.create(&inputs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<remote::Error>(),
            Some(remote::Error::UnreachableHost { host, .. }) if host == "10.0.0.5"
        ));
    }

    #[test]
    fn test_inputs_defaults() {
        let json = serde_json::json!({
            "connection": {"host": "h", "user": "root", "password": "x"},
        });
        let inputs: WaitForHostInputs = serde_json::from_value(json).unwrap();
        assert_eq!(inputs.timeout_secs, 300);
        assert_eq!(inputs.backoff_secs, 5);
    }
}
