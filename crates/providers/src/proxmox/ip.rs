//! Discovering a VM's address through the QEMU guest agent.

use super::{GuestInterface, ProxmoxConnector, guest_agent_enabled, require_vm};
use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal};
use remote::{ApiConnection, Error, PollCondition, poll_until};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn default_interface() -> String {
    "eth0".to_string()
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpDiscoveryInputs {
    pub api: ApiConnection,
    pub node: String,
    pub vmid: u32,
    /// Guest interface whose IPv4 address is wanted.
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl IpDiscoveryInputs {
    pub fn new(api: ApiConnection, node: impl Into<String>, vmid: u32) -> Self {
        Self {
            api,
            node: node.into(),
            vmid,
            interface: default_interface(),
            timeout_secs: default_timeout_secs(),
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpDiscoveryOutputs {
    pub ip: String,
}

/// First IPv4 address of `name` among the agent's interfaces.
pub fn find_ipv4(interfaces: &[GuestInterface], name: &str) -> Option<String> {
    interfaces
        .iter()
        .filter(|iface| iface.name == name)
        .flat_map(|iface| &iface.ip_addresses)
        .find(|addr| addr.kind == "ipv4")
        .map(|addr| addr.address.clone())
}

/// Looks up a VM's IPv4 address, polling until the guest reports one.
///
/// Requires the guest agent to be enabled in the VM config; never reports
/// an empty or made-up address.
pub struct IpDiscoveryProvider {
    proxmox: Arc<dyn ProxmoxConnector>,
}

impl IpDiscoveryProvider {
    pub fn new(proxmox: Arc<dyn ProxmoxConnector>) -> Self {
        Self { proxmox }
    }
}

impl Provider for IpDiscoveryProvider {
    type Inputs = IpDiscoveryInputs;
    type Outputs = IpDiscoveryOutputs;

    fn resource_type(&self) -> &'static str {
        "proxmox:vm-ip"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("{} address of VM {}", inputs.interface, inputs.vmid)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let api = self.proxmox.open(&inputs.api);
        let (node, vmid) = (inputs.node.as_str(), inputs.vmid);
        require_vm(api.as_ref(), node, vmid)?;

        let config = api.vm_config(node, vmid)?;
        if !guest_agent_enabled(&config) {
            return Err(Error::CapabilityMissing {
                target: format!("VM {vmid}"),
                capability: "QEMU guest agent".to_string(),
            }
            .into());
        }

        let condition = PollCondition::new(
            format!("{} address of VM {vmid}", inputs.interface),
            Duration::from_millis(inputs.interval_ms),
            Duration::from_secs(inputs.timeout_secs),
        );
        let ip = poll_until(&condition, || match api.network_interfaces(node, vmid) {
            Ok(interfaces) => Ok(find_ipv4(&interfaces, &inputs.interface)),
            // The agent answers with server errors until the guest has booted.
            Err(Error::Http {
                message,
                status: Some(status),
            }) if status >= 500 => {
                log::debug!("VM {vmid} agent not ready: {message}");
                Ok(None)
            }
            Err(e) => Err(e),
        })
        .with_context(|| format!("No IPv4 address for VM {vmid}"))?;

        log::info!("VM {vmid} has address {ip}");
        Ok(Created::new(format!("{node}/{vmid}"), IpDiscoveryOutputs { ip }))
    }

    fn delete(&self, _id: &str, _inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        Ok(Removal::retained("lookup only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxmox::{MockProxmox, test_api};
    use serde_json::json;

    fn interfaces() -> serde_json::Value {
        json!([
            {"name": "lo", "ip-addresses": [{"ip-address-type": "ipv4", "ip-address": "127.0.0.1"}]},
            {"name": "eth0", "ip-addresses": [
                {"ip-address-type": "ipv6", "ip-address": "fe80::1"},
                {"ip-address-type": "ipv4", "ip-address": "10.0.0.31"}
            ]}
        ])
    }

    fn inputs() -> IpDiscoveryInputs {
        let mut inputs = IpDiscoveryInputs::new(test_api(), "pve", 501);
        inputs.interval_ms = 1;
        inputs.timeout_secs = 5;
        inputs
    }

    #[test]
    fn test_missing_agent_fails_before_querying_interfaces() {
        let mock = MockProxmox::new();
        mock.add_vm("pve", 501, json!({"agent": "0"}));
        let provider = IpDiscoveryProvider::new(Arc::new(mock.clone()));

        let err = provider.create(&inputs()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CapabilityMissing { .. })
        ));
        assert!(
            !mock
                .calls()
                .iter()
                .any(|call| call.contains("network-get-interfaces"))
        );
    }

    #[test]
    fn test_polls_until_agent_answers() {
        let mock = MockProxmox::new();
        mock.add_vm("pve", 501, json!({"agent": "enabled=1"}));
        mock.set_interfaces("pve", 501, interfaces(), 2);
        let provider = IpDiscoveryProvider::new(Arc::new(mock.clone()));

        let created = provider.create(&inputs()).unwrap();
        assert_eq!(created.outputs.ip, "10.0.0.31");
        let queries = mock
            .calls()
            .iter()
            .filter(|call| call.contains("network-get-interfaces"))
            .count();
        assert_eq!(queries, 3);
    }

    #[test]
    fn test_rejected_token_fails_without_polling() {
        let mock = MockProxmox::new();
        mock.add_vm("pve", 501, json!({"agent": 1}));
        mock.set_interfaces("pve", 501, interfaces(), 0);
        mock.fail_agent("pve", 501, 401, "authentication failure");
        let provider = IpDiscoveryProvider::new(Arc::new(mock.clone()));

        let err = provider.create(&inputs()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Http {
                status: Some(401),
                ..
            })
        ));
        let queries = mock
            .calls()
            .iter()
            .filter(|call| call.contains("network-get-interfaces"))
            .count();
        assert_eq!(queries, 1);
    }

    #[test]
    fn test_no_address_is_a_timeout() {
        let mock = MockProxmox::new();
        mock.add_vm("pve", 501, json!({"agent": 1}));
        mock.set_interfaces("pve", 501, json!([{"name": "lo", "ip-addresses": []}]), 0);
        let provider = IpDiscoveryProvider::new(Arc::new(mock));

        let mut inputs = inputs();
        inputs.timeout_secs = 0;
        let err = provider.create(&inputs).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Timeout { .. })));
    }

    #[test]
    fn test_find_ipv4_ignores_other_interfaces() {
        let parsed: Vec<GuestInterface> = serde_json::from_value(interfaces()).unwrap();
        assert_eq!(find_ipv4(&parsed, "eth0").as_deref(), Some("10.0.0.31"));
        assert_eq!(find_ipv4(&parsed, "eth1"), None);
    }
}
