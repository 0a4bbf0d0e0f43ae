//! Proxmox VE providers.
//!
//! Providers talk to the hypervisor through [`ProxmoxApi`], opened per call
//! from the connection in their inputs by a [`ProxmoxConnector`]. The HTTP
//! implementation wraps [`ApiClient`]; [`MockProxmox`] keeps everything in
//! memory for tests.

pub mod access;
pub mod disk;
pub mod ip;
pub mod iso;
pub mod mock;
pub mod vm;

pub use access::{ApiTokenInputs, ApiTokenOutputs, ApiTokenProvider, ApiUserInputs, ApiUserOutputs, ApiUserProvider};
pub use disk::{DiskAttachInputs, DiskAttachOutputs, DiskAttachProvider, DiskBus};
pub use ip::{IpDiscoveryInputs, IpDiscoveryOutputs, IpDiscoveryProvider};
pub use iso::{IsoImageInputs, IsoImageOutputs, IsoImageProvider};
pub use mock::MockProxmox;
pub use vm::{VmStartInputs, VmStartOutputs, VmStartProvider};

use remote::api::decode;
use remote::{ApiClient, ApiConnection, Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// One network interface reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestInterface {
    pub name: String,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<GuestAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestAddress {
    #[serde(rename = "ip-address-type")]
    pub kind: String,
    #[serde(rename = "ip-address")]
    pub address: String,
}

/// State of a background task such as a download.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn succeeded(&self) -> bool {
        !self.is_running() && self.exitstatus.as_deref() == Some("OK")
    }
}

/// The Proxmox VE calls the providers need.
pub trait ProxmoxApi: Send {
    /// Names of the cluster nodes.
    fn nodes(&self) -> Result<Vec<String>>;

    /// Ids of the QEMU VMs on `node`.
    fn vm_ids(&self, node: &str) -> Result<Vec<u32>>;

    /// Current configuration of a VM as a flat key/value map.
    fn vm_config(&self, node: &str, vmid: u32) -> Result<Map<String, Value>>;

    fn start_vm(&self, node: &str, vmid: u32) -> Result<()>;

    /// Interfaces seen by the guest agent. Fails while the agent is not answering.
    fn network_interfaces(&self, node: &str, vmid: u32) -> Result<Vec<GuestInterface>>;

    /// `/dev/disk/by-id` links of the physical disks on `node`.
    fn disk_links(&self, node: &str) -> Result<Vec<String>>;

    /// Start downloading `url` into `storage` as an ISO; returns the task id.
    fn download_iso(&self, node: &str, storage: &str, url: &str, filename: &str) -> Result<String>;

    fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus>;

    /// Delete a volume such as `local:iso/nixos.iso`.
    fn delete_volume(&self, node: &str, storage: &str, volid: &str) -> Result<()>;
}

/// Opens a [`ProxmoxApi`] for a connection.
pub trait ProxmoxConnector: Send + Sync {
    fn open(&self, connection: &ApiConnection) -> Box<dyn ProxmoxApi>;
}

/// Connector for the real HTTP API.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl ProxmoxConnector for HttpConnector {
    fn open(&self, connection: &ApiConnection) -> Box<dyn ProxmoxApi> {
        Box::new(HttpProxmoxApi::new(connection))
    }
}

/// API paths, shared with the mock so recorded calls read like real ones.
pub(crate) mod paths {
    /// Percent-encode one path segment.
    pub fn segment(raw: &str) -> String {
        raw.bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                    char::from(b).to_string()
                } else {
                    format!("%{b:02X}")
                }
            })
            .collect()
    }

    pub fn nodes() -> String {
        "nodes".to_string()
    }

    pub fn vms(node: &str) -> String {
        format!("nodes/{node}/qemu")
    }

    pub fn vm_config(node: &str, vmid: u32) -> String {
        format!("nodes/{node}/qemu/{vmid}/config")
    }

    pub fn vm_start(node: &str, vmid: u32) -> String {
        format!("nodes/{node}/qemu/{vmid}/status/start")
    }

    pub fn network_interfaces(node: &str, vmid: u32) -> String {
        format!("nodes/{node}/qemu/{vmid}/agent/network-get-interfaces")
    }

    pub fn disks(node: &str) -> String {
        format!("nodes/{node}/disks/list")
    }

    pub fn download_url(node: &str, storage: &str) -> String {
        format!("nodes/{node}/storage/{storage}/download-url")
    }

    pub fn task_status(node: &str, upid: &str) -> String {
        format!("nodes/{node}/tasks/{}/status", segment(upid))
    }

    pub fn volume(node: &str, storage: &str, volid: &str) -> String {
        format!("nodes/{node}/storage/{storage}/content/{}", segment(volid))
    }
}

#[derive(Deserialize)]
struct NodeEntry {
    node: String,
}

#[derive(Deserialize)]
struct VmEntry {
    vmid: u32,
}

#[derive(Deserialize)]
struct DiskEntry {
    #[serde(default)]
    by_id_link: Option<String>,
}

#[derive(Deserialize)]
struct AgentReply {
    result: Vec<GuestInterface>,
}

/// [`ProxmoxApi`] over the JSON API.
pub struct HttpProxmoxApi {
    client: ApiClient,
}

impl HttpProxmoxApi {
    pub fn new(connection: &ApiConnection) -> Self {
        Self {
            client: ApiClient::new(connection),
        }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode(path, self.client.get(path)?)
    }
}

impl ProxmoxApi for HttpProxmoxApi {
    fn nodes(&self) -> Result<Vec<String>> {
        let nodes: Vec<NodeEntry> = self.get(&paths::nodes())?;
        Ok(nodes.into_iter().map(|n| n.node).collect())
    }

    fn vm_ids(&self, node: &str) -> Result<Vec<u32>> {
        let vms: Vec<VmEntry> = self.get(&paths::vms(node))?;
        Ok(vms.into_iter().map(|v| v.vmid).collect())
    }

    fn vm_config(&self, node: &str, vmid: u32) -> Result<Map<String, Value>> {
        self.get(&paths::vm_config(node, vmid))
    }

    fn start_vm(&self, node: &str, vmid: u32) -> Result<()> {
        self.client.post(&paths::vm_start(node, vmid), &[])?;
        Ok(())
    }

    fn network_interfaces(&self, node: &str, vmid: u32) -> Result<Vec<GuestInterface>> {
        let reply: AgentReply = self.get(&paths::network_interfaces(node, vmid))?;
        Ok(reply.result)
    }

    fn disk_links(&self, node: &str) -> Result<Vec<String>> {
        let disks: Vec<DiskEntry> = self.get(&paths::disks(node))?;
        Ok(disks.into_iter().filter_map(|d| d.by_id_link).collect())
    }

    fn download_iso(&self, node: &str, storage: &str, url: &str, filename: &str) -> Result<String> {
        let path = paths::download_url(node, storage);
        let form = [
            ("content", "iso".to_string()),
            ("filename", filename.to_string()),
            ("url", url.to_string()),
        ];
        let upid = self.client.post(&path, &form)?;
        upid.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::malformed(path, "expected a task id"))
    }

    fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus> {
        self.get(&paths::task_status(node, upid))
    }

    fn delete_volume(&self, node: &str, storage: &str, volid: &str) -> Result<()> {
        self.client.delete(&paths::volume(node, storage, volid))?;
        Ok(())
    }
}

/// Fail with [`Error::NotFound`] unless `node` is part of the cluster.
pub fn require_node(api: &dyn ProxmoxApi, node: &str) -> Result<()> {
    if api.nodes()?.iter().any(|n| n == node) {
        Ok(())
    } else {
        Err(Error::NotFound(format!("node {node}")))
    }
}

/// Fail with [`Error::NotFound`] unless VM `vmid` exists on `node`.
pub fn require_vm(api: &dyn ProxmoxApi, node: &str, vmid: u32) -> Result<()> {
    if api.vm_ids(node)?.contains(&vmid) {
        Ok(())
    } else {
        Err(Error::NotFound(format!("VM {vmid} on node {node}")))
    }
}

/// Whether a VM config enables the QEMU guest agent.
///
/// The `agent` key is either a bare flag (`1`) or an option list
/// (`enabled=1,fstrim_cloned_disks=1`).
pub fn guest_agent_enabled(config: &Map<String, Value>) -> bool {
    match config.get("agent") {
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::String(s)) => s.starts_with('1') || s.contains("enabled=1"),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

#[cfg(test)]
pub(crate) fn test_api() -> ApiConnection {
    ApiConnection {
        host: "10.0.0.2".into(),
        port: remote::connection::DEFAULT_API_PORT,
        api_user: "automation@pve".into(),
        api_token_name: "provider".into(),
        api_token_value: "secret".into(),
        verify_ssl: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("agent".to_string(), value);
        map
    }

    #[test]
    fn test_guest_agent_flag_forms() {
        assert!(guest_agent_enabled(&config(json!(1))));
        assert!(guest_agent_enabled(&config(json!("1"))));
        assert!(guest_agent_enabled(&config(json!("1,fstrim_cloned_disks=1"))));
        assert!(guest_agent_enabled(&config(json!("enabled=1,type=virtio"))));
        assert!(!guest_agent_enabled(&config(json!(0))));
        assert!(!guest_agent_enabled(&config(json!("0"))));
        assert!(!guest_agent_enabled(&Map::new()));
    }

    #[test]
    fn test_segment_encoding() {
        assert_eq!(paths::segment("local:iso/nixos.iso"), "local%3Aiso%2Fnixos.iso");
        assert_eq!(
            paths::volume("pve", "local", "local:iso/a.iso"),
            "nodes/pve/storage/local/content/local%3Aiso%2Fa.iso"
        );
    }

    #[test]
    fn test_task_status() {
        let done: TaskStatus =
            serde_json::from_value(json!({"status": "stopped", "exitstatus": "OK"})).unwrap();
        assert!(done.succeeded());
        let running: TaskStatus = serde_json::from_value(json!({"status": "running"})).unwrap();
        assert!(running.is_running());
        assert!(!running.succeeded());
    }

    #[test]
    fn test_agent_reply_shape() {
        let reply: AgentReply = serde_json::from_value(json!({
            "result": [
                {"name": "lo", "ip-addresses": [{"ip-address-type": "ipv4", "ip-address": "127.0.0.1", "prefix": 8}]},
                {"name": "eth0", "hardware-address": "aa:bb", "ip-addresses": [
                    {"ip-address-type": "ipv6", "ip-address": "fe80::1"},
                    {"ip-address-type": "ipv4", "ip-address": "10.0.0.31"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(reply.result[1].ip_addresses[1].address, "10.0.0.31");
    }

    #[test]
    fn test_require_vm_with_mock() {
        let mock = MockProxmox::new();
        mock.add_node("pve");
        mock.add_vm("pve", 501, json!({}));
        assert!(require_node(&mock, "pve").is_ok());
        assert!(require_node(&mock, "other").unwrap_err().is_not_found());
        assert!(require_vm(&mock, "pve", 501).is_ok());
        assert!(require_vm(&mock, "pve", 502).unwrap_err().is_not_found());
    }
}
