//! In-memory Proxmox for tests.

use super::{GuestInterface, ProxmoxApi, ProxmoxConnector, TaskStatus, paths};
use remote::{ApiConnection, Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockVm {
    config: Map<String, Value>,
    running: bool,
    interfaces: Option<Value>,
    agent_delay: u32,
    agent_error: Option<(u16, String)>,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: BTreeSet<String>,
    vms: BTreeMap<(String, u32), MockVm>,
    disks: BTreeMap<String, Vec<String>>,
    volumes: BTreeSet<String>,
    tasks: BTreeMap<String, (String, Option<String>)>,
    download_failure: Option<String>,
    calls: Vec<String>,
}

/// Mock Proxmox cluster.
///
/// Clones share state. Every API call is recorded as `METHOD path`.
#[derive(Debug, Clone, Default)]
pub struct MockProxmox {
    state: Arc<Mutex<MockState>>,
}

impl MockProxmox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, method: &str, path: &str) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(format!("{method} {path}"));
        state
    }

    pub fn add_node(&self, node: &str) {
        self.lock().nodes.insert(node.to_string());
    }

    /// Add a stopped VM with `config` (a JSON object).
    pub fn add_vm(&self, node: &str, vmid: u32, config: Value) {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.lock().vms.insert(
            (node.to_string(), vmid),
            MockVm {
                config,
                ..MockVm::default()
            },
        );
    }

    /// Set one VM config key.
    pub fn set_config(&self, node: &str, vmid: u32, key: &str, value: Value) {
        if let Some(vm) = self.lock().vms.get_mut(&(node.to_string(), vmid)) {
            vm.config.insert(key.to_string(), value);
        }
    }

    /// Guest agent answers with `interfaces` (the agent's `result` array)
    /// after failing `delay` times.
    pub fn set_interfaces(&self, node: &str, vmid: u32, interfaces: Value, delay: u32) {
        if let Some(vm) = self.lock().vms.get_mut(&(node.to_string(), vmid)) {
            vm.interfaces = Some(interfaces);
            vm.agent_delay = delay;
        }
    }

    /// Guest agent requests fail with `status` until the VM is removed.
    pub fn fail_agent(&self, node: &str, vmid: u32, status: u16, message: &str) {
        if let Some(vm) = self.lock().vms.get_mut(&(node.to_string(), vmid)) {
            vm.agent_error = Some((status, message.to_string()));
        }
    }

    /// Add a physical disk by its `/dev/disk/by-id` name.
    pub fn add_disk(&self, node: &str, drive_id: &str) {
        self.lock()
            .disks
            .entry(node.to_string())
            .or_default()
            .push(format!("/dev/disk/by-id/{drive_id}"));
    }

    /// Make downloads finish with `exitstatus` instead of `OK`.
    pub fn fail_downloads(&self, exitstatus: &str) {
        self.lock().download_failure = Some(exitstatus.to_string());
    }

    pub fn is_running(&self, node: &str, vmid: u32) -> bool {
        self.lock()
            .vms
            .get(&(node.to_string(), vmid))
            .is_some_and(|vm| vm.running)
    }

    pub fn has_volume(&self, volid: &str) -> bool {
        self.lock().volumes.contains(volid)
    }

    pub fn add_volume(&self, volid: &str) {
        self.lock().volumes.insert(volid.to_string());
    }

    /// Recorded calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Proxmox answers requests about an unknown VM with a server error, not 404.
    fn missing_vm(node: &str, vmid: u32) -> Error {
        Error::http(
            format!("Configuration file 'nodes/{node}/qemu-server/{vmid}.conf' does not exist"),
            Some(500),
        )
    }
}

impl ProxmoxConnector for MockProxmox {
    fn open(&self, _connection: &ApiConnection) -> Box<dyn ProxmoxApi> {
        Box::new(self.clone())
    }
}

impl ProxmoxApi for MockProxmox {
    fn nodes(&self) -> Result<Vec<String>> {
        let state = self.record("GET", &paths::nodes());
        Ok(state.nodes.iter().cloned().collect())
    }

    fn vm_ids(&self, node: &str) -> Result<Vec<u32>> {
        let state = self.record("GET", &paths::vms(node));
        Ok(state
            .vms
            .keys()
            .filter(|(n, _)| n == node)
            .map(|(_, id)| *id)
            .collect())
    }

    fn vm_config(&self, node: &str, vmid: u32) -> Result<Map<String, Value>> {
        let state = self.record("GET", &paths::vm_config(node, vmid));
        state
            .vms
            .get(&(node.to_string(), vmid))
            .map(|vm| vm.config.clone())
            .ok_or_else(|| Self::missing_vm(node, vmid))
    }

    fn start_vm(&self, node: &str, vmid: u32) -> Result<()> {
        let mut state = self.record("POST", &paths::vm_start(node, vmid));
        let vm = state
            .vms
            .get_mut(&(node.to_string(), vmid))
            .ok_or_else(|| Self::missing_vm(node, vmid))?;
        vm.running = true;
        Ok(())
    }

    fn network_interfaces(&self, node: &str, vmid: u32) -> Result<Vec<GuestInterface>> {
        let path = paths::network_interfaces(node, vmid);
        let mut state = self.record("GET", &path);
        let vm = state
            .vms
            .get_mut(&(node.to_string(), vmid))
            .ok_or_else(|| Self::missing_vm(node, vmid))?;
        if let Some((status, message)) = &vm.agent_error {
            return Err(Error::http(message.clone(), Some(*status)));
        }
        if vm.agent_delay > 0 {
            vm.agent_delay -= 1;
            return Err(Error::http("QEMU guest agent is not running", Some(500)));
        }
        let interfaces = vm
            .interfaces
            .clone()
            .ok_or_else(|| Error::http("QEMU guest agent is not running", Some(500)))?;
        remote::api::decode(&path, interfaces)
    }

    fn disk_links(&self, node: &str) -> Result<Vec<String>> {
        let state = self.record("GET", &paths::disks(node));
        Ok(state.disks.get(node).cloned().unwrap_or_default())
    }

    fn download_iso(&self, node: &str, storage: &str, url: &str, filename: &str) -> Result<String> {
        let mut state = self.record("POST", &paths::download_url(node, storage));
        let upid = format!("UPID:{node}:download:{filename}:");
        let exitstatus = state
            .download_failure
            .clone()
            .unwrap_or_else(|| "OK".to_string());
        if exitstatus == "OK" {
            state.volumes.insert(format!("{storage}:iso/{filename}"));
        }
        log::debug!("mock download of {url} as {upid}");
        state
            .tasks
            .insert(upid.clone(), ("running".to_string(), Some(exitstatus)));
        Ok(upid)
    }

    /// Tasks report running once, then stopped.
    fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus> {
        let mut state = self.record("GET", &paths::task_status(node, upid));
        let (status, exitstatus) = state
            .tasks
            .get_mut(upid)
            .ok_or_else(|| Error::http(format!("no such task {upid}"), Some(404)))?;
        let reply = if *status == "running" {
            *status = "stopped".to_string();
            TaskStatus {
                status: "running".to_string(),
                exitstatus: None,
            }
        } else {
            TaskStatus {
                status: status.clone(),
                exitstatus: exitstatus.clone(),
            }
        };
        Ok(reply)
    }

    fn delete_volume(&self, node: &str, storage: &str, volid: &str) -> Result<()> {
        let mut state = self.record("DELETE", &paths::volume(node, storage, volid));
        if state.volumes.remove(volid) {
            Ok(())
        } else {
            Err(Error::http(format!("volume {volid} does not exist"), Some(404)))
        }
    }
}
