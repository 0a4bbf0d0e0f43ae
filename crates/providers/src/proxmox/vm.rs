//! Starting a VM.

use super::{ProxmoxConnector, require_vm};
use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal};
use remote::ApiConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const fn default_wait_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmStartInputs {
    pub api: ApiConnection,
    pub node: String,
    pub vmid: u32,
    /// Grace period after the start request returns.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStartOutputs {
    pub node: String,
    pub vmid: u32,
}

/// Starts an existing VM and blocks for a grace period.
///
/// The VM is left running on delete.
pub struct VmStartProvider {
    proxmox: Arc<dyn ProxmoxConnector>,
}

impl VmStartProvider {
    pub fn new(proxmox: Arc<dyn ProxmoxConnector>) -> Self {
        Self { proxmox }
    }
}

impl Provider for VmStartProvider {
    type Inputs = VmStartInputs;
    type Outputs = VmStartOutputs;

    fn resource_type(&self) -> &'static str {
        "proxmox:vm-start"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("start VM {} on {}", inputs.vmid, inputs.node)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let api = self.proxmox.open(&inputs.api);
        require_vm(api.as_ref(), &inputs.node, inputs.vmid)?;
        api.start_vm(&inputs.node, inputs.vmid)
            .with_context(|| format!("Failed to start VM {}", inputs.vmid))?;

        log::info!("VM {} started, waiting {}s", inputs.vmid, inputs.wait_secs);
        thread::sleep(Duration::from_secs(inputs.wait_secs));

        Ok(Created::new(
            format!("{}/{}", inputs.node, inputs.vmid),
            VmStartOutputs {
                node: inputs.node.clone(),
                vmid: inputs.vmid,
            },
        ))
    }

    fn delete(&self, _id: &str, _inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        Ok(Removal::retained("the VM keeps running"))
    }
}
