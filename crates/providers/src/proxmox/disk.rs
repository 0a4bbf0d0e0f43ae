//! Passing a physical disk through to a VM.

use super::{ProxmoxConnector, require_node, require_vm};
use anyhow::{Context, Result, bail};
use declarative::{Created, Provider, Removal};
use regex::Regex;
use remote::shell::sudo_prefix;
use remote::{ApiConnection, Effector, Error, SshConnection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, LazyLock};

static DISK_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ide|sata|scsi|virtio)(\d+)$").expect("valid disk interface pattern")
});

/// Disk bus a drive is attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Ide,
    Sata,
    #[default]
    Scsi,
    Virtio,
}

impl DiskBus {
    /// Slot numbers Proxmox allows on this bus.
    pub const fn slots(self) -> RangeInclusive<u8> {
        match self {
            Self::Ide => 0..=3,
            Self::Sata => 0..=5,
            Self::Scsi => 0..=30,
            Self::Virtio => 0..=15,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ide => "ide",
            Self::Sata => "sata",
            Self::Scsi => "scsi",
            Self::Virtio => "virtio",
        }
    }
}

impl fmt::Display for DiskBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskAttachInputs {
    pub api: ApiConnection,
    /// Shell access to the hypervisor, where `qm` runs.
    pub ssh: SshConnection,
    pub node: String,
    pub vmid: u32,
    /// Name under `/dev/disk/by-id`.
    pub drive_id: String,
    #[serde(default)]
    pub bus: DiskBus,
    #[serde(default)]
    pub ssd: bool,
    #[serde(default)]
    pub use_sudo: bool,
}

impl DiskAttachInputs {
    fn by_id(&self) -> String {
        format!("/dev/disk/by-id/{}", self.drive_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAttachOutputs {
    /// Interface the drive was attached as, e.g. `scsi1`.
    pub interface: String,
}

/// First unused slot on `bus` given a VM config.
pub fn free_slot(config: &Map<String, Value>, bus: DiskBus) -> Option<String> {
    let used: BTreeSet<u8> = config
        .keys()
        .filter_map(|key| DISK_KEY.captures(key))
        .filter(|caps| &caps[1] == bus.as_str())
        .filter_map(|caps| caps[2].parse().ok())
        .collect();
    bus.slots()
        .find(|slot| !used.contains(slot))
        .map(|slot| format!("{bus}{slot}"))
}

/// Config key that already holds `device`, if any.
fn attached_as<'a>(config: &'a Map<String, Value>, device: &str) -> Option<&'a str> {
    config.iter().find_map(|(key, value)| {
        let value = value.as_str()?;
        let volume = value.split(',').next().unwrap_or_default();
        (volume == device).then_some(key.as_str())
    })
}

/// Attaches a physical drive to a VM with `qm set`.
pub struct DiskAttachProvider {
    proxmox: Arc<dyn ProxmoxConnector>,
    effector: Arc<dyn Effector>,
}

impl DiskAttachProvider {
    pub fn new(proxmox: Arc<dyn ProxmoxConnector>, effector: Arc<dyn Effector>) -> Self {
        Self { proxmox, effector }
    }
}

impl Provider for DiskAttachProvider {
    type Inputs = DiskAttachInputs;
    type Outputs = DiskAttachOutputs;

    fn resource_type(&self) -> &'static str {
        "proxmox:disk"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("attach {} to VM {} ({})", inputs.drive_id, inputs.vmid, inputs.bus)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let api = self.proxmox.open(&inputs.api);
        let (node, vmid) = (inputs.node.as_str(), inputs.vmid);
        require_node(api.as_ref(), node)?;
        require_vm(api.as_ref(), node, vmid)?;

        let device = inputs.by_id();
        if !api.disk_links(node)?.contains(&device) {
            return Err(Error::NotFound(format!("drive {} on node {node}", inputs.drive_id)).into());
        }

        let config = api.vm_config(node, vmid)?;
        if let Some(key) = attached_as(&config, &device) {
            bail!("drive {} is already attached to VM {vmid} as {key}", inputs.drive_id);
        }
        let Some(interface) = free_slot(&config, inputs.bus) else {
            bail!("VM {vmid} has no free {} slot", inputs.bus);
        };

        let ssd = if inputs.ssd { ",ssd=1" } else { "" };
        let command = format!(
            "{}qm set {vmid} --{interface} {device}{ssd}",
            sudo_prefix(inputs.use_sudo)
        );
        self.effector
            .run(&inputs.ssh, &command)
            .with_context(|| format!("Failed to attach {} to VM {vmid}", inputs.drive_id))?;

        Ok(Created::new(
            format!("{node}/{vmid}/{interface}"),
            DiskAttachOutputs { interface },
        ))
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, outputs: &Self::Outputs) -> Result<Removal> {
        let api = self.proxmox.open(&inputs.api);
        let (node, vmid) = (inputs.node.as_str(), inputs.vmid);
        // The config of a removed VM is a server error, so check the listing first.
        if !api.vm_ids(node)?.contains(&vmid) {
            log::debug!("VM {vmid} is gone, and {} with it", outputs.interface);
            return Ok(Removal::AlreadyAbsent);
        }
        let config = api.vm_config(node, vmid)?;
        if !config.contains_key(&outputs.interface) {
            return Ok(Removal::AlreadyAbsent);
        }

        let command = format!(
            "{}qm set {vmid} --delete {}",
            sudo_prefix(inputs.use_sudo),
            outputs.interface
        );
        self.effector.run(&inputs.ssh, &command)?;
        Ok(Removal::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxmox::{MockProxmox, ProxmoxApi, test_api};
    use remote::MockEffector;
    use serde_json::json;

    const DRIVE: &str = "ata-WDC_WD40EFRX-68N32N0_WD-WCC7K0000000";

    fn setup(config: Value) -> (MockProxmox, MockEffector, DiskAttachProvider) {
        let proxmox = MockProxmox::new();
        proxmox.add_node("pve");
        proxmox.add_vm("pve", 510, config);
        proxmox.add_disk("pve", DRIVE);
        let ssh = MockEffector::new();
        let provider = DiskAttachProvider::new(Arc::new(proxmox.clone()), Arc::new(ssh.clone()));
        (proxmox, ssh, provider)
    }

    fn inputs() -> DiskAttachInputs {
        DiskAttachInputs {
            api: test_api(),
            ssh: SshConnection::with_password("10.0.0.2", "root", "x"),
            node: "pve".into(),
            vmid: 510,
            drive_id: DRIVE.into(),
            bus: DiskBus::Scsi,
            ssd: true,
            use_sudo: false,
        }
    }

    fn config(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_free_slot() {
        let cfg = config(json!({"scsi0": "local-lvm:vm-510-disk-0", "scsi1": "x", "ide2": "cdrom", "scsihw": "virtio-scsi-pci"}));
        assert_eq!(free_slot(&cfg, DiskBus::Scsi).as_deref(), Some("scsi2"));
        assert_eq!(free_slot(&cfg, DiskBus::Ide).as_deref(), Some("ide0"));

        let full = config(json!({"ide0": "a", "ide1": "b", "ide2": "c", "ide3": "d"}));
        assert_eq!(free_slot(&full, DiskBus::Ide), None);
    }

    #[test]
    fn test_attach_uses_first_free_slot() {
        let (_, ssh, provider) = setup(json!({"scsi0": "local-lvm:vm-510-disk-0"}));
        let created = provider.create(&inputs()).unwrap();
        assert_eq!(created.outputs.interface, "scsi1");
        assert_eq!(
            ssh.commands(),
            vec![format!("qm set 510 --scsi1 /dev/disk/by-id/{DRIVE},ssd=1")]
        );
    }

    #[test]
    fn test_already_attached_drive_is_rejected() {
        let (_, ssh, provider) =
            setup(json!({"scsi0": format!("/dev/disk/by-id/{DRIVE},ssd=1")}));
        let err = provider.create(&inputs()).unwrap_err();
        assert!(err.to_string().contains("already attached"));
        assert!(ssh.commands().is_empty());
    }

    #[test]
    fn test_unknown_drive_is_not_found() {
        let (_, _, provider) = setup(json!({}));
        let mut inputs = inputs();
        inputs.drive_id = "nvme-missing".into();
        let err = provider.create(&inputs).unwrap_err();
        assert!(err.downcast_ref::<Error>().is_some_and(Error::is_not_found));
    }

    #[test]
    fn test_delete_detaches_or_tolerates_absence() {
        let (proxmox, ssh, provider) = setup(json!({"scsi1": format!("/dev/disk/by-id/{DRIVE}")}));
        let outputs = DiskAttachOutputs {
            interface: "scsi1".into(),
        };
        assert_eq!(provider.delete("id", &inputs(), &outputs).unwrap(), Removal::Removed);
        assert_eq!(ssh.commands(), vec!["qm set 510 --delete scsi1".to_string()]);

        let gone = DiskAttachOutputs {
            interface: "scsi5".into(),
        };
        assert_eq!(provider.delete("id", &inputs(), &gone).unwrap(), Removal::AlreadyAbsent);

        let mut other_vm = inputs();
        other_vm.vmid = 999;
        assert_eq!(
            provider.delete("id", &other_vm, &outputs).unwrap(),
            Removal::AlreadyAbsent
        );
        assert_eq!(ssh.commands().len(), 1);
        assert!(proxmox.calls().iter().all(|call| call.starts_with("GET")));
    }

    #[test]
    fn test_delete_after_vm_removed() {
        let (proxmox, ssh, provider) = setup(json!({}));
        let mut removed = inputs();
        removed.vmid = 511;
        let raw = proxmox.vm_config("pve", 511).unwrap_err();
        assert!(!raw.is_not_found());

        let outputs = DiskAttachOutputs {
            interface: "scsi1".into(),
        };
        assert_eq!(
            provider.delete("id", &removed, &outputs).unwrap(),
            Removal::AlreadyAbsent
        );
        assert!(ssh.commands().is_empty());
        assert!(!proxmox.calls().contains(&"GET nodes/pve/qemu/511/config".to_string()));
    }

    #[test]
    fn test_bus_names() {
        let bus: DiskBus = serde_json::from_value(json!("virtio")).unwrap();
        assert_eq!(bus, DiskBus::Virtio);
        assert_eq!(bus.slots(), 0..=15);
        assert!(serde_json::from_value::<DiskBus>(json!("nvme")).is_err());
    }
}
