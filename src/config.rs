//! The `homelab.toml` schema
//!
//! ```toml
//! [stack]
//! name = "homelab"
//!
//! [proxmox]
//! host = "192.168.10.2"
//! node = "pve1"
//! admin_user = "automation"
//! private_key = "~/.ssh/homelab_private_key.pem"
//! public_key = "~/.ssh/homelab_public_key.ssh"
//! cpu_vendor = "amd"
//!
//! [[vms]]
//! vmid = 501
//! name = "kube1"
//! template = 9000
//! memory = 8192
//! cores = 4
//! disks = [{ drive_id = "ata-WDC_WD40EFRX-68N32N0_WD-WCC7K0000000", bus = "sata" }]
//!
//! [vms.kubeconfig]
//! flavor = "nixos"
//! ```

use providers::host::CpuVendor;
use providers::proxmox::DiskBus;
use providers::KubeFlavor;
use remote::FileMode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted when `root_password` is not in the file
pub const ENV_ROOT_PASSWORD: &str = "HOMELAB_ROOT_PASSWORD";

/// Proxmox reserves ids below 100.
const MIN_VMID: u32 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{} has {} problem(s):\n  - {}", .path.display(), .problems.len(), .problems.join("\n  - "))]
    Invalid { path: PathBuf, problems: Vec<String> },
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub stack: StackConfig,
    pub proxmox: ProxmoxConfig,
    #[serde(default)]
    pub vms: Vec<VmConfig>,
    /// Extra files placed on the hypervisor
    #[serde(default)]
    pub files: Vec<FileConfig>,
    /// Extra commands run on the hypervisor
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    pub name: String,
    #[serde(default)]
    pub state_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxmoxConfig {
    pub host: String,
    pub node: String,
    /// Password of `root`, used only for the initial host setup
    #[serde(default)]
    pub root_password: Option<String>,
    /// Unix and API user created for automation
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// PEM private key of the admin user
    pub private_key: String,
    /// OpenSSH public key installed for the admin user and in VMs
    pub public_key: String,
    /// Same private key in OpenSSH format, exported alongside the PEM
    #[serde(default)]
    pub private_key_ssh: Option<String>,
    /// Same public key in PEM format, exported alongside the OpenSSH one
    #[serde(default)]
    pub public_key_pem: Option<String>,
    #[serde(default = "default_api_realm")]
    pub api_realm: String,
    #[serde(default = "default_api_token_name")]
    pub api_token_name: String,
    /// Enables IOMMU passthrough when set
    #[serde(default)]
    pub cpu_vendor: Option<CpuVendor>,
    #[serde(default)]
    pub verify_ssl: bool,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    #[serde(default = "default_reboot_grace_secs")]
    pub reboot_grace_secs: u64,
    #[serde(default = "default_reboot_timeout_secs")]
    pub reboot_timeout_secs: u64,
}

impl ProxmoxConfig {
    /// The configured root password, else `HOMELAB_ROOT_PASSWORD`.
    pub fn root_password(&self) -> Option<String> {
        self.root_password
            .clone()
            .or_else(|| std::env::var(ENV_ROOT_PASSWORD).ok())
            .filter(|p| !p.is_empty())
    }

    /// API user id, e.g. `automation@pve`.
    pub fn api_userid(&self) -> String {
        format!("{}@{}", self.admin_user, self.api_realm)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    pub vmid: u32,
    pub name: String,
    /// Template the VM is cloned from
    pub template: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default = "default_cores")]
    pub cores: u32,
    #[serde(default = "default_start_grace_secs")]
    pub start_grace_secs: u64,
    /// Guest interface whose address is discovered
    #[serde(default = "default_nic")]
    pub nic: String,
    /// Cloud-init user that receives the public key
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    /// Refuse to replace or delete this VM
    #[serde(default)]
    pub protect: bool,
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
    #[serde(default)]
    pub iso: Option<IsoConfig>,
    #[serde(default)]
    pub kubeconfig: Option<KubeconfigConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskConfig {
    /// Name under `/dev/disk/by-id`
    pub drive_id: String,
    #[serde(default = "default_bus")]
    pub bus: String,
    #[serde(default)]
    pub ssd: bool,
}

impl DiskConfig {
    pub fn bus(&self) -> Option<DiskBus> {
        match self.bus.as_str() {
            "ide" => Some(DiskBus::Ide),
            "sata" => Some(DiskBus::Sata),
            "scsi" => Some(DiskBus::Scsi),
            "virtio" => Some(DiskBus::Virtio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsoConfig {
    pub url: String,
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubeconfigConfig {
    /// Defaults to `https://<discovered address>:6443`
    #[serde(default)]
    pub api_server_url: Option<String>,
    #[serde(default)]
    pub flavor: KubeFlavor,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub path: String,
    pub content: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub name: String,
    pub create: Vec<String>,
    #[serde(default)]
    pub update: Option<Vec<String>>,
    #[serde(default)]
    pub delete: Option<Vec<String>>,
    /// Any change here re-runs the command
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    /// Reboot the hypervisor after the command runs
    #[serde(default)]
    pub reboot: bool,
}

fn default_admin_user() -> String {
    "automation".to_string()
}

fn default_api_realm() -> String {
    "pve".to_string()
}

fn default_api_token_name() -> String {
    "provider".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_reboot_grace_secs() -> u64 {
    30
}

const fn default_reboot_timeout_secs() -> u64 {
    300
}

const fn default_memory() -> u32 {
    2048
}

const fn default_cores() -> u32 {
    2
}

const fn default_start_grace_secs() -> u64 {
    30
}

fn default_nic() -> String {
    "eth0".to_string()
}

fn default_ssh_user() -> String {
    "ops".to_string()
}

fn default_bus() -> String {
    "scsi".to_string()
}

fn default_storage() -> String {
    "local".to_string()
}

fn default_mode() -> String {
    "644".to_string()
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    /// Parse and validate config text; `path` is only used in errors.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let problems = config.validate();
        if problems.is_empty() {
            log::debug!(
                "Loaded {} with {} VM(s)",
                path.display(),
                config.vms.len()
            );
            Ok(config)
        } else {
            Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                problems,
            })
        }
    }

    /// Every problem with the configuration; empty when it is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        self.validate_stack(&mut problems);
        self.validate_proxmox(&mut problems);
        self.validate_vms(&mut problems);
        self.validate_files(&mut problems);
        self.validate_commands(&mut problems);
        problems
    }

    fn validate_stack(&self, problems: &mut Vec<String>) {
        let name = &self.stack.name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            problems.push(format!(
                "stack.name '{name}' must be non-empty and use only letters, digits, '-' or '_'"
            ));
        }
    }

    fn validate_proxmox(&self, problems: &mut Vec<String>) {
        let proxmox = &self.proxmox;
        if proxmox.host.is_empty() {
            problems.push("proxmox.host is empty".to_string());
        }
        if proxmox.node.is_empty() {
            problems.push("proxmox.node is empty".to_string());
        }
        if proxmox.root_password().is_none() {
            problems.push(format!(
                "proxmox.root_password is not set and {ENV_ROOT_PASSWORD} is empty"
            ));
        }
        if proxmox.admin_user.is_empty() || proxmox.admin_user == "root" {
            problems.push("proxmox.admin_user must be a non-root user".to_string());
        }
        if proxmox.api_token_name.is_empty() {
            problems.push("proxmox.api_token_name is empty".to_string());
        }
    }

    fn validate_vms(&self, problems: &mut Vec<String>) {
        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        let mut drives: BTreeMap<&str, &str> = BTreeMap::new();

        for vm in &self.vms {
            let at = format!("vms[{}]", vm.name);
            if !ids.insert(vm.vmid) {
                problems.push(format!("{at}: vmid {} is used more than once", vm.vmid));
            }
            if !names.insert(vm.name.as_str()) {
                problems.push(format!("{at}: name is used more than once"));
            }
            if vm.name.is_empty() {
                problems.push(format!("vms[{}]: name is empty", vm.vmid));
            }
            if vm.vmid < MIN_VMID {
                problems.push(format!("{at}: vmid {} is below {MIN_VMID}", vm.vmid));
            }
            if vm.template == vm.vmid {
                problems.push(format!("{at}: template {} is the VM itself", vm.template));
            }
            if vm.memory == 0 || vm.cores == 0 {
                problems.push(format!("{at}: memory and cores must be positive"));
            }

            for disk in &vm.disks {
                if disk.bus().is_none() {
                    problems.push(format!(
                        "{at}: disk {} has unknown bus '{}' (expected ide, sata, scsi or virtio)",
                        disk.drive_id, disk.bus
                    ));
                }
                if let Some(owner) = drives.insert(disk.drive_id.as_str(), vm.name.as_str()) {
                    problems.push(format!(
                        "{at}: disk {} is also attached to {owner}",
                        disk.drive_id
                    ));
                }
            }

            if let Some(iso) = &vm.iso
                && !(iso.url.starts_with("https://") || iso.url.starts_with("http://"))
            {
                problems.push(format!("{at}: iso.url '{}' is not an http(s) URL", iso.url));
            }

            if let Some(url) = vm.kubeconfig.as_ref().and_then(|k| k.api_server_url.as_ref())
                && !url.starts_with("https://")
            {
                problems.push(format!(
                    "{at}: kubeconfig.api_server_url '{url}' must start with https://"
                ));
            }
        }
    }

    fn validate_files(&self, problems: &mut Vec<String>) {
        let mut paths = BTreeSet::new();
        for file in &self.files {
            if !file.path.starts_with('/') {
                problems.push(format!("files[{}]: path must be absolute", file.path));
            }
            if !paths.insert(file.path.as_str()) {
                problems.push(format!("files[{}]: path is used more than once", file.path));
            }
            if let Err(e) = FileMode::parse(&file.mode) {
                problems.push(format!("files[{}]: {e}", file.path));
            }
        }
    }

    fn validate_commands(&self, problems: &mut Vec<String>) {
        let mut names = BTreeSet::new();
        for command in &self.commands {
            if command.name.is_empty() {
                problems.push("commands: a command has no name".to_string());
            } else if !names.insert(command.name.as_str()) {
                problems.push(format!("commands[{}]: name is used more than once", command.name));
            }
            if command.create.iter().all(|c| c.trim().is_empty()) {
                problems.push(format!("commands[{}]: create is empty", command.name));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
