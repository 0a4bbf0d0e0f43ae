//! IOMMU and VFIO passthrough on a Proxmox host.
//!
//! Enabling edits the kernel command line, loads the VFIO modules at boot,
//! regenerates boot configuration and reboots. The host is only usable for
//! passthrough once it is back, so create blocks until it is.

use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal, UpdateStrategy};
use regex::Regex;
use remote::shell::{self, sudo_prefix};
use remote::{Effector, RemoteFile, SshConnection, reboot_and_wait};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::reboot::RebootInputs;

const GRUB_DEFAULT: &str = "/etc/default/grub";
const VFIO_MODULES: &str = "/etc/modules-load.d/vfio.conf";
const VFIO_CONTENT: &str = "vfio\nvfio_iommu_type1\nvfio_pci";
const DEFAULT_KERNEL_ARGS: &str = "quiet";

static PCI_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([a-z0-9]{4}:[a-z0-9]{4})\]").expect("valid PCI id pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuVendor {
    Intel,
    Amd,
}

impl CpuVendor {
    /// Kernel command line enabling the IOMMU in passthrough mode.
    pub fn kernel_args(self) -> String {
        format!("{DEFAULT_KERNEL_ARGS} {self}_iommu=on iommu=pt")
    }
}

impl fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intel => f.write_str("intel"),
            Self::Amd => f.write_str("amd"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IommuInputs {
    pub reboot: RebootInputs,
    pub cpu_vendor: CpuVendor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IommuOutputs {
    pub kernel_args: String,
    /// Comma-separated vendor:device ids of NVIDIA VGA and audio functions.
    pub pci_ids: String,
}

/// Replace the default kernel command line in GRUB's config.
fn grub_command(kernel_args: &str) -> String {
    format!(
        r#"sed -i '/^GRUB_CMDLINE_LINUX_DEFAULT=/c\GRUB_CMDLINE_LINUX_DEFAULT="{kernel_args}"' {GRUB_DEFAULT}"#
    )
}

fn regenerate_boot(use_sudo: bool) -> [String; 2] {
    let sudo = sudo_prefix(use_sudo);
    [
        format!("{sudo}update-grub"),
        format!("{sudo}update-initramfs -u -k all"),
    ]
}

fn enable_command(kernel_args: &str, use_sudo: bool) -> Result<String> {
    let sudo = sudo_prefix(use_sudo);
    let modules = RemoteFile::new(VFIO_MODULES, VFIO_CONTENT, "644", use_sudo)?;
    let [grub, initramfs] = regenerate_boot(use_sudo);
    Ok(shell::chain(
        &[
            format!("{sudo}{}", grub_command(kernel_args)),
            format!("{sudo}chmod 644 {GRUB_DEFAULT}"),
            modules.write_command(),
            grub,
            initramfs,
        ],
        false,
    ))
}

fn disable_command(use_sudo: bool) -> Result<String> {
    let sudo = sudo_prefix(use_sudo);
    let modules = RemoteFile::new(VFIO_MODULES, "", "644", use_sudo)?;
    let [grub, initramfs] = regenerate_boot(use_sudo);
    Ok(shell::chain(
        &[
            format!("{sudo}{}", grub_command(DEFAULT_KERNEL_ARGS)),
            modules.remove_command(),
            grub,
            initramfs,
        ],
        false,
    ))
}

/// Vendor:device ids of NVIDIA VGA and audio functions in `lspci -nn` output.
pub fn parse_pci_ids(lspci: &str) -> String {
    lspci
        .lines()
        .filter(|line| line.contains("NVIDIA") && (line.contains("VGA") || line.contains("Audio")))
        .filter_map(|line| PCI_ID.captures(line))
        .map(|caps| caps[1].to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Enables IOMMU passthrough and reports the GPU functions to pass through.
pub struct IommuProvider {
    effector: Arc<dyn Effector>,
}

impl IommuProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }

    fn run_and_reboot(&self, reboot: &RebootInputs, command: &str) -> Result<()> {
        let connection = &reboot.connection;
        self.effector
            .run(connection, command)
            .with_context(|| format!("Failed to configure IOMMU on {}", connection.host))?;
        reboot_and_wait(self.effector.as_ref(), connection, &reboot.config())?;
        Ok(())
    }

    fn pci_ids(&self, connection: &SshConnection) -> Result<String> {
        let out = self.effector.run(connection, "lspci -nn")?;
        let ids = parse_pci_ids(&out.stdout);
        if ids.is_empty() {
            log::warn!("no NVIDIA VGA or audio functions found on {}", connection.host);
        }
        Ok(ids)
    }
}

impl Provider for IommuProvider {
    type Inputs = IommuInputs;
    type Outputs = IommuOutputs;

    fn resource_type(&self) -> &'static str {
        "host:iommu"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!(
            "enable {} IOMMU on {}",
            inputs.cpu_vendor, inputs.reboot.connection.host
        )
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let kernel_args = inputs.cpu_vendor.kernel_args();
        let command = enable_command(&kernel_args, inputs.reboot.use_sudo)?;
        self.run_and_reboot(&inputs.reboot, &command)?;
        let pci_ids = self.pci_ids(&inputs.reboot.connection)?;
        Ok(Created::new(
            inputs.reboot.connection.host.clone(),
            IommuOutputs {
                kernel_args,
                pci_ids,
            },
        ))
    }

    /// Re-enabling on the same host overwrites the previous settings.
    fn update_strategy(&self, old: &Self::Inputs, new: &Self::Inputs) -> UpdateStrategy {
        if old.reboot.connection == new.reboot.connection {
            UpdateStrategy::InPlace
        } else {
            UpdateStrategy::Replace
        }
    }

    fn update(
        &self,
        id: &str,
        old: &Self::Inputs,
        old_outputs: &Self::Outputs,
        new: &Self::Inputs,
    ) -> Result<Created<Self::Outputs>> {
        if self.update_strategy(old, new) == UpdateStrategy::Replace {
            self.delete(id, old, old_outputs)?;
        }
        self.create(new)
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        let command = disable_command(inputs.reboot.use_sudo)?;
        self.run_and_reboot(&inputs.reboot, &command)?;
        Ok(Removal::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::{CommandOutput, MockEffector};

    const LSPCI: &str = "\
00:02.0 VGA compatible controller [0300]: Intel Corporation HD Graphics 630 [8086:5912] (rev 04)
01:00.0 VGA compatible controller [0300]: NVIDIA Corporation GP104 [GeForce GTX 1080] [10de:1b82] (rev a1)
01:00.1 Audio device [0403]: NVIDIA Corporation GP104 High Definition Audio Controller [10de:10f0] (rev a1)
02:00.0 Ethernet controller [0200]: Intel Corporation I211 Gigabit Network Connection [8086:1539] (rev 03)
";

    fn inputs(vendor: CpuVendor) -> IommuInputs {
        let mut reboot = RebootInputs::new(SshConnection::with_password("10.0.0.2", "root", "x"));
        reboot.grace_secs = 0;
        reboot.timeout_secs = 5;
        IommuInputs {
            reboot,
            cpu_vendor: vendor,
        }
    }

    #[test]
    fn test_parse_pci_ids() {
        assert_eq!(parse_pci_ids(LSPCI), "10de:1b82,10de:10f0");
        assert_eq!(parse_pci_ids(""), "");
    }

    #[test]
    fn test_kernel_args() {
        assert_eq!(CpuVendor::Intel.kernel_args(), "quiet intel_iommu=on iommu=pt");
        assert_eq!(CpuVendor::Amd.kernel_args(), "quiet amd_iommu=on iommu=pt");
    }

    #[test]
    fn test_enable_command_order_and_sudo() {
        let command = enable_command("quiet intel_iommu=on iommu=pt", true).unwrap();
        let steps: Vec<&str> = command.split(" && ").collect();
        assert_eq!(
            steps[0],
            r#"sudo sed -i '/^GRUB_CMDLINE_LINUX_DEFAULT=/c\GRUB_CMDLINE_LINUX_DEFAULT="quiet intel_iommu=on iommu=pt"' /etc/default/grub"#
        );
        assert_eq!(steps[1], "sudo chmod 644 /etc/default/grub");
        assert!(steps.iter().all(|s| s.starts_with("sudo ") || s.starts_with("printf")));
        assert_eq!(steps[steps.len() - 2], "sudo update-grub");
        assert_eq!(steps[steps.len() - 1], "sudo update-initramfs -u -k all");
    }

    #[test]
    fn test_create_reboots_then_reads_pci_ids() {
        let mock = MockEffector::new();
        mock.respond("lspci -nn", CommandOutput::ok(LSPCI));
        let provider = IommuProvider::new(Arc::new(mock.clone()));

        let created = provider.create(&inputs(CpuVendor::Amd)).unwrap();
        assert_eq!(created.outputs.pci_ids, "10de:1b82,10de:10f0");
        assert_eq!(created.outputs.kernel_args, "quiet amd_iommu=on iommu=pt");

        let commands = mock.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].contains("amd_iommu=on"));
        assert!(commands[0].contains("vfio_iommu_type1"));
        assert!(commands[1].contains("/sbin/reboot -f"));
        assert_eq!(commands[2], "lspci -nn");
    }

    #[test]
    fn test_delete_restores_default() {
        let mock = MockEffector::new();
        let provider = IommuProvider::new(Arc::new(mock.clone()));
        let outputs = IommuOutputs {
            kernel_args: String::new(),
            pci_ids: String::new(),
        };
        let removal = provider.delete("10.0.0.2", &inputs(CpuVendor::Intel), &outputs).unwrap();
        assert_eq!(removal, Removal::Removed);

        let commands = mock.commands();
        assert!(commands[0].contains(r#"GRUB_CMDLINE_LINUX_DEFAULT="quiet""#));
        assert!(commands[0].contains("rm -f '/etc/modules-load.d/vfio.conf'"));
        assert!(commands[1].contains("/sbin/reboot -f"));
    }
}
