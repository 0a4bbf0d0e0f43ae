use anyhow::Result;

use super::Workspace;
use crate::Context;
use crate::credentials::KeyPair;
use crate::ui;

/// Load the config, check it and the key files it names.
pub fn validate(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let config = &workspace.config;
    KeyPair::read(&config.proxmox)?;

    ui::success("Configuration is valid");
    ui::kv("Stack", &config.stack.name);
    ui::kv("Host", &format!("{} (node {})", config.proxmox.host, config.proxmox.node));
    ui::kv("VMs", &config.vms.len().to_string());
    ui::kv("State file", &workspace.state_file.display().to_string());
    Ok(())
}
