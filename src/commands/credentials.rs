use anyhow::Result;
use declarative::StateStore;

use super::Workspace;
use crate::Context;
use crate::credentials::{CredentialFiles, KeyPair};
use crate::ui;

/// Write the admin key pair and every recorded kubeconfig under the home directory.
pub fn write(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let config = &workspace.config;
    let keys = KeyPair::read(&config.proxmox)?;
    let files = CredentialFiles::home()?;

    let mut written = files.write_key_pair(&config.stack.name, &keys)?;
    let state = workspace.store().load()?;
    written.extend(files.export_kubeconfigs(config, &state)?);

    for path in &written {
        ui::success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}
