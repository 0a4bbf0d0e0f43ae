//! ISO images downloaded into Proxmox storage.

use super::ProxmoxConnector;
use anyhow::{Context, Result, bail};
use declarative::{Created, Provider, Removal};
use remote::{ApiConnection, PollCondition, wait_for_condition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn default_storage() -> String {
    "local".to_string()
}

const fn default_timeout_secs() -> u64 {
    1_800
}

const fn default_interval_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsoImageInputs {
    pub api: ApiConnection,
    pub node: String,
    pub url: String,
    #[serde(default = "default_storage")]
    pub storage: String,
    /// Stored file name; defaults to the last path segment of `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl IsoImageInputs {
    pub fn new(api: ApiConnection, node: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            api,
            node: node.into(),
            url: url.into(),
            storage: default_storage(),
            filename: None,
            timeout_secs: default_timeout_secs(),
            interval_ms: default_interval_ms(),
        }
    }

    fn filename(&self) -> Result<String> {
        if let Some(name) = &self.filename {
            return Ok(name.clone());
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        match path.rsplit('/').next() {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => bail!("cannot derive a file name from {}", self.url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoImageOutputs {
    /// Volume id, e.g. `local:iso/nixos.iso`.
    pub volid: String,
}

/// Downloads an ISO on the hypervisor and waits for the task to finish.
pub struct IsoImageProvider {
    proxmox: Arc<dyn ProxmoxConnector>,
}

impl IsoImageProvider {
    pub fn new(proxmox: Arc<dyn ProxmoxConnector>) -> Self {
        Self { proxmox }
    }
}

impl Provider for IsoImageProvider {
    type Inputs = IsoImageInputs;
    type Outputs = IsoImageOutputs;

    fn resource_type(&self) -> &'static str {
        "proxmox:iso"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("download {} to {}", inputs.url, inputs.storage)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let api = self.proxmox.open(&inputs.api);
        let filename = inputs.filename()?;
        let node = inputs.node.as_str();

        let upid = api
            .download_iso(node, &inputs.storage, &inputs.url, &filename)
            .with_context(|| format!("Failed to start download of {}", inputs.url))?;
        log::info!("downloading {} as {filename}", inputs.url);

        let condition = PollCondition::new(
            format!("download of {filename}"),
            Duration::from_millis(inputs.interval_ms),
            Duration::from_secs(inputs.timeout_secs),
        );
        let mut status = None;
        wait_for_condition(&condition, || {
            let current = api.task_status(node, &upid)?;
            let done = !current.is_running();
            status = Some(current);
            Ok(done)
        })?;

        if let Some(status) = status.filter(|s| !s.succeeded()) {
            bail!(
                "download of {} failed: {}",
                inputs.url,
                status.exitstatus.as_deref().unwrap_or("unknown status")
            );
        }

        let volid = format!("{}:iso/{filename}", inputs.storage);
        Ok(Created::new(volid.clone(), IsoImageOutputs { volid }))
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, outputs: &Self::Outputs) -> Result<Removal> {
        let api = self.proxmox.open(&inputs.api);
        match api.delete_volume(&inputs.node, &inputs.storage, &outputs.volid) {
            Ok(()) => Ok(Removal::Removed),
            Err(e) if e.is_not_found() => Ok(Removal::AlreadyAbsent),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", outputs.volid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxmox::{MockProxmox, test_api};

    fn inputs() -> IsoImageInputs {
        let mut inputs = IsoImageInputs::new(
            test_api(),
            "pve",
            "https://releases.example.org/nixos-24.05-minimal.iso?mirror=1",
        );
        inputs.interval_ms = 1;
        inputs
    }

    #[test]
    fn test_download_waits_for_task() {
        let mock = MockProxmox::new();
        let provider = IsoImageProvider::new(Arc::new(mock.clone()));

        let created = provider.create(&inputs()).unwrap();
        assert_eq!(created.outputs.volid, "local:iso/nixos-24.05-minimal.iso");
        assert!(mock.has_volume("local:iso/nixos-24.05-minimal.iso"));
        let polls = mock
            .calls()
            .iter()
            .filter(|call| call.ends_with("/status"))
            .count();
        assert_eq!(polls, 2);
    }

    #[test]
    fn test_failed_task_fails_create() {
        let mock = MockProxmox::new();
        mock.fail_downloads("404 Not Found");
        let provider = IsoImageProvider::new(Arc::new(mock));

        let err = provider.create(&inputs()).unwrap_err();
        assert!(err.to_string().contains("404 Not Found"));
    }

    #[test]
    fn test_delete_tolerates_missing_volume() {
        let mock = MockProxmox::new();
        let provider = IsoImageProvider::new(Arc::new(mock.clone()));
        let created = provider.create(&inputs()).unwrap();

        assert_eq!(
            provider.delete(&created.id, &inputs(), &created.outputs).unwrap(),
            Removal::Removed
        );
        assert!(!mock.has_volume(&created.outputs.volid));
        assert_eq!(
            provider.delete(&created.id, &inputs(), &created.outputs).unwrap(),
            Removal::AlreadyAbsent
        );
    }

    #[test]
    fn test_filename_from_url() {
        let mut inputs = inputs();
        assert_eq!(inputs.filename().unwrap(), "nixos-24.05-minimal.iso");
        inputs.filename = Some("custom.iso".into());
        assert_eq!(inputs.filename().unwrap(), "custom.iso");
        inputs.filename = None;
        inputs.url = "https://example.org/".into();
        assert!(inputs.filename().is_err());
    }
}
