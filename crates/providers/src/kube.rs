//! Fetching an admin kubeconfig from a cluster node.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use declarative::{Created, Provider, Removal};
use regex::Regex;
use remote::shell::{quote, sudo_prefix};
use remote::{Effector, Error, SshConnection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

const SECRETS_DIR: &str = "/var/lib/kubernetes/secrets";
const K3S_CONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

static SERVER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\s*server:\s*).*$").expect("valid server line pattern"));

/// How the cluster keeps its admin credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubeFlavor {
    /// PEM files under `/var/lib/kubernetes/secrets`.
    #[default]
    Nixos,
    /// A ready-made kubeconfig pointing at localhost.
    K3s,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubeconfigInputs {
    pub connection: SshConnection,
    /// URL the kubeconfig should point at, e.g. `https://10.0.0.20:6443`.
    pub api_server_url: String,
    #[serde(default)]
    pub flavor: KubeFlavor,
    #[serde(default)]
    pub use_sudo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigOutputs {
    pub kubeconfig: String,
    pub api_server_url: String,
}

/// Kubeconfig for the cluster admin built from base64 certificate material.
pub fn assemble_kubeconfig(server: &str, ca: &str, cert: &str, key: &str) -> String {
    format!(
        "apiVersion: v1
kind: Config
clusters:
- cluster:
    certificate-authority-data: {ca}
    server: {server}
  name: local
contexts:
- context:
    cluster: local
    user: cluster-admin
  name: local
current-context: local
preferences: {{}}
users:
- name: cluster-admin
  user:
    client-certificate-data: {cert}
    client-key-data: {key}
"
    )
}

/// Point an existing kubeconfig at `server`.
pub fn rewrite_server(kubeconfig: &str, server: &str) -> remote::Result<String> {
    if !SERVER_LINE.is_match(kubeconfig) {
        return Err(Error::malformed(K3S_CONFIG, "no server entry"));
    }
    Ok(SERVER_LINE
        .replace_all(kubeconfig, |caps: &regex::Captures<'_>| {
            format!("{}{server}", &caps[1])
        })
        .into_owned())
}

fn validate_base64(path: &str, encoded: &str) -> remote::Result<String> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(Error::malformed(path, "empty file"));
    }
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::malformed(path, format!("not base64: {e}")))?;
    Ok(encoded.to_string())
}

/// Reads cluster admin credentials and returns a kubeconfig for them.
pub struct KubeconfigProvider {
    effector: Arc<dyn Effector>,
}

impl KubeconfigProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }

    fn read_secret(&self, inputs: &KubeconfigInputs, name: &str) -> Result<String> {
        let path = format!("{SECRETS_DIR}/{name}.pem");
        let command = format!("{}base64 -w0 {}", sudo_prefix(inputs.use_sudo), quote(&path));
        let out = self.effector.run(&inputs.connection, &command)?;
        Ok(validate_base64(&path, &out.stdout)?)
    }

    fn nixos(&self, inputs: &KubeconfigInputs) -> Result<String> {
        let ca = self.read_secret(inputs, "ca")?;
        let cert = self.read_secret(inputs, "cluster-admin")?;
        let key = self.read_secret(inputs, "cluster-admin-key")?;
        Ok(assemble_kubeconfig(&inputs.api_server_url, &ca, &cert, &key))
    }

    fn k3s(&self, inputs: &KubeconfigInputs) -> Result<String> {
        let command = format!("{}cat {K3S_CONFIG}", sudo_prefix(inputs.use_sudo));
        let out = self.effector.run(&inputs.connection, &command)?;
        Ok(rewrite_server(&out.stdout, &inputs.api_server_url)?)
    }
}

impl Provider for KubeconfigProvider {
    type Inputs = KubeconfigInputs;
    type Outputs = KubeconfigOutputs;

    fn resource_type(&self) -> &'static str {
        "kube:config"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("kubeconfig from {} for {}", inputs.connection.host, inputs.api_server_url)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let kubeconfig = match inputs.flavor {
            KubeFlavor::Nixos => self.nixos(inputs),
            KubeFlavor::K3s => self.k3s(inputs),
        }
        .with_context(|| format!("Failed to fetch kubeconfig from {}", inputs.connection.host))?;
        Ok(Created::new(
            inputs.connection.host.clone(),
            KubeconfigOutputs {
                kubeconfig,
                api_server_url: inputs.api_server_url.clone(),
            },
        ))
    }

    fn delete(&self, _id: &str, _inputs: &Self::Inputs, _outputs: &Self::Outputs) -> Result<Removal> {
        Ok(Removal::retained("credentials stay on the cluster"))
    }
}
