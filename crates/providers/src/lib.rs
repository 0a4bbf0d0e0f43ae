//! # Providers
//!
//! Concrete [`declarative::Provider`] implementations for a Proxmox homelab.
//!
//! ## Modules
//!
//! - [`command`]: compose create/update/delete shell bodies from deferred fragments
//! - [`host`]: remote commands, files, reboots, reachability and IOMMU setup over SSH
//! - [`kube`]: fetch an admin kubeconfig from a cluster node
//! - [`proxmox`]: VM start, IP discovery, ISO download, disk passthrough, API users and tokens
//!
//! ## Example
//!
//! ```
//! use declarative::{ExecuteOptions, MemoryStateStore, NoProgress, ResourceOptions, Stack, apply};
//! use providers::command::Commands;
//! use providers::host::{RemoteCommandInputs, RemoteCommandProvider};
//! use remote::{MockEffector, SshConnection};
//! use std::sync::Arc;
//!
//! let effector = MockEffector::new();
//! let provider = Arc::new(RemoteCommandProvider::new(Arc::new(effector.clone())));
//!
//! let commands = Commands::new(false).create("qm start 501").create("sleep 5").build();
//! let inputs = commands.map(|commands| RemoteCommandInputs {
//!     connection: SshConnection::with_password("10.0.0.5", "root", "x"),
//!     commands,
//!     triggers: Vec::new(),
//! });
//!
//! let mut stack = Stack::new("lab");
//! stack.register("start-vm", &provider, inputs, ResourceOptions::new())?;
//! apply(stack, &MemoryStateStore::new("lab"), &ExecuteOptions::default(), &NoProgress)?;
//!
//! assert_eq!(effector.commands(), vec!["qm start 501 && sleep 5".to_string()]);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod command;
pub mod host;
pub mod kube;
pub mod proxmox;

pub use command::{CommandSet, Commands, compose, synthesize_update};
pub use kube::{KubeFlavor, KubeconfigInputs, KubeconfigOutputs, KubeconfigProvider};
pub use proxmox::{HttpConnector, MockProxmox, ProxmoxApi, ProxmoxConnector};
