use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::paths::ENV_CONFIG;

#[derive(Parser)]
#[command(name = "homelab")]
#[command(version)]
#[command(about = "Declarative provisioning for a Proxmox homelab", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/homelab/homelab.toml)
    #[arg(short, long, global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Preview,

    /// Make the homelab match the config
    Apply(RunArgs),

    /// Remove every resource recorded for the stack
    Destroy(RunArgs),

    /// Inspect recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Check the config and the key files it names
    Validate,

    /// Write the key pair and kubeconfigs under the home directory
    Credentials,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct RunArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of resources applied in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one recorded resource, secrets redacted
    Show {
        /// Resource name, e.g. vm-kube1
        name: String,
    },
}
