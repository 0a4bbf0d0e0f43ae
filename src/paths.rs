//! Path resolution for homelab
//!
//! # Environment Variables
//!
//! - `HOMELAB_CONFIG` - Config file, used when `--config` is not given
//! - `HOMELAB_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For the config file:
//! 1. `--config`
//! 2. `HOMELAB_CONFIG` (read by the CLI parser)
//! 3. `~/.config/homelab/homelab.toml`
//!
//! For state_dir():
//! 1. `HOMELAB_STATE_DIR` environment variable
//! 2. `state_dir` in the `[stack]` section
//! 3. `XDG_STATE_HOME/homelab` (if set)
//! 4. `~/.local/state/homelab`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the config file
pub const ENV_CONFIG: &str = "HOMELAB_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "HOMELAB_STATE_DIR";

const CONFIG_FILE: &str = "homelab.toml";

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Could not determine home directory")
}

/// Config file to load: the explicit path, else the default location.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = expand(&path.to_string_lossy());
        log::debug!("Using config file: {}", path.display());
        return Ok(path);
    }
    let path = home_dir()?.join(".config").join("homelab").join(CONFIG_FILE);
    log::debug!("Using default config file: {}", path.display());
    Ok(path)
}

/// Directory holding state files.
pub fn state_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Some(dir) = configured {
        return Ok(expand(dir));
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("homelab");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    Ok(home_dir()?.join(".local").join("state").join("homelab"))
}

/// State file of one stack.
pub fn state_file(dir: &Path, stack: &str) -> PathBuf {
    dir.join(format!("{stack}.json"))
}

/// Where SSH key files are written.
pub fn ssh_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".ssh"))
}

/// Where kubeconfigs are written.
pub fn kube_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".kube"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
