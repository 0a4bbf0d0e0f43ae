use anyhow::Result;
use declarative::JsonStateStore;
use std::path::PathBuf;

use crate::Context;
use crate::config::Config;
use crate::paths;

pub mod config;
pub mod credentials;
pub mod deploy;
pub mod state;

/// A loaded config and the state file of its stack.
pub struct Workspace {
    pub config: Config,
    pub state_file: PathBuf,
}

impl Workspace {
    pub fn load(ctx: &Context) -> Result<Self> {
        let path = paths::config_file(ctx.config.as_deref())?;
        let config = Config::load(&path)?;
        let dir = paths::state_dir(config.stack.state_dir.as_deref())?;
        let state_file = paths::state_file(&dir, &config.stack.name);
        log::debug!("State file: {}", state_file.display());
        Ok(Self { config, state_file })
    }

    pub fn store(&self) -> JsonStateStore {
        JsonStateStore::new(&self.config.stack.name, &self.state_file)
    }
}
