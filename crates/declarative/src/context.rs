//! Progress and confirmation callbacks
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific terminal UI.

use crate::types::ApplyResult;
use anyhow::Result;

/// Progress callback for execution operations
///
/// Resources within a level run on worker threads, so implementations
/// must be shareable between them.
pub trait ProgressCallback: Sync {
    /// Called when starting a level of independent resources
    fn on_level_start(&self, index: usize, count: usize);

    /// Called when starting to apply a single resource
    fn on_resource_start(&self, name: &str, description: &str);

    /// Called when a resource application completes
    fn on_resource_complete(&self, name: &str, result: &ApplyResult);

    /// Called when a level completes
    fn on_level_complete(&self, index: usize);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_level_start(&self, _index: usize, _count: usize) {}
    fn on_resource_start(&self, _name: &str, _description: &str) {}
    fn on_resource_complete(&self, _name: &str, _result: &ApplyResult) {}
    fn on_level_complete(&self, _index: usize) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
