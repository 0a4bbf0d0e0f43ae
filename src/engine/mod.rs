//! Terminal front end for the declarative engine
//!
//! 1. Declaring - Build the stack from config
//! 2. Previewing - Compare declared inputs with recorded state
//! 3. Executing - Confirm, then apply or destroy with progress

pub mod display;
pub mod executor;
pub mod progress;

pub use executor::{Deployment, RunOptions, TerminalConfirm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Apply,
    Destroy,
}
