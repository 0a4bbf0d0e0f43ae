//! Preview, confirm, then apply or destroy

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{
    ConfirmCallback, ExecuteOptions, ExecuteSummary, Plan, StateStore, apply, destroy, preview,
    preview_destroy,
};
use dialoguer::Confirm;

use super::Operation;
use super::display::{display_plan, print_summary};
use super::progress::BarProgress;
use crate::config::Config;
use crate::credentials::KeyPair;
use crate::program::{self, Providers};

/// Everything needed to declare and run the stack.
pub struct Deployment<'a> {
    pub config: &'a Config,
    pub keys: &'a KeyPair,
    pub providers: &'a Providers,
    pub store: &'a dyn StateStore,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on resources applied concurrently
    pub jobs: usize,
    /// Hide the progress bar
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            quiet: false,
        }
    }
}

/// Asks on the terminal.
pub struct TerminalConfirm {
    default: bool,
}

impl TerminalConfirm {
    /// Enter accepts for apply, declines for destroy.
    pub fn for_operation(operation: Operation) -> Self {
        Self {
            default: operation == Operation::Apply,
        }
    }
}

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(self.default)
            .interact()?;
        Ok(confirmed)
    }
}

impl Deployment<'_> {
    /// What `operation` would change, without touching anything.
    pub fn plan(&self, operation: Operation) -> Result<Plan> {
        match operation {
            Operation::Apply => {
                let stack = program::build(self.config, self.keys, self.providers)?;
                preview(stack, self.store).context("Failed to preview the stack")
            }
            Operation::Destroy => {
                preview_destroy(self.store).context("Failed to preview the teardown")
            }
        }
    }

    /// Show the plan, ask, then run it.
    pub fn run(
        &self,
        operation: Operation,
        opts: &RunOptions,
        confirm: &mut dyn ConfirmCallback,
    ) -> Result<ExecuteSummary> {
        let plan = self.plan(operation)?;
        display_plan(&plan);

        let pending = plan.pending().count();
        if pending == 0 {
            return Ok(ExecuteSummary::default());
        }

        let prompt = match operation {
            Operation::Apply => "Apply these changes?",
            Operation::Destroy => "Destroy every resource of this stack?",
        };
        if !confirm.confirm(prompt)? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(ExecuteSummary {
                skipped: pending,
                ..Default::default()
            });
        }

        // Previewing consumed the stack; declare it again for the run.
        let stack = program::build(self.config, self.keys, self.providers)?;
        let exec = ExecuteOptions { jobs: opts.jobs };
        let progress = BarProgress::new(plan.changes.len(), opts.quiet);
        let summary = match operation {
            Operation::Apply => apply(stack, self.store, &exec, &progress),
            Operation::Destroy => destroy(stack, self.store, &exec, &progress),
        };
        progress.finish();
        let summary = summary?;

        print_summary(&summary, operation);
        Ok(summary)
    }
}
