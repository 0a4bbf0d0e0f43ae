//! `preview`, `apply` and `destroy`

use anyhow::{Result, bail};
use declarative::{AutoConfirm, ConfirmCallback, ExecuteSummary, StateStore};

use super::Workspace;
use crate::Context;
use crate::config::Config;
use crate::credentials::{CredentialFiles, KeyPair};
use crate::engine::display::display_plan;
use crate::engine::{Deployment, Operation, RunOptions, TerminalConfirm};
use crate::program::Providers;
use crate::ui;

pub fn preview(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let keys = KeyPair::read(&workspace.config.proxmox)?;
    let providers = Providers::live();
    let store = workspace.store();
    let deployment = Deployment {
        config: &workspace.config,
        keys: &keys,
        providers: &providers,
        store: &store,
    };

    let plan = deployment.plan(Operation::Apply)?;
    display_plan(&plan);
    Ok(())
}

pub fn apply(ctx: &Context, yes: bool, jobs: usize) -> Result<()> {
    run(ctx, Operation::Apply, yes, jobs)
}

pub fn destroy(ctx: &Context, yes: bool, jobs: usize) -> Result<()> {
    run(ctx, Operation::Destroy, yes, jobs)
}

fn run(ctx: &Context, operation: Operation, yes: bool, jobs: usize) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let keys = KeyPair::read(&workspace.config.proxmox)?;
    let providers = Providers::live();
    let store = workspace.store();
    let deployment = Deployment {
        config: &workspace.config,
        keys: &keys,
        providers: &providers,
        store: &store,
    };

    let mut confirm: Box<dyn ConfirmCallback> = if yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(TerminalConfirm::for_operation(operation))
    };
    let opts = RunOptions {
        jobs: jobs.max(1),
        quiet: ctx.quiet,
    };
    let summary = deployment.run(operation, &opts, confirm.as_mut())?;

    if operation == Operation::Apply {
        export_kubeconfigs(&workspace.config, &store, &CredentialFiles::home()?)?;
    }
    check(&summary)
}

/// Write the kubeconfig of every VM that has one recorded.
fn export_kubeconfigs(
    config: &Config,
    store: &dyn StateStore,
    files: &CredentialFiles,
) -> Result<()> {
    let state = store.load()?;
    for path in files.export_kubeconfigs(config, &state)? {
        ui::success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}

fn check(summary: &ExecuteSummary) -> Result<()> {
    if summary.failed > 0 {
        bail!("{} resources failed", summary.failed);
    }
    Ok(())
}
