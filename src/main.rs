mod cli;
mod commands;
mod config;
mod credentials;
mod engine;
mod paths;
mod program;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, StateCommand};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    /// `--config` or `HOMELAB_CONFIG`
    pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity; RUST_LOG applies when no flag is given
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut logger = env_logger::Builder::new();
    logger
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None);
    if cli.verbose == 0
        && !cli.quiet
        && let Ok(filters) = std::env::var("RUST_LOG")
    {
        logger.parse_filters(&filters);
    }
    logger.init();

    let ctx = Context {
        quiet: cli.quiet,
        config: cli.config,
    };

    match cli.command {
        Command::Preview => commands::deploy::preview(&ctx),
        Command::Apply(args) => commands::deploy::apply(&ctx, args.yes, args.jobs),
        Command::Destroy(args) => commands::deploy::destroy(&ctx, args.yes, args.jobs),
        Command::State(cmd) => match cmd {
            StateCommand::List => commands::state::list(&ctx),
            StateCommand::Show { name } => commands::state::show(&ctx, &name),
        },
        Command::Validate => commands::config::validate(&ctx),
        Command::Credentials => commands::credentials::write(&ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "homelab", &mut io::stdout());
            Ok(())
        }
    }
}
