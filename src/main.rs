mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global options shared by every command
pub struct AppContext {
    pub verbose: u8,
    pub quiet: bool,
    /// Contexts named with `-t/--target`, in order
    pub targets: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = AppContext {
        verbose: cli.verbose,
        quiet: cli.quiet,
        targets: cli.targets,
    };

    match cli.command {
        Command::Save(args) => commands::save::run(&ctx, args),
        Command::Verify(args) => commands::verify::run(&ctx, args),
        Command::Status(args) => commands::status::run(&ctx, args),
        Command::Services(cmd) => commands::services::run(&ctx, cmd),
        Command::Remove { yes } => commands::remove::run(&ctx, yes),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "provision", &mut io::stdout());
            Ok(())
        }
    }
}
