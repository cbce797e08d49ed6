use anyhow::{Context, Result};
use azfw_policy::config::Environments;
use azfw_policy::report::render_environments;
use clap::Parser;

mod cli;
mod compare_cmd;
mod export_cmd;
mod import_cmd;
mod path_guard;
mod sync_cmd;
mod workspace;

use cli::{Cli, Command};
use workspace::Workspace;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.global.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let ws = Workspace::open(&cli.global)?;
    match cli.command {
        Command::Import(args) => import_cmd::run_import(&ws, args),
        Command::Sync(args) => sync_cmd::run_sync(&ws, args),
        Command::Export(args) => export_cmd::run_export(&ws, args),
        Command::Compare(args) => compare_cmd::run_compare(&ws, args),
        Command::Environments => run_environments(&ws),
    }
}

fn run_environments(ws: &Workspace) -> Result<()> {
    let envs = Environments::load(&ws.paths.firewalls).with_context(|| {
        format!("failed to load environments from {}", ws.paths.firewalls.display())
    })?;
    if envs.is_empty() {
        log::warn!("no environments in {}", ws.paths.firewalls.display());
        return Ok(());
    }
    println!("{}", render_environments(&envs));
    Ok(())
}
