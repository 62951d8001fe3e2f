//! CLI module for FlexGet
//!
//! Provides commands:
//! - `execute`: run tasks once and exit
//! - `daemon`: run scheduled tasks until interrupted
//! - `check`: validate the config file
//! - `schedules`: list triggers and their next run

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flexget_core::Manager;

use crate::settings::Settings;

pub mod check;
pub mod daemon;
pub mod execute;

/// FlexGet automation CLI
#[derive(Parser, Debug)]
#[command(name = "flexget")]
#[command(about = "Multipurpose automation tool for content feeds")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ./config.yml, then ~/.flexget/config.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tasks once
    Execute(ExecuteArgs),
    /// Run scheduled tasks until interrupted
    Daemon,
    /// Validate the config file
    Check,
    /// List schedules and their next run
    Schedules,
}

#[derive(Args, Debug, Default)]
pub struct ExecuteArgs {
    /// Tasks to run; glob patterns allowed
    #[arg(long, num_args = 1..)]
    pub tasks: Vec<String>,
    /// Run without side effects and without learning
    #[arg(long)]
    pub test: bool,
    /// Only learn: entries are remembered but nothing is output
    #[arg(long)]
    pub learn: bool,
    /// Replace the task inputs with one entry
    #[arg(long, num_args = 1..=2, value_names = ["TITLE", "URL"])]
    pub inject: Option<Vec<String>>,
}

/// Run the CLI command
pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let path = resolve_config(cli.config.as_deref())?;
    match command {
        Commands::Check => check::run(&path).await,
        Commands::Execute(args) => execute::run(load_manager(&path).await?, &settings, args).await,
        Commands::Daemon => daemon::run(load_manager(&path).await?, &settings).await,
        Commands::Schedules => check::schedules(load_manager(&path).await?, &settings).await,
    }
}

/// Build a manager and load the config file into it
pub async fn load_manager(path: &Path) -> Result<Arc<Manager>> {
    let manager = Manager::with_builtins();
    manager
        .load_config_file(path)
        .await
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    Ok(manager)
}

/// Pick the config file: the explicit one, else the first that exists
fn resolve_config(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let mut candidates = vec![PathBuf::from("config.yml")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".flexget").join("config.yml"));
    }
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("flexget").join("config.yml"));
    }
    match candidates.iter().find(|p| p.is_file()) {
        Some(path) => Ok(path.clone()),
        None => bail!(
            "No config file found, looked in: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execute() {
        let cli = Cli::parse_from([
            "flexget", "-c", "my.yml", "execute", "--tasks", "tv*", "movies", "--test",
            "--inject", "Some.Title", "http://x/1",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("my.yml")));
        match cli.command {
            Some(Commands::Execute(args)) => {
                assert_eq!(args.tasks, vec!["tv*", "movies"]);
                assert!(args.test);
                assert!(!args.learn);
                assert_eq!(args.inject, Some(vec!["Some.Title".to_string(), "http://x/1".to_string()]));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_explicit_config_wins() {
        let path = resolve_config(Some(Path::new("/nowhere/config.yml"))).unwrap();
        assert_eq!(path, PathBuf::from("/nowhere/config.yml"));
    }
}
