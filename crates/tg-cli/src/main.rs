//! tg-index - parse markdown and canvas notes into tasks

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tg_core::{MetadataFormat, Settings};

mod commands;
mod logging;
mod vault;

use commands::{cmd_config_show, cmd_parse, cmd_projects};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "tg-index")]
#[command(about = "Parse markdown and canvas notes into tasks")]
#[command(after_help = "\
EXAMPLES:
  tg-index parse notes/                 # Tasks in every note below notes/
  tg-index parse todo.md --json         # One file, JSON output
  tg-index projects notes/              # Project assigned to each note
  tg-index config show                  # Effective settings as TOML")]
struct Cli {
  /// Settings file (default: .tg/config.toml, then the user config)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Run everything on the calling thread instead of worker threads
  #[arg(long, global = true)]
  no_workers: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Parse notes and print their tasks
  Parse {
    /// Files or directories (default: current directory)
    paths: Vec<PathBuf>,
    /// Inline metadata format: tasks or dataview
    #[arg(long, value_name = "FORMAT")]
    format: Option<MetadataFormat>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Resolve the project of each note
  Projects {
    /// Files or directories (default: current directory)
    paths: Vec<PathBuf>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Settings management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[derive(Subcommand)]
enum ConfigCommand {
  /// Print the effective settings
  Show,
}

fn load_settings(explicit: Option<&Path>, paths: &[PathBuf]) -> Result<Settings> {
  if let Some(path) = explicit {
    return Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display()));
  }

  let root = paths
    .first()
    .filter(|p| p.is_dir())
    .cloned()
    .or_else(|| std::env::current_dir().ok())
    .unwrap_or_else(|| PathBuf::from("."));
  Ok(Settings::load_for_project(&root))
}

fn or_current_dir(paths: Vec<PathBuf>) -> Vec<PathBuf> {
  if paths.is_empty() { vec![PathBuf::from(".")] } else { paths }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let use_workers = !cli.no_workers;

  let paths = match &cli.command {
    Commands::Parse { paths, .. } | Commands::Projects { paths, .. } => or_current_dir(paths.clone()),
    Commands::Config { .. } => Vec::new(),
  };
  let mut settings = load_settings(cli.config.as_deref(), &paths)?;
  init_logging(&settings.log_level);

  match cli.command {
    Commands::Parse { format, json, .. } => {
      if let Some(format) = format {
        settings.prefer_metadata_format = format;
      }
      cmd_parse(settings, &paths, use_workers, json).await
    }
    Commands::Projects { json, .. } => cmd_projects(settings, &paths, use_workers, json).await,
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&settings),
    },
  }
}
