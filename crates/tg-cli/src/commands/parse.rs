//! `tg-index parse`

use std::path::PathBuf;

use anyhow::Result;
use tg_core::{Settings, Task};
use tg_parser::ParseResult;
use tg_workers::{ManagerOptions, TaskWorkerManager};
use tracing::info;

use crate::vault;

pub async fn cmd_parse(settings: Settings, paths: &[PathBuf], use_workers: bool, json: bool) -> Result<()> {
  let mut requests = Vec::new();
  for path in paths {
    requests.extend(vault::scan(path)?.iter().map(vault::NoteFile::parse_request));
  }

  let mut options = ManagerOptions::from(&settings.workers);
  options.enable_workers &= use_workers;
  let manager = TaskWorkerManager::new(settings, options);
  let results = manager.parse_batch(requests).await;
  manager.destroy();

  if json {
    println!("{}", serde_json::to_string_pretty(&results)?);
    return Ok(());
  }

  let total: usize = results.iter().map(|r| r.stats.total_tasks).sum();
  info!(files = results.len(), tasks = total, "Parsed notes");
  for result in results.iter().filter(|r| !r.tasks.is_empty()) {
    print_result(result);
  }
  println!("{} tasks in {} files", total, results.len());
  Ok(())
}

fn print_result(result: &ParseResult) {
  println!(
    "{} ({} tasks, {} completed)",
    result.file_path, result.stats.total_tasks, result.stats.completed_tasks
  );
  for task in &result.tasks {
    println!("  {}", describe(task));
  }
  println!();
}

fn describe(task: &Task) -> String {
  let mut line = format!("[{}] {:>4}: {}", task.status, task.line + 1, task.content);
  let project = task
    .metadata
    .project
    .as_deref()
    .or_else(|| task.metadata.tg_project.as_ref().map(|p| p.name.as_str()));
  if let Some(project) = project {
    line.push_str(&format!("  +{}", project));
  }
  if let Some(context) = &task.metadata.context {
    line.push_str(&format!("  @{}", context));
  }
  if !task.metadata.tags.is_empty() {
    line.push_str(&format!("  {}", task.metadata.tags.join(" ")));
  }
  line
}
