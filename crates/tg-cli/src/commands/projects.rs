//! `tg-index projects`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tg_core::Settings;
use tg_workers::{ManagerOptions, ProjectDataWorkerManager};
use tracing::warn;

use crate::vault;

pub async fn cmd_projects(settings: Settings, paths: &[PathBuf], use_workers: bool, json: bool) -> Result<()> {
  if !settings.project_config.enable_enhanced_project {
    warn!("Enhanced project support is disabled (project_config.enable_enhanced_project)");
    return Ok(());
  }

  let mut files = Vec::new();
  for path in paths {
    files.extend(vault::scan(path)?);
  }
  let notes: Vec<String> = files.iter().filter(|f| f.is_markdown()).map(|f| f.path.clone()).collect();

  let source = Arc::new(vault::load_source(&files, settings.project_config.clone()));
  let mut options = ManagerOptions::from(&settings.workers);
  options.enable_workers &= use_workers;
  let manager = ProjectDataWorkerManager::new(source, options);
  let resolved: BTreeMap<_, _> = manager.get_batch_project_data(&notes).await.into_iter().collect();
  manager.destroy();

  if json {
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    return Ok(());
  }

  if resolved.is_empty() {
    println!("No notes found.");
    return Ok(());
  }
  for (path, data) in &resolved {
    match &data.tg_project {
      Some(project) => println!("{}  {} ({})", path, project.name, project.kind),
      None => println!("{}  -", path),
    }
  }
  Ok(())
}
