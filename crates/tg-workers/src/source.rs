//! Injected access to the host's file index and project settings.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tg_core::{Metadata, ProjectConfig, ProjectWorkerConfig};

/// A project config file found in a directory
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfigFile {
  pub path: String,
  /// Modification time, epoch millis
  pub mtime: i64,
  /// Frontmatter merged with `key: value` lines from the body
  pub data: Metadata,
}

/// Everything the project-data managers need to know about the outside world
#[async_trait]
pub trait ProjectConfigSource: Send + Sync {
  fn is_enhanced_project_enabled(&self) -> bool;

  /// Configuration pushed to project-data workers
  fn worker_config(&self) -> ProjectWorkerConfig;

  /// Frontmatter of `path`, if the file exists and has any
  async fn file_metadata(&self, path: &str) -> Option<Metadata>;

  /// Modification time of `path`, or None when the file does not exist
  async fn file_mtime(&self, path: &str) -> Option<i64>;

  /// Project config file directly inside `directory` (non-recursive)
  async fn config_file(&self, directory: &str) -> Option<ProjectConfigFile>;
}

#[derive(Debug, Clone, Default)]
struct FileEntry {
  metadata: Option<Metadata>,
  mtime: i64,
}

/// In-memory [`ProjectConfigSource`], used by the CLI and in tests
#[derive(Debug, Default)]
pub struct InMemoryProjectSource {
  config: RwLock<ProjectConfig>,
  files: DashMap<String, FileEntry>,
  config_files: DashMap<String, ProjectConfigFile>,
}

impl InMemoryProjectSource {
  pub fn new(config: ProjectConfig) -> Self {
    Self {
      config: RwLock::new(config),
      ..Default::default()
    }
  }

  pub fn set_project_config(&self, config: ProjectConfig) {
    *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
  }

  pub fn project_config(&self) -> ProjectConfig {
    self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Register or replace a file
  pub fn insert_file(&self, path: impl Into<String>, metadata: Option<Metadata>, mtime: i64) {
    self.files.insert(path.into(), FileEntry { metadata, mtime });
  }

  pub fn remove_file(&self, path: &str) {
    self.files.remove(path);
  }

  /// Register the project config file for the directory containing `path`
  pub fn insert_config_file(&self, path: impl Into<String>, data: Metadata, mtime: i64) {
    let path = path.into();
    let directory = directory_of(&path).to_string();
    self.config_files.insert(directory, ProjectConfigFile { path, mtime, data });
  }

  pub fn remove_config_file(&self, directory: &str) {
    self.config_files.remove(directory);
  }
}

#[async_trait]
impl ProjectConfigSource for InMemoryProjectSource {
  fn is_enhanced_project_enabled(&self) -> bool {
    self.config.read().unwrap_or_else(PoisonError::into_inner).enable_enhanced_project
  }

  fn worker_config(&self) -> ProjectWorkerConfig {
    self.config.read().unwrap_or_else(PoisonError::into_inner).worker_config()
  }

  async fn file_metadata(&self, path: &str) -> Option<Metadata> {
    self.files.get(path).and_then(|entry| entry.metadata.clone())
  }

  async fn file_mtime(&self, path: &str) -> Option<i64> {
    self.files.get(path).map(|entry| entry.mtime)
  }

  async fn config_file(&self, directory: &str) -> Option<ProjectConfigFile> {
    self.config_files.get(directory).map(|entry| entry.value().clone())
  }
}

/// Parent directory of a `/`-separated path; empty for top-level files
pub fn directory_of(path: &str) -> &str {
  match path.rfind('/') {
    Some(i) if i > 0 => &path[..i],
    _ => "",
  }
}

/// Parse `key: value` lines of a project config file body. Blank lines and
/// lines starting with `#` or `//` are skipped; surrounding quotes are
/// stripped from values.
pub fn parse_config_content(content: &str) -> Metadata {
  let mut config = Metadata::new();
  for line in content.lines().map(str::trim) {
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
      continue;
    }
    let Some((key, value)) = line.split_once(':') else {
      continue;
    };
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
      continue;
    }
    let value = value.strip_prefix(['"', '\'']).unwrap_or(value);
    let value = value.strip_suffix(['"', '\'']).unwrap_or(value);
    config.insert(key.to_string(), serde_json::Value::String(value.to_string()));
  }
  config
}
