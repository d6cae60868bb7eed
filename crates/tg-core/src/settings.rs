//! User-facing settings, loadable from TOML.
//!
//! Lookup order: explicit path > project-relative (.tg/config.toml) >
//! user (~/.config/tg-index/config.toml) > defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::parser_config::FileMetadataInheritance;
use crate::project::ProjectConfig;
use crate::task::DateType;

// ============================================================================
// Sections
// ============================================================================

/// Preferred inline metadata notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
  #[default]
  Tasks,
  Dataview,
}

impl std::str::FromStr for MetadataFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "tasks" => Ok(MetadataFormat::Tasks),
      "dataview" => Ok(MetadataFormat::Dataview),
      _ => Err(format!("Unknown metadata format: {}", s)),
    }
  }
}

/// A special tag prefix, configured per metadata format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPrefixes {
  #[serde(default)]
  pub tasks: String,
  #[serde(default)]
  pub dataview: String,
}

impl TagPrefixes {
  fn same(prefix: &str) -> Self {
    Self {
      tasks: prefix.to_string(),
      dataview: prefix.to_string(),
    }
  }

  /// Prefix for `format`, or `fallback` when unset
  pub fn for_format<'a>(&'a self, format: MetadataFormat, fallback: &'a str) -> &'a str {
    let value = match format {
      MetadataFormat::Tasks => self.tasks.as_str(),
      MetadataFormat::Dataview => self.dataview.as_str(),
    };
    if value.trim().is_empty() { fallback } else { value }
  }
}

/// Tasks derived from frontmatter fields and file tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileParsingConfig {
  pub enable_file_metadata_parsing: bool,
  pub metadata_fields_to_parse_as_tasks: Vec<String>,
  pub enable_tag_based_task_parsing: bool,
  pub tags_to_parse_as_tasks: Vec<String>,
  /// Frontmatter key whose value becomes the task text
  pub task_content_from_metadata: String,
  pub default_task_status: char,
}

impl Default for FileParsingConfig {
  fn default() -> Self {
    Self {
      enable_file_metadata_parsing: false,
      metadata_fields_to_parse_as_tasks: ["dueDate", "todo", "complete", "task"].map(String::from).to_vec(),
      enable_tag_based_task_parsing: false,
      tags_to_parse_as_tasks: ["#todo", "#task", "#action", "#due"].map(String::from).to_vec(),
      task_content_from_metadata: "title".to_string(),
      default_task_status: ' ',
    }
  }
}

/// Background worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
  pub enabled: bool,
  /// Upper bound on pool size; None picks from the CPU count
  pub max_workers: Option<usize>,
  pub request_timeout_ms: u64,
}

impl Default for WorkerSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      max_workers: None,
      request_timeout_ms: 30_000,
    }
  }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub prefer_metadata_format: MetadataFormat,
  pub project_tag_prefix: TagPrefixes,
  pub context_tag_prefix: TagPrefixes,
  pub area_tag_prefix: TagPrefixes,
  pub project_config: ProjectConfig,
  pub file_metadata_inheritance: FileMetadataInheritance,
  pub enable_custom_date_formats: bool,
  pub custom_date_formats: Vec<String>,
  pub file_parsing: FileParsingConfig,
  /// Comma separated; tasks under a matching heading are dropped
  pub ignore_heading: String,
  /// Comma separated; only tasks under a matching heading are kept
  pub focus_heading: String,
  pub use_daily_note_path_as_date: bool,
  pub daily_note_format: String,
  pub daily_note_path: String,
  pub use_as_date_type: DateType,
  pub workers: WorkerSettings,
  pub log_level: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      prefer_metadata_format: MetadataFormat::Tasks,
      project_tag_prefix: TagPrefixes::same("project"),
      context_tag_prefix: TagPrefixes {
        tasks: "@".to_string(),
        dataview: "context".to_string(),
      },
      area_tag_prefix: TagPrefixes::same("area"),
      project_config: ProjectConfig::default(),
      file_metadata_inheritance: FileMetadataInheritance::default(),
      enable_custom_date_formats: false,
      custom_date_formats: Vec::new(),
      file_parsing: FileParsingConfig::default(),
      ignore_heading: String::new(),
      focus_heading: String::new(),
      use_daily_note_path_as_date: false,
      daily_note_format: "yyyy-MM-dd".to_string(),
      daily_note_path: String::new(),
      use_as_date_type: DateType::Due,
      workers: WorkerSettings::default(),
      log_level: "info".to_string(),
    }
  }
}

impl Settings {
  /// Load settings from an explicit file
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load settings for a project, with fallback to user settings
  pub fn load_for_project(project_path: &Path) -> Self {
    // Try project-relative first
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(settings) = Self::load(&project_config)
    {
      debug!(path = %project_config.display(), "Loaded project settings");
      return settings;
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(settings) = Self::load(&user_config_path)
    {
      debug!(path = %user_config_path.display(), "Loaded user settings");
      return settings;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TG_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("tg-index").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("tg-index").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".tg").join("config.toml")
  }

  /// Heading filters, split on commas with leading `#` stripped
  pub fn ignore_headings(&self) -> Vec<String> {
    split_heading_filter(&self.ignore_heading)
  }

  pub fn focus_headings(&self) -> Vec<String> {
    split_heading_filter(&self.focus_heading)
  }
}

fn split_heading_filter(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(|h| h.trim().trim_start_matches('#').trim().to_string())
    .filter(|h| !h.is_empty())
    .collect()
}
