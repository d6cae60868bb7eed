//! Project classification types and project settings.

use serde::{Deserialize, Serialize};

use crate::task::Metadata;

// ============================================================================
// Resolved project
// ============================================================================

/// Where a project classification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectSource {
  Path,
  Metadata,
  Config,
  Default,
}

impl ProjectSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ProjectSource::Path => "path",
      ProjectSource::Metadata => "metadata",
      ProjectSource::Config => "config",
      ProjectSource::Default => "default",
    }
  }
}

impl std::fmt::Display for ProjectSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Project classification attached to a file and its tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TgProject {
  #[serde(rename = "type")]
  pub kind: ProjectSource,
  pub name: String,
  /// The path pattern, metadata key, config file or naming strategy that matched
  pub source: String,
  pub readonly: bool,
}

impl TgProject {
  pub fn new(kind: ProjectSource, name: impl Into<String>, source: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      source: source.into(),
      readonly: true,
    }
  }
}

/// Resolved project data for one file, as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProjectData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tg_project: Option<TgProject>,
  #[serde(default)]
  pub enhanced_metadata: Metadata,
  /// Epoch millis at which this value was computed
  pub timestamp: i64,
  /// Path of the project config file the data was read from, if any
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config_source: Option<String>,
}

impl CachedProjectData {
  /// Equality ignoring `timestamp`
  pub fn same_content(&self, other: &CachedProjectData) -> bool {
    self.tg_project == other.tg_project && self.enhanced_metadata == other.enhanced_metadata
  }
}

// ============================================================================
// Project settings
// ============================================================================

/// Maps files whose path matches `path_pattern` to `project_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathMapping {
  pub path_pattern: String,
  pub project_name: String,
  pub enabled: bool,
}

impl Default for PathMapping {
  fn default() -> Self {
    Self {
      path_pattern: String::new(),
      project_name: String::new(),
      enabled: true,
    }
  }
}

/// Copies `source_key` to `target_key` in the enhanced metadata, with coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataMapping {
  pub source_key: String,
  pub target_key: String,
  pub enabled: bool,
}

impl Default for MetadataMapping {
  fn default() -> Self {
    Self {
      source_key: String::new(),
      target_key: String::new(),
      enabled: true,
    }
  }
}

/// Fallback project naming strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStrategy {
  #[default]
  Filename,
  Foldername,
  Metadata,
}

impl NamingStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      NamingStrategy::Filename => "filename",
      NamingStrategy::Foldername => "foldername",
      NamingStrategy::Metadata => "metadata",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultProjectNaming {
  pub strategy: NamingStrategy,
  pub strip_extension: bool,
  pub enabled: bool,
  /// Key used by the `metadata` strategy
  pub metadata_key: Option<String>,
}

impl Default for DefaultProjectNaming {
  fn default() -> Self {
    Self {
      strategy: NamingStrategy::Filename,
      strip_extension: false,
      enabled: false,
      metadata_key: None,
    }
  }
}

/// How the file-metadata extractor recognises a file as belonging to a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
  /// A frontmatter property holds the project name
  Metadata,
  /// The file carries a given tag
  Tag,
  /// The file links to a matching note
  Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetectionMethod {
  #[serde(rename = "type")]
  pub kind: DetectionKind,
  pub property_key: String,
  #[serde(default)]
  pub link_filter: String,
  #[serde(default)]
  pub enabled: bool,
}

/// Frontmatter-based project detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
  pub metadata_key: String,
  pub enabled: bool,
  pub detection_methods: Vec<ProjectDetectionMethod>,
}

impl Default for MetadataConfig {
  fn default() -> Self {
    Self {
      metadata_key: "project".to_string(),
      enabled: false,
      detection_methods: Vec::new(),
    }
  }
}

/// Project-config-file detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFileSettings {
  pub file_name: String,
  pub search_recursively: bool,
  pub enabled: bool,
}

impl Default for ConfigFileSettings {
  fn default() -> Self {
    Self {
      file_name: "project.md".to_string(),
      search_recursively: false,
      enabled: false,
    }
  }
}

/// Enhanced project settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
  pub enable_enhanced_project: bool,
  pub path_mappings: Vec<PathMapping>,
  pub metadata_config: MetadataConfig,
  pub config_file: ConfigFileSettings,
  pub metadata_mappings: Vec<MetadataMapping>,
  pub default_project_naming: DefaultProjectNaming,
}

impl ProjectConfig {
  /// The slice of settings a project-data worker needs
  pub fn worker_config(&self) -> ProjectWorkerConfig {
    ProjectWorkerConfig {
      path_mappings: self.path_mappings.clone(),
      metadata_mappings: self.metadata_mappings.clone(),
      default_project_naming: self.default_project_naming.clone(),
      metadata_key: self.metadata_config.metadata_key.clone(),
    }
  }
}

/// Configuration pushed to project-data workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectWorkerConfig {
  pub path_mappings: Vec<PathMapping>,
  pub metadata_mappings: Vec<MetadataMapping>,
  pub default_project_naming: DefaultProjectNaming,
  pub metadata_key: String,
}

impl Default for ProjectWorkerConfig {
  fn default() -> Self {
    ProjectConfig::default().worker_config()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tg_project_serializes_type_field() {
    let project = TgProject::new(ProjectSource::Path, "Work", "work/");
    let json = serde_json::to_value(&project).unwrap();
    assert_eq!(json["type"], "path");
    assert_eq!(json["readonly"], true);
  }

  #[test]
  fn test_same_content_ignores_timestamp() {
    let a = CachedProjectData {
      tg_project: Some(TgProject::new(ProjectSource::Default, "notes", "filename")),
      enhanced_metadata: Metadata::new(),
      timestamp: 1,
      config_source: None,
    };
    let b = CachedProjectData { timestamp: 2, ..a.clone() };
    assert!(a.same_content(&b));
  }

  #[test]
  fn test_worker_config_takes_metadata_key() {
    let config = ProjectConfig {
      metadata_config: MetadataConfig {
        metadata_key: "proj".into(),
        enabled: true,
        ..Default::default()
      },
      ..Default::default()
    };
    assert_eq!(config.worker_config().metadata_key, "proj");
  }
}
