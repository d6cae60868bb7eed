//! Immutable per-parse configuration and its builder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::project::ProjectConfig;
use crate::settings::{MetadataFormat, Settings};

/// Which inline metadata notations the parser honours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataParseMode {
  /// Only `[key:: value]` fields
  DataviewOnly,
  /// Only emoji markers
  EmojiOnly,
  #[default]
  Both,
  /// No inline metadata; special tags stay plain tags
  None,
}

impl MetadataParseMode {
  pub fn dataview(self) -> bool {
    matches!(self, MetadataParseMode::DataviewOnly | MetadataParseMode::Both)
  }

  pub fn emoji(self) -> bool {
    matches!(self, MetadataParseMode::EmojiOnly | MetadataParseMode::Both)
  }
}

/// Semantic role of a special tag prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagRole {
  Project,
  Area,
  Context,
}

impl TagRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      TagRole::Project => "project",
      TagRole::Area => "area",
      TagRole::Context => "context",
    }
  }
}

/// Frontmatter inheritance toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadataInheritance {
  pub enabled: bool,
  pub inherit_from_frontmatter: bool,
  pub inherit_from_frontmatter_for_subtasks: bool,
}

impl Default for FileMetadataInheritance {
  fn default() -> Self {
    Self {
      enabled: true,
      inherit_from_frontmatter: true,
      inherit_from_frontmatter_for_subtasks: false,
    }
  }
}

/// Logical status names and their checkbox markers
pub const DEFAULT_STATUS_MAPPING: &[(&str, char)] = &[
  ("todo", ' '),
  ("done", 'x'),
  ("cancelled", '-'),
  ("forwarded", '>'),
  ("scheduled", '<'),
  ("important", '!'),
  ("question", '?'),
  ("incomplete", '/'),
  ("paused", 'p'),
  ("pro", 'P'),
  ("con", 'C'),
  ("quote", 'Q'),
  ("note", 'N'),
  ("bookmark", 'b'),
  ("information", 'i'),
  ("savings", 'S'),
  ("idea", 'I'),
  ("location", 'l'),
  ("phone", 'k'),
  ("win", 'w'),
  ("key", 'K'),
];

/// Emoji markers and the metadata key each one sets
pub const DEFAULT_EMOJI_MAPPING: &[(&str, &str)] = &[
  ("📅", "dueDate"),
  ("🛫", "startDate"),
  ("⏳", "scheduledDate"),
  ("✅", "completedDate"),
  ("❌", "cancelledDate"),
  ("➕", "createdDate"),
  ("🔁", "recurrence"),
  ("🏁", "onCompletion"),
  ("⛔", "dependsOn"),
  ("🆔", "id"),
  ("🔺", "priority"),
  ("⏫", "priority"),
  ("🔼", "priority"),
  ("🔽", "priority"),
  ("⏬", "priority"),
];

/// Configuration for one parse call. Never mutated by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParserConfig {
  pub parse_tags: bool,
  pub parse_metadata: bool,
  pub parse_headings: bool,
  pub parse_comments: bool,
  pub metadata_parse_mode: MetadataParseMode,
  /// Logical state name -> marker char
  pub status_mapping: BTreeMap<String, char>,
  /// Emoji -> metadata key
  pub emoji_mapping: BTreeMap<String, String>,
  /// Prefix (plus a lower-cased duplicate) -> role
  pub special_tag_prefixes: BTreeMap<String, TagRole>,
  pub max_parse_iterations: usize,
  pub max_metadata_iterations: usize,
  pub max_tag_length: usize,
  pub max_emoji_value_length: usize,
  pub max_stack_operations: usize,
  pub max_stack_size: usize,
  pub max_indent_size: usize,
  pub project_config: Option<ProjectConfig>,
  pub file_metadata_inheritance: Option<FileMetadataInheritance>,
  pub custom_date_formats: Option<Vec<String>>,
}

impl Default for TaskParserConfig {
  fn default() -> Self {
    Self::from_settings(MetadataFormat::Tasks, &Settings::default())
  }
}

impl TaskParserConfig {
  /// Build the parser configuration for `format` from user settings
  pub fn from_settings(format: MetadataFormat, settings: &Settings) -> Self {
    let mut special_tag_prefixes = BTreeMap::new();
    let prefixes = [
      (settings.project_tag_prefix.for_format(format, "project"), TagRole::Project),
      (settings.area_tag_prefix.for_format(format, "area"), TagRole::Area),
      (
        settings.context_tag_prefix.for_format(format, default_context_prefix(format)),
        TagRole::Context,
      ),
    ];
    for (prefix, role) in prefixes {
      if prefix.is_empty() {
        continue;
      }
      special_tag_prefixes.insert(prefix.to_string(), role);
      special_tag_prefixes.insert(prefix.to_lowercase(), role);
    }

    let project_config = settings
      .project_config
      .enable_enhanced_project
      .then(|| settings.project_config.clone());

    let custom_date_formats = (settings.enable_custom_date_formats && !settings.custom_date_formats.is_empty())
      .then(|| settings.custom_date_formats.clone());

    Self {
      parse_tags: true,
      parse_metadata: true,
      parse_headings: true,
      parse_comments: false,
      metadata_parse_mode: match format {
        MetadataFormat::Dataview => MetadataParseMode::DataviewOnly,
        MetadataFormat::Tasks => MetadataParseMode::Both,
      },
      status_mapping: DEFAULT_STATUS_MAPPING
        .iter()
        .map(|(name, marker)| (name.to_string(), *marker))
        .collect(),
      emoji_mapping: DEFAULT_EMOJI_MAPPING
        .iter()
        .map(|(emoji, key)| (emoji.to_string(), key.to_string()))
        .collect(),
      special_tag_prefixes,
      max_parse_iterations: 4000,
      max_metadata_iterations: 400,
      max_tag_length: 100,
      max_emoji_value_length: 200,
      max_stack_operations: 4000,
      max_stack_size: 1000,
      max_indent_size: 8,
      project_config,
      file_metadata_inheritance: Some(settings.file_metadata_inheritance),
      custom_date_formats,
    }
  }

  /// Logical status name for a checkbox marker
  pub fn status_name(&self, marker: char) -> Option<&str> {
    self
      .status_mapping
      .iter()
      .find(|(_, m)| **m == marker)
      .map(|(name, _)| name.as_str())
  }

  /// Role of a special tag prefix, exact match first then lower-cased
  pub fn tag_role(&self, prefix: &str) -> Option<TagRole> {
    self
      .special_tag_prefixes
      .get(prefix)
      .or_else(|| self.special_tag_prefixes.get(&prefix.to_lowercase()))
      .copied()
  }

  /// Role for a dataview key matched case-insensitively against the prefixes
  pub fn tag_role_ignore_case(&self, key: &str) -> Option<TagRole> {
    let key = key.to_lowercase();
    self
      .special_tag_prefixes
      .iter()
      .find(|(prefix, _)| prefix.to_lowercase() == key)
      .map(|(_, role)| *role)
  }

  /// Whether `@name` tokens classify as context
  pub fn at_sign_is_context(&self) -> bool {
    self.special_tag_prefixes.get("@") == Some(&TagRole::Context)
  }

  /// Whether a completed-looking marker counts as done
  pub fn is_completed(&self, marker: char) -> bool {
    marker.eq_ignore_ascii_case(&'x') || self.status_name(marker) == Some("done")
  }

  pub fn custom_formats(&self) -> Option<&[String]> {
    self.custom_date_formats.as_deref()
  }

  /// Frontmatter inheritance is active for a task at this nesting
  pub fn inherits_frontmatter(&self, is_subtask: bool) -> bool {
    match self.file_metadata_inheritance {
      Some(inheritance) if inheritance.enabled && inheritance.inherit_from_frontmatter => {
        !is_subtask || inheritance.inherit_from_frontmatter_for_subtasks
      }
      _ => false,
    }
  }
}

fn default_context_prefix(format: MetadataFormat) -> &'static str {
  match format {
    MetadataFormat::Dataview => "context",
    MetadataFormat::Tasks => "@",
  }
}
