//! Project resolution and metadata mapping.
//!
//! Pure functions shared by the project-data workers and the synchronous
//! fallback path, so both produce identical results for identical inputs.

use regex::RegexBuilder;
use serde_json::Value;

use crate::clock;
use crate::date;
use crate::project::{
  CachedProjectData, DefaultProjectNaming, MetadataMapping, NamingStrategy, ProjectConfig, ProjectSource, ProjectWorkerConfig,
  TgProject,
};
use crate::task::Metadata;

/// Target keys containing any of these are coerced to epoch millis
const DATE_KEY_PATTERNS: &[&str] = &[
  "due",
  "duedate",
  "deadline",
  "start",
  "startdate",
  "started",
  "scheduled",
  "scheduleddate",
  "scheduled_for",
  "completed",
  "completeddate",
  "finished",
  "created",
  "createddate",
  "created_at",
];

/// Target keys containing any of these are coerced to a 1..5 priority
const PRIORITY_KEY_PATTERNS: &[&str] = &["priority", "urgency", "importance"];

// ============================================================================
// Value helpers
// ============================================================================

/// Whether a metadata value counts as set
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

/// Whether `s` starts with `dddd-dd-dd`
pub fn has_iso_date_prefix(s: &str) -> bool {
  let bytes = s.as_bytes();
  bytes.len() >= 10
    && bytes[..10]
      .iter()
      .enumerate()
      .all(|(i, b)| if i == 4 || i == 7 { *b == b'-' } else { b.is_ascii_digit() })
}

/// Plain-text rendering of a metadata value
pub fn value_as_text(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Array(items) => items.iter().map(value_as_text).collect::<Vec<_>>().join(","),
    other => other.to_string(),
  }
}

/// Leading integer of `s`, ignoring leading whitespace and trailing text
pub fn leading_int(s: &str) -> Option<i64> {
  let s = s.trim_start();
  let (sign, digits) = match s.strip_prefix('-') {
    Some(rest) => (-1, rest),
    None => (1, s.strip_prefix('+').unwrap_or(s)),
  };
  let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
  if end == 0 {
    return None;
  }
  digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// Numeric priority for a textual level
pub fn priority_level(text: &str) -> Option<i64> {
  let level = match text.to_lowercase().as_str() {
    "highest" | "urgent" | "critical" => 5,
    "high" | "important" => 4,
    "medium" | "normal" | "moderate" => 3,
    "low" | "minor" => 2,
    "lowest" | "trivial" => 1,
    _ => return None,
  };
  Some(level)
}

/// Priority from a string: a leading integer wins, then the text table
pub fn priority_from_str(text: &str) -> Option<i64> {
  leading_int(text).or_else(|| priority_level(text.trim()))
}

// ============================================================================
// Project resolution
// ============================================================================

/// Whether `path` matches a path mapping pattern.
///
/// Patterns containing `*` or `?` are anchored, case-insensitive wildcards;
/// anything else is a case-insensitive substring test. Backslashes are
/// normalised to `/` on both sides.
pub fn matches_path_pattern(path: &str, pattern: &str) -> bool {
  let path = path.replace('\\', "/");
  let pattern = pattern.replace('\\', "/");
  if pattern.is_empty() {
    return false;
  }

  if pattern.contains('*') || pattern.contains('?') {
    let mut source = String::from("^");
    for c in pattern.chars() {
      match c {
        '*' => source.push_str(".*"),
        '?' => source.push('.'),
        other => source.push_str(&regex::escape(&other.to_string())),
      }
    }
    source.push('$');
    return RegexBuilder::new(&source)
      .case_insensitive(true)
      .build()
      .map(|re| re.is_match(&path))
      .unwrap_or(false);
  }

  path.to_lowercase().contains(&pattern.to_lowercase())
}

fn file_name(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

/// Strip the last extension from a file name
pub fn strip_extension(name: &str) -> &str {
  match name.rfind('.') {
    Some(idx) if idx > 0 => &name[..idx],
    _ => name,
  }
}

/// Fallback project name for `path` under the naming strategy
pub fn default_project_name(path: &str, file_metadata: Option<&Metadata>, naming: &DefaultProjectNaming) -> Option<String> {
  if !naming.enabled {
    return None;
  }
  let path = path.replace('\\', "/");

  match naming.strategy {
    NamingStrategy::Filename => {
      let name = file_name(&path);
      let name = if naming.strip_extension { strip_extension(name) } else { name };
      Some(name.to_string())
    }
    NamingStrategy::Foldername => {
      let parts: Vec<&str> = path.split('/').collect();
      if parts.len() > 1 {
        Some(parts[parts.len() - 2].to_string())
      } else {
        Some(String::new())
      }
    }
    NamingStrategy::Metadata => {
      let key = naming.metadata_key.as_deref().filter(|k| !k.is_empty())?;
      let value = file_metadata?.get(key).filter(|v| is_truthy(v))?;
      Some(value_as_text(value).trim().to_string())
    }
  }
}

/// Non-blank trimmed string stored under `key`
fn string_field<'a>(metadata: Option<&'a Metadata>, key: &str) -> Option<&'a str> {
  metadata?
    .get(key)?
    .as_str()
    .map(str::trim)
    .filter(|s| !s.is_empty())
}

/// Classify a file, in strict priority order: path mapping, frontmatter
/// metadata key, project config data, default naming.
pub fn determine_tg_project(
  path: &str,
  file_metadata: Option<&Metadata>,
  config_data: Option<&Metadata>,
  config: &ProjectWorkerConfig,
) -> Option<TgProject> {
  if let Some(mapping) = config
    .path_mappings
    .iter()
    .find(|m| m.enabled && matches_path_pattern(path, &m.path_pattern))
  {
    return Some(TgProject::new(ProjectSource::Path, &mapping.project_name, &mapping.path_pattern));
  }

  if let Some(name) = string_field(file_metadata, &config.metadata_key) {
    return Some(TgProject::new(ProjectSource::Metadata, name, &config.metadata_key));
  }

  if let Some(name) = string_field(config_data, "project") {
    return Some(TgProject::new(ProjectSource::Config, name, "project-config"));
  }

  let naming = &config.default_project_naming;
  default_project_name(path, file_metadata, naming)
    .filter(|name| !name.is_empty())
    .map(|name| TgProject::new(ProjectSource::Default, name, naming.strategy.as_str()))
}

/// Classification used while parsing a single file: only the detection
/// sources switched on in the project settings are consulted.
pub fn detect_project_for_parse(
  path: &str,
  file_metadata: Option<&Metadata>,
  config_data: Option<&Metadata>,
  project_config: &ProjectConfig,
) -> Option<TgProject> {
  if !project_config.enable_enhanced_project {
    return None;
  }

  if let Some(mapping) = project_config
    .path_mappings
    .iter()
    .find(|m| m.enabled && matches_path_pattern(path, &m.path_pattern))
  {
    return Some(TgProject::new(ProjectSource::Path, &mapping.project_name, &mapping.path_pattern));
  }

  let metadata_config = &project_config.metadata_config;
  if metadata_config.enabled {
    let key = if metadata_config.metadata_key.is_empty() {
      "project"
    } else {
      metadata_config.metadata_key.as_str()
    };
    if let Some(name) = string_field(file_metadata, key) {
      return Some(TgProject::new(ProjectSource::Metadata, name, key));
    }
  }

  if project_config.config_file.enabled
    && let Some(name) = string_field(config_data, "project")
  {
    return Some(TgProject::new(ProjectSource::Config, name, &project_config.config_file.file_name));
  }

  None
}

// ============================================================================
// Metadata mapping
// ============================================================================

/// Coerce `value` based on the name of the key it is stored under
pub fn convert_metadata_value(target_key: &str, value: &Value) -> Value {
  let key = target_key.to_lowercase();
  let is_date = DATE_KEY_PATTERNS.iter().any(|p| key.contains(p));
  let is_priority = PRIORITY_KEY_PATTERNS.iter().any(|p| key.contains(p));

  let Value::String(text) = value else {
    return value.clone();
  };

  if is_date {
    if has_iso_date_prefix(text)
      && let Some(millis) = date::parse_iso(text)
    {
      return Value::from(millis);
    }
  } else if is_priority && let Some(priority) = priority_from_str(text) {
    return Value::from(priority);
  }

  value.clone()
}

/// Copy each enabled mapping's source value to its target key, coerced
pub fn apply_metadata_mappings(metadata: &Metadata, mappings: &[MetadataMapping]) -> Metadata {
  let mut result = metadata.clone();
  for mapping in mappings.iter().filter(|m| m.enabled) {
    if let Some(source) = metadata.get(&mapping.source_key) {
      result.insert(mapping.target_key.clone(), convert_metadata_value(&mapping.target_key, source));
    }
  }
  result
}

/// Full project data for one file: classification plus enhanced metadata
/// built from config data overlaid with frontmatter.
pub fn compute_project_data(
  path: &str,
  file_metadata: Option<&Metadata>,
  config_data: Option<&Metadata>,
  config: &ProjectWorkerConfig,
) -> CachedProjectData {
  let tg_project = determine_tg_project(path, file_metadata, config_data, config);

  let mut merged = config_data.cloned().unwrap_or_default();
  if let Some(file_metadata) = file_metadata {
    for (key, value) in file_metadata {
      merged.insert(key.clone(), value.clone());
    }
  }

  CachedProjectData {
    tg_project,
    enhanced_metadata: apply_metadata_mappings(&merged, &config.metadata_mappings),
    timestamp: clock::now_millis(),
    config_source: None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::project::PathMapping;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  fn metadata(value: Value) -> Metadata {
    value.as_object().cloned().unwrap()
  }

  fn mapping(source: &str, target: &str) -> MetadataMapping {
    MetadataMapping {
      source_key: source.into(),
      target_key: target.into(),
      enabled: true,
    }
  }

  #[test]
  fn test_due_mapping_coerces_iso_date() {
    let md = metadata(json!({ "deadline_raw": "2024-01-01" }));
    let result = apply_metadata_mappings(&md, &[mapping("deadline_raw", "dueDate")]);
    assert_eq!(result["dueDate"], json!(1_704_067_200_000_i64));
    // Source key is preserved
    assert_eq!(result["deadline_raw"], json!("2024-01-01"));
  }

  #[test]
  fn test_priority_mapping_coerces_text_level() {
    let md = metadata(json!({ "importance": "high" }));
    let result = apply_metadata_mappings(&md, &[mapping("importance", "priority")]);
    assert_eq!(result["priority"], json!(4));
  }

  #[test]
  fn test_priority_numeric_string_wins() {
    assert_eq!(convert_metadata_value("priority", &json!("2")), json!(2));
    assert_eq!(convert_metadata_value("priority", &json!("3 - medium")), json!(3));
    assert_eq!(convert_metadata_value("urgency", &json!("Critical")), json!(5));
    assert_eq!(convert_metadata_value("priority", &json!("whenever")), json!("whenever"));
  }

  #[test]
  fn test_non_matching_values_pass_through() {
    assert_eq!(convert_metadata_value("due", &json!("next week")), json!("next week"));
    assert_eq!(convert_metadata_value("due", &json!(17)), json!(17));
    assert_eq!(convert_metadata_value("owner", &json!("2024-01-01")), json!("2024-01-01"));
  }

  #[test]
  fn test_disabled_mapping_ignored() {
    let md = metadata(json!({ "a": "x" }));
    let mut rule = mapping("a", "b");
    rule.enabled = false;
    assert!(!apply_metadata_mappings(&md, &[rule]).contains_key("b"));
  }

  #[test]
  fn test_path_pattern_matching() {
    assert!(matches_path_pattern("Projects/Work/todo.md", "work/"));
    assert!(matches_path_pattern("Projects\\Work\\todo.md", "projects/work"));
    assert!(matches_path_pattern("notes/2024/a.md", "notes/*.md"));
    assert!(matches_path_pattern("notes/a1.md", "NOTES/a?.md"));
    assert!(!matches_path_pattern("other/notes/a.md", "notes/*"));
    assert!(!matches_path_pattern("notes/a.md", ""));
  }

  fn worker_config() -> ProjectWorkerConfig {
    ProjectWorkerConfig {
      path_mappings: vec![PathMapping {
        path_pattern: "work/".into(),
        project_name: "Work".into(),
        enabled: true,
      }],
      metadata_key: "project".into(),
      ..Default::default()
    }
  }

  #[test]
  fn test_path_mapping_beats_metadata() {
    let fm = metadata(json!({ "project": "FromFrontmatter" }));
    let project = determine_tg_project("work/plan.md", Some(&fm), None, &worker_config()).unwrap();
    assert_eq!(project.kind, ProjectSource::Path);
    assert_eq!(project.name, "Work");
    assert_eq!(project.source, "work/");
  }

  #[test]
  fn test_metadata_then_config_then_default() {
    let mut config = worker_config();
    config.default_project_naming = DefaultProjectNaming {
      enabled: true,
      strip_extension: true,
      ..Default::default()
    };

    let fm = metadata(json!({ "project": "  Alpha  " }));
    let cd = metadata(json!({ "project": "Beta" }));

    let p = determine_tg_project("home/plan.md", Some(&fm), Some(&cd), &config).unwrap();
    assert_eq!((p.kind, p.name.as_str()), (ProjectSource::Metadata, "Alpha"));

    let p = determine_tg_project("home/plan.md", None, Some(&cd), &config).unwrap();
    assert_eq!((p.kind, p.name.as_str(), p.source.as_str()), (ProjectSource::Config, "Beta", "project-config"));

    let p = determine_tg_project("home/plan.md", None, None, &config).unwrap();
    assert_eq!((p.kind, p.name.as_str(), p.source.as_str()), (ProjectSource::Default, "plan", "filename"));

    config.default_project_naming.enabled = false;
    assert_eq!(determine_tg_project("home/plan.md", None, None, &config), None);
  }

  #[test]
  fn test_default_naming_strategies() {
    let mut naming = DefaultProjectNaming {
      enabled: true,
      strategy: NamingStrategy::Foldername,
      ..Default::default()
    };
    assert_eq!(default_project_name("a/b/c.md", None, &naming).as_deref(), Some("b"));

    naming.strategy = NamingStrategy::Filename;
    assert_eq!(default_project_name("a/b/c.md", None, &naming).as_deref(), Some("c.md"));

    naming.strategy = NamingStrategy::Metadata;
    naming.metadata_key = Some("area".into());
    let fm = metadata(json!({ "area": 42 }));
    assert_eq!(default_project_name("c.md", Some(&fm), &naming).as_deref(), Some("42"));
    assert_eq!(default_project_name("c.md", None, &naming), None);
  }

  #[test]
  fn test_compute_project_data_frontmatter_overrides_config() {
    let fm = metadata(json!({ "status": "active" }));
    let cd = metadata(json!({ "status": "draft", "owner": "kim" }));
    let data = compute_project_data("x.md", Some(&fm), Some(&cd), &worker_config());
    assert_eq!(data.enhanced_metadata["status"], json!("active"));
    assert_eq!(data.enhanced_metadata["owner"], json!("kim"));
    assert_eq!(data.tg_project, None);
  }

  #[test]
  fn test_parse_detection_respects_toggles() {
    let mut config = ProjectConfig {
      enable_enhanced_project: true,
      ..Default::default()
    };
    let fm = metadata(json!({ "project": "Alpha" }));
    assert_eq!(detect_project_for_parse("a.md", Some(&fm), None, &config), None);

    config.metadata_config.enabled = true;
    let p = detect_project_for_parse("a.md", Some(&fm), None, &config).unwrap();
    assert_eq!(p.kind, ProjectSource::Metadata);

    config.enable_enhanced_project = false;
    assert_eq!(detect_project_for_parse("a.md", Some(&fm), None, &config), None);
  }

  #[test]
  fn test_leading_int() {
    assert_eq!(leading_int(" 42abc"), Some(42));
    assert_eq!(leading_int("-3"), Some(-3));
    assert_eq!(leading_int("abc"), None);
  }
}
