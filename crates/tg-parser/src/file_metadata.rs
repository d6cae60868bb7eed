//! Tasks derived from a file's frontmatter fields and tags rather than from
//! checkbox lines.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tg_core::resolver::{is_truthy, leading_int, value_as_text};
use tg_core::{
  DetectionKind, FileParsingConfig, Metadata, ProjectDetectionMethod, SourceType, Task, TaskMetadata, date,
};

/// The parts of a host file index the extractor needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCache {
  #[serde(default)]
  pub frontmatter: Option<Metadata>,
  /// Tags found in the file body, `#`-prefixed
  #[serde(default)]
  pub tags: Vec<String>,
  /// Link targets found in the file body
  #[serde(default)]
  pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadataResult {
  pub tasks: Vec<Task>,
  pub errors: Vec<String>,
}

pub struct FileMetadataTaskParser {
  config: FileParsingConfig,
  detection_methods: Vec<ProjectDetectionMethod>,
}

impl FileMetadataTaskParser {
  pub fn new(config: FileParsingConfig, detection_methods: Vec<ProjectDetectionMethod>) -> Self {
    Self {
      config,
      detection_methods,
    }
  }

  pub fn parse_file_for_tasks(&self, file_path: &str, file_cache: &FileCache) -> FileMetadataResult {
    let mut result = FileMetadataResult::default();

    if self.config.enable_file_metadata_parsing
      && let Some(frontmatter) = &file_cache.frontmatter
    {
      for field in &self.config.metadata_fields_to_parse_as_tasks {
        if let Some(value) = frontmatter.get(field) {
          result
            .tasks
            .push(self.task_from_field(file_path, field, value, frontmatter, file_cache));
        }
      }
    }

    if self.config.enable_tag_based_task_parsing && !file_cache.tags.is_empty() {
      let empty = Metadata::new();
      let frontmatter = file_cache.frontmatter.as_ref().unwrap_or(&empty);
      for target in &self.config.tags_to_parse_as_tasks {
        let target = normalize_tag(target);
        if file_cache.tags.iter().any(|tag| *tag == target) {
          result
            .tasks
            .push(self.task_from_tag(file_path, &target, frontmatter, file_cache));
        }
      }
    }

    result
  }

  fn task_from_field(
    &self,
    file_path: &str,
    field: &str,
    value: &Value,
    frontmatter: &Metadata,
    file_cache: &FileCache,
  ) -> Task {
    let status = self.status_for_field(field, value);
    let mut metadata = self.task_metadata(file_path, frontmatter, field, value, file_cache);
    metadata.source_type = Some(SourceType::FileMetadata);
    metadata.extra.insert("sourceField".into(), Value::String(field.to_string()));
    metadata.extra.insert("sourceValue".into(), value.clone());
    self.build_task(format!("{}-metadata-{}", file_path, field), file_path, status, frontmatter, metadata)
  }

  fn task_from_tag(&self, file_path: &str, tag: &str, frontmatter: &Metadata, file_cache: &FileCache) -> Task {
    let status = self.config.default_task_status;
    let value = Value::String(tag.to_string());
    let mut metadata = self.task_metadata(file_path, frontmatter, "tag", &value, file_cache);
    metadata.source_type = Some(SourceType::FileTag);
    metadata.extra.insert("sourceTag".into(), value);
    self.build_task(
      format!("{}-tag-{}", file_path, tag.trim_start_matches('#')),
      file_path,
      status,
      frontmatter,
      metadata,
    )
  }

  fn build_task(&self, id: String, file_path: &str, status: char, frontmatter: &Metadata, mut metadata: TaskMetadata) -> Task {
    let content = self.task_content(frontmatter, file_path);
    metadata.tags = frontmatter_tags(frontmatter);
    Task {
      id,
      original_markdown: format!("- [{}] {}", status, content),
      content,
      file_path: file_path.to_string(),
      line: 0,
      completed: status.eq_ignore_ascii_case(&'x'),
      status,
      status_name: None,
      metadata,
    }
  }

  /// Frontmatter title field, else the file name without its extension
  fn task_content(&self, frontmatter: &Metadata, file_path: &str) -> String {
    if let Some(value) = frontmatter.get(&self.config.task_content_from_metadata)
      && is_truthy(value)
    {
      return value_as_text(value);
    }
    let name = file_path.rsplit('/').next().unwrap_or(file_path);
    match name.rfind('.') {
      Some(dot) if dot > 0 => name[..dot].to_string(),
      _ => name.to_string(),
    }
  }

  fn status_for_field(&self, field: &str, value: &Value) -> char {
    let field = field.to_lowercase();
    if field.contains("complete") || field.contains("done") {
      return if is_truthy(value) { 'x' } else { ' ' };
    }
    if field.contains("todo") || field.contains("task") {
      match value {
        Value::Bool(done) => return if *done { 'x' } else { ' ' },
        Value::String(s) if s.chars().count() == 1 => return s.chars().next().unwrap_or(' '),
        _ => {}
      }
    }
    if field.contains("due") {
      return ' ';
    }
    self.config.default_task_status
  }

  fn task_metadata(
    &self,
    file_path: &str,
    frontmatter: &Metadata,
    source_field: &str,
    source_value: &Value,
    file_cache: &FileCache,
  ) -> TaskMetadata {
    let truthy = |key: &str| frontmatter.get(key).filter(|v| is_truthy(v));
    let mut metadata = TaskMetadata::default();

    metadata.due_date = truthy("dueDate").and_then(parse_date);
    metadata.start_date = truthy("startDate").and_then(parse_date);
    metadata.scheduled_date = truthy("scheduledDate").and_then(parse_date);
    metadata.priority = truthy("priority").and_then(parse_priority);

    metadata.project = self
      .detect_project(file_path, frontmatter, file_cache)
      .or_else(|| truthy("project").map(value_as_text));
    metadata.context = truthy("context").map(value_as_text);
    metadata.area = truthy("area").map(value_as_text);

    if source_field.to_lowercase().contains("due") && is_truthy(source_value) {
      metadata.due_date = parse_date(source_value);
    }
    metadata
  }

  fn detect_project(&self, file_path: &str, frontmatter: &Metadata, file_cache: &FileCache) -> Option<String> {
    let display_name = || {
      ["title", "name"]
        .iter()
        .find_map(|key| frontmatter.get(*key).filter(|v| is_truthy(v)).map(value_as_text))
        .unwrap_or_else(|| {
          let name = file_path.rsplit('/').next().unwrap_or(file_path);
          strip_md_suffix(name).to_string()
        })
    };

    for method in self.detection_methods.iter().filter(|m| m.enabled) {
      match method.kind {
        DetectionKind::Metadata => {
          if let Some(value) = frontmatter.get(&method.property_key)
            && is_truthy(value)
          {
            return Some(value_as_text(value));
          }
        }
        DetectionKind::Tag => {
          let target = normalize_tag(&method.property_key);
          if file_cache.tags.iter().any(|tag| *tag == target) {
            return Some(display_name());
          }
        }
        DetectionKind::Link => {
          for link in &file_cache.links {
            if !method.link_filter.is_empty() {
              if link.contains(&method.link_filter) {
                return Some(display_name());
              }
            } else if !method.property_key.is_empty() {
              if let Some(value) = frontmatter.get(&method.property_key)
                && is_truthy(value)
                && value_as_text(value).contains(&format!("[[{}]]", link))
              {
                return Some(display_name());
              }
            } else {
              return Some(display_name());
            }
          }
        }
      }
    }
    None
  }
}

fn normalize_tag(tag: &str) -> String {
  if tag.starts_with('#') { tag.to_string() } else { format!("#{}", tag) }
}

fn strip_md_suffix(name: &str) -> &str {
  let len = name.len();
  if len >= 3 && name.is_char_boundary(len - 3) && name[len - 3..].eq_ignore_ascii_case(".md") {
    &name[..len - 3]
  } else {
    name
  }
}

/// Values of the `tags` and `tag` frontmatter keys, as written
fn frontmatter_tags(frontmatter: &Metadata) -> Vec<String> {
  let mut tags = Vec::new();
  for key in ["tags", "tag"] {
    match frontmatter.get(key) {
      Some(Value::Array(items)) => tags.extend(items.iter().map(value_as_text)),
      Some(value) if is_truthy(value) => tags.push(value_as_text(value)),
      _ => {}
    }
  }
  tags
}

fn parse_date(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => date::parse_iso(s).or_else(|| date::parse_local_date(s, None)),
    _ => None,
  }
}

/// Frontmatter priorities use a three-level scale
fn parse_priority(value: &Value) -> Option<u8> {
  match value {
    Value::Number(n) => n.as_f64().map(|f| f.round().clamp(1.0, 3.0) as u8),
    Value::String(s) => {
      if let Some(n) = leading_int(s) {
        return Some(n.clamp(1, 3) as u8);
      }
      let lower = s.to_lowercase();
      if lower.contains("high") || lower.contains("urgent") {
        Some(3)
      } else if lower.contains("medium") || lower.contains("normal") {
        Some(2)
      } else if lower.contains("low") {
        Some(1)
      } else {
        None
      }
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  fn frontmatter(value: Value) -> Option<Metadata> {
    value.as_object().cloned()
  }

  fn enabled_config() -> FileParsingConfig {
    FileParsingConfig {
      enable_file_metadata_parsing: true,
      enable_tag_based_task_parsing: true,
      ..Default::default()
    }
  }

  #[test]
  fn test_disabled_by_default() {
    let parser = FileMetadataTaskParser::new(FileParsingConfig::default(), Vec::new());
    let cache = FileCache {
      frontmatter: frontmatter(json!({"todo": true})),
      tags: vec!["#todo".into()],
      links: Vec::new(),
    };
    assert_eq!(parser.parse_file_for_tasks("a.md", &cache), FileMetadataResult::default());
  }

  #[test]
  fn test_metadata_field_tasks() {
    let parser = FileMetadataTaskParser::new(enabled_config(), Vec::new());
    let cache = FileCache {
      frontmatter: frontmatter(json!({
        "title": "Write report",
        "dueDate": "2024-12-31",
        "complete": true,
        "priority": "urgent",
        "tags": ["work", "q4"],
        "project": "Reports"
      })),
      ..Default::default()
    };

    let result = parser.parse_file_for_tasks("notes/report.md", &cache);
    assert!(result.errors.is_empty());
    assert_eq!(result.tasks.len(), 2);

    let due = &result.tasks[0];
    assert_eq!(due.id, "notes/report.md-metadata-dueDate");
    assert_eq!(due.content, "Write report");
    assert_eq!(due.status, ' ');
    assert_eq!(due.original_markdown, "- [ ] Write report");
    assert_eq!(due.line, 0);
    assert_eq!(due.metadata.due_date, Some(1_735_603_200_000));
    assert_eq!(due.metadata.priority, Some(3));
    assert_eq!(due.metadata.project.as_deref(), Some("Reports"));
    assert_eq!(due.metadata.tags, vec!["work", "q4"]);
    assert_eq!(due.metadata.source_type, Some(SourceType::FileMetadata));
    assert_eq!(due.metadata.extra.get("sourceField"), Some(&json!("dueDate")));

    let complete = &result.tasks[1];
    assert_eq!(complete.id, "notes/report.md-metadata-complete");
    assert!(complete.completed);
    assert_eq!(complete.status, 'x');
  }

  #[test]
  fn test_tag_tasks_use_filename() {
    let parser = FileMetadataTaskParser::new(enabled_config(), Vec::new());
    let cache = FileCache {
      frontmatter: None,
      tags: vec!["#action".into(), "#other".into()],
      links: Vec::new(),
    };

    let result = parser.parse_file_for_tasks("inbox/Call plumber.md", &cache);
    assert_eq!(result.tasks.len(), 1);
    let task = &result.tasks[0];
    assert_eq!(task.id, "inbox/Call plumber.md-tag-action");
    assert_eq!(task.content, "Call plumber");
    assert!(!task.completed);
    assert_eq!(task.metadata.source_type, Some(SourceType::FileTag));
    assert_eq!(task.metadata.extra.get("sourceTag"), Some(&json!("#action")));
  }

  #[test]
  fn test_todo_status_from_single_char() {
    let parser = FileMetadataTaskParser::new(enabled_config(), Vec::new());
    let cache = FileCache {
      frontmatter: frontmatter(json!({"todo": "/", "task": false})),
      ..Default::default()
    };
    let result = parser.parse_file_for_tasks("t.md", &cache);
    let statuses: Vec<char> = result.tasks.iter().map(|t| t.status).collect();
    assert_eq!(statuses, vec!['/', ' ']);
  }

  #[test]
  fn test_project_detection_methods() {
    let methods = vec![
      ProjectDetectionMethod {
        kind: DetectionKind::Metadata,
        property_key: "initiative".into(),
        link_filter: String::new(),
        enabled: true,
      },
      ProjectDetectionMethod {
        kind: DetectionKind::Link,
        property_key: String::new(),
        link_filter: "Projects/".into(),
        enabled: true,
      },
    ];
    let parser = FileMetadataTaskParser::new(enabled_config(), methods);

    let by_metadata = FileCache {
      frontmatter: frontmatter(json!({"todo": true, "initiative": "Apollo", "project": "Ignored"})),
      ..Default::default()
    };
    let tasks = parser.parse_file_for_tasks("a.md", &by_metadata).tasks;
    assert_eq!(tasks[0].metadata.project.as_deref(), Some("Apollo"));

    let by_link = FileCache {
      frontmatter: frontmatter(json!({"todo": true, "name": "Gemini"})),
      tags: Vec::new(),
      links: vec!["Projects/Gemini".into()],
    };
    let tasks = parser.parse_file_for_tasks("b.md", &by_link).tasks;
    assert_eq!(tasks[0].metadata.project.as_deref(), Some("Gemini"));
  }

  #[test]
  fn test_priority_scale() {
    assert_eq!(parse_priority(&json!(5)), Some(3));
    assert_eq!(parse_priority(&json!("0")), Some(1));
    assert_eq!(parse_priority(&json!("Normal")), Some(2));
    assert_eq!(parse_priority(&json!("lowish")), Some(1));
    assert_eq!(parse_priority(&json!("someday")), None);
  }
}
