//! Per-file processing pipeline.
//!
//! This is the unit of work a parse worker runs for one file: pick the
//! grammar by extension, fall back to the legacy parser when the line
//! grammar fails, add frontmatter/tag tasks, apply heading filters and
//! daily-note dates. The synchronous fallback path runs the exact same code.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tg_core::{DateField, Settings, Task, TaskParserConfig, date};
use tracing::{debug, warn};

use crate::canvas::CanvasParser;
use crate::file_metadata::{FileCache, FileMetadataTaskParser};
use crate::legacy::parse_legacy;
use crate::markdown::{FileContext, MarkdownTaskParser};

// ============================================================================
// Request / result types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
  pub mtime: i64,
  pub size: u64,
}

/// One file to parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
  pub file_path: String,
  pub content: String,
  /// With or without a leading dot
  pub extension: String,
  #[serde(default)]
  pub stats: Option<FileStats>,
  #[serde(default)]
  pub file_cache: Option<FileCache>,
}

impl ParseRequest {
  /// Request for `file_path`, taking the extension from the path
  pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
    let file_path = file_path.into();
    let extension = file_path
      .rsplit_once('.')
      .filter(|(_, ext)| !ext.contains('/'))
      .map(|(_, ext)| ext.to_string())
      .unwrap_or_default();
    Self {
      file_path,
      content: content.into(),
      extension,
      stats: None,
      file_cache: None,
    }
  }

  pub fn with_file_cache(mut self, file_cache: FileCache) -> Self {
    self.file_cache = Some(file_cache);
    self
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseStats {
  pub total_tasks: usize,
  pub completed_tasks: usize,
  pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
  pub file_path: String,
  pub tasks: Vec<Task>,
  pub stats: ParseStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
  pub file_path: String,
  pub task_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
  pub total_files: usize,
  pub total_tasks: usize,
  pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
  pub results: Vec<BatchEntry>,
  pub stats: BatchStats,
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
  Markdown,
  Canvas,
  Unsupported,
}

impl FileKind {
  fn from_extension(extension: &str) -> Self {
    match extension.trim_start_matches('.').to_lowercase().as_str() {
      "md" | "markdown" => FileKind::Markdown,
      "canvas" => FileKind::Canvas,
      _ => FileKind::Unsupported,
    }
  }
}

/// Parsers and filters built once from settings, reused for every file
pub struct TaskPipeline {
  settings: Settings,
  markdown: MarkdownTaskParser,
  canvas: CanvasParser,
  file_metadata: FileMetadataTaskParser,
  ignore_headings: Vec<String>,
  focus_headings: Vec<String>,
}

impl TaskPipeline {
  pub fn new(settings: Settings) -> Self {
    let config = TaskParserConfig::from_settings(settings.prefer_metadata_format, &settings);
    let file_metadata = FileMetadataTaskParser::new(
      settings.file_parsing.clone(),
      settings.project_config.metadata_config.detection_methods.clone(),
    );
    Self {
      markdown: MarkdownTaskParser::new(config.clone()),
      canvas: CanvasParser::new(config),
      file_metadata,
      ignore_headings: lowercase_all(settings.ignore_headings()),
      focus_headings: lowercase_all(settings.focus_headings()),
      settings,
    }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn parser_config(&self) -> &TaskParserConfig {
    self.markdown.config()
  }

  /// Parse one file. Never fails: unsupported files yield no tasks and a
  /// failing line grammar degrades to the legacy parser.
  pub fn process_file(&self, request: &ParseRequest) -> ParseResult {
    let start = Instant::now();
    let path = request.file_path.as_str();
    let kind = FileKind::from_extension(&request.extension);

    let mut tasks = match kind {
      FileKind::Markdown => self.parse_markdown(request),
      FileKind::Canvas => self.canvas.parse_canvas_file(&request.content, path),
      FileKind::Unsupported => {
        warn!(file = %path, extension = %request.extension, "Unsupported file type");
        Vec::new()
      }
    };

    if kind == FileKind::Markdown && self.wants_file_metadata_tasks() {
      let empty = FileCache::default();
      let cache = request.file_cache.as_ref().unwrap_or(&empty);
      let extracted = self.file_metadata.parse_file_for_tasks(path, cache);
      if !extracted.errors.is_empty() {
        warn!(file = %path, errors = ?extracted.errors, "File metadata parsing errors");
      }
      tasks.extend(extracted.tasks);
    }

    let completed_tasks = tasks.iter().filter(|t| t.completed).count();
    self.apply_daily_note_date(path, &mut tasks);

    let stats = ParseStats {
      total_tasks: tasks.len(),
      completed_tasks,
      processing_time_ms: start.elapsed().as_millis() as u64,
    };
    debug!(file = %path, tasks = stats.total_tasks, completed = completed_tasks, "Processed file");

    ParseResult {
      file_path: request.file_path.clone(),
      tasks,
      stats,
    }
  }

  /// Parse several files, reporting only task counts
  pub fn process_batch(&self, requests: &[ParseRequest]) -> BatchResult {
    let start = Instant::now();
    let results: Vec<BatchEntry> = requests
      .iter()
      .map(|request| {
        let result = self.process_file(request);
        BatchEntry {
          file_path: result.file_path,
          task_count: result.stats.total_tasks,
        }
      })
      .collect();

    let total_tasks = results.iter().map(|r| r.task_count).sum();
    BatchResult {
      stats: BatchStats {
        total_files: requests.len(),
        total_tasks,
        processing_time_ms: start.elapsed().as_millis() as u64,
      },
      results,
    }
  }

  fn parse_markdown(&self, request: &ParseRequest) -> Vec<Task> {
    let context = FileContext {
      file_metadata: request.file_cache.as_ref().and_then(|c| c.frontmatter.clone()),
      ..Default::default()
    };

    match self.markdown.try_parse(&request.content, &request.file_path, &context) {
      Ok(tasks) => tasks.into_iter().filter(|t| self.passes_heading_filters(t)).collect(),
      Err(e) => {
        warn!(file = %request.file_path, error = %e, "Line grammar failed, using legacy parser");
        parse_legacy(&request.content, &request.file_path)
      }
    }
  }

  fn wants_file_metadata_tasks(&self) -> bool {
    let fp = &self.settings.file_parsing;
    fp.enable_file_metadata_parsing || fp.enable_tag_based_task_parsing || self.settings.file_metadata_inheritance.enabled
  }

  fn passes_heading_filters(&self, task: &Task) -> bool {
    let matches = |filters: &[String]| {
      task
        .metadata
        .heading
        .iter()
        .any(|heading| {
          let heading = heading.to_lowercase();
          filters.iter().any(|f| heading.contains(f.as_str()))
        })
    };

    if !self.ignore_headings.is_empty() && matches(&self.ignore_headings) {
      return false;
    }
    if !self.focus_headings.is_empty() && !matches(&self.focus_headings) {
      return false;
    }
    true
  }

  fn apply_daily_note_date(&self, file_path: &str, tasks: &mut [Task]) {
    let settings = &self.settings;
    let prefix = settings.daily_note_path.as_str();
    if !settings.use_daily_note_path_as_date
      || prefix.is_empty()
      || !(file_path.starts_with(prefix) || format!("/{}", file_path).starts_with(prefix))
    {
      return;
    }

    let format = settings.daily_note_format.replace('Y', "y").replace('D', "d");
    let Some(millis) = date_from_path(file_path, prefix, &format) else {
      return;
    };

    let field = DateField::from(settings.use_as_date_type);
    for task in tasks {
      let slot = task.metadata.date_mut(field);
      if slot.is_none() {
        *slot = Some(millis);
      }
      task.metadata.use_as_date_type = Some(settings.use_as_date_type);
    }
  }
}

/// Date encoded in a daily-note path, retrying on shorter suffixes
fn date_from_path(file_path: &str, prefix: &str, format: &str) -> Option<i64> {
  let mut candidate = match file_path.rsplit_once('.') {
    Some((stem, ext)) if !ext.contains('/') => stem,
    _ => file_path,
  };
  if let Some(rest) = candidate.strip_prefix(prefix) {
    candidate = rest.strip_prefix('/').unwrap_or(rest);
  }

  loop {
    if let Some(millis) = date::parse_with_format(candidate, format) {
      return Some(millis);
    }
    let (_, rest) = candidate.split_once('/')?;
    candidate = rest;
  }
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
  values.into_iter().map(|v| v.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tg_core::{DateType, FileParsingConfig, SourceType};

  fn pipeline(settings: Settings) -> TaskPipeline {
    TaskPipeline::new(settings)
  }

  #[test]
  fn test_markdown_file_stats() {
    let request = ParseRequest::new("notes/a.md", "- [ ] one\n- [x] two\nplain text\n- [ ] three");
    assert_eq!(request.extension, "md");

    let result = pipeline(Settings::default()).process_file(&request);
    assert_eq!(result.file_path, "notes/a.md");
    assert_eq!(result.stats.total_tasks, 3);
    assert_eq!(result.stats.completed_tasks, 1);
  }

  #[test]
  fn test_canvas_dispatch_and_invalid_canvas() {
    let canvas = r#"{"nodes":[{"id":"n","type":"text","text":"- [ ] from canvas","x":0,"y":0,"width":1,"height":1}],"edges":[]}"#;
    let p = pipeline(Settings::default());

    let result = p.process_file(&ParseRequest::new("b.canvas", canvas));
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.tasks[0].metadata.source_type, Some(SourceType::Canvas));

    let broken = p.process_file(&ParseRequest::new("b.canvas", "{oops"));
    assert!(broken.tasks.is_empty());
  }

  #[test]
  fn test_unsupported_extension_is_empty() {
    let mut request = ParseRequest::new("x.txt", "- [ ] not parsed");
    assert!(pipeline(Settings::default()).process_file(&request).tasks.is_empty());

    request.extension = ".MD".into();
    assert_eq!(pipeline(Settings::default()).process_file(&request).tasks.len(), 1);
  }

  #[test]
  fn test_heading_filters() {
    let content = "# Inbox\n- [ ] a\n# Archive\n- [ ] b\n## Old archive items\n- [ ] c";
    let request = ParseRequest::new("h.md", content);

    let ignore = pipeline(Settings {
      ignore_heading: "#archive".into(),
      ..Default::default()
    });
    let contents: Vec<String> = ignore.process_file(&request).tasks.into_iter().map(|t| t.content).collect();
    assert_eq!(contents, vec!["a"]);

    let focus = pipeline(Settings {
      focus_heading: "inbox".into(),
      ..Default::default()
    });
    let contents: Vec<String> = focus
      .process_file(&ParseRequest::new("h.md", format!("- [ ] top\n{}", content)))
      .tasks
      .into_iter()
      .map(|t| t.content)
      .collect();
    assert_eq!(contents, vec!["a"]);
  }

  #[test]
  fn test_file_metadata_tasks_appended_for_markdown() {
    let settings = Settings {
      file_parsing: FileParsingConfig {
        enable_file_metadata_parsing: true,
        ..Default::default()
      },
      ..Default::default()
    };
    let cache = FileCache {
      frontmatter: json!({"title": "Plan", "todo": false}).as_object().cloned(),
      ..Default::default()
    };
    let request = ParseRequest::new("p.md", "- [ ] inline").with_file_cache(cache);

    let result = pipeline(settings).process_file(&request);
    let ids: Vec<&str> = result.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["p.md-L0", "p.md-metadata-todo"]);
    assert_eq!(result.stats.total_tasks, 2);
  }

  #[test]
  fn test_daily_note_date_fills_missing_field() {
    let settings = Settings {
      use_daily_note_path_as_date: true,
      daily_note_path: "Daily".into(),
      daily_note_format: "YYYY-MM-DD".into(),
      use_as_date_type: DateType::Scheduled,
      ..Default::default()
    };
    let content = "- [ ] plain\n- [ ] fixed ⏳ 2020-01-01";
    let result = pipeline(settings).process_file(&ParseRequest::new("Daily/2024/2024-03-05.md", content));

    assert_eq!(result.tasks[0].metadata.scheduled_date, Some(1_709_596_800_000));
    assert_eq!(result.tasks[0].metadata.use_as_date_type, Some(DateType::Scheduled));
    assert_eq!(result.tasks[1].metadata.scheduled_date, Some(1_577_836_800_000));
  }

  #[test]
  fn test_daily_note_outside_folder_untouched() {
    let settings = Settings {
      use_daily_note_path_as_date: true,
      daily_note_path: "Daily".into(),
      ..Default::default()
    };
    let result = pipeline(settings).process_file(&ParseRequest::new("Work/2024-03-05.md", "- [ ] x"));
    assert_eq!(result.tasks[0].metadata.due_date, None);
    assert_eq!(result.tasks[0].metadata.use_as_date_type, None);
  }

  #[test]
  fn test_batch_counts() {
    let requests = vec![
      ParseRequest::new("a.md", "- [ ] 1\n- [ ] 2"),
      ParseRequest::new("b.md", "nothing"),
    ];
    let batch = pipeline(Settings::default()).process_batch(&requests);
    assert_eq!(batch.stats.total_files, 2);
    assert_eq!(batch.stats.total_tasks, 2);
    assert_eq!(
      batch.results,
      vec![
        BatchEntry {
          file_path: "a.md".into(),
          task_count: 2
        },
        BatchEntry {
          file_path: "b.md".into(),
          task_count: 0
        },
      ]
    );
  }
}
