//! The configurable markdown task parser.
//!
//! [`MarkdownTaskParser`] holds an immutable [`TaskParserConfig`]; all
//! per-file state (indent stack, heading path, produced tasks) lives in a
//! [`ParseRun`] created for each call, so one parser can be shared across
//! threads and repeated calls on the same input give the same output.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tg_core::resolver::{detect_project_for_parse, priority_from_str, value_as_text};
use tg_core::{DateField, Metadata, MetadataParseMode, Task, TaskId, TaskMetadata, TaskParserConfig, TgProject, date};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::metadata::InlineScanner;
use crate::task_line::{is_task_line, match_task_line};

/// Keys never copied from frontmatter or project config data onto a task
const NON_INHERITABLE: &[&str] = &[
  "id",
  "content",
  "status",
  "rawStatus",
  "completed",
  "line",
  "lineNumber",
  "originalMarkdown",
  "filePath",
  "heading",
  "headingLevel",
  "parent",
  "parentId",
  "children",
  "childrenIds",
  "indentLevel",
  "actualIndent",
  "listMarker",
  "tgProject",
  "comment",
  "metadata",
];

/// Typed metadata fields that inline or inherited values never populate
const RESERVED_KEYS: &[&str] = &[
  "tags",
  "children",
  "heading",
  "parent",
  "comment",
  "useAsDateType",
  "tgProject",
  "sourceType",
  "canvasNodeId",
  "canvasPosition",
  "canvasColor",
];

/// Per-file inputs that are not part of the text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileContext {
  /// Frontmatter of the file
  pub file_metadata: Option<Metadata>,
  /// Data read from the project config file governing this file
  pub project_config_data: Option<Metadata>,
  /// Classification to use when the parser's own detection finds none
  pub tg_project: Option<TgProject>,
}

#[derive(Debug, Clone)]
pub struct MarkdownTaskParser {
  config: TaskParserConfig,
}

impl MarkdownTaskParser {
  pub fn new(config: TaskParserConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &TaskParserConfig {
    &self.config
  }

  pub fn update_config(&mut self, config: TaskParserConfig) {
    self.config = config;
  }

  /// Parse `content` with no frontmatter or project context
  pub fn parse(&self, content: &str, file_path: &str) -> Vec<Task> {
    self.parse_with(content, file_path, &FileContext::default())
  }

  /// Parse `content`, inheriting from the given file context
  pub fn parse_with(&self, content: &str, file_path: &str, context: &FileContext) -> Vec<Task> {
    ParseRun::new(&self.config, file_path, context).run(content)
  }

  /// Like [`parse_with`](Self::parse_with), but a panic inside the grammar
  /// is reported as an error instead of unwinding into the caller
  pub fn try_parse(&self, content: &str, file_path: &str, context: &FileContext) -> Result<Vec<Task>, ParseError> {
    catch_unwind(AssertUnwindSafe(|| self.parse_with(content, file_path, context))).map_err(|payload| {
      let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
      ParseError::Panicked {
        file: file_path.to_string(),
        message,
      }
    })
  }
}

// ============================================================================
// Per-file state
// ============================================================================

struct IndentEntry {
  id: TaskId,
  spaces: usize,
  level: usize,
}

struct ParseRun<'a> {
  config: &'a TaskParserConfig,
  file_path: &'a str,
  context: &'a FileContext,
  scanner: InlineScanner<'a>,
  tg_project: Option<TgProject>,
  tasks: Vec<Task>,
  indent_stack: Vec<IndentEntry>,
  headings: Vec<(usize, String)>,
  used_ids: HashSet<TaskId>,
}

impl<'a> ParseRun<'a> {
  fn new(config: &'a TaskParserConfig, file_path: &'a str, context: &'a FileContext) -> Self {
    let tg_project = config
      .project_config
      .as_ref()
      .and_then(|project_config| {
        detect_project_for_parse(
          file_path,
          context.file_metadata.as_ref(),
          context.project_config_data.as_ref(),
          project_config,
        )
      })
      .or_else(|| context.tg_project.clone());

    Self {
      config,
      file_path,
      context,
      scanner: InlineScanner::new(config),
      tg_project,
      tasks: Vec::new(),
      indent_stack: Vec::new(),
      headings: Vec::new(),
      used_ids: HashSet::new(),
    }
  }

  fn run(mut self, content: &str) -> Vec<Task> {
    let lines: Vec<&str> = content
      .split('\n')
      .map(|line| line.strip_suffix('\r').unwrap_or(line))
      .collect();

    let mut i = 0;
    let mut iterations = 0;
    let mut in_code_block = false;

    while i < lines.len() {
      iterations += 1;
      if iterations > self.config.max_parse_iterations {
        warn!(file = %self.file_path, limit = self.config.max_parse_iterations, "Parse iteration limit reached");
        break;
      }

      let line = lines[i];
      let trimmed = line.trim();
      if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
        in_code_block = !in_code_block;
        i += 1;
        continue;
      }
      if in_code_block {
        i += 1;
        continue;
      }

      if self.config.parse_headings
        && let Some((level, text)) = heading(line)
      {
        while self.headings.last().is_some_and(|(l, _)| *l >= level) {
          self.headings.pop();
        }
        self.headings.push((level, text.to_string()));
        i += 1;
        continue;
      }

      if let Some(task_line) = match_task_line(line) {
        let comment = if self.config.parse_comments {
          multiline_comment(&lines[i + 1..], task_line.indent)
        } else {
          None
        };
        self.push_task(i, line, task_line.indent, task_line.status, task_line.rest);
        if let Some((comment, consumed)) = comment {
          if let Some(task) = self.tasks.last_mut() {
            task.metadata.comment = Some(comment);
          }
          i += consumed;
        }
      }

      i += 1;
    }

    debug!(file = %self.file_path, tasks = self.tasks.len(), "Parsed markdown");
    self.tasks
  }

  fn push_task(&mut self, line_index: usize, line: &str, indent: usize, status: char, rest: &str) {
    let (parent, level) = self.find_parent(indent);
    let tokens = self.scanner.scan(rest.trim());

    let mut fields = tokens.fields;
    let mut inherited_tags = Vec::new();
    self.inherit(&mut fields, &mut inherited_tags, parent.is_some());

    let mut metadata = self.typed_metadata(fields, tokens.tags, inherited_tags);
    metadata.heading = self.headings.iter().map(|(_, text)| text.clone()).collect();
    metadata.parent = parent.clone();
    metadata.tg_project = self.tg_project.clone();

    let id = match metadata.id.as_deref() {
      Some(explicit) if !explicit.is_empty() && !self.used_ids.contains(explicit) => explicit.to_string(),
      _ => Task::derived_id(self.file_path, line_index),
    };
    self.used_ids.insert(id.clone());

    if let Some(parent_id) = &parent
      && let Some(parent_task) = self.tasks.iter_mut().rev().find(|t| &t.id == parent_id)
    {
      parent_task.metadata.children.push(id.clone());
    }
    self.update_indent_stack(&id, level, indent);

    self.tasks.push(Task {
      id,
      content: tokens.content,
      file_path: self.file_path.to_string(),
      line: line_index,
      completed: self.config.is_completed(status),
      status,
      status_name: self.config.status_name(status).map(str::to_string),
      original_markdown: line.to_string(),
      metadata,
    });
  }

  // ==========================================================================
  // Hierarchy
  // ==========================================================================

  fn find_parent(&self, spaces: usize) -> (Option<TaskId>, usize) {
    if spaces == 0 {
      return (None, 0);
    }
    self
      .indent_stack
      .iter()
      .rev()
      .find(|entry| entry.spaces < spaces)
      .map(|entry| (Some(entry.id.clone()), entry.level + 1))
      .unwrap_or((None, 0))
  }

  fn update_indent_stack(&mut self, id: &str, level: usize, spaces: usize) {
    let mut operations = 0;
    while let Some(last) = self.indent_stack.last() {
      operations += 1;
      if operations > self.config.max_stack_operations {
        warn!(file = %self.file_path, "Indent stack operation limit reached, clearing stack");
        self.indent_stack.clear();
        break;
      }
      if last.spaces >= spaces {
        self.indent_stack.pop();
      } else {
        break;
      }
    }

    // Tasks nested deeper than the limit never become parents
    if level > self.config.max_indent_size {
      return;
    }

    if self.indent_stack.len() >= self.config.max_stack_size {
      let excess = self.indent_stack.len() + 1 - self.config.max_stack_size;
      self.indent_stack.drain(..excess);
    }
    self.indent_stack.push(IndentEntry {
      id: id.to_string(),
      spaces,
      level,
    });
  }

  // ==========================================================================
  // Inheritance
  // ==========================================================================

  fn inherit(&self, fields: &mut Metadata, inherited_tags: &mut Vec<String>, is_subtask: bool) {
    if !self.config.inherits_frontmatter(is_subtask) {
      return;
    }

    let file_metadata = self.context.file_metadata.as_ref();
    if let Some(frontmatter) = file_metadata {
      self.seed_project(fields, frontmatter);

      for (key, value) in frontmatter {
        if key == "tags" {
          self.inherit_tags(fields, inherited_tags, value);
          continue;
        }
        if NON_INHERITABLE.contains(&key.as_str()) || value.is_null() || !is_unset(fields, key) {
          continue;
        }
        fields.insert(key.clone(), value.clone());
      }
    }

    if let Some(config_data) = &self.context.project_config_data {
      for (key, value) in config_data {
        let in_frontmatter = file_metadata.is_some_and(|fm| fm.contains_key(key));
        if NON_INHERITABLE.contains(&key.as_str()) || value.is_null() || in_frontmatter || !is_unset(fields, key) {
          continue;
        }
        fields.insert(key.clone(), value.clone());
      }
    }
  }

  /// With metadata detection off, the configured project key still feeds `project`
  fn seed_project(&self, fields: &mut Metadata, frontmatter: &Metadata) {
    let Some(project_config) = &self.config.project_config else {
      return;
    };
    if project_config.enable_enhanced_project && project_config.metadata_config.enabled {
      return;
    }
    let key = &project_config.metadata_config.metadata_key;
    if let Some(value) = frontmatter.get(key)
      && !value.is_null()
      && is_unset(fields, "project")
    {
      let name = value_as_text(value).trim().to_string();
      if !name.is_empty() {
        fields.insert("project".to_string(), name.into());
      }
    }
  }

  fn inherit_tags(&self, fields: &mut Metadata, inherited_tags: &mut Vec<String>, value: &Value) {
    let raw: Vec<String> = match value {
      Value::Array(items) => items.iter().map(value_as_text).collect(),
      Value::String(s) => vec![s.clone()],
      _ => return,
    };

    for tag in raw {
      let tag = tag.trim();
      if tag.is_empty() {
        continue;
      }
      let normalized = if tag.starts_with('#') { tag.to_string() } else { format!("#{}", tag) };

      if self.config.metadata_parse_mode != MetadataParseMode::None
        && let Some((prefix, value)) = normalized[1..].split_once('/')
        && let Some(role) = self.config.tag_role(prefix)
        && !value.is_empty()
        && is_unset(fields, role.as_str())
      {
        fields.insert(role.as_str().to_string(), value.into());
      }
      inherited_tags.push(normalized);
    }
  }

  // ==========================================================================
  // Typing
  // ==========================================================================

  fn typed_metadata(&self, fields: Metadata, tags: Vec<String>, inherited_tags: Vec<String>) -> TaskMetadata {
    let mut metadata = TaskMetadata {
      tags,
      ..Default::default()
    };
    for tag in inherited_tags {
      metadata.push_tag(tag);
    }

    for (key, value) in fields {
      if let Some(field) = DateField::from_key(&key) {
        *metadata.date_mut(field) = self.date_value(&value);
        continue;
      }
      match key.as_str() {
        "priority" => metadata.priority = priority_value(&value),
        "project" => metadata.project = text_value(&value),
        "context" => metadata.context = text_value(&value),
        "area" => metadata.area = text_value(&value),
        "recurrence" => metadata.recurrence = text_value(&value),
        "onCompletion" => metadata.on_completion = text_value(&value),
        "id" => metadata.id = text_value(&value),
        "dependsOn" => {
          metadata.depends_on = value_as_text(&value)
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        }
        k if RESERVED_KEYS.contains(&k) => {}
        _ => {
          metadata.extra.insert(key, value);
        }
      }
    }
    metadata
  }

  fn date_value(&self, value: &Value) -> Option<i64> {
    match value {
      Value::Number(n) => n.as_i64(),
      Value::String(s) => date::parse_local_date(s, self.config.custom_formats()),
      _ => None,
    }
  }
}

fn is_unset(fields: &Metadata, key: &str) -> bool {
  match fields.get(key) {
    None | Some(Value::Null) => true,
    Some(Value::String(s)) => s.is_empty(),
    Some(_) => false,
  }
}

fn text_value(value: &Value) -> Option<String> {
  let text = value_as_text(value).trim().to_string();
  (!text.is_empty()).then_some(text)
}

/// Priority on the 1..=5 scale from a number, digits, a level name or a
/// priority emoji
fn priority_value(value: &Value) -> Option<u8> {
  let level = match value {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => priority_from_str(s).or_else(|| emoji_priority(s.trim())),
    _ => None,
  }?;
  u8::try_from(level.clamp(1, 5)).ok()
}

fn emoji_priority(text: &str) -> Option<i64> {
  let level = match text.trim_end_matches('\u{FE0F}') {
    "🔺" => 5,
    "⏫" => 4,
    "🔼" => 3,
    "🔽" => 2,
    "⏬" => 1,
    _ => return None,
  };
  Some(level)
}

/// `#`..`######` followed by whitespace and non-empty text
fn heading(line: &str) -> Option<(usize, &str)> {
  let trimmed = line.trim();
  let level = trimmed.bytes().take_while(|b| *b == b'#').count();
  if level == 0 || level > 6 {
    return None;
  }
  let rest = &trimmed[level..];
  if !rest.starts_with(char::is_whitespace) {
    return None;
  }
  let text = rest.trim();
  (!text.is_empty()).then_some((level, text))
}

/// More-indented, non-task lines directly after a task, joined with `\n`
fn multiline_comment(following: &[&str], task_indent: usize) -> Option<(String, usize)> {
  let mut comment_lines = Vec::new();
  for line in following {
    let trimmed = line.trim_start();
    let spaces = line[..line.len() - trimmed.len()].chars().count();
    if spaces <= task_indent || is_task_line(trimmed) {
      break;
    }
    comment_lines.push(trimmed);
  }
  if comment_lines.is_empty() {
    return None;
  }
  let consumed = comment_lines.len();
  Some((comment_lines.join("\n"), consumed))
}
