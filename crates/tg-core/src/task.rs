//! The parsed task record.
//!
//! A [`Task`] is created fresh on every parse call and handed to the caller.
//! There is no identity across edits: ids are derived from the file path and
//! line number unless the line carries an explicit id marker.

use serde::{Deserialize, Serialize};

use crate::project::TgProject;

/// Open key/value map used for frontmatter, project config data and
/// enhanced metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Identifier of a task, unique within one parse call over one file
pub type TaskId = String;

/// One parsed action item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: TaskId,
  /// Task text with all recognised metadata stripped
  pub content: String,
  pub file_path: String,
  /// Zero-based line index in the parsed corpus
  pub line: usize,
  pub completed: bool,
  /// Raw marker between the checkbox brackets
  pub status: char,
  /// Logical status name from the configured status mapping (todo, done, ...)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status_name: Option<String>,
  /// The source line, verbatim
  pub original_markdown: String,
  pub metadata: TaskMetadata,
}

impl Task {
  /// Derived id for a task found at `line` of `file_path`
  pub fn derived_id(file_path: &str, line: usize) -> TaskId {
    format!("{}-L{}", file_path, line)
  }
}

/// Where a task came from when it was not a plain markdown checkbox line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
  Canvas,
  FileMetadata,
  FileTag,
}

/// Which date field a daily-note path date was applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateType {
  #[default]
  Due,
  Start,
  Scheduled,
}

/// Position and size of a canvas text node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasPosition {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

/// The date-valued metadata fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateField {
  Due,
  Start,
  Scheduled,
  Completed,
  Cancelled,
  Created,
}

impl DateField {
  pub const ALL: [DateField; 6] = [
    DateField::Due,
    DateField::Start,
    DateField::Scheduled,
    DateField::Completed,
    DateField::Cancelled,
    DateField::Created,
  ];

  /// Metadata key used by the emoji mapping and by frontmatter
  pub fn key(self) -> &'static str {
    match self {
      DateField::Due => "dueDate",
      DateField::Start => "startDate",
      DateField::Scheduled => "scheduledDate",
      DateField::Completed => "completedDate",
      DateField::Cancelled => "cancelledDate",
      DateField::Created => "createdDate",
    }
  }

  pub fn from_key(key: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|f| f.key() == key)
  }
}

impl From<DateType> for DateField {
  fn from(value: DateType) -> Self {
    match value {
      DateType::Due => DateField::Due,
      DateType::Start => DateField::Start,
      DateType::Scheduled => DateField::Scheduled,
    }
  }
}

/// Structured metadata attached to a task.
///
/// Well-known fields are typed; anything else (inherited frontmatter keys,
/// unknown dataview fields) lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskMetadata {
  pub tags: Vec<String>,
  pub children: Vec<TaskId>,
  pub heading: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent: Option<TaskId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub project: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub context: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub area: Option<String>,
  /// 1 (lowest) to 5 (highest)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_date: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scheduled_date: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_date: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cancelled_date: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub created_date: Option<i64>,
  /// Free-text recurrence rule, e.g. "every week"
  #[serde(skip_serializing_if = "Option::is_none")]
  pub recurrence: Option<String>,
  /// Raw on-completion action, interpreted elsewhere
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_completion: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<TaskId>,
  /// Explicit id from an inline marker
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub comment: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub use_as_date_type: Option<DateType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tg_project: Option<TgProject>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_type: Option<SourceType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub canvas_node_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub canvas_position: Option<CanvasPosition>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub canvas_color: Option<String>,
  #[serde(flatten)]
  pub extra: Metadata,
}

impl TaskMetadata {
  pub fn date(&self, field: DateField) -> Option<i64> {
    match field {
      DateField::Due => self.due_date,
      DateField::Start => self.start_date,
      DateField::Scheduled => self.scheduled_date,
      DateField::Completed => self.completed_date,
      DateField::Cancelled => self.cancelled_date,
      DateField::Created => self.created_date,
    }
  }

  pub fn date_mut(&mut self, field: DateField) -> &mut Option<i64> {
    match field {
      DateField::Due => &mut self.due_date,
      DateField::Start => &mut self.start_date,
      DateField::Scheduled => &mut self.scheduled_date,
      DateField::Completed => &mut self.completed_date,
      DateField::Cancelled => &mut self.cancelled_date,
      DateField::Created => &mut self.created_date,
    }
  }

  /// Add a tag unless an identical one is already present
  pub fn push_tag(&mut self, tag: impl Into<String>) {
    let tag = tag.into();
    if !self.tags.contains(&tag) {
      self.tags.push(tag);
    }
  }
}
