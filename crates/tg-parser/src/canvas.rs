//! Canvas adapter.
//!
//! A canvas file is JSON with a `nodes` array. Text nodes are joined into
//! one markdown corpus, run through the line grammar, and each resulting
//! task is attributed back to the first text node containing its source
//! line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tg_core::{CanvasPosition, SourceType, Task, TaskParserConfig};
use tracing::{debug, warn};

use crate::error::CanvasError;
use crate::markdown::MarkdownTaskParser;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasParsingOptions {
  /// Prefix each node's text with `<!-- Node ID: ... -->`
  pub include_node_ids: bool,
  /// Prefix each node's text with `<!-- Position: x=.., y=.. -->`
  pub include_positions: bool,
  pub node_separator: String,
  /// When false, newlines inside a node are replaced with spaces
  pub preserve_line_breaks: bool,
}

impl Default for CanvasParsingOptions {
  fn default() -> Self {
    Self {
      include_node_ids: false,
      include_positions: false,
      node_separator: "\n\n".to_string(),
      preserve_line_breaks: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub text: Option<String>,
  #[serde(default)]
  pub x: f64,
  #[serde(default)]
  pub y: f64,
  #[serde(default)]
  pub width: f64,
  #[serde(default)]
  pub height: f64,
  #[serde(default)]
  pub color: Option<String>,
}

impl CanvasNode {
  pub fn is_text(&self) -> bool {
    self.kind == "text"
  }

  fn position(&self) -> CanvasPosition {
    CanvasPosition {
      x: self.x,
      y: self.y,
      width: self.width,
      height: self.height,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasData {
  pub nodes: Vec<CanvasNode>,
  #[serde(default)]
  pub edges: Vec<Value>,
}

impl CanvasData {
  /// Parse canvas JSON. Malformed individual nodes are skipped.
  pub fn parse(content: &str) -> Result<Self, CanvasError> {
    let value: Value = serde_json::from_str(content)?;
    let nodes = value.get("nodes").and_then(Value::as_array).ok_or(CanvasError::MissingNodes)?;

    let nodes = nodes
      .iter()
      .filter_map(|node| serde_json::from_value::<CanvasNode>(node.clone()).ok())
      .collect();
    let edges = value.get("edges").and_then(Value::as_array).cloned().unwrap_or_default();
    Ok(Self { nodes, edges })
  }

  pub fn text_nodes(&self) -> impl Iterator<Item = &CanvasNode> {
    self.nodes.iter().filter(|n| n.is_text())
  }

  pub fn find_text_node(&self, id: &str) -> Option<&CanvasNode> {
    self.text_nodes().find(|n| n.id == id)
  }
}

pub struct CanvasParser {
  parser: MarkdownTaskParser,
  options: CanvasParsingOptions,
}

impl CanvasParser {
  pub fn new(config: TaskParserConfig) -> Self {
    Self::with_options(config, CanvasParsingOptions::default())
  }

  pub fn with_options(config: TaskParserConfig, options: CanvasParsingOptions) -> Self {
    Self {
      parser: MarkdownTaskParser::new(config),
      options,
    }
  }

  pub fn options(&self) -> &CanvasParsingOptions {
    &self.options
  }

  pub fn update_options(&mut self, options: CanvasParsingOptions) {
    self.options = options;
  }

  pub fn update_parser_config(&mut self, config: TaskParserConfig) {
    self.parser.update_config(config);
  }

  /// Tasks in a canvas file; invalid documents yield no tasks
  pub fn parse_canvas_file(&self, content: &str, file_path: &str) -> Vec<Task> {
    match self.try_parse_canvas_file(content, file_path) {
      Ok(tasks) => tasks,
      Err(e) => {
        warn!(file = %file_path, error = %e, "Skipping unparseable canvas");
        Vec::new()
      }
    }
  }

  pub fn try_parse_canvas_file(&self, content: &str, file_path: &str) -> Result<Vec<Task>, CanvasError> {
    let data = CanvasData::parse(content)?;
    let corpus = self.corpus(&data);
    let mut tasks = self.parser.parse(&corpus, file_path);

    for task in &mut tasks {
      task.metadata.source_type = Some(SourceType::Canvas);
      let source = data.text_nodes().find(|node| {
        node
          .text
          .as_deref()
          .is_some_and(|text| text.contains(task.original_markdown.as_str()))
      });
      if let Some(node) = source {
        task.metadata.canvas_node_id = Some(node.id.clone());
        task.metadata.canvas_position = Some(node.position());
        task.metadata.canvas_color = node.color.clone();
      }
    }

    debug!(file = %file_path, nodes = data.nodes.len(), tasks = tasks.len(), "Parsed canvas");
    Ok(tasks)
  }

  /// Joined text of all text nodes, or empty when the document is invalid
  pub fn extract_text_only(&self, content: &str) -> String {
    CanvasData::parse(content)
      .map(|data| self.corpus(&data))
      .unwrap_or_default()
  }

  /// Whether `content` looks like a canvas document (nodes and edges arrays)
  pub fn is_valid_canvas_content(content: &str) -> bool {
    serde_json::from_str::<Value>(content).is_ok_and(|value| {
      value.get("nodes").is_some_and(Value::is_array) && value.get("edges").is_some_and(Value::is_array)
    })
  }

  fn corpus(&self, data: &CanvasData) -> String {
    data
      .text_nodes()
      .map(|node| self.node_text(node))
      .collect::<Vec<_>>()
      .join(&self.options.node_separator)
  }

  fn node_text(&self, node: &CanvasNode) -> String {
    let mut text = node.text.clone().unwrap_or_default();
    if self.options.include_node_ids {
      text = format!("<!-- Node ID: {} -->\n{}", node.id, text);
    }
    if self.options.include_positions {
      text = format!("<!-- Position: x={}, y={} -->\n{}", node.x, node.y, text);
    }
    if !self.options.preserve_line_breaks {
      text = text.replace('\n', " ");
    }
    text
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const CANVAS: &str = r##"{
    "nodes": [
      {"id": "n1", "type": "text", "text": "# Ideas\n- [ ] Sketch logo #design", "x": 10, "y": -20, "width": 250, "height": 60, "color": "4"},
      {"id": "f1", "type": "file", "file": "a.md", "x": 0, "y": 0, "width": 1, "height": 1},
      {"id": "n2", "type": "text", "text": "- [x] Book venue 📅 2024-12-31", "x": 300, "y": 0, "width": 200, "height": 40}
    ],
    "edges": []
  }"##;

  fn parser() -> CanvasParser {
    CanvasParser::new(TaskParserConfig::default())
  }

  #[test]
  fn test_tasks_attributed_to_nodes() {
    let tasks = parser().parse_canvas_file(CANVAS, "board.canvas");
    assert_eq!(tasks.len(), 2);

    let first = &tasks[0];
    assert_eq!(first.content, "Sketch logo");
    assert_eq!(first.metadata.source_type, Some(SourceType::Canvas));
    assert_eq!(first.metadata.canvas_node_id.as_deref(), Some("n1"));
    assert_eq!(first.metadata.canvas_color.as_deref(), Some("4"));
    assert_eq!(
      first.metadata.canvas_position,
      Some(CanvasPosition {
        x: 10.0,
        y: -20.0,
        width: 250.0,
        height: 60.0
      })
    );
    assert_eq!(first.metadata.heading, vec!["Ideas"]);

    assert_eq!(tasks[1].metadata.canvas_node_id.as_deref(), Some("n2"));
    assert!(tasks[1].completed);
  }

  #[test]
  fn test_invalid_json_yields_nothing() {
    assert!(parser().parse_canvas_file("{not json", "x.canvas").is_empty());
    assert!(matches!(
      parser().try_parse_canvas_file("{not json", "x.canvas"),
      Err(CanvasError::InvalidJson(_))
    ));
  }

  #[test]
  fn test_missing_nodes_yields_nothing() {
    assert!(parser().parse_canvas_file(r#"{"edges": []}"#, "x.canvas").is_empty());
    assert!(matches!(
      parser().try_parse_canvas_file(r#"{"nodes": {}}"#, "x.canvas"),
      Err(CanvasError::MissingNodes)
    ));
  }

  #[test]
  fn test_collapsed_line_breaks_keep_canvas_source() {
    let mut parser = parser();
    parser.update_options(CanvasParsingOptions {
      preserve_line_breaks: false,
      ..Default::default()
    });
    let tasks = parser.parse_canvas_file(CANVAS, "board.canvas");
    // The first node collapses into a heading line; only the second yields a task
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].metadata.canvas_node_id.as_deref(), Some("n2"));
  }

  #[test]
  fn test_markers_and_text_extraction() {
    let parser = CanvasParser::with_options(
      TaskParserConfig::default(),
      CanvasParsingOptions {
        include_node_ids: true,
        include_positions: true,
        node_separator: "\n---\n".into(),
        ..Default::default()
      },
    );
    let text = parser.extract_text_only(CANVAS);
    assert!(text.starts_with("<!-- Position: x=10, y=-20 -->\n<!-- Node ID: n1 -->\n# Ideas"));
    assert!(text.contains("\n---\n<!-- Position: x=300, y=0 -->"));
    assert_eq!(parser.parse_canvas_file(CANVAS, "b.canvas").len(), 2);
  }

  #[test]
  fn test_canvas_helpers() {
    assert!(CanvasParser::is_valid_canvas_content(CANVAS));
    assert!(!CanvasParser::is_valid_canvas_content(r#"{"nodes": []}"#));
    assert!(!CanvasParser::is_valid_canvas_content("nope"));

    let data = CanvasData::parse(CANVAS).unwrap();
    assert_eq!(data.text_nodes().count(), 2);
    assert_eq!(data.find_text_node("n2").map(|n| n.width), Some(200.0));
    assert!(data.find_text_node("f1").is_none());
  }
}
