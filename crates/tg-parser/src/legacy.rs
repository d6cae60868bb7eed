//! Minimal fallback parser: checkbox status and trimmed text, nothing else.
//!
//! Used when the configurable parser fails on a file so one bad file still
//! yields its tasks.

use tg_core::{Task, TaskMetadata};

use crate::task_line::match_task_line;

pub fn parse_legacy(content: &str, file_path: &str) -> Vec<Task> {
  content
    .split('\n')
    .map(|line| line.strip_suffix('\r').unwrap_or(line))
    .enumerate()
    .filter_map(|(i, line)| {
      let task_line = match_task_line(line)?;
      Some(Task {
        id: Task::derived_id(file_path, i),
        content: task_line.rest.trim().to_string(),
        file_path: file_path.to_string(),
        line: i,
        completed: task_line.status.eq_ignore_ascii_case(&'x'),
        status: task_line.status,
        status_name: None,
        original_markdown: line.to_string(),
        metadata: TaskMetadata::default(),
      })
    })
    .collect()
}
