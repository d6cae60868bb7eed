//! Recogniser for list-item checkbox lines: `- [ ] text`, `* [x] text`,
//! `+ [/] text`, `1. [ ] text`.

/// A line that qualifies as a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskLine<'a> {
  /// Leading whitespace, in characters
  pub indent: usize,
  /// Marker between the checkbox brackets
  pub status: char,
  /// Text after the checkbox, leading whitespace removed
  pub rest: &'a str,
}

pub(crate) fn match_task_line(line: &str) -> Option<TaskLine<'_>> {
  let body = line.trim_start();
  let indent = line[..line.len() - body.len()].chars().count();

  let after_marker = match body.strip_prefix(['-', '*', '+']) {
    Some(rest) => rest,
    None => {
      let digits = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
      if digits == 0 {
        return None;
      }
      body[digits..].strip_prefix('.')?
    }
  };

  let inner = after_marker.trim_start().strip_prefix('[')?;
  let mut chars = inner.chars();
  let status = chars.next().filter(|c| *c != '\n')?;
  let rest = chars.as_str().strip_prefix(']')?;

  Some(TaskLine {
    indent,
    status,
    rest: rest.trim_start(),
  })
}

pub(crate) fn is_task_line(line: &str) -> bool {
  match_task_line(line).is_some()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_matches_list_markers() {
    for line in ["- [ ] a", "* [ ] a", "+ [ ] a", "12. [ ] a", "-[ ] a"] {
      let m = match_task_line(line).unwrap();
      assert_eq!(m.status, ' ');
      assert_eq!(m.rest, "a");
    }
  }

  #[test]
  fn test_indent_and_status() {
    let m = match_task_line("    - [x]   done thing").unwrap();
    assert_eq!(m.indent, 4);
    assert_eq!(m.status, 'x');
    assert_eq!(m.rest, "done thing");

    let m = match_task_line("\t- [/] tab").unwrap();
    assert_eq!(m.indent, 1);
    assert_eq!(m.status, '/');
  }

  #[test]
  fn test_rejects_non_tasks() {
    for line in ["- plain item", "[ ] no marker", "1 [ ] no dot", "- [] empty", "text - [ ] later", ""] {
      assert!(!is_task_line(line), "{line:?}");
    }
  }

  #[test]
  fn test_empty_content_still_a_task() {
    let m = match_task_line("- [ ]").unwrap();
    assert_eq!(m.rest, "");
  }
}
