//! Regions of a line where `#` never starts a tag: wiki links, markdown
//! links, inline code, bare URLs and CSS colour codes.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

struct Patterns {
  wiki_link: Regex,
  markdown_link: Regex,
  url: Regex,
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| {
  Some(Patterns {
    wiki_link: Regex::new(r"\[\[[^\]]+\]\]").ok()?,
    markdown_link: Regex::new(r"\[[^\]]*\]\([^)]+\)").ok()?,
    url: Regex::new(r#"(?:https?|ftp|mailto|file)://[^\s<>"{}|\\^`\[\]]+"#).ok()?,
  })
});

/// Sorted, non-overlapping protected byte ranges of one piece of text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedRanges {
  ranges: Vec<Range<usize>>,
}

impl ProtectedRanges {
  pub fn detect(content: &str) -> Self {
    let mut ranges = Vec::new();

    if let Some(patterns) = PATTERNS.as_ref() {
      for regex in [&patterns.wiki_link, &patterns.markdown_link] {
        ranges.extend(regex.find_iter(content).map(|m| m.range()));
      }
      ranges.extend(inline_code(content));
      ranges.extend(patterns.url.find_iter(content).map(|m| m.range()));
    } else {
      ranges.extend(inline_code(content));
    }
    ranges.extend(color_codes(content));

    Self { ranges: merge(ranges) }
  }

  pub fn is_protected(&self, pos: usize) -> bool {
    self.ranges.iter().any(|r| r.contains(&pos))
  }

  /// Byte offset of the next unprotected `needle` at or after `from`
  pub fn next_unprotected(&self, content: &str, needle: char, from: usize) -> Option<usize> {
    let mut pos = from;
    while pos < content.len() {
      let found = pos + content.get(pos..)?.find(needle)?;
      if !self.is_protected(found) {
        return Some(found);
      }
      pos = found + needle.len_utf8();
    }
    None
  }

  pub fn ranges(&self) -> &[Range<usize>] {
    &self.ranges
  }
}

/// Backtick-delimited spans; the closing run must match the opening length
fn inline_code(content: &str) -> Vec<Range<usize>> {
  let bytes = content.as_bytes();
  let run_at = |i: usize| bytes[i..].iter().take_while(|b| **b == b'`').count();

  let mut ranges = Vec::new();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'`' {
      i += 1;
      continue;
    }
    let open = run_at(i);
    let body_start = i + open;

    let mut j = body_start;
    let mut closed = None;
    while j < bytes.len() {
      if bytes[j] == b'`' {
        let run = run_at(j);
        if run == open && j > body_start {
          closed = Some(j + run);
          break;
        }
        j += run;
      } else {
        j += 1;
      }
    }

    match closed {
      Some(end) => {
        ranges.push(i..end);
        i = end;
      }
      None => i = body_start,
    }
  }
  ranges
}

/// `#rgb` / `#rrggbb` not glued to surrounding alphanumerics
fn color_codes(content: &str) -> Vec<Range<usize>> {
  let bytes = content.as_bytes();
  let mut ranges = Vec::new();
  for (i, _) in content.match_indices('#') {
    let hex = bytes[i + 1..].iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if hex != 3 && hex != 6 {
      continue;
    }
    let end = i + 1 + hex;
    let before_ok = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
    let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
    if before_ok && after_ok {
      ranges.push(i..end);
    }
  }
  ranges
}

fn merge(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
  ranges.sort_by_key(|r| r.start);
  let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
  for range in ranges {
    match merged.last_mut() {
      Some(last) if last.end > range.start => last.end = last.end.max(range.end),
      _ => merged.push(range),
    }
  }
  merged
}
