//! Inline token scanners for the text after a task checkbox.
//!
//! A task line's text is consumed left to right. Each round looks for, in
//! order: a dataview field (`[key:: value]` or `(key:: value)`), an emoji
//! marker with its value, then whichever of `@context` / `#tag` comes first.
//! Recognised tokens are removed; everything else becomes the task content.
//! Values are collected as raw strings and typed later by the parser.

use tg_core::resolver::{has_iso_date_prefix, priority_from_str};
use tg_core::{Metadata, MetadataParseMode, TaskParserConfig};

use crate::protected::ProtectedRanges;

/// Metadata keys whose emoji values are dates
const DATE_KEYS: &[&str] = &[
  "dueDate",
  "startDate",
  "scheduledDate",
  "completedDate",
  "createdDate",
  "cancelledDate",
];

/// A value ends right after a reference to one of these
const FILE_EXTENSIONS: &[&str] = &[".md", ".canvas", ".txt", ".pdf"];

/// Full-width punctuation and typographic quotes never belong to a tag
const TAG_STOP_CHARS: &[char] = &[
  '，', '。', '；', '：', '！', '？', '「', '」', '『', '』', '（', '）', '【', '】', '、', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}',
];

/// Result of scanning one task line
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct InlineTokens {
  /// Text with every recognised token removed, whitespace collapsed
  pub content: String,
  /// Raw field values keyed by metadata key
  pub fields: Metadata,
  /// Plain tags, `#` included, in order of appearance
  pub tags: Vec<String>,
}

/// A token found at `start..end` of the scanned text
#[derive(Debug, Clone, PartialEq)]
struct Token {
  start: usize,
  end: usize,
  kind: TokenKind,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
  Field { key: String, value: String },
  Tag(String),
  Context(String),
}

pub(crate) struct InlineScanner<'a> {
  config: &'a TaskParserConfig,
}

impl<'a> InlineScanner<'a> {
  pub fn new(config: &'a TaskParserConfig) -> Self {
    Self { config }
  }

  fn dataview_enabled(&self) -> bool {
    self.config.parse_metadata && self.config.metadata_parse_mode.dataview()
  }

  fn emoji_enabled(&self) -> bool {
    self.config.parse_metadata && self.config.metadata_parse_mode.emoji()
  }

  /// Scan the text after a checkbox
  pub fn scan(&self, text: &str) -> InlineTokens {
    let mut out = InlineTokens::default();
    let mut cleaned = String::with_capacity(text.len());
    let mut remaining = text.to_string();

    for _ in 0..self.config.max_metadata_iterations {
      if remaining.is_empty() {
        break;
      }

      if self.dataview_enabled()
        && let Some(token) = self.dataview_field(&remaining)
      {
        self.apply(token.kind, &mut out);
        remaining = format!("{}{}", &remaining[..token.start], &remaining[token.end..]);
        continue;
      }

      if self.emoji_enabled()
        && let Some(token) = self.emoji_field(&remaining)
      {
        self.scan_tags_only(&remaining[..token.start], &mut cleaned, &mut out);
        self.apply(token.kind, &mut out);
        remaining = remaining[token.end..].to_string();
        continue;
      }

      if let Some(token) = self.tag_or_context(&remaining) {
        cleaned.push_str(&remaining[..token.start]);
        self.apply(token.kind, &mut out);
        remaining = remaining[token.end..].to_string();
        continue;
      }

      break;
    }

    // Anything left when nothing matches, or when the budget runs out
    cleaned.push_str(&remaining);
    out.content = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    out
  }

  /// Dataview fields, tags and contexts only; used for text preceding an emoji
  fn scan_tags_only(&self, text: &str, cleaned: &mut String, out: &mut InlineTokens) {
    let mut remaining = text.to_string();
    for _ in 0..self.config.max_metadata_iterations {
      if remaining.is_empty() {
        break;
      }

      if self.dataview_enabled()
        && let Some(token) = self.dataview_field(&remaining)
      {
        self.apply(token.kind, out);
        remaining = format!("{}{}", &remaining[..token.start], &remaining[token.end..]);
        continue;
      }

      if let Some(token) = self.tag_or_context(&remaining) {
        cleaned.push_str(&remaining[..token.start]);
        self.apply(token.kind, out);
        remaining = remaining[token.end..].to_string();
        continue;
      }

      break;
    }
    cleaned.push_str(&remaining);
  }

  fn apply(&self, kind: TokenKind, out: &mut InlineTokens) {
    match kind {
      TokenKind::Field { key, value } => {
        out.fields.insert(key, value.into());
      }
      TokenKind::Context(value) => {
        out.fields.insert("context".to_string(), value.into());
      }
      TokenKind::Tag(tag) => {
        let special = tag[1..].split_once('/').and_then(|(prefix, value)| {
          if value.is_empty() || self.config.metadata_parse_mode == MetadataParseMode::None {
            return None;
          }
          self.config.tag_role(prefix).map(|role| (role, value))
        });
        match special {
          Some((role, value)) => {
            out.fields.insert(role.as_str().to_string(), value.into());
          }
          None => {
            if !out.tags.contains(&tag) {
              out.tags.push(tag);
            }
          }
        }
      }
    }
  }

  // ==========================================================================
  // Dataview fields
  // ==========================================================================

  fn dataview_field(&self, text: &str) -> Option<Token> {
    let mut from = 0;
    while from < text.len() {
      let start = from + text[from..].find(['[', '('])?;
      let close = if text.as_bytes()[start] == b'[' { ']' } else { ')' };
      let Some(len) = text[start + 1..].find(close) else {
        from = start + 1;
        continue;
      };
      let end = start + 1 + len + 1;
      let inner = &text[start + 1..end - 1];

      if let Some((key, value)) = inner.split_once("::") {
        let (key, value) = (key.trim(), value.trim());
        if !key.is_empty() && !value.is_empty() {
          return Some(Token {
            start,
            end,
            kind: TokenKind::Field {
              key: self.dataview_key(key),
              value: value.to_string(),
            },
          });
        }
      }
      from = start + 1;
    }
    None
  }

  /// Canonical metadata key for a dataview field name
  fn dataview_key(&self, key: &str) -> String {
    let canonical = match key.to_lowercase().as_str() {
      "due" => "dueDate",
      "start" => "startDate",
      "scheduled" => "scheduledDate",
      "completion" => "completedDate",
      "created" => "createdDate",
      "cancelled" => "cancelledDate",
      "id" => "id",
      "dependson" => "dependsOn",
      "oncompletion" => "onCompletion",
      "priority" => "priority",
      "repeat" | "recurrence" => "recurrence",
      _ => {
        return match self.config.tag_role_ignore_case(key) {
          Some(role) => role.as_str().to_string(),
          None => key.to_string(),
        };
      }
    };
    canonical.to_string()
  }

  // ==========================================================================
  // Emoji markers
  // ==========================================================================

  fn emoji_at(&self, text: &str) -> Option<&str> {
    self
      .config
      .emoji_mapping
      .keys()
      .find(|emoji| text.starts_with(emoji.as_str()))
      .map(String::as_str)
  }

  fn emoji_field(&self, text: &str) -> Option<Token> {
    let (start, emoji, key) = self
      .config
      .emoji_mapping
      .iter()
      .filter_map(|(emoji, key)| text.find(emoji.as_str()).map(|pos| (pos, emoji.as_str(), key.as_str())))
      .min_by_key(|(pos, emoji, _)| (*pos, std::cmp::Reverse(emoji.len())))?;

    let after = &text[start + emoji.len()..];
    let value_start = after.len() - after.trim_start().len();
    let value_part = &after[value_start..];
    let value_end = self.emoji_value_end(value_part);
    let raw = value_part[..value_end].trim();
    let value: String = raw.chars().take(self.config.max_emoji_value_length).collect();

    let mut end = start + emoji.len() + value_start + value_end;
    let value = match key {
      "dependsOn" => value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect::<Vec<_>>()
        .join(","),
      "priority" => {
        if !value.is_empty() && priority_from_str(&value).is_some() {
          value
        } else {
          // The marker alone sets the level; following text stays content
          end = start + emoji.len();
          emoji.to_string()
        }
      }
      _ if DATE_KEYS.contains(&key) => iso_date_in(&value).map(str::to_string).unwrap_or(value),
      _ if value.is_empty() => "true".to_string(),
      _ => value,
    };

    Some(Token {
      start,
      end,
      kind: TokenKind::Field {
        key: key.to_string(),
        value,
      },
    })
  }

  /// Byte length of the value that follows an emoji marker
  fn emoji_value_end(&self, value: &str) -> usize {
    let mut chars = value.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
      let rest = &value[i..];
      if c == '[' || self.emoji_at(rest).is_some() {
        return i;
      }
      if let Some(end) = file_extension_end(value, i) {
        return end;
      }
      if c.is_whitespace() && matches!(chars.peek(), Some((_, '#' | '@'))) {
        return i;
      }
      if c == '#' || c == '@' {
        return i;
      }
    }
    value.len()
  }

  // ==========================================================================
  // Tags and contexts
  // ==========================================================================

  fn tag_or_context(&self, text: &str) -> Option<Token> {
    if !self.config.parse_tags {
      return None;
    }
    let tag = self.tag(text);
    let context = if self.config.at_sign_is_context() {
      context(text)
    } else {
      None
    };
    match (tag, context) {
      (Some(t), Some(c)) => Some(if c.start < t.start { c } else { t }),
      (t, c) => t.or(c),
    }
  }

  fn tag(&self, text: &str) -> Option<Token> {
    let protected = ProtectedRanges::detect(text);
    let bytes = text.as_bytes();
    let mut from = 0;

    while let Some(hash) = protected.next_unprotected(text, '#', from) {
      from = hash + 1;

      let backslashes = bytes[..hash].iter().rev().take_while(|b| **b == b'\\').count();
      if backslashes % 2 == 1 || !is_valid_tag_start(text, hash) {
        continue;
      }

      let body = &text[hash + 1..];
      let len = body.find(|c: char| !is_tag_char(c)).unwrap_or(body.len());
      if len == 0 {
        continue;
      }

      let name: String = body[..len].chars().take(self.config.max_tag_length).collect();
      return Some(Token {
        start: hash,
        end: hash + 1 + len,
        kind: TokenKind::Tag(format!("#{}", name)),
      });
    }
    None
  }
}

/// `@name` at a word start; later `@`s are tried when an earlier one is not
fn context(text: &str) -> Option<Token> {
  for (at, _) in text.match_indices('@') {
    let word_start = text[..at]
      .chars()
      .next_back()
      .is_none_or(|prev| prev.is_whitespace() || !is_word_glue(prev));
    if !word_start {
      continue;
    }
    let body = &text[at + 1..];
    let len = body
      .find(|c: char| c == '/' || !is_tag_char(c))
      .unwrap_or(body.len());
    if len > 0 {
      return Some(Token {
        start: at,
        end: at + 1 + len,
        kind: TokenKind::Context(body[..len].to_string()),
      });
    }
  }
  None
}

/// Characters that make a following `#`/`@` part of a word
fn is_word_glue(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '$' | '%' | '^' | '&' | '*')
}

fn is_valid_tag_start(text: &str, hash: usize) -> bool {
  let Some(prev) = text[..hash].chars().next_back() else {
    return true;
  };
  if prev.is_whitespace()
    || matches!(
      prev,
      '(' | '[' | '{' | '<' | ',' | ';' | ':' | '!' | '?' | '-' | '+' | '*' | '/' | '\\' | '|' | '='
    )
  {
    return true;
  }
  !is_word_glue(prev)
}

fn is_tag_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_') || (!c.is_ascii() && !TAG_STOP_CHARS.contains(&c))
}

/// End of `.ext` (plus an optional `#heading`) at `pos`, when followed by a
/// space or the end of the value
fn file_extension_end(value: &str, pos: usize) -> Option<usize> {
  let rest = &value[pos..];
  FILE_EXTENSIONS.iter().find_map(|ext| {
    if !rest.starts_with(ext) {
      return None;
    }
    let mut end = pos + ext.len();
    if value[end..].starts_with('#') {
      end += value[end..].find(' ').unwrap_or(value.len() - end);
    }
    (end >= value.len() || value[end..].starts_with(' ')).then_some(end)
  })
}

/// First `dddd-dd-dd` substring
fn iso_date_in(value: &str) -> Option<&str> {
  value
    .char_indices()
    .map(|(i, _)| i)
    .find(|i| has_iso_date_prefix(&value[*i..]))
    .map(|i| &value[i..i + 10])
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use tg_core::{MetadataFormat, Settings};

  fn scan(text: &str) -> InlineTokens {
    InlineScanner::new(&TaskParserConfig::default()).scan(text)
  }

  fn field<'m>(tokens: &'m InlineTokens, key: &str) -> Option<&'m str> {
    tokens.fields.get(key).and_then(|v| v.as_str())
  }

  #[test]
  fn test_complex_line() {
    let tokens = scan("Complex task #project/work @office 📅 2024-12-31 🔺 #important #urgent 🔁 every week");
    assert_eq!(tokens.content, "Complex task");
    assert_eq!(field(&tokens, "project"), Some("work"));
    assert_eq!(field(&tokens, "context"), Some("office"));
    assert_eq!(field(&tokens, "dueDate"), Some("2024-12-31"));
    assert_eq!(field(&tokens, "priority"), Some("🔺"));
    assert_eq!(field(&tokens, "recurrence"), Some("every week"));
    assert_eq!(tokens.tags, vec!["#important", "#urgent"]);
  }

  #[test]
  fn test_text_after_emoji_value_is_kept() {
    let tokens = scan("Buy milk ⏫ and eggs #shop");
    assert_eq!(tokens.content, "Buy milk and eggs");
    assert_eq!(field(&tokens, "priority"), Some("⏫"));
    assert_eq!(tokens.tags, vec!["#shop"]);
  }

  #[test]
  fn test_dataview_fields_and_aliases() {
    let tokens = scan("Write report [due:: 2024-01-05] (repeat:: every month) [Project:: Alpha]");
    assert_eq!(tokens.content, "Write report");
    assert_eq!(field(&tokens, "dueDate"), Some("2024-01-05"));
    assert_eq!(field(&tokens, "recurrence"), Some("every month"));
    assert_eq!(field(&tokens, "project"), Some("Alpha"));
  }

  #[test]
  fn test_links_are_not_fields() {
    let tokens = scan("See [[Page]] and [site](http://x.y/#a) [owner:: sam]");
    assert_eq!(tokens.content, "See [[Page]] and [site](http://x.y/#a)");
    assert_eq!(field(&tokens, "owner"), Some("sam"));
    assert!(tokens.tags.is_empty());
  }

  #[test]
  fn test_depends_on_and_id() {
    let tokens = scan("Deploy 🆔 dep1 ⛔ a1, b2 ,");
    assert_eq!(tokens.content, "Deploy");
    assert_eq!(field(&tokens, "id"), Some("dep1"));
    assert_eq!(field(&tokens, "dependsOn"), Some("a1,b2"));
  }

  #[test]
  fn test_on_completion_stops_after_file_reference() {
    let tokens = scan("Tidy 🏁 move:Archive.md#Done later");
    assert_eq!(field(&tokens, "onCompletion"), Some("move:Archive.md#Done"));
    assert_eq!(tokens.content, "Tidy later");
  }

  #[test]
  fn test_date_value_trimmed_to_iso() {
    let tokens = scan("Call 📅 on 2025-08-15 sharp");
    assert_eq!(field(&tokens, "dueDate"), Some("2025-08-15"));
  }

  #[test]
  fn test_tag_boundaries() {
    let tokens = scan("issue#12 a\\#b `#code` #fff #ok-1 (#paren) #中文标签，done");
    assert_eq!(tokens.tags, vec!["#ok-1", "#paren", "#中文标签"]);
    assert!(tokens.content.contains("issue#12"));
    assert!(tokens.content.contains("`#code`"));
    assert!(tokens.content.contains("#fff"));
  }

  #[test]
  fn test_tag_before_context_both_extracted() {
    let tokens = scan("Task #tag @home rest");
    assert_eq!(tokens.content, "Task rest");
    assert_eq!(tokens.tags, vec!["#tag"]);
    assert_eq!(field(&tokens, "context"), Some("home"));
  }

  #[test]
  fn test_email_is_not_context() {
    let tokens = scan("Mail bob@example.com @desk");
    assert_eq!(field(&tokens, "context"), Some("desk"));
    assert!(tokens.content.contains("bob@example.com"));
  }

  #[test]
  fn test_none_mode_keeps_special_tags_plain() {
    let mut config = TaskParserConfig::default();
    config.metadata_parse_mode = MetadataParseMode::None;
    let tokens = InlineScanner::new(&config).scan("Plan #project/work 📅 2024-01-01");
    assert_eq!(tokens.tags, vec!["#project/work"]);
    assert!(tokens.fields.get("project").is_none());
    assert!(tokens.fields.get("dueDate").is_none());
    assert_eq!(tokens.content, "Plan 📅 2024-01-01");
  }

  #[test]
  fn test_dataview_mode_ignores_emoji_and_at_sign() {
    let config = TaskParserConfig::from_settings(MetadataFormat::Dataview, &Settings::default());
    let tokens = InlineScanner::new(&config).scan("Read 📅 2024-01-01 @home [context:: desk] #context/office");
    assert_eq!(field(&tokens, "context"), Some("office"));
    assert_eq!(tokens.content, "Read 📅 2024-01-01 @home");
  }

  #[test]
  fn test_tag_length_capped() {
    let mut config = TaskParserConfig::default();
    config.max_tag_length = 4;
    let tokens = InlineScanner::new(&config).scan("x #abcdefgh y");
    assert_eq!(tokens.tags, vec!["#abcd"]);
    assert_eq!(tokens.content, "x y");
  }

  #[test]
  fn test_iteration_budget_keeps_remaining_text() {
    let mut config = TaskParserConfig::default();
    config.max_metadata_iterations = 1;
    let tokens = InlineScanner::new(&config).scan("a #one #two");
    assert_eq!(tokens.tags, vec!["#one"]);
    assert_eq!(tokens.content, "a #two");
  }
}
