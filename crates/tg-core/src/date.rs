//! Date parsing for inline task dates, frontmatter values and daily-note paths.
//!
//! All dates are normalised to midnight UTC and returned as epoch millis.
//! Format strings use the `yyyy-MM-dd` token style (literals in single
//! quotes) and are translated into chrono format strings before parsing.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use moka::sync::Cache;
use tracing::debug;

/// Formats tried after any custom formats
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
  "yyyy-MM-dd",
  "yyyy/MM/dd",
  "dd-MM-yyyy",
  "dd/MM/yyyy",
  "MM-dd-yyyy",
  "MM/dd/yyyy",
  "yyyy.MM.dd",
  "dd.MM.yyyy",
  "yyyy年M月d日",
  "MMM d, yyyy",
  "MMM dd, yyyy",
  "d MMM yyyy",
  "dd MMM yyyy",
  "yyyyMMddHHmmss",
  "yyyyMMdd_HHmmss",
];

const DATE_CACHE_CAPACITY: u64 = 10_000;

static DATE_CACHE: LazyLock<Cache<String, Option<i64>>> = LazyLock::new(|| Cache::new(DATE_CACHE_CAPACITY));

// ============================================================================
// Format translation
// ============================================================================

const FORMAT_TOKENS: &[(&str, &str)] = &[
  ("yyyy", "%Y"),
  ("yy", "%y"),
  ("MMMM", "%B"),
  ("MMM", "%b"),
  ("MM", "%m"),
  ("M", "%m"),
  ("dd", "%d"),
  ("d", "%d"),
  ("HH", "%H"),
  ("H", "%H"),
  ("mm", "%M"),
  ("m", "%M"),
  ("ss", "%S"),
  ("s", "%S"),
];

/// Translate a format string into a chrono format string
pub fn to_chrono_format(format: &str) -> String {
  let mut out = String::with_capacity(format.len() + 8);
  let mut rest = format;
  while let Some(c) = rest.chars().next() {
    // 'quoted' text is literal
    if c == '\''
      && let Some(end) = rest[1..].find('\'')
    {
      push_literal(&mut out, &rest[1..1 + end]);
      rest = &rest[end + 2..];
      continue;
    }

    if let Some((token, spec)) = FORMAT_TOKENS.iter().find(|(token, _)| rest.starts_with(token)) {
      out.push_str(spec);
      rest = &rest[token.len()..];
      continue;
    }

    push_literal(&mut out, &rest[..c.len_utf8()]);
    rest = &rest[c.len_utf8()..];
  }
  out
}

fn push_literal(out: &mut String, literal: &str) {
  for c in literal.chars() {
    if c == '%' {
      out.push_str("%%");
    } else {
      out.push(c);
    }
  }
}

fn midnight_millis(date: NaiveDate) -> i64 {
  date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Parse `input` with a single chrono format, truncated to the start of day
fn parse_with_chrono(input: &str, chrono_format: &str) -> Option<i64> {
  if chrono_format.contains("%H") || chrono_format.contains("%M") || chrono_format.contains("%S") {
    NaiveDateTime::parse_from_str(input, chrono_format)
      .ok()
      .map(|dt| midnight_millis(dt.date()))
  } else {
    NaiveDate::parse_from_str(input, chrono_format).ok().map(midnight_millis)
  }
}

/// Parse `input` with one `yyyy-MM-dd` style format
pub fn parse_with_format(input: &str, format: &str) -> Option<i64> {
  parse_with_chrono(input.trim(), &to_chrono_format(format))
}

// ============================================================================
// Public parsers
// ============================================================================

/// Parse an ISO-8601 style string into epoch millis.
///
/// Date-only strings are midnight UTC; date-times without an offset are
/// read as UTC.
pub fn parse_iso(input: &str) -> Option<i64> {
  let input = input.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
    return Some(dt.timestamp_millis());
  }
  for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
      return Some(dt.and_utc().timestamp_millis());
    }
  }
  NaiveDate::parse_from_str(input, "%Y-%m-%d").ok().map(midnight_millis)
}

/// Parse a task date string, trying custom formats first, then the defaults,
/// then ISO-8601. The result is the start of that day in UTC.
///
/// Template placeholders (`{{date}}`) never parse. Results, including
/// failures, are memoised.
pub fn parse_local_date(input: &str, custom_formats: Option<&[String]>) -> Option<i64> {
  let input = input.trim();
  if input.is_empty() || input.contains("{{") || input.contains("}}") {
    return None;
  }

  let key = match custom_formats {
    Some(formats) => format!("{}_{}", input, formats.join(",")),
    None => format!("{}_", input),
  };
  if let Some(cached) = DATE_CACHE.get(&key) {
    return cached;
  }

  let custom = custom_formats.unwrap_or_default().iter().map(String::as_str);
  let parsed = custom
    .chain(DEFAULT_DATE_FORMATS.iter().copied())
    .find_map(|format| parse_with_format(input, format))
    .or_else(|| {
      parse_iso(input).and_then(|millis| DateTime::from_timestamp_millis(millis).map(|dt| midnight_millis(dt.date_naive())))
    });

  if parsed.is_none() {
    debug!(input, "Could not parse date");
  }
  DATE_CACHE.insert(key, parsed);
  parsed
}

/// Drop all memoised date parses
pub fn clear_date_cache() {
  DATE_CACHE.invalidate_all();
}
