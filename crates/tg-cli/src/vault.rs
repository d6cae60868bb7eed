//! Reading a folder of notes from disk

use std::path::Path;
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use serde_json::Value;
use tg_core::{Metadata, ProjectConfig};
use tg_parser::{FileCache, FileStats, ParseRequest};
use tg_workers::InMemoryProjectSource;
use tg_workers::cache::is_config_file;
use tg_workers::source::parse_config_content;
use tracing::{debug, warn};

/// Extensions the parse pipeline understands
const EXTENSIONS: &[&str] = &["md", "markdown", "canvas"];

static TAG_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?:^|\s)(#[\p{L}\p{N}_/-]+)").ok());
static LINK_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[\[([^\]|#]+)").ok());

/// A note read from disk. `path` is relative to the scanned root and always
/// `/`-separated.
#[derive(Debug, Clone)]
pub struct NoteFile {
  pub path: String,
  pub content: String,
  pub mtime: i64,
  pub size: u64,
}

impl NoteFile {
  pub fn is_markdown(&self) -> bool {
    self.path.ends_with(".md") || self.path.ends_with(".markdown")
  }

  /// Frontmatter plus the tags and wiki links found in the body
  pub fn file_cache(&self) -> FileCache {
    let (frontmatter, body) = split_frontmatter(&self.content);
    let captures = |re: &Option<Regex>| -> Vec<String> {
      let Some(re) = re else {
        return Vec::new();
      };
      let mut found: Vec<String> = Vec::new();
      for caps in re.captures_iter(body) {
        let value = caps[1].trim().to_string();
        if !found.contains(&value) {
          found.push(value);
        }
      }
      found
    };

    FileCache {
      frontmatter,
      tags: captures(&*TAG_RE),
      links: captures(&*LINK_RE),
    }
  }

  pub fn parse_request(&self) -> ParseRequest {
    let mut request = ParseRequest::new(self.path.clone(), self.content.clone());
    request.stats = Some(FileStats {
      mtime: self.mtime,
      size: self.size,
    });
    if self.is_markdown() {
      request = request.with_file_cache(self.file_cache());
    }
    request
  }
}

/// Read `input`: a single note, or every note below a directory
/// (respecting `.gitignore` and hidden files)
pub fn scan(input: &Path) -> Result<Vec<NoteFile>> {
  if input.is_file() {
    let path = input.to_string_lossy().replace('\\', "/");
    return Ok(vec![read_note(input, path)?]);
  }

  let mut files = Vec::new();
  for entry in WalkBuilder::new(input).hidden(true).git_ignore(true).build().flatten() {
    let path = entry.path();
    if path.is_dir() {
      continue;
    }
    let supported = path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|ext| EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    if !supported {
      continue;
    }

    let relative = path.strip_prefix(input).unwrap_or(path);
    let relative = relative.to_string_lossy().replace('\\', "/");
    match read_note(path, relative) {
      Ok(note) => files.push(note),
      Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable note"),
    }
  }

  files.sort_by(|a, b| a.path.cmp(&b.path));
  debug!(root = %input.display(), files = files.len(), "Scanned notes");
  Ok(files)
}

fn read_note(path: &Path, relative: String) -> Result<NoteFile> {
  let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  let metadata = std::fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
  let mtime = metadata
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map_or(0, |d| d.as_millis() as i64);

  Ok(NoteFile {
    path: relative,
    content,
    mtime,
    size: metadata.len(),
  })
}

/// Split a leading `---` YAML block off `content`. Malformed YAML is logged
/// and treated as no frontmatter.
pub fn split_frontmatter(content: &str) -> (Option<Metadata>, &str) {
  let Some((block, body)) = frontmatter_block(content) else {
    return (None, content);
  };

  match serde_yaml::from_str::<Value>(block) {
    Ok(Value::Object(map)) => (Some(map), body),
    Ok(_) => (None, body),
    Err(e) => {
      warn!(error = %e, "Invalid frontmatter");
      (None, body)
    }
  }
}

fn frontmatter_block(content: &str) -> Option<(&str, &str)> {
  let rest = content.strip_prefix("---")?;
  let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;

  let (block, after) = match rest.strip_prefix("---") {
    Some(after) => ("", after),
    None => {
      let end = rest.find("\n---")?;
      (&rest[..end], &rest[end + 4..])
    }
  };
  let body = after.split_once('\n').map_or("", |(_, body)| body);
  Some((block, body))
}

/// Whether `path` is a project config file under `config`
pub fn is_project_config(path: &str, config: &ProjectConfig) -> bool {
  let file_name = path.rsplit('/').next().unwrap_or(path);
  file_name == config.config_file.file_name || is_config_file(path)
}

/// Build a project source over `files`. Project config files contribute
/// their frontmatter overlaid with `key: value` lines from the body.
pub fn load_source(files: &[NoteFile], project_config: ProjectConfig) -> InMemoryProjectSource {
  let read_config_files = project_config.config_file.enabled;
  let source = InMemoryProjectSource::new(project_config);
  let config = source.project_config();

  for file in files {
    let (frontmatter, body) = split_frontmatter(&file.content);
    if read_config_files && file.is_markdown() && is_project_config(&file.path, &config) {
      let mut data = frontmatter.clone().unwrap_or_default();
      data.extend(parse_config_content(body));
      source.insert_config_file(file.path.clone(), data, file.mtime);
    }
    source.insert_file(file.path.clone(), frontmatter, file.mtime);
  }
  source
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tg_core::project::ConfigFileSettings;
  use tg_workers::ProjectConfigSource;

  fn note(path: &str, content: &str) -> NoteFile {
    NoteFile {
      path: path.into(),
      content: content.into(),
      mtime: 1,
      size: content.len() as u64,
    }
  }

  #[test]
  fn test_split_frontmatter() {
    let (fm, body) = split_frontmatter("---\nproject: Apollo\ntags: [a, b]\n---\n- [ ] task\n");
    let fm = fm.unwrap();
    assert_eq!(fm["project"], json!("Apollo"));
    assert_eq!(fm["tags"], json!(["a", "b"]));
    assert_eq!(body, "- [ ] task\n");

    let (fm, body) = split_frontmatter("---\n---\nbody");
    assert!(fm.is_none());
    assert_eq!(body, "body");

    let (fm, body) = split_frontmatter("no frontmatter");
    assert!(fm.is_none());
    assert_eq!(body, "no frontmatter");
  }

  #[test]
  fn test_file_cache_collects_tags_and_links() {
    let cache = note("a.md", "---\nx: 1\n---\n#todo text #todo\n# Heading\nsee [[Project Alpha|alias]] and [[b#sec]]")
      .file_cache();
    assert_eq!(cache.tags, vec!["#todo"]);
    assert_eq!(cache.links, vec!["Project Alpha", "b"]);
    assert_eq!(cache.frontmatter.unwrap()["x"], json!(1));
  }

  #[test]
  fn test_scan_directory() {
    let dir = tempfile::Builder::new().prefix("vault").tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("notes")).unwrap();
    std::fs::write(dir.path().join("notes/a.md"), "- [ ] a").unwrap();
    std::fs::write(dir.path().join("b.canvas"), "{}").unwrap();
    std::fs::write(dir.path().join("c.txt"), "- [ ] c").unwrap();

    let files = scan(dir.path()).unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["b.canvas", "notes/a.md"]);
    assert!(files[1].mtime > 0);

    let request = files[1].parse_request();
    assert_eq!(request.extension, "md");
    assert!(request.file_cache.is_some());
  }

  #[tokio::test]
  async fn test_load_source_reads_config_files() {
    let config = ProjectConfig {
      enable_enhanced_project: true,
      config_file: ConfigFileSettings {
        enabled: true,
        ..Default::default()
      },
      ..Default::default()
    };
    let files = vec![
      note("p/project.md", "---\narea: Ops\n---\nproject: Apollo\n"),
      note("p/task.md", "- [ ] t"),
    ];
    let source = load_source(&files, config);

    let config_file = source.config_file("p").await.unwrap();
    assert_eq!(config_file.path, "p/project.md");
    assert_eq!(Value::Object(config_file.data), json!({"area": "Ops", "project": "Apollo"}));
    assert_eq!(source.file_mtime("p/task.md").await, Some(1));
  }
}
