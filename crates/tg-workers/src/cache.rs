//! Project data cache.
//!
//! Two levels: resolved [`CachedProjectData`] per file, and per directory the
//! project config file found there together with the files resolved against
//! it. Entries are replaced whole; concurrent misses for the same file may
//! both recompute and the last write wins.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use tg_core::{CachedProjectData, clock};
use tracing::{debug, trace};

use crate::source::{ProjectConfigFile, ProjectConfigSource, directory_of};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  /// Size of the last batch lookup
  pub total_files: usize,
  /// Hits in the last batch lookup
  pub cached_files: usize,
  pub directory_cache_hits: usize,
  pub config_cache_hits: usize,
  pub last_update_time: i64,
}

#[derive(Debug, Default)]
struct DirectoryEntry {
  config_file: Option<ProjectConfigFile>,
  config_timestamp: i64,
  paths: HashSet<String>,
}

/// Whether a path looks like a project config file
pub fn is_config_file(path: &str) -> bool {
  path.ends_with(".config.md") || path.contains("task-genius")
}

pub struct ProjectDataCache {
  source: Arc<dyn ProjectConfigSource>,
  files: DashMap<String, CachedProjectData>,
  directories: DashMap<String, DirectoryEntry>,
  stats: Mutex<CacheStats>,
}

impl ProjectDataCache {
  pub fn new(source: Arc<dyn ProjectConfigSource>) -> Self {
    Self {
      source,
      files: DashMap::new(),
      directories: DashMap::new(),
      stats: Mutex::new(CacheStats::default()),
    }
  }

  // ==========================================================================
  // Lookups
  // ==========================================================================

  /// Cached data for `path`, if present and still valid
  pub async fn get(&self, path: &str) -> Option<CachedProjectData> {
    let cached = self.files.get(path).map(|e| e.value().clone())?;
    if self.is_valid(path, &cached).await {
      Some(cached)
    } else {
      trace!(file = %path, "Cached project data is stale");
      None
    }
  }

  /// Valid cached entries among `paths`; misses are simply absent
  pub async fn get_batch(&self, paths: &[String]) -> HashMap<String, CachedProjectData> {
    let mut result = HashMap::new();
    for path in paths {
      if let Some(cached) = self.get(path).await {
        result.insert(path.clone(), cached);
      }
    }

    self.update_stats(|stats| {
      stats.config_cache_hits += result.len();
      stats.total_files = paths.len();
      stats.cached_files = result.len();
      stats.last_update_time = clock::now_millis();
    });
    result
  }

  pub fn contains(&self, path: &str) -> bool {
    self.files.contains_key(path)
  }

  /// Store a freshly computed value for `path`
  pub fn set(&self, path: &str, data: CachedProjectData) {
    self.files.insert(path.to_string(), data);
    if let Some(mut dir) = self.directories.get_mut(directory_of(path)) {
      dir.paths.insert(path.to_string());
    }
  }

  /// Project config file for `directory`, memoised until its mtime changes
  pub async fn directory_config(&self, directory: &str) -> Option<ProjectConfigFile> {
    let current = self.source.config_file(directory).await;

    if let Some(entry) = self.directories.get(directory) {
      let unchanged = match (&entry.config_file, &current) {
        (Some(cached), Some(live)) => live.mtime == entry.config_timestamp && live.path == cached.path,
        (None, None) => true,
        _ => false,
      };
      if unchanged {
        let config = entry.config_file.clone();
        drop(entry);
        if config.is_some() {
          self.update_stats(|stats| stats.directory_cache_hits += 1);
        }
        return config;
      }
    }

    debug!(directory, found = current.is_some(), "Refreshing directory cache");
    let paths = self
      .directories
      .remove(directory)
      .map(|(_, old)| old.paths)
      .unwrap_or_default();
    self.directories.insert(
      directory.to_string(),
      DirectoryEntry {
        config_timestamp: current.as_ref().map_or(0, |c| c.mtime),
        config_file: current.clone(),
        paths,
      },
    );
    current
  }

  async fn is_valid(&self, path: &str, cached: &CachedProjectData) -> bool {
    let Some(mtime) = self.source.file_mtime(path).await else {
      return false;
    };
    if mtime > cached.timestamp {
      return false;
    }

    if let Some(config_source) = &cached.config_source {
      let directory = directory_of(path);
      if let Some(live) = self.source.config_file(directory).await
        && live.path == *config_source
        && let Some(dir) = self.directories.get(directory)
        && live.mtime > dir.config_timestamp
      {
        return false;
      }
    }
    true
  }

  /// Paths whose cached entry is no longer valid
  pub async fn stale_paths(&self) -> Vec<String> {
    let snapshot: Vec<(String, CachedProjectData)> = self
      .files
      .iter()
      .map(|e| (e.key().clone(), e.value().clone()))
      .collect();

    let mut stale = Vec::new();
    for (path, cached) in snapshot {
      if !self.is_valid(&path, &cached).await {
        stale.push(path);
      }
    }
    stale
  }

  // ==========================================================================
  // Invalidation
  // ==========================================================================

  /// Drop one file's entry, or everything when `path` is None
  pub fn clear(&self, path: Option<&str>) {
    match path {
      Some(path) => {
        self.files.remove(path);
        if let Some(mut dir) = self.directories.get_mut(directory_of(path)) {
          dir.paths.remove(path);
        }
      }
      None => {
        self.files.clear();
        self.directories.clear();
      }
    }
  }

  /// Drop a directory's config and every file resolved against it
  pub fn clear_directory(&self, directory: &str) {
    if let Some((_, dir)) = self.directories.remove(directory) {
      for path in &dir.paths {
        self.files.remove(path);
      }
      debug!(directory, files = dir.paths.len(), "Cleared directory cache");
    }
  }

  fn forget_config(&self, path: &str) {
    if is_config_file(path) {
      self.clear_directory(directory_of(path));
    }
  }

  pub fn on_file_modified(&self, path: &str) {
    self.clear(Some(path));
    self.forget_config(path);
  }

  pub fn on_file_deleted(&self, path: &str) {
    self.clear(Some(path));
    self.forget_config(path);
  }

  pub fn on_file_created(&self, path: &str) {
    self.forget_config(path);
  }

  pub fn on_file_renamed(&self, old_path: &str, new_path: &str) {
    self.clear(Some(old_path));
    self.forget_config(old_path);
    self.forget_config(new_path);
  }

  pub fn on_enhanced_project_setting_change(&self, enabled: bool) {
    if !enabled {
      self.clear(None);
    }
  }

  // ==========================================================================
  // Stats
  // ==========================================================================

  pub fn stats(&self) -> CacheStats {
    *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn file_count(&self) -> usize {
    self.files.len()
  }

  pub fn directory_count(&self) -> usize {
    self.directories.len()
  }

  fn update_stats(&self, f: impl FnOnce(&mut CacheStats)) {
    f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::InMemoryProjectSource;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tg_core::{Metadata, ProjectConfig};

  fn setup() -> (Arc<InMemoryProjectSource>, ProjectDataCache) {
    let source = Arc::new(InMemoryProjectSource::new(ProjectConfig {
      enable_enhanced_project: true,
      ..Default::default()
    }));
    let cache = ProjectDataCache::new(source.clone());
    (source, cache)
  }

  fn data(config_source: Option<&str>) -> CachedProjectData {
    CachedProjectData {
      tg_project: None,
      enhanced_metadata: Metadata::new(),
      timestamp: clock::now_millis(),
      config_source: config_source.map(String::from),
    }
  }

  #[tokio::test]
  async fn test_get_requires_existing_unmodified_file() {
    let (source, cache) = setup();
    cache.set("a.md", data(None));
    assert!(cache.get("a.md").await.is_none(), "unknown file is never valid");

    source.insert_file("a.md", None, 1);
    assert!(cache.get("a.md").await.is_some());

    source.insert_file("a.md", None, i64::MAX);
    assert!(cache.get("a.md").await.is_none());
    assert_eq!(cache.stale_paths().await, vec!["a.md".to_string()]);
  }

  #[tokio::test]
  async fn test_directory_config_memoised() {
    let (source, cache) = setup();
    source.insert_config_file("p/task-genius.config.md", json!({"project": "P"}).as_object().cloned().unwrap(), 10);

    let first = cache.directory_config("p").await.unwrap();
    assert_eq!(first.data["project"], json!("P"));
    assert_eq!(cache.stats().directory_cache_hits, 0);

    cache.directory_config("p").await;
    assert_eq!(cache.stats().directory_cache_hits, 1);

    source.insert_config_file("p/task-genius.config.md", Metadata::new(), 20);
    let refreshed = cache.directory_config("p").await.unwrap();
    assert!(refreshed.data.is_empty());
    assert_eq!(cache.stats().directory_cache_hits, 1);

    assert!(cache.directory_config("q").await.is_none());
    assert_eq!(cache.directory_count(), 2);
  }

  #[tokio::test]
  async fn test_config_file_events_clear_directory() {
    let (source, cache) = setup();
    source.insert_config_file("p/task-genius.config.md", Metadata::new(), 1);
    cache.directory_config("p").await;
    cache.set("p/a.md", data(Some("p/task-genius.config.md")));
    cache.set("p/b.md", data(None));
    cache.set("q/c.md", data(None));

    cache.on_file_modified("p/task-genius.config.md");
    assert!(!cache.contains("p/a.md"));
    assert!(!cache.contains("p/b.md"));
    assert!(cache.contains("q/c.md"));
  }

  #[tokio::test]
  async fn test_batch_stats_and_disable() {
    let (source, cache) = setup();
    source.insert_file("a.md", None, 0);
    cache.set("a.md", data(None));

    let hits = cache.get_batch(&["a.md".to_string(), "b.md".to_string()]).await;
    assert_eq!(hits.len(), 1);
    let stats = cache.stats();
    assert_eq!((stats.total_files, stats.cached_files, stats.config_cache_hits), (2, 1, 1));
    assert!(stats.last_update_time > 0);

    cache.on_enhanced_project_setting_change(true);
    assert_eq!(cache.file_count(), 1);
    cache.on_enhanced_project_setting_change(false);
    assert_eq!(cache.file_count(), 0);
  }

  #[test]
  fn test_is_config_file() {
    assert!(is_config_file("p/project.config.md"));
    assert!(is_config_file("task-genius/notes.md"));
    assert!(!is_config_file("p/config.md"));
  }
}
