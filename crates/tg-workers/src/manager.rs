//! Project data manager.
//!
//! Resolves per-file project data cache-first. Misses go to the
//! project-data worker pool when it is running, otherwise the resolver runs
//! on the calling task. Workers and the synchronous path call the same
//! [`compute_project_data`], so results agree up to `timestamp`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tg_core::resolver::compute_project_data;
use tg_core::{CachedProjectData, WorkerSettings};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ProjectDataCache, is_config_file};
use crate::error::WorkerError;
use crate::handler::WorkerKind;
use crate::message::{ProjectDataRequest, ProjectDataResult, WorkerReply, WorkerRequest};
use crate::pool::{DEFAULT_REQUEST_TIMEOUT, RequestIds, WorkerPool};
use crate::source::{ProjectConfigSource, directory_of};

/// Pool size when none is configured: a quarter of the cores, 1 to 2
pub fn default_worker_count() -> usize {
  (num_cpus::get() / 4).clamp(1, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
  pub enable_workers: bool,
  pub max_workers: Option<usize>,
  pub request_timeout: Duration,
}

impl Default for ManagerOptions {
  fn default() -> Self {
    Self {
      enable_workers: true,
      max_workers: None,
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
    }
  }
}

impl From<&WorkerSettings> for ManagerOptions {
  fn from(settings: &WorkerSettings) -> Self {
    Self {
      enable_workers: settings.enabled,
      max_workers: settings.max_workers,
      request_timeout: Duration::from_millis(settings.request_timeout_ms),
    }
  }
}

impl ManagerOptions {
  pub(crate) fn worker_count(&self) -> usize {
    self.max_workers.map_or_else(default_worker_count, |n| n.max(1))
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
  pub file_cache_size: usize,
  pub directory_cache_size: usize,
  pub pending_requests: usize,
  pub active_workers: usize,
  pub workers_enabled: bool,
}

pub struct ProjectDataWorkerManager {
  source: Arc<dyn ProjectConfigSource>,
  cache: ProjectDataCache,
  pool: RwLock<Option<WorkerPool>>,
  enable_workers: AtomicBool,
  initialized: AtomicBool,
  worker_count: usize,
  timeout: Duration,
  ids: RequestIds,
}

impl ProjectDataWorkerManager {
  /// Create the manager and, when enabled, start the worker pool
  pub fn new(source: Arc<dyn ProjectConfigSource>, options: ManagerOptions) -> Self {
    let manager = Self {
      cache: ProjectDataCache::new(source.clone()),
      source,
      pool: RwLock::new(None),
      enable_workers: AtomicBool::new(options.enable_workers),
      initialized: AtomicBool::new(false),
      worker_count: options.worker_count(),
      timeout: options.request_timeout,
      ids: RequestIds::default(),
    };
    manager.initialize_workers();
    manager
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Start the pool. No-op when disabled or already running; a spawn
  /// failure turns worker mode off instead of running with a partial pool.
  pub fn initialize_workers(&self) {
    if !self.enable_workers.load(Ordering::SeqCst) || self.initialized.swap(true, Ordering::SeqCst) {
      return;
    }

    match WorkerPool::spawn(WorkerKind::ProjectData, self.worker_count, self.timeout, self.ids.clone()) {
      Ok(pool) => {
        pool.post_all(&WorkerRequest::UpdateConfig {
          config: self.source.worker_config(),
        });
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
      }
      Err(e) => {
        warn!(error = %e, "Failed to start project data workers, falling back to synchronous mode");
        self.enable_workers.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = None;
      }
    }
  }

  pub fn set_workers_enabled(&self, enabled: bool) {
    if self.enable_workers.swap(enabled, Ordering::SeqCst) == enabled {
      return;
    }
    info!(enabled, "Project data workers toggled");
    if enabled {
      self.initialize_workers();
    } else {
      self.destroy();
    }
  }

  pub fn is_workers_enabled(&self) -> bool {
    self.enable_workers.load(Ordering::SeqCst) && self.active_pool().is_some()
  }

  /// Terminate the pool; in-flight requests fail with
  /// [`WorkerError::Terminated`]. Cached data is kept.
  pub fn destroy(&self) {
    let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(pool) = pool {
      pool.terminate();
    }
    self.initialized.store(false, Ordering::SeqCst);
  }

  fn active_pool(&self) -> Option<WorkerPool> {
    if !self.enable_workers.load(Ordering::SeqCst) {
      return None;
    }
    self
      .pool
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .filter(|pool| !pool.is_empty())
      .cloned()
  }

  // ==========================================================================
  // Lookups
  // ==========================================================================

  /// Project data for one file. Worker failures fall back to computing on
  /// the calling task, so this always produces a value.
  pub async fn get_project_data(&self, path: &str) -> CachedProjectData {
    if let Some(cached) = self.cache.get(path).await {
      return cached;
    }

    let (request, config_source) = self.request_for(path).await;
    let data = match self.active_pool() {
      Some(pool) => match self.compute_with_worker(&pool, request.clone(), config_source.clone()).await {
        Ok(data) => data,
        Err(e) => {
          warn!(file = %path, error = %e, "Worker computation failed, computing synchronously");
          self.compute_sync(&request, config_source)
        }
      },
      None => self.compute_sync(&request, config_source),
    };

    self.cache.set(path, data.clone());
    data
  }

  /// Project data for many files, keyed by path. Empty when enhanced
  /// project support is off. Files that fail individually are left out.
  pub async fn get_batch_project_data(&self, paths: &[String]) -> HashMap<String, CachedProjectData> {
    if !self.source.is_enhanced_project_enabled() {
      return HashMap::new();
    }

    let mut result = self.cache.get_batch(paths).await;
    let mut seen = HashSet::new();
    let missing: Vec<String> = paths
      .iter()
      .filter(|p| !result.contains_key(*p) && seen.insert(p.as_str()))
      .cloned()
      .collect();
    if missing.is_empty() {
      return result;
    }

    let computed = match self.active_pool() {
      Some(pool) => match self.compute_batch_with_workers(&pool, &missing).await {
        Ok(computed) => computed,
        Err(e) => {
          warn!(files = missing.len(), error = %e, "Worker batch failed, computing synchronously");
          self.compute_batch_sync(&missing).await
        }
      },
      None => self.compute_batch_sync(&missing).await,
    };

    debug!(requested = paths.len(), computed = computed.len(), "Batch project data resolved");
    for (path, data) in computed {
      self.cache.set(&path, data.clone());
      result.insert(path, data);
    }
    result
  }

  async fn request_for(&self, path: &str) -> (ProjectDataRequest, Option<String>) {
    let file_metadata = self.source.file_metadata(path).await.unwrap_or_default();
    let config = self.cache.directory_config(directory_of(path)).await;
    let config_source = config.as_ref().map(|c| c.path.clone());
    let request = ProjectDataRequest {
      file_path: path.to_string(),
      file_metadata,
      config_data: config.map(|c| c.data).unwrap_or_default(),
    };
    (request, config_source)
  }

  fn compute_sync(&self, request: &ProjectDataRequest, config_source: Option<String>) -> CachedProjectData {
    let mut data = compute_project_data(
      &request.file_path,
      Some(&request.file_metadata),
      Some(&request.config_data),
      &self.source.worker_config(),
    );
    data.config_source = config_source;
    data
  }

  async fn compute_with_worker(
    &self,
    pool: &WorkerPool,
    request: ProjectDataRequest,
    config_source: Option<String>,
  ) -> Result<CachedProjectData, WorkerError> {
    match pool.request(WorkerRequest::ComputeProjectData(request)).await? {
      WorkerReply::ProjectDataResult(result) => Ok(into_cached(result, config_source)),
      _ => Err(WorkerError::UnexpectedResponse("computeProjectData")),
    }
  }

  /// Split `missing` into one contiguous slice per worker and resolve them
  /// concurrently. Any worker failing fails the whole batch.
  async fn compute_batch_with_workers(
    &self,
    pool: &WorkerPool,
    missing: &[String],
  ) -> Result<Vec<(String, CachedProjectData)>, WorkerError> {
    let mut requests = Vec::with_capacity(missing.len());
    let mut sources = HashMap::new();
    for path in missing {
      let (request, config_source) = self.request_for(path).await;
      sources.insert(path.clone(), config_source);
      requests.push(request);
    }

    let slice_len = requests.len().div_ceil(pool.len());
    let replies = try_join_all(requests.chunks(slice_len).enumerate().map(|(index, slice)| {
      pool.request_to(
        index,
        WorkerRequest::ComputeBatchProjectData {
          files: slice.to_vec(),
        },
      )
    }))
    .await?;

    let mut computed = Vec::with_capacity(missing.len());
    for reply in replies {
      let WorkerReply::BatchProjectDataResult { results } = reply else {
        return Err(WorkerError::UnexpectedResponse("computeBatchProjectData"));
      };
      for result in results {
        let config_source = sources.get(&result.file_path).cloned().flatten();
        computed.push((result.file_path.clone(), into_cached(result, config_source)));
      }
    }
    Ok(computed)
  }

  async fn compute_batch_sync(&self, missing: &[String]) -> Vec<(String, CachedProjectData)> {
    join_all(missing.iter().map(|path| async move {
      let (request, config_source) = self.request_for(path).await;
      (path.clone(), self.compute_sync(&request, config_source))
    }))
    .await
  }

  // ==========================================================================
  // Cache maintenance
  // ==========================================================================

  pub async fn on_file_created(&self, path: &str) {
    self.cache.on_file_created(path);
    if !is_config_file(path) {
      self.get_project_data(path).await;
    }
  }

  /// Invalidate and recompute right away
  pub async fn on_file_modified(&self, path: &str) {
    self.cache.on_file_modified(path);
    if !is_config_file(path) {
      self.get_project_data(path).await;
    }
  }

  pub fn on_file_deleted(&self, path: &str) {
    self.cache.on_file_deleted(path);
  }

  pub async fn on_file_renamed(&self, old_path: &str, new_path: &str) {
    self.cache.on_file_renamed(old_path, new_path);
    if !is_config_file(new_path) {
      self.get_project_data(new_path).await;
    }
  }

  pub fn clear_cache(&self, path: Option<&str>) {
    self.cache.clear(path);
  }

  pub fn get_cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }

  /// Recompute every cached entry that is no longer valid. Returns how
  /// many entries were stale.
  pub async fn refresh_stale_entries(&self) -> usize {
    let stale = self.cache.stale_paths().await;
    if stale.is_empty() {
      return 0;
    }
    for path in &stale {
      self.cache.clear(Some(path));
    }
    self.get_batch_project_data(&stale).await;
    debug!(refreshed = stale.len(), "Refreshed stale project data");
    stale.len()
  }

  /// Warm the cache for the `limit` most recently modified of `paths`
  pub async fn preload_recent_files(&self, paths: &[String], limit: usize) {
    let mut dated = Vec::with_capacity(paths.len());
    for path in paths {
      if !self.cache.contains(path)
        && let Some(mtime) = self.source.file_mtime(path).await
      {
        dated.push((mtime, path.clone()));
      }
    }
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    let recent: Vec<String> = dated.into_iter().take(limit).map(|(_, path)| path).collect();
    if !recent.is_empty() {
      self.get_batch_project_data(&recent).await;
    }
  }

  pub async fn preload_project_data(&self, paths: &[String]) {
    self.get_batch_project_data(paths).await;
  }

  // ==========================================================================
  // Settings
  // ==========================================================================

  /// Push the current project config to every worker and drop cached data
  pub fn on_settings_change(&self) {
    if let Some(pool) = self.active_pool() {
      pool.post_all(&WorkerRequest::UpdateConfig {
        config: self.source.worker_config(),
      });
    }
    self.cache.clear(None);
  }

  pub fn on_enhanced_project_setting_change(&self, enabled: bool) {
    self.cache.on_enhanced_project_setting_change(enabled);
    if enabled && self.active_pool().is_none() {
      self.initialize_workers();
    }
  }

  pub fn get_memory_stats(&self) -> MemoryStats {
    let pool = self.active_pool();
    MemoryStats {
      file_cache_size: self.cache.file_count(),
      directory_cache_size: self.cache.directory_count(),
      pending_requests: pool.as_ref().map_or(0, WorkerPool::pending_requests),
      active_workers: pool.as_ref().map_or(0, WorkerPool::len),
      workers_enabled: self.enable_workers.load(Ordering::SeqCst),
    }
  }
}

fn into_cached(result: ProjectDataResult, config_source: Option<String>) -> CachedProjectData {
  CachedProjectData {
    tg_project: result.tg_project,
    enhanced_metadata: result.enhanced_metadata,
    timestamp: result.timestamp,
    config_source,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::InMemoryProjectSource;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use std::collections::BTreeMap;
  use tg_core::ProjectConfig;

  fn manager(enable_workers: bool) -> (Arc<InMemoryProjectSource>, ProjectDataWorkerManager) {
    let source = Arc::new(InMemoryProjectSource::new(ProjectConfig {
      enable_enhanced_project: true,
      ..Default::default()
    }));
    let options = ManagerOptions {
      enable_workers,
      max_workers: Some(2),
      ..Default::default()
    };
    let manager = ProjectDataWorkerManager::new(source.clone(), options);
    (source, manager)
  }

  #[test]
  fn test_default_worker_count_bounds() {
    let n = default_worker_count();
    assert!((1..=2).contains(&n));
    let options = ManagerOptions {
      max_workers: Some(0),
      ..Default::default()
    };
    assert_eq!(options.worker_count(), 1);
  }

  #[test]
  fn test_options_from_settings() {
    let settings = WorkerSettings {
      enabled: false,
      max_workers: Some(3),
      request_timeout_ms: 500,
    };
    let options = ManagerOptions::from(&settings);
    assert!(!options.enable_workers);
    assert_eq!(options.worker_count(), 3);
    assert_eq!(options.request_timeout, Duration::from_millis(500));
  }

  #[tokio::test]
  async fn test_lifecycle_toggles_pool() {
    let (_source, manager) = manager(true);
    assert!(manager.is_workers_enabled());
    assert_eq!(manager.get_memory_stats().active_workers, 2);

    manager.set_workers_enabled(false);
    assert!(!manager.is_workers_enabled());
    assert_eq!(manager.get_memory_stats().active_workers, 0);

    manager.set_workers_enabled(true);
    assert!(manager.is_workers_enabled());
  }

  #[tokio::test]
  async fn test_empty_batch_is_empty() {
    let (_source, manager) = manager(true);
    assert!(manager.get_batch_project_data(&[]).await.is_empty());
  }

  fn seed(source: &InMemoryProjectSource, paths: &[String]) {
    for (i, path) in paths.iter().enumerate() {
      let metadata = json!({"project": format!("P{}", i % 3), "n": i});
      source.insert_file(path.clone(), metadata.as_object().cloned(), 0);
    }
  }

  fn projects(data: &HashMap<String, CachedProjectData>) -> BTreeMap<String, Option<String>> {
    data
      .iter()
      .map(|(path, d)| (path.clone(), d.tg_project.as_ref().map(|p| p.name.clone())))
      .collect()
  }

  #[tokio::test]
  async fn test_failed_worker_batch_falls_back_for_whole_batch() {
    let paths: Vec<String> = (0..8).map(|i| format!("notes/{i}.md")).collect();

    let (source, workers) = manager(true);
    seed(&source, &paths);
    // A terminated pool left in place fails every worker request
    workers.active_pool().unwrap().terminate();

    let from_fallback = workers.get_batch_project_data(&paths).await;
    assert_eq!(from_fallback.len(), paths.len());
    assert_eq!(workers.get_memory_stats().file_cache_size, paths.len());

    let (sync_source, sync) = manager(false);
    seed(&sync_source, &paths);
    let from_sync = sync.get_batch_project_data(&paths).await;
    assert_eq!(projects(&from_fallback), projects(&from_sync));
    for path in &paths {
      assert_eq!(from_fallback[path].enhanced_metadata, from_sync[path].enhanced_metadata);
    }
  }

  #[tokio::test]
  async fn test_worker_timeout_falls_back_to_sync() {
    let source = Arc::new(InMemoryProjectSource::new(ProjectConfig {
      enable_enhanced_project: true,
      ..Default::default()
    }));
    let paths: Vec<String> = (0..20_000).map(|i| format!("notes/{i}.md")).collect();
    seed(&source, &paths);
    let manager = ProjectDataWorkerManager::new(
      source,
      ManagerOptions {
        enable_workers: true,
        max_workers: Some(1),
        request_timeout: Duration::from_nanos(1),
      },
    );

    let resolved = manager.get_batch_project_data(&paths).await;
    assert_eq!(resolved.len(), paths.len());
    assert_eq!(resolved["notes/4.md"].tg_project.as_ref().unwrap().name, "P1");
    assert!(manager.is_workers_enabled());
  }

  #[tokio::test]
  async fn test_deleted_file_dropped_from_cache() {
    let (source, manager) = manager(false);
    source.insert_file("a.md", None, 0);
    manager.get_project_data("a.md").await;
    assert_eq!(manager.get_memory_stats().file_cache_size, 1);

    source.remove_file("a.md");
    manager.on_file_deleted("a.md");
    assert_eq!(manager.get_memory_stats().file_cache_size, 0);
  }
}
