//! Parse worker manager.
//!
//! Same pool mechanics as the project data manager, hosting the per-file
//! parse pipeline. A local [`TaskPipeline`] built from the same settings
//! handles everything when workers are off or a request fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tg_core::Settings;
use tg_parser::{BatchResult, ParseRequest, ParseResult, TaskPipeline};
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::handler::WorkerKind;
use crate::manager::ManagerOptions;
use crate::message::{WorkerReply, WorkerRequest};
use crate::pool::{RequestIds, WorkerPool};

pub struct TaskWorkerManager {
  pipeline: RwLock<Arc<TaskPipeline>>,
  pool: RwLock<Option<WorkerPool>>,
  enable_workers: AtomicBool,
  initialized: AtomicBool,
  worker_count: usize,
  timeout: Duration,
  ids: RequestIds,
}

impl TaskWorkerManager {
  pub fn new(settings: Settings, options: ManagerOptions) -> Self {
    let manager = Self {
      pipeline: RwLock::new(Arc::new(TaskPipeline::new(settings))),
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

  /// Build a manager from the `workers` section of `settings`
  pub fn from_settings(settings: Settings) -> Self {
    let options = ManagerOptions::from(&settings.workers);
    Self::new(settings, options)
  }

  fn pipeline(&self) -> Arc<TaskPipeline> {
    self.pipeline.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  fn active_pool(&self) -> Option<WorkerPool> {
    if !self.enable_workers.load(Ordering::SeqCst) {
      return None;
    }
    self.pool.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  pub fn initialize_workers(&self) {
    if !self.enable_workers.load(Ordering::SeqCst) || self.initialized.swap(true, Ordering::SeqCst) {
      return;
    }

    match WorkerPool::spawn(WorkerKind::TaskIndex, self.worker_count, self.timeout, self.ids.clone()) {
      Ok(pool) => {
        pool.post_all(&WorkerRequest::UpdateSettings {
          settings: Box::new(self.pipeline().settings().clone()),
        });
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
      }
      Err(e) => {
        warn!(error = %e, "Failed to start parse workers, parsing on the calling task");
        self.enable_workers.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
      }
    }
  }

  pub fn set_workers_enabled(&self, enabled: bool) {
    if self.enable_workers.swap(enabled, Ordering::SeqCst) == enabled {
      return;
    }
    info!(enabled, "Parse workers toggled");
    if enabled {
      self.initialize_workers();
    } else {
      self.destroy();
    }
  }

  pub fn is_workers_enabled(&self) -> bool {
    self.active_pool().is_some()
  }

  pub fn active_workers(&self) -> usize {
    self.active_pool().map_or(0, |pool| pool.len())
  }

  pub fn destroy(&self) {
    let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(pool) = pool {
      pool.terminate();
    }
    self.initialized.store(false, Ordering::SeqCst);
  }

  /// Replace the parse settings locally and on every worker
  pub fn update_settings(&self, settings: Settings) {
    if let Some(pool) = self.active_pool() {
      pool.post_all(&WorkerRequest::UpdateSettings {
        settings: Box::new(settings.clone()),
      });
    }
    *self.pipeline.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(TaskPipeline::new(settings));
  }

  // ==========================================================================
  // Parsing
  // ==========================================================================

  pub async fn parse_file(&self, request: ParseRequest) -> ParseResult {
    let Some(pool) = self.active_pool() else {
      return self.pipeline().process_file(&request);
    };

    match parse_with_worker(&pool, request.clone()).await {
      Ok(result) => result,
      Err(e) => {
        warn!(file = %request.file_path, error = %e, "Worker parse failed, parsing synchronously");
        self.pipeline().process_file(&request)
      }
    }
  }

  /// Parse files concurrently across the pool; results keep input order
  pub async fn parse_batch(&self, requests: Vec<ParseRequest>) -> Vec<ParseResult> {
    join_all(requests.into_iter().map(|request| self.parse_file(request))).await
  }

  /// Whole-batch indexing on a single worker, reporting per-file counts
  pub async fn index_batch(&self, files: Vec<ParseRequest>) -> BatchResult {
    let Some(pool) = self.active_pool() else {
      return self.pipeline().process_batch(&files);
    };

    let reply = pool
      .request(WorkerRequest::BatchIndex { files: files.clone() })
      .await
      .and_then(|reply| match reply {
        WorkerReply::BatchResult(result) => Ok(result),
        _ => Err(WorkerError::UnexpectedResponse("batchIndex")),
      });
    match reply {
      Ok(result) => result,
      Err(e) => {
        warn!(files = files.len(), error = %e, "Worker batch index failed, indexing synchronously");
        self.pipeline().process_batch(&files)
      }
    }
  }
}

async fn parse_with_worker(pool: &WorkerPool, request: ParseRequest) -> Result<ParseResult, WorkerError> {
  match pool.request(WorkerRequest::ParseTasks(request)).await? {
    WorkerReply::ParseResult(result) => Ok(result),
    _ => Err(WorkerError::UnexpectedResponse("parseTasks")),
  }
}
