//! Request handlers run inside a worker thread.
//!
//! Each worker owns a [`WorkerState`]; configuration arrives as a message
//! and lives in that state until the next update. Handlers are plain
//! functions of `(state, request)`, so the synchronous fallback path can
//! produce identical results by calling the same resolver code.

use tg_core::resolver::compute_project_data;
use tg_core::{ProjectWorkerConfig, Settings};
use tg_parser::TaskPipeline;
use tracing::{trace, warn};

use crate::message::{ProjectDataRequest, ProjectDataResult, WorkerReply, WorkerRequest};

/// Which protocol subset a worker hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
  /// `updateConfig`, `computeProjectData`, `computeBatchProjectData`
  ProjectData,
  /// `updateSettings`, `parseTasks`, `batchIndex`
  TaskIndex,
}

impl WorkerKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkerKind::ProjectData => "project-data",
      WorkerKind::TaskIndex => "task-index",
    }
  }
}

/// State owned by one worker's message loop
pub struct WorkerState {
  kind: WorkerKind,
  project_config: Option<ProjectWorkerConfig>,
  pipeline: Option<TaskPipeline>,
}

impl WorkerState {
  pub fn new(kind: WorkerKind) -> Self {
    Self {
      kind,
      project_config: None,
      pipeline: None,
    }
  }

  pub fn kind(&self) -> WorkerKind {
    self.kind
  }

  /// Handle one request. Errors are reported back to the caller as the
  /// response's error string; they never stop the worker.
  pub fn handle(&mut self, request: WorkerRequest) -> Result<WorkerReply, String> {
    match (self.kind, request) {
      (WorkerKind::ProjectData, WorkerRequest::UpdateConfig { config }) => {
        self.project_config = Some(config);
        Ok(WorkerReply::ConfigUpdated)
      }
      (WorkerKind::ProjectData, WorkerRequest::ComputeProjectData(request)) => {
        let config = self.project_config()?;
        Ok(WorkerReply::ProjectDataResult(compute_one(&request, config)))
      }
      (WorkerKind::ProjectData, WorkerRequest::ComputeBatchProjectData { files }) => {
        let config = self.project_config()?;
        let results = files.iter().map(|file| compute_one(file, config)).collect();
        Ok(WorkerReply::BatchProjectDataResult { results })
      }
      (WorkerKind::TaskIndex, WorkerRequest::UpdateSettings { settings }) => {
        self.pipeline = Some(TaskPipeline::new(*settings));
        Ok(WorkerReply::SettingsUpdated)
      }
      (WorkerKind::TaskIndex, WorkerRequest::ParseTasks(request)) => {
        Ok(WorkerReply::ParseResult(self.pipeline().process_file(&request)))
      }
      (WorkerKind::TaskIndex, WorkerRequest::BatchIndex { files }) => {
        Ok(WorkerReply::BatchResult(self.pipeline().process_batch(&files)))
      }
      (kind, other) => {
        warn!(worker = kind.as_str(), request = other.kind(), "Unknown message type for worker");
        Err(format!("Unknown message type: {}", other.kind()))
      }
    }
  }

  fn project_config(&self) -> Result<&ProjectWorkerConfig, String> {
    self.project_config.as_ref().ok_or_else(|| "Worker not configured".to_string())
  }

  /// Parse pipeline, built from default settings until settings arrive
  fn pipeline(&mut self) -> &TaskPipeline {
    self.pipeline.get_or_insert_with(|| {
      trace!("Parse worker has no settings yet, using defaults");
      TaskPipeline::new(Settings::default())
    })
  }
}

fn compute_one(request: &ProjectDataRequest, config: &ProjectWorkerConfig) -> ProjectDataResult {
  let data = compute_project_data(
    &request.file_path,
    Some(&request.file_metadata),
    Some(&request.config_data),
    config,
  );
  ProjectDataResult {
    file_path: request.file_path.clone(),
    tg_project: data.tg_project,
    enhanced_metadata: data.enhanced_metadata,
    timestamp: data.timestamp,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tg_core::{PathMapping, ProjectSource};
  use tg_parser::ParseRequest;

  fn config() -> ProjectWorkerConfig {
    ProjectWorkerConfig {
      path_mappings: vec![PathMapping {
        path_pattern: "work/".into(),
        project_name: "Work".into(),
        enabled: true,
      }],
      ..Default::default()
    }
  }

  #[test]
  fn test_project_worker_requires_config() {
    let mut state = WorkerState::new(WorkerKind::ProjectData);
    let request = WorkerRequest::ComputeProjectData(ProjectDataRequest {
      file_path: "work/a.md".into(),
      ..Default::default()
    });
    assert_eq!(state.handle(request.clone()), Err("Worker not configured".to_string()));

    assert_eq!(
      state.handle(WorkerRequest::UpdateConfig { config: config() }),
      Ok(WorkerReply::ConfigUpdated)
    );
    let Ok(WorkerReply::ProjectDataResult(result)) = state.handle(request) else {
      panic!("expected project data");
    };
    let project = result.tg_project.unwrap();
    assert_eq!(project.kind, ProjectSource::Path);
    assert_eq!(project.name, "Work");
  }

  #[test]
  fn test_batch_preserves_order() {
    let mut state = WorkerState::new(WorkerKind::ProjectData);
    state.handle(WorkerRequest::UpdateConfig { config: config() }).unwrap();

    let files = ["work/1.md", "home/2.md", "work/3.md"]
      .iter()
      .map(|p| ProjectDataRequest {
        file_path: p.to_string(),
        file_metadata: json!({"k": 1}).as_object().cloned().unwrap(),
        config_data: Default::default(),
      })
      .collect();
    let Ok(WorkerReply::BatchProjectDataResult { results }) =
      state.handle(WorkerRequest::ComputeBatchProjectData { files })
    else {
      panic!("expected batch result");
    };
    let paths: Vec<&str> = results.iter().map(|r| r.file_path.as_str()).collect();
    assert_eq!(paths, vec!["work/1.md", "home/2.md", "work/3.md"]);
    assert!(results[1].tg_project.is_none());
    assert_eq!(results[1].enhanced_metadata.get("k"), Some(&json!(1)));
  }

  #[test]
  fn test_unknown_type_is_error_response() {
    let mut project = WorkerState::new(WorkerKind::ProjectData);
    assert_eq!(
      project.handle(WorkerRequest::BatchIndex { files: Vec::new() }),
      Err("Unknown message type: batchIndex".to_string())
    );

    let mut parse = WorkerState::new(WorkerKind::TaskIndex);
    assert_eq!(
      parse.handle(WorkerRequest::UpdateConfig { config: config() }),
      Err("Unknown message type: updateConfig".to_string())
    );
  }

  #[test]
  fn test_parse_worker_uses_settings() {
    let mut state = WorkerState::new(WorkerKind::TaskIndex);
    let request = ParseRequest::new("n.md", "# Done\n- [ ] a\n# Todo\n- [ ] b");

    let Ok(WorkerReply::ParseResult(result)) = state.handle(WorkerRequest::ParseTasks(request.clone())) else {
      panic!("expected parse result");
    };
    assert_eq!(result.stats.total_tasks, 2);

    let settings = Settings {
      ignore_heading: "done".into(),
      ..Default::default()
    };
    state
      .handle(WorkerRequest::UpdateSettings {
        settings: Box::new(settings),
      })
      .unwrap();
    let Ok(WorkerReply::ParseResult(result)) = state.handle(WorkerRequest::ParseTasks(request)) else {
      panic!("expected parse result");
    };
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.tasks[0].content, "b");
  }
}
