//! Worker wire protocol.
//!
//! Every request carries a `request_id`, the sole key correlating it with
//! its eventual response. Payloads are typed enums; the `type` tag and
//! camelCase field names keep the JSON shape of the protocol stable for
//! logging and debugging.

use serde::{Deserialize, Serialize};
use tg_core::{Metadata, ProjectWorkerConfig, Settings, TgProject};
use tg_parser::{BatchResult, ParseRequest, ParseResult};

use crate::error::WorkerError;

/// Unique identifier for a request, `req_<counter>_<epochMillis>`
pub type RequestId = String;

// ============================================================================
// Requests
// ============================================================================

/// Inputs for resolving one file's project data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDataRequest {
  pub file_path: String,
  #[serde(default)]
  pub file_metadata: Metadata,
  #[serde(default)]
  pub config_data: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
  /// Replace the project-data worker's configuration
  UpdateConfig { config: ProjectWorkerConfig },
  /// Replace the parse worker's settings
  UpdateSettings { settings: Box<Settings> },
  ParseTasks(ParseRequest),
  BatchIndex { files: Vec<ParseRequest> },
  ComputeProjectData(ProjectDataRequest),
  ComputeBatchProjectData { files: Vec<ProjectDataRequest> },
}

impl WorkerRequest {
  /// Protocol name of the request, as it appears in the `type` tag
  pub fn kind(&self) -> &'static str {
    match self {
      WorkerRequest::UpdateConfig { .. } => "updateConfig",
      WorkerRequest::UpdateSettings { .. } => "updateSettings",
      WorkerRequest::ParseTasks(_) => "parseTasks",
      WorkerRequest::BatchIndex { .. } => "batchIndex",
      WorkerRequest::ComputeProjectData(_) => "computeProjectData",
      WorkerRequest::ComputeBatchProjectData { .. } => "computeBatchProjectData",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessage {
  pub request_id: RequestId,
  #[serde(flatten)]
  pub request: WorkerRequest,
}

// ============================================================================
// Responses
// ============================================================================

/// Resolved project data for one file, as computed by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDataResult {
  pub file_path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tg_project: Option<TgProject>,
  #[serde(default)]
  pub enhanced_metadata: Metadata,
  pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerReply {
  ConfigUpdated,
  SettingsUpdated,
  ParseResult(ParseResult),
  BatchResult(BatchResult),
  ProjectDataResult(ProjectDataResult),
  BatchProjectDataResult { results: Vec<ProjectDataResult> },
}

/// What a worker sends back for one request. An `Err` carries the handler's
/// error message; it fails that request only.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
  pub request_id: RequestId,
  pub result: Result<WorkerReply, String>,
}

impl WorkerResponse {
  pub fn success(&self) -> bool {
    self.result.is_ok()
  }

  pub fn into_result(self) -> Result<WorkerReply, WorkerError> {
    self.result.map_err(WorkerError::Remote)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  #[test]
  fn test_message_wire_shape() {
    let message = WorkerMessage {
      request_id: "req_1_1700000000000".into(),
      request: WorkerRequest::ComputeProjectData(ProjectDataRequest {
        file_path: "a/b.md".into(),
        ..Default::default()
      }),
    };
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(
      value,
      json!({
        "requestId": "req_1_1700000000000",
        "type": "computeProjectData",
        "filePath": "a/b.md",
        "fileMetadata": {},
        "configData": {}
      })
    );
    let back: WorkerMessage = serde_json::from_value(value).unwrap();
    assert_eq!(back, message);
  }

  #[test]
  fn test_kind_matches_tag() {
    let request = WorkerRequest::BatchIndex { files: Vec::new() };
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["type"], json!(request.kind()));
  }

  #[test]
  fn test_project_data_result_wire_shape() {
    let result = ProjectDataResult {
      file_path: "a.md".into(),
      tg_project: None,
      enhanced_metadata: Metadata::new(),
      timestamp: 5,
    };
    assert_eq!(
      serde_json::to_value(&result).unwrap(),
      json!({"filePath": "a.md", "enhancedMetadata": {}, "timestamp": 5})
    );
  }

  #[test]
  fn test_response_error_is_remote() {
    let ok = WorkerResponse {
      request_id: "r1".into(),
      result: Ok(WorkerReply::ConfigUpdated),
    };
    assert!(ok.success());
    assert_eq!(ok.into_result(), Ok(WorkerReply::ConfigUpdated));

    let failed = WorkerResponse {
      request_id: "r2".into(),
      result: Err("Worker not configured".into()),
    };
    assert!(!failed.success());
    assert_eq!(
      failed.into_result(),
      Err(WorkerError::Remote("Worker not configured".into()))
    );
  }

  #[test]
  fn test_unknown_type_rejected() {
    let parsed = serde_json::from_value::<WorkerMessage>(json!({"requestId": "r", "type": "reticulate"}));
    assert!(parsed.is_err());
  }
}
