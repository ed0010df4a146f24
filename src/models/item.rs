use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Identifier of one file-ingestion job on the worker.
pub type IngestJobId = String;

/// Stage of an entity's upload → ingest → scan pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Uploading,
    Processing,
    Scanning,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            PipelineState::Uploading | PipelineState::Processing | PipelineState::Scanning
        )
    }
}

/// Ingestion state reported by `GET /ingest/{job_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    Pending,
    Completed,
    Failed(String),
}

/// Ingestion state string as the worker spells it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestPhase {
    #[serde(alias = "done", alias = "succeeded")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    /// `pending`, `queued`, `processing` and anything else not yet settled.
    #[serde(other)]
    Pending,
}

/// Raw body of the ingestion status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStatusResponse {
    pub state: IngestPhase,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<IngestStatusResponse> for IngestState {
    fn from(resp: IngestStatusResponse) -> Self {
        match resp.state {
            IngestPhase::Completed => IngestState::Completed,
            IngestPhase::Failed => IngestState::Failed(
                resp.error
                    .unwrap_or_else(|| "Ingestion failed".to_string()),
            ),
            IngestPhase::Pending => IngestState::Pending,
        }
    }
}

/// Raw body of `POST /ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: IngestJobId,
}

/// Result of scanning one entity for matching documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanOutcome {
    #[serde(default)]
    pub found_documents: Vec<String>,
    #[serde(default)]
    pub suggested_status: Option<String>,
}

/// A file selected by the user for upload against an entity.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Locally unique id for this submission.
    pub file_id: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_id: uuid::Uuid::new_v4().to_string(),
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// One entity's upload+scan task. Mutated only by its owning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemTask {
    pub entity_id: String,
    pub submitted_file_ids: BTreeSet<String>,
    pub ingestion_job_ids: BTreeSet<IngestJobId>,
    pub pipeline_state: PipelineState,
    pub found_documents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ItemTask {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            submitted_file_ids: BTreeSet::new(),
            ingestion_job_ids: BTreeSet::new(),
            pipeline_state: PipelineState::Idle,
            found_documents: Vec::new(),
            suggested_status: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}
