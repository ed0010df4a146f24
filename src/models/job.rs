use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Opaque identifier the worker hands back when it accepts a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job state as reported by the remote worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    Pending,
    #[serde(alias = "processing")]
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    /// Any state string this client does not know. Treated as still in flight.
    #[serde(other)]
    Unknown,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Failed | WorkerState::Timeout | WorkerState::Cancelled
        )
    }
}

/// Outcome for one item of a batch, present once the job is terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub found_documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status payload returned by `GET /jobs/{job_id}`.
///
/// Counters are optional on the wire; [`crate::services::progress::summarize`]
/// turns this into something safe to render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub state: WorkerState,
    #[serde(default)]
    pub progress_percent: Option<f64>,
    #[serde(default)]
    pub completed_count: Option<u64>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub successful_count: Option<u64>,
    #[serde(default)]
    pub failed_count: Option<u64>,
    #[serde(default)]
    pub current_item_label: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub results: Vec<ItemResult>,
}

impl JobStatus {
    /// A bare status carrying only a state, used for results the worker
    /// returned synchronously.
    pub fn with_state(state: WorkerState) -> Self {
        Self {
            state,
            progress_percent: None,
            completed_count: None,
            total_count: None,
            successful_count: None,
            failed_count: None,
            current_item_label: None,
            message: None,
            results: Vec::new(),
        }
    }
}

/// What the worker answered to a batch submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Work was queued; poll this handle.
    Accepted(JobHandle),
    /// The worker answered synchronously (e.g. nothing to scan). Never polled.
    Immediate(JobStatus),
}

/// Raw body of `POST /scan-all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub state: Option<WorkerState>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub results: Vec<ItemResult>,
}

impl From<SubmitResponse> for Submission {
    fn from(resp: SubmitResponse) -> Self {
        match resp.job_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Submission::Accepted(JobHandle::new(id)),
            None => {
                // A synchronous answer without an explicit state means "nothing to do".
                let state = resp
                    .state
                    .filter(|s| s.is_terminal())
                    .unwrap_or(WorkerState::Completed);
                let mut status = JobStatus::with_state(state);
                status.progress_percent = Some(100.0);
                status.message = resp.message;
                status.results = resp.results;
                Submission::Immediate(status)
            }
        }
    }
}

/// Parameters sent to the worker for a scan-all job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanAllParams {
    pub project_id: String,
}

/// A user's request to start a scan-all job, as received from the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ScanAllRequest {
    #[garde(required, length(min = 1, max = 200))]
    pub project_id: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub confirmed: bool,
}

impl ScanAllRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            confirmed: true,
        }
    }
}
