use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::job::{ItemResult, WorkerState};

/// Lifecycle of a [`crate::services::controller::ScanController`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ControllerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ControllerPhase::Completed
                | ControllerPhase::Failed
                | ControllerPhase::Timeout
                | ControllerPhase::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, ControllerPhase::Starting | ControllerPhase::Running)
    }
}

impl From<WorkerState> for ControllerPhase {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Completed => ControllerPhase::Completed,
            WorkerState::Failed => ControllerPhase::Failed,
            WorkerState::Timeout => ControllerPhase::Timeout,
            WorkerState::Cancelled => ControllerPhase::Cancelled,
            WorkerState::Pending | WorkerState::Running | WorkerState::Unknown => {
                ControllerPhase::Running
            }
        }
    }
}

/// Presentation-safe view of one [`crate::models::job::JobStatus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplaySnapshot {
    pub state: WorkerState,
    pub percent: u8,
    pub completed: u64,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub is_terminal: bool,
    pub results: Vec<ItemResult>,
}

/// Everything the UI needs to render the scan-all control between events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerSnapshot {
    pub phase: ControllerPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<DisplaySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ControllerSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: ControllerPhase::Idle,
            job_id: None,
            progress: None,
            message: None,
            cancel_requested: false,
            started_at: None,
            finished_at: None,
        }
    }
}

impl Default for ControllerSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
