//! Error taxonomy shared by the scan controller and item pipelines.

use crate::models::item::PipelineState;
use crate::models::snapshot::ControllerPhase;
use crate::services::worker_client::ClientError;

/// Why an orchestrated operation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Required context was missing before starting. Nothing was sent.
    #[error("{0}")]
    Precondition(String),

    /// The worker could not be reached or answered with garbage.
    #[error("Transport error: {0}")]
    Transport(#[from] ClientError),

    /// A file upload could not be delivered. Files uploaded before it stay
    /// on the worker.
    #[error("Upload of {filename} failed after {uploaded} of {total} files: {source}")]
    UploadFailed {
        filename: String,
        uploaded: usize,
        total: usize,
        source: ClientError,
    },

    /// The worker explicitly marked the job or item as failed.
    #[error("{0}")]
    WorkerReported(String),

    /// The attempt ceiling was reached without a terminal worker state.
    #[error("{0}")]
    TimeoutExceeded(String),

    /// The owner tore the operation down before it finished.
    #[error("Stopped before it finished")]
    Stopped,
}

/// Rejected calls on a [`crate::services::controller::ScanController`].
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Rejected(#[from] OrchestrationError),

    #[error("A scan is already {0}")]
    Busy(ControllerPhase),

    #[error("The previous scan {0}; reset before starting another")]
    NeedsReset(ControllerPhase),

    #[error("Scan controller is {0}; reset is only possible from a finished scan")]
    NotFinished(ControllerPhase),
}

/// Rejected or failed runs of a [`crate::services::pipeline::ItemPipeline`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline for {entity_id} is already {state}")]
    Busy {
        entity_id: String,
        state: PipelineState,
    },

    #[error(transparent)]
    Failed(#[from] OrchestrationError),
}
