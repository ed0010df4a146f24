use std::time::Duration;

use serde::Deserialize;

use crate::services::controller::ControllerSettings;
use crate::services::pipeline::PipelineSettings;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the headless runner.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the remote scan worker
    pub worker_base_url: String,

    /// Bearer token sent to the worker, if it requires one
    #[serde(default)]
    pub worker_api_token: Option<String>,

    /// Per-request timeout for worker calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Scan-all status poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive failed scan-all polls before the job is marked failed
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    /// Polls to wait for the worker to acknowledge a cancel
    #[serde(default = "default_cancel_grace_polls")]
    pub cancel_grace_polls: u32,

    /// Ingestion status poll cadence
    #[serde(default = "default_ingest_poll_interval_ms")]
    pub ingest_poll_interval_ms: u64,

    /// Ingestion status rounds before an item pipeline times out
    #[serde(default = "default_ingest_max_attempts")]
    pub ingest_max_attempts: u32,

    /// Whether scan-all needs an explicit confirmation from the user
    #[serde(default = "default_require_confirmation")]
    pub require_confirmation: bool,

    /// Upper bound on an upload request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_max_poll_failures() -> u32 {
    10
}

fn default_cancel_grace_polls() -> u32 {
    10
}

fn default_ingest_poll_interval_ms() -> u64 {
    2000
}

fn default_ingest_max_attempts() -> u32 {
    60
}

fn default_require_confirmation() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_failures: self.max_poll_failures,
            cancel_grace_polls: self.cancel_grace_polls,
            require_confirmation: self.require_confirmation,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            ingest_poll_interval: Duration::from_millis(self.ingest_poll_interval_ms),
            ingest_max_attempts: self.ingest_max_attempts,
        }
    }
}
