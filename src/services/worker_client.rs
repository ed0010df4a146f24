//! HTTP client for the remote scan worker.
//!
//! Every call here is a plain request with no retained state; retry and
//! polling policy live in [`crate::services::poll`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

use crate::models::item::{
    IngestJobId, IngestState, IngestStatusResponse, ScanOutcome, UploadFile, UploadResponse,
};
use crate::models::job::{JobHandle, JobStatus, ScanAllParams, SubmitResponse, Submission};

/// Batch job operations against the worker.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submit a batch job. The worker may answer with a terminal result directly.
    async fn submit(&self, params: &ScanAllParams) -> Result<Submission, ClientError>;

    /// Fetch the current status of a job. Safe to repeat.
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, ClientError>;

    /// Ask the worker to stop a job. Best-effort.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), ClientError>;
}

/// File ingestion and per-entity scan operations.
#[async_trait]
pub trait IngestClient: Send + Sync {
    async fn upload(&self, entity_id: &str, file: &UploadFile) -> Result<IngestJobId, ClientError>;

    async fn ingest_status(&self, job_id: &str) -> Result<IngestState, ClientError>;

    async fn scan_entity(&self, entity_id: &str) -> Result<ScanOutcome, ClientError>;
}

/// reqwest-backed client for all worker endpoints.
pub struct WorkerClient {
    http: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl WorkerClient {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("scan-orchestrator/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let trimmed = base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed)
            .map_err(|e| ClientError::InvalidBaseUrl(format!("{}: {}", trimmed, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(trimmed.to_string()));
        }

        Ok(Self {
            http,
            base_url,
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL extended with `segments`, each percent-encoded as one path
    /// segment so ids never change the route or add a query.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let response = self.send(req).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(ClientError::Parse)
    }

    /// Check that the worker answers at all (for health checks).
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.send(self.http.get(self.endpoint(&["health"]))).await?;
        Ok(())
    }
}

#[async_trait]
impl JobClient for WorkerClient {
    async fn submit(&self, params: &ScanAllParams) -> Result<Submission, ClientError> {
        let resp: SubmitResponse = self
            .send_json(self.http.post(self.endpoint(&["scan-all"])).json(params))
            .await?;
        Ok(resp.into())
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, ClientError> {
        self.send_json(self.http.get(self.endpoint(&["jobs", handle.as_str()])))
            .await
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), ClientError> {
        self.send(self.http.post(self.endpoint(&["jobs", handle.as_str(), "cancel"])))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IngestClient for WorkerClient {
    async fn upload(&self, entity_id: &str, file: &UploadFile) -> Result<IngestJobId, ClientError> {
        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.filename.clone())
            .mime_str(&file.content_type)?;
        let form = multipart::Form::new()
            .text("entity_id", entity_id.to_string())
            .part("file", part);

        let resp: UploadResponse = self
            .send_json(self.http.post(self.endpoint(&["ingest"])).multipart(form))
            .await?;
        Ok(resp.job_id)
    }

    async fn ingest_status(&self, job_id: &str) -> Result<IngestState, ClientError> {
        let resp: IngestStatusResponse = self
            .send_json(self.http.get(self.endpoint(&["ingest", job_id])))
            .await?;
        Ok(resp.into())
    }

    async fn scan_entity(&self, entity_id: &str) -> Result<ScanOutcome, ClientError> {
        self.send_json(
            self.http
                .post(self.endpoint(&["entities", entity_id, "scan"])),
        )
        .await
    }
}

/// Transport-level failure talking to the worker. Never a worker-reported state.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Worker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse worker response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid worker base URL: {0}")]
    InvalidBaseUrl(String),
}
