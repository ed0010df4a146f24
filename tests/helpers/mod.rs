//! In-process stand-in for the remote scan worker.
//!
//! Serves the worker's HTTP surface on an ephemeral port and answers from a
//! scripted [`Script`], recording every call it receives.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use scan_orchestrator::services::worker_client::WorkerClient;

pub const TOKEN: &str = "test-token";

/// What the fake worker answers, plus what it has seen so far.
#[derive(Default)]
pub struct Script {
    /// Body for `POST /scan-all`. Defaults to `{"job_id": "J1"}`.
    pub submit: Option<Value>,
    /// Successive bodies for `GET /jobs/{id}`; the last one repeats.
    pub job_statuses: VecDeque<Value>,
    /// Body served by `GET /jobs/{id}` once a cancel has been received.
    pub after_cancel: Option<Value>,
    /// Answer every `GET /jobs/{id}` with this HTTP status instead.
    pub job_failure: Option<u16>,
    /// Successive ingestion states served for every ingest job id.
    pub ingest_states: Vec<Value>,
    /// Body for `POST /entities/{id}/scan`.
    pub scan: Option<Value>,

    pub submits: Vec<Value>,
    pub authorizations: Vec<Option<String>>,
    pub polls: u32,
    pub cancels: Vec<String>,
    pub uploads: Vec<(String, String)>,
    pub ingest_polls: HashMap<String, usize>,
    pub scans: Vec<String>,
}

type Shared = Arc<Mutex<Script>>;

pub struct FakeWorker {
    pub base_url: String,
    state: Shared,
}

impl FakeWorker {
    pub async fn spawn(script: Script) -> Self {
        let state: Shared = Arc::new(Mutex::new(script));

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/scan-all", post(submit))
            .route("/jobs/{id}", get(job_status))
            .route("/jobs/{id}/cancel", post(cancel_job))
            .route("/ingest", post(ingest))
            .route("/ingest/{id}", get(ingest_status))
            .route("/entities/{id}/scan", post(scan_entity))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake worker");
        let addr = listener.local_addr().expect("fake worker address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake worker stopped");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.state.lock().unwrap()
    }

    pub fn client(&self) -> WorkerClient {
        WorkerClient::new(
            &self.base_url,
            Some(TOKEN.to_string()),
            Duration::from_secs(5),
        )
        .expect("worker client")
    }
}

async fn submit(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut script = state.lock().unwrap();
    script.submits.push(body);
    script.authorizations.push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    Json(script.submit.clone().unwrap_or_else(|| json!({ "job_id": "J1" })))
}

async fn job_status(
    State(state): State<Shared>,
    Path(_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut script = state.lock().unwrap();
    script.polls += 1;

    if let Some(code) = script.job_failure {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err((status, "worker unavailable".to_string()));
    }
    if !script.cancels.is_empty() {
        if let Some(body) = script.after_cancel.clone() {
            return Ok(Json(body));
        }
    }

    let body = if script.job_statuses.len() > 1 {
        script.job_statuses.pop_front()
    } else {
        script.job_statuses.front().cloned()
    };
    Ok(Json(body.unwrap_or_else(|| json!({ "state": "running" }))))
}

async fn cancel_job(State(state): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    state.lock().unwrap().cancels.push(id);
    Json(json!({ "ok": true }))
}

async fn ingest(State(state): State<Shared>, mut multipart: Multipart) -> Json<Value> {
    let mut entity_id = String::new();
    let mut filename = String::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "entity_id" => entity_id = field.text().await.unwrap_or_default(),
            "file" => {
                filename = field.file_name().unwrap_or_default().to_string();
                let _ = field.bytes().await;
            }
            _ => {}
        }
    }

    let mut script = state.lock().unwrap();
    script.uploads.push((entity_id, filename));
    let id = format!("ing-{}", script.uploads.len());
    Json(json!({ "job_id": id }))
}

async fn ingest_status(State(state): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    let mut script = state.lock().unwrap();
    let seen = {
        let count = script.ingest_polls.entry(id).or_insert(0);
        *count += 1;
        *count
    };
    let body = match script.ingest_states.len() {
        0 => json!({ "state": "completed" }),
        len => script.ingest_states[(seen - 1).min(len - 1)].clone(),
    };
    Json(body)
}

async fn scan_entity(State(state): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    let mut script = state.lock().unwrap();
    script.scans.push(id);
    Json(
        script
            .scan
            .clone()
            .unwrap_or_else(|| json!({ "found_documents": [], "suggested_status": null })),
    )
}

/// Scripted worker statuses, with a default everything else.
pub fn with_statuses(statuses: Vec<Value>) -> Script {
    Script {
        job_statuses: statuses.into(),
        ..Default::default()
    }
}
