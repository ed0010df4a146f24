//! Worker client, scan controller and item pipeline against a fake worker
//! served over real HTTP.

mod fixtures;
mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use helpers::{with_statuses, FakeWorker, Script, TOKEN};
use scan_orchestrator::{
    error::{OrchestrationError, PipelineError},
    models::{
        item::{IngestState, PipelineState, UploadFile},
        job::{ItemResult, JobHandle, ScanAllParams, ScanAllRequest, Submission, WorkerState},
        snapshot::{ControllerPhase, ControllerSnapshot, DisplaySnapshot},
    },
    services::{
        controller::{ControllerSettings, JobObserver, ScanController},
        pipeline::{ItemPipeline, PipelineSettings},
        worker_client::{ClientError, IngestClient, JobClient},
    },
};

const WAIT: Duration = Duration::from_secs(10);

fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        poll_interval: Duration::from_millis(10),
        max_poll_failures: 3,
        cancel_grace_polls: 5,
        require_confirmation: true,
    }
}

#[derive(Default)]
struct Recorder {
    starts: Mutex<u32>,
    updates: Mutex<Vec<DisplaySnapshot>>,
    completions: Mutex<Vec<Vec<ItemResult>>>,
    errors: Mutex<Vec<String>>,
}

impl JobObserver for Recorder {
    fn on_start(&self) {
        *self.starts.lock().unwrap() += 1;
    }

    fn on_status_change(&self, snapshot: &DisplaySnapshot) {
        self.updates.lock().unwrap().push(snapshot.clone());
    }

    fn on_complete(&self, results: &[ItemResult]) {
        self.completions.lock().unwrap().push(results.to_vec());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

async fn wait_terminal(controller: &ScanController) -> ControllerSnapshot {
    let mut rx = controller.subscribe();
    let snapshot = timeout(WAIT, rx.wait_for(|s| s.phase.is_terminal()))
        .await
        .expect("scan did not finish in time")
        .expect("controller dropped")
        .clone();
    snapshot
}

#[tokio::test]
async fn test_submit_sends_project_and_bearer_token() {
    let worker = FakeWorker::spawn(Script::default()).await;
    let client = worker.client();

    let submission = tokio_test::assert_ok!(
        client
            .submit(&ScanAllParams {
                project_id: "P-7".to_string(),
            })
            .await
    );

    assert_eq!(submission, Submission::Accepted(JobHandle::new("J1")));
    let script = worker.script();
    assert_eq!(script.submits, vec![json!({ "project_id": "P-7" })]);
    assert_eq!(
        script.authorizations,
        vec![Some(format!("Bearer {}", TOKEN))]
    );
}

#[tokio::test]
async fn test_submit_without_job_id_is_immediate() {
    let worker = FakeWorker::spawn(Script {
        submit: Some(json!({ "job_id": null, "message": "No actions to scan" })),
        ..Default::default()
    })
    .await;

    let submission = worker
        .client()
        .submit(&ScanAllParams {
            project_id: "P-1".to_string(),
        })
        .await
        .unwrap();

    match submission {
        Submission::Immediate(status) => {
            assert_eq!(status.state, WorkerState::Completed);
            assert_eq!(status.message.as_deref(), Some("No actions to scan"));
        }
        other => panic!("expected an immediate result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_accepts_processing_alias_and_unknown_states() {
    let worker = FakeWorker::spawn(with_statuses(vec![
        json!({ "state": "processing", "progress_percent": 5 }),
        json!({ "state": "warming_up" }),
    ]))
    .await;
    let client = worker.client();
    let handle = JobHandle::new("J1");

    assert_eq!(client.poll(&handle).await.unwrap().state, WorkerState::Running);
    assert_eq!(client.poll(&handle).await.unwrap().state, WorkerState::Unknown);
}

#[tokio::test]
async fn test_non_success_status_is_a_transport_error() {
    let worker = FakeWorker::spawn(Script {
        job_failure: Some(503),
        ..Default::default()
    })
    .await;

    let err = worker
        .client()
        .poll(&JobHandle::new("J1"))
        .await
        .unwrap_err();

    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "worker unavailable");
        }
        other => panic!("expected a status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ingest_round_trip() {
    let worker = FakeWorker::spawn(Script {
        ingest_states: vec![
            json!({ "state": "queued" }),
            json!({ "state": "failed", "error": "Unsupported file type" }),
        ],
        scan: Some(json!({ "found_documents": ["a.pdf"], "suggested_status": "done" })),
        ..Default::default()
    })
    .await;
    let client = worker.client();

    let file = UploadFile::new("a.pdf", "application/pdf", b"%PDF-1.7".to_vec());
    let id = client.upload("E1", &file).await.unwrap();
    assert_eq!(id, "ing-1");
    assert_eq!(
        worker.script().uploads,
        vec![("E1".to_string(), "a.pdf".to_string())]
    );

    assert_eq!(client.ingest_status(&id).await.unwrap(), IngestState::Pending);
    assert_eq!(
        client.ingest_status(&id).await.unwrap(),
        IngestState::Failed("Unsupported file type".to_string())
    );

    let outcome = client.scan_entity("E1").await.unwrap();
    assert_eq!(outcome.found_documents, vec!["a.pdf".to_string()]);
    assert_eq!(outcome.suggested_status.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_ids_with_reserved_characters_reach_the_right_route() {
    let worker = FakeWorker::spawn(Script::default()).await;
    let client = worker.client();

    client.scan_entity("team/a?x").await.unwrap();
    client.cancel(&JobHandle::new("J 1/2")).await.unwrap();
    assert_eq!(
        client.ingest_status("ing#3").await.unwrap(),
        IngestState::Completed
    );

    let script = worker.script();
    assert_eq!(script.scans, vec!["team/a?x".to_string()]);
    assert_eq!(script.cancels, vec!["J 1/2".to_string()]);
    assert_eq!(script.ingest_polls.get("ing#3"), Some(&1));
}

#[tokio::test]
async fn test_scan_all_runs_to_completion() {
    let worker = FakeWorker::spawn(with_statuses(vec![
        json!({ "state": "running", "progress_percent": 10, "completed_count": 1, "total_count": 10 }),
        fixtures::completed(fixtures::two_results()),
    ]))
    .await;
    let recorder = Arc::new(Recorder::default());
    let controller = ScanController::new(
        Arc::new(worker.client()),
        recorder.clone(),
        fast_settings(),
    );

    controller.start(&ScanAllRequest::new("P-1")).unwrap();
    let snapshot = wait_terminal(&controller).await;

    assert_eq!(snapshot.phase, ControllerPhase::Completed);
    assert_eq!(snapshot.job_id.as_deref(), Some("J1"));
    let progress = snapshot.progress.expect("final progress");
    assert_eq!(progress.percent, 100);
    assert_eq!(progress.results.len(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.script().polls, 2, "no poll after the terminal state");
    assert_eq!(*recorder.starts.lock().unwrap(), 1);
    assert_eq!(recorder.updates.lock().unwrap()[0].percent, 10);
    assert_eq!(recorder.completions.lock().unwrap().len(), 1);
    assert!(recorder.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_all_immediate_result_never_polls() {
    let worker = FakeWorker::spawn(Script {
        submit: Some(json!({ "job_id": null, "message": "No actions to scan" })),
        ..Default::default()
    })
    .await;
    let controller = ScanController::new(
        Arc::new(worker.client()),
        Arc::new(Recorder::default()),
        fast_settings(),
    );

    let mut rx = controller.subscribe();
    controller.start(&ScanAllRequest::new("P-1")).unwrap();

    let mut phases = vec![rx.borrow_and_update().phase];
    while !phases.last().copied().is_some_and(ControllerPhase::is_terminal) {
        timeout(WAIT, rx.changed()).await.unwrap().unwrap();
        phases.push(rx.borrow_and_update().phase);
    }

    assert!(!phases.contains(&ControllerPhase::Running));
    assert_eq!(phases.last(), Some(&ControllerPhase::Completed));
    assert_eq!(
        controller.current_snapshot().message.as_deref(),
        Some("No actions to scan")
    );
    assert_eq!(worker.script().polls, 0);
}

#[tokio::test]
async fn test_scan_all_cancel_is_acknowledged() {
    let worker = FakeWorker::spawn(Script {
        job_statuses: vec![fixtures::running(20.0, 2, 10, "Collect NDAs")].into(),
        after_cancel: Some(fixtures::cancelled()),
        ..Default::default()
    })
    .await;
    let recorder = Arc::new(Recorder::default());
    let controller = ScanController::new(
        Arc::new(worker.client()),
        recorder.clone(),
        fast_settings(),
    );

    controller.start(&ScanAllRequest::new("P-1")).unwrap();
    let mut rx = controller.subscribe();
    timeout(WAIT, rx.wait_for(|s| s.phase == ControllerPhase::Running))
        .await
        .unwrap()
        .unwrap();

    assert!(controller.cancel().await);
    let snapshot = wait_terminal(&controller).await;

    assert_eq!(snapshot.phase, ControllerPhase::Cancelled);
    assert_eq!(worker.script().cancels, vec!["J1".to_string()]);
    assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    assert!(recorder.completions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_all_fails_after_repeated_transport_errors() {
    let worker = FakeWorker::spawn(Script {
        job_failure: Some(500),
        ..Default::default()
    })
    .await;
    let recorder = Arc::new(Recorder::default());
    let controller = ScanController::new(
        Arc::new(worker.client()),
        recorder.clone(),
        fast_settings(),
    );

    controller.start(&ScanAllRequest::new("P-1")).unwrap();
    let snapshot = wait_terminal(&controller).await;

    assert_eq!(snapshot.phase, ControllerPhase::Failed);
    assert_eq!(worker.script().polls, 3);
    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Lost contact with the worker"));
}

#[tokio::test]
async fn test_item_pipeline_uploads_ingests_and_scans() {
    let worker = FakeWorker::spawn(Script {
        ingest_states: vec![fixtures::ingest("processing"), fixtures::ingest("completed")],
        scan: Some(json!({ "found_documents": ["nda.pdf"], "suggested_status": "in_review" })),
        ..Default::default()
    })
    .await;
    let pipeline = ItemPipeline::new(
        "E1",
        Arc::new(worker.client()),
        PipelineSettings {
            ingest_poll_interval: Duration::from_millis(5),
            ingest_max_attempts: 10,
        },
    );

    let files = vec![
        UploadFile::new("nda.pdf", "application/pdf", vec![1, 2, 3]),
        UploadFile::new("notes.txt", "text/plain", b"hello".to_vec()),
    ];
    let task = timeout(WAIT, pipeline.run(files)).await.unwrap().unwrap();

    assert_eq!(task.pipeline_state, PipelineState::Succeeded);
    assert_eq!(task.submitted_file_ids.len(), 2);
    assert_eq!(
        task.ingestion_job_ids.iter().cloned().collect::<Vec<_>>(),
        vec!["ing-1".to_string(), "ing-2".to_string()]
    );
    assert_eq!(task.found_documents, vec!["nda.pdf".to_string()]);
    assert_eq!(task.suggested_status.as_deref(), Some("in_review"));

    let script = worker.script();
    assert_eq!(script.ingest_polls.get("ing-1"), Some(&2));
    assert_eq!(script.ingest_polls.get("ing-2"), Some(&2));
    assert_eq!(script.scans, vec!["E1".to_string()]);
}

#[tokio::test]
async fn test_item_pipeline_times_out_when_ingestion_never_settles() {
    let worker = FakeWorker::spawn(Script {
        ingest_states: vec![fixtures::ingest("processing")],
        ..Default::default()
    })
    .await;
    let pipeline = ItemPipeline::new(
        "E1",
        Arc::new(worker.client()),
        PipelineSettings {
            ingest_poll_interval: Duration::from_millis(1),
            ingest_max_attempts: 60,
        },
    );

    let files = vec![
        UploadFile::new("a.pdf", "application/pdf", vec![0]),
        UploadFile::new("b.pdf", "application/pdf", vec![0]),
    ];
    let err = timeout(WAIT, pipeline.run(files)).await.unwrap().unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Failed(OrchestrationError::TimeoutExceeded(_))
    ));
    let task = pipeline.snapshot();
    assert_eq!(task.pipeline_state, PipelineState::Failed);
    assert!(task.last_error.unwrap().contains("60 attempts"));
    assert_eq!(worker.script().ingest_polls.get("ing-1"), Some(&60));
    assert!(worker.script().scans.is_empty());
}
