//! Per-entity upload → ingest → scan pipeline.
//!
//! Each [`ItemPipeline`] owns one entity's [`ItemTask`]. A run goes through
//! typed steps (`upload_all`, `await_ingestion`, `scan`) chained with `?`, so
//! the first hard failure ends the run and is recorded on the task. Nothing is
//! shared between pipelines: a failure in one entity never touches another.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestrationError, PipelineError};
use crate::models::item::{IngestJobId, IngestState, ItemTask, PipelineState, ScanOutcome, UploadFile};
use crate::services::poll::{self, LoopGuard, PollOutcome, PollPolicy, PollTarget, Tick};
use crate::services::worker_client::{ClientError, IngestClient};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub ingest_poll_interval: Duration,
    /// Status rounds before giving up on ingestion.
    pub ingest_max_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ingest_poll_interval: Duration::from_millis(2000),
            ingest_max_attempts: 60,
        }
    }
}

/// Decrements the active-pipelines gauge however the run ends.
struct ActiveRun;

impl ActiveRun {
    fn enter() -> Self {
        metrics::gauge!("item_pipelines_active").increment(1.0);
        ActiveRun
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        metrics::gauge!("item_pipelines_active").decrement(1.0);
    }
}

/// Settles the task as failed when a run is dropped mid-flight, so the
/// entity can be run again.
struct RunGuard<'a> {
    entity_id: &'a str,
    task: &'a watch::Sender<ItemTask>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let stopped = self.task.send_if_modified(|task| {
            if !task.pipeline_state.is_in_flight() {
                return false;
            }
            task.last_error = Some(OrchestrationError::Stopped.to_string());
            task.pipeline_state = PipelineState::Failed;
            task.updated_at = Utc::now();
            true
        });
        if stopped {
            tracing::info!(entity_id = %self.entity_id, "Item pipeline stopped mid-run");
            metrics::counter!("item_pipelines_total", "outcome" => "stopped").increment(1);
        }
    }
}

pub struct ItemPipeline {
    client: Arc<dyn IngestClient>,
    settings: PipelineSettings,
    task: watch::Sender<ItemTask>,
}

impl ItemPipeline {
    pub fn new(
        entity_id: impl Into<String>,
        client: Arc<dyn IngestClient>,
        settings: PipelineSettings,
    ) -> Self {
        let (task, _) = watch::channel(ItemTask::new(entity_id));
        Self {
            client,
            settings,
            task,
        }
    }

    pub fn entity_id(&self) -> String {
        self.task.borrow().entity_id.clone()
    }

    pub fn snapshot(&self) -> ItemTask {
        self.task.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ItemTask> {
        self.task.subscribe()
    }

    /// Upload `files`, wait for their ingestion, then scan the entity.
    ///
    /// With no files this is a no-op and the task is left untouched. The
    /// pipeline can be run again once a previous run has finished.
    pub async fn run(&self, files: Vec<UploadFile>) -> Result<ItemTask, PipelineError> {
        if !self.begin(&files)? {
            return Ok(self.snapshot());
        }
        self.execute(files, &CancellationToken::new()).await
    }

    /// Claim the task for a new run. Returns false when there is nothing to do.
    fn begin(&self, files: &[UploadFile]) -> Result<bool, PipelineError> {
        if files.is_empty() {
            return Ok(false);
        }

        let mut busy = None;
        self.task.send_if_modified(|task| {
            if task.pipeline_state.is_in_flight() {
                busy = Some(task.pipeline_state);
                return false;
            }
            task.submitted_file_ids = files.iter().map(|f| f.file_id.clone()).collect();
            task.ingestion_job_ids = BTreeSet::new();
            task.found_documents.clear();
            task.suggested_status = None;
            task.last_error = None;
            task.pipeline_state = PipelineState::Uploading;
            task.updated_at = Utc::now();
            true
        });

        match busy {
            Some(state) => Err(PipelineError::Busy {
                entity_id: self.entity_id(),
                state,
            }),
            None => Ok(true),
        }
    }

    async fn execute(
        &self,
        files: Vec<UploadFile>,
        shutdown: &CancellationToken,
    ) -> Result<ItemTask, PipelineError> {
        let _active = ActiveRun::enter();
        let entity_id = self.entity_id();
        let _guard = RunGuard {
            entity_id: &entity_id,
            task: &self.task,
        };
        tracing::info!(entity_id = %entity_id, files = files.len(), "Starting item pipeline");

        let result = async {
            let ids = self.upload_all(&entity_id, &files, shutdown).await?;
            self.await_ingestion(&entity_id, ids, shutdown).await?;
            self.scan(&entity_id, shutdown).await
        }
        .await;

        match result {
            Ok(outcome) => {
                tracing::info!(
                    entity_id = %entity_id,
                    documents = outcome.found_documents.len(),
                    "Item pipeline succeeded"
                );
                metrics::counter!("item_pipelines_total", "outcome" => "succeeded").increment(1);
                self.update(|task| {
                    task.found_documents = outcome.found_documents;
                    task.suggested_status = outcome.suggested_status;
                    task.pipeline_state = PipelineState::Succeeded;
                });
                Ok(self.snapshot())
            }
            Err(err) => {
                tracing::warn!(entity_id = %entity_id, error = %err, "Item pipeline failed");
                metrics::counter!("item_pipelines_total", "outcome" => "failed").increment(1);
                let message = err.to_string();
                self.update(|task| {
                    task.last_error = Some(message);
                    task.pipeline_state = PipelineState::Failed;
                });
                Err(err.into())
            }
        }
    }

    async fn upload_all(
        &self,
        entity_id: &str,
        files: &[UploadFile],
        shutdown: &CancellationToken,
    ) -> Result<Vec<IngestJobId>, OrchestrationError> {
        let mut ids = Vec::with_capacity(files.len());

        for (index, file) in files.iter().enumerate() {
            let uploaded = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(OrchestrationError::Stopped),
                uploaded = self.client.upload(entity_id, file) => uploaded,
            };

            match uploaded {
                Ok(id) => {
                    tracing::debug!(entity_id = %entity_id, file = %file.filename, ingest_job = %id, "File uploaded");
                    self.update(|task| {
                        task.ingestion_job_ids.insert(id.clone());
                    });
                    ids.push(id);
                }
                Err(e) => {
                    // no rollback of files already uploaded
                    return Err(OrchestrationError::UploadFailed {
                        filename: file.filename.clone(),
                        uploaded: index,
                        total: files.len(),
                        source: e,
                    });
                }
            }
        }

        Ok(ids)
    }

    async fn await_ingestion(
        &self,
        entity_id: &str,
        ids: Vec<IngestJobId>,
        shutdown: &CancellationToken,
    ) -> Result<(), OrchestrationError> {
        self.update(|task| task.pipeline_state = PipelineState::Processing);

        let policy = PollPolicy::every(self.settings.ingest_poll_interval)
            .max_attempts(self.settings.ingest_max_attempts.max(1));
        let mut watch = IngestWatch {
            client: self.client.as_ref(),
            entity_id,
            pending: ids,
        };

        match poll::run(&mut watch, &policy, shutdown).await {
            PollOutcome::Done(Ok(())) => Ok(()),
            PollOutcome::Done(Err(message)) => Err(OrchestrationError::WorkerReported(message)),
            PollOutcome::Exhausted { attempts } => Err(OrchestrationError::TimeoutExceeded(format!(
                "Timed out waiting for ingestion after {} attempts ({} file(s) still processing)",
                attempts,
                watch.pending.len()
            ))),
            PollOutcome::TransportFailed(e) => Err(OrchestrationError::Transport(e)),
            PollOutcome::Shutdown => Err(OrchestrationError::Stopped),
        }
    }

    async fn scan(
        &self,
        entity_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<ScanOutcome, OrchestrationError> {
        self.update(|task| task.pipeline_state = PipelineState::Scanning);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(OrchestrationError::Stopped),
            outcome = self.client.scan_entity(entity_id) => outcome.map_err(OrchestrationError::from),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut ItemTask)) {
        self.task.send_modify(|task| {
            apply(task);
            task.updated_at = Utc::now();
        });
    }
}

/// Ingestion round: checks every still-pending id once.
struct IngestWatch<'a> {
    client: &'a dyn IngestClient,
    entity_id: &'a str,
    pending: Vec<IngestJobId>,
}

#[async_trait]
impl<'a> PollTarget for IngestWatch<'a> {
    /// `Err` carries the first reported ingestion failure.
    type Output = Result<(), String>;

    async fn tick(&mut self, attempt: u32) -> Result<Tick<Self::Output>, ClientError> {
        let mut still_pending = Vec::with_capacity(self.pending.len());

        for id in &self.pending {
            match self.client.ingest_status(id).await? {
                IngestState::Completed => {}
                IngestState::Pending => still_pending.push(id.clone()),
                IngestState::Failed(reason) => {
                    return Ok(Tick::Done(Err(format!(
                        "Ingestion of {} failed: {}",
                        id, reason
                    ))));
                }
            }
        }

        tracing::debug!(
            entity_id = %self.entity_id,
            attempt = attempt,
            pending = still_pending.len(),
            "Checked ingestion status"
        );
        self.pending = still_pending;

        if self.pending.is_empty() {
            Ok(Tick::Done(Ok(())))
        } else {
            Ok(Tick::Pending)
        }
    }
}

struct Entry {
    pipeline: Arc<ItemPipeline>,
    run: Option<LoopGuard>,
}

/// One pipeline per entity, each run in its own spawned task.
///
/// Removing an entity (or dropping the registry) aborts its in-flight run.
pub struct ItemPipelines {
    client: Arc<dyn IngestClient>,
    settings: PipelineSettings,
    entries: Mutex<HashMap<String, Entry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ItemPipelines {
    pub fn new(client: Arc<dyn IngestClient>, settings: PipelineSettings) -> Self {
        Self {
            client,
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start a run for `entity_id` in the background and return the task as
    /// it stands right after the run was claimed.
    pub fn start(&self, entity_id: &str, files: Vec<UploadFile>) -> Result<ItemTask, PipelineError> {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(entity_id.to_string()).or_insert_with(|| Entry {
            pipeline: Arc::new(ItemPipeline::new(
                entity_id,
                self.client.clone(),
                self.settings.clone(),
            )),
            run: None,
        });

        if !entry.pipeline.begin(&files)? {
            return Ok(entry.pipeline.snapshot());
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let pipeline = entry.pipeline.clone();
        entry.run = Some(LoopGuard::spawn(shutdown, async move {
            let _ = pipeline.execute(files, &token).await;
        }));

        Ok(entry.pipeline.snapshot())
    }

    pub fn get(&self, entity_id: &str) -> Option<ItemTask> {
        lock(&self.entries)
            .get(entity_id)
            .map(|entry| entry.pipeline.snapshot())
    }

    pub fn subscribe(&self, entity_id: &str) -> Option<watch::Receiver<ItemTask>> {
        lock(&self.entries)
            .get(entity_id)
            .map(|entry| entry.pipeline.subscribe())
    }

    /// Forget an entity, stopping any run in flight. Returns false if unknown.
    pub fn remove(&self, entity_id: &str) -> bool {
        let removed = lock(&self.entries).remove(entity_id);
        match removed {
            Some(entry) => {
                if entry.run.as_ref().is_some_and(|run| !run.is_finished()) {
                    tracing::info!(entity_id = %entity_id, "Stopping in-flight item pipeline");
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
