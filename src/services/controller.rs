//! Scan-all job controller.
//!
//! Owns one batch job at a time: `idle → starting → running → terminal`.
//! The poll loop runs in a spawned task owned through a [`LoopGuard`], so
//! resetting or dropping the controller always stops it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{ControllerError, OrchestrationError};
use crate::models::job::{ItemResult, JobHandle, JobStatus, ScanAllParams, ScanAllRequest, Submission, WorkerState};
use crate::models::snapshot::{ControllerPhase, ControllerSnapshot, DisplaySnapshot};
use crate::services::poll::{self, LoopGuard, PollOutcome, PollPolicy, PollTarget, Tick};
use crate::services::progress::summarize;
use crate::services::worker_client::{ClientError, JobClient};

/// Notifications for the surrounding UI. All methods default to no-ops.
///
/// `on_status_change` fires once per successful poll. Exactly one of
/// `on_complete` / `on_error` fires per job.
pub trait JobObserver: Send + Sync {
    fn on_start(&self) {}
    fn on_status_change(&self, _snapshot: &DisplaySnapshot) {}
    fn on_complete(&self, _results: &[ItemResult]) {}
    fn on_error(&self, _message: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before the job is marked failed.
    pub max_poll_failures: u32,
    /// Polls to wait for the worker to acknowledge a cancel request.
    pub cancel_grace_polls: u32,
    pub require_confirmation: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            max_poll_failures: 10,
            cancel_grace_polls: 10,
            require_confirmation: true,
        }
    }
}

const CANCEL_UNACKNOWLEDGED: &str = "Cancellation was not acknowledged by the worker";

struct ControlState {
    /// Bumped on every start and reset; stale loops compare against it.
    generation: u64,
    handle: Option<JobHandle>,
    cancel_requested: bool,
    started: Option<Instant>,
}

struct Inner {
    state: Mutex<ControlState>,
    snapshot: watch::Sender<ControllerSnapshot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn phase(&self) -> ControllerPhase {
        self.snapshot.borrow().phase
    }

    fn begin(&self) -> u64 {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.handle = None;
        state.cancel_requested = false;
        state.started = Some(Instant::now());
        self.snapshot.send_replace(ControllerSnapshot {
            phase: ControllerPhase::Starting,
            started_at: Some(Utc::now()),
            ..ControllerSnapshot::idle()
        });
        state.generation
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.handle = None;
        state.cancel_requested = false;
        state.started = None;
        self.snapshot.send_replace(ControllerSnapshot::idle());
    }

    /// Record the accepted handle. Returns true when a cancel was requested
    /// while the job was still being submitted.
    fn enter_running(&self, generation: u64, handle: &JobHandle) -> Option<bool> {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return None;
        }
        state.handle = Some(handle.clone());
        self.snapshot.send_modify(|snap| {
            snap.phase = ControllerPhase::Running;
            snap.job_id = Some(handle.to_string());
        });
        Some(state.cancel_requested)
    }

    fn apply_progress(&self, generation: u64, mut progress: DisplaySnapshot) -> Option<DisplaySnapshot> {
        let state = lock(&self.state);
        if state.generation != generation {
            return None;
        }
        self.snapshot.send_modify(|snap| {
            if !progress.is_terminal {
                if let Some(previous) = &snap.progress {
                    progress.percent = progress.percent.max(previous.percent);
                }
            }
            snap.progress = Some(progress.clone());
        });
        Some(progress)
    }

    fn cancel_requested(&self, generation: u64) -> bool {
        let state = lock(&self.state);
        state.generation == generation && state.cancel_requested
    }

    /// Mark a cancel as requested. Returns the handle to signal, if the job
    /// already has one.
    fn request_cancel(&self) -> Option<(ControllerPhase, Option<JobHandle>)> {
        let mut state = lock(&self.state);
        let phase = self.phase();
        if !phase.is_active() {
            return None;
        }
        state.cancel_requested = true;
        self.snapshot.send_modify(|snap| snap.cancel_requested = true);
        Some((phase, state.handle.clone()))
    }

    /// Move to a terminal phase and return the job's elapsed time. `None` if
    /// the job already finished or this loop is stale, so callers notify at
    /// most once.
    fn finish(
        &self,
        generation: u64,
        phase: ControllerPhase,
        message: Option<String>,
        progress: Option<DisplaySnapshot>,
    ) -> Option<Duration> {
        let state = lock(&self.state);
        if state.generation != generation || !self.phase().is_active() {
            return None;
        }
        self.snapshot.send_modify(|snap| {
            snap.phase = phase;
            snap.message = message;
            if progress.is_some() {
                snap.progress = progress;
            }
            snap.finished_at = Some(Utc::now());
        });
        Some(state.started.map(|s| s.elapsed()).unwrap_or_default())
    }
}

/// Controller for one scan-all job at a time.
pub struct ScanController {
    client: Arc<dyn JobClient>,
    observer: Arc<dyn JobObserver>,
    settings: ControllerSettings,
    inner: Arc<Inner>,
    active: Mutex<Option<LoopGuard>>,
}

impl ScanController {
    pub fn new(
        client: Arc<dyn JobClient>,
        observer: Arc<dyn JobObserver>,
        settings: ControllerSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(ControllerSnapshot::idle());
        Self {
            client,
            observer,
            settings,
            inner: Arc::new(Inner {
                state: Mutex::new(ControlState {
                    generation: 0,
                    handle: None,
                    cancel_requested: false,
                    started: None,
                }),
                snapshot,
            }),
            active: Mutex::new(None),
        }
    }

    /// Snapshot for rendering between events.
    pub fn current_snapshot(&self) -> ControllerSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Submit a scan-all job and begin polling it.
    ///
    /// Only valid from `idle`. A rejected start changes nothing and sends
    /// nothing to the worker. Must be called within a tokio runtime.
    pub fn start(&self, request: &ScanAllRequest) -> Result<(), ControllerError> {
        let mut active = lock(&self.active);

        let phase = self.inner.phase();
        if phase.is_active() {
            return Err(ControllerError::Busy(phase));
        }
        if phase.is_terminal() {
            return Err(ControllerError::NeedsReset(phase));
        }

        let params = self.check_preconditions(request)?;

        // A finished loop may still be held; release it before spawning another.
        active.take();

        let generation = self.inner.begin();
        tracing::info!(project_id = %params.project_id, "Starting scan-all job");
        metrics::counter!("scan_jobs_started_total").increment(1);
        self.observer.on_start();

        let shutdown = CancellationToken::new();
        let run = JobRun {
            inner: self.inner.clone(),
            client: self.client.clone(),
            observer: self.observer.clone(),
            settings: self.settings.clone(),
            generation,
            shutdown: shutdown.clone(),
        };
        *active = Some(LoopGuard::spawn(shutdown, run.drive(params)));
        Ok(())
    }

    /// Ask the worker to stop the current job.
    ///
    /// Polling continues until the worker reports a terminal state, so a
    /// completion that races the cancel still wins. Returns false when there
    /// is no active job.
    pub async fn cancel(&self) -> bool {
        let Some((phase, handle)) = self.inner.request_cancel() else {
            tracing::debug!("Cancel ignored, no active scan");
            return false;
        };

        match handle {
            Some(handle) => send_cancel(self.client.as_ref(), &handle).await,
            None => {
                tracing::info!(phase = %phase, "Cancel requested before the job was accepted")
            }
        }
        true
    }

    /// Return to `idle` from a terminal state, discarding the handle and snapshot.
    pub fn reset(&self) -> Result<(), ControllerError> {
        let mut active = lock(&self.active);
        let phase = self.inner.phase();
        if phase.is_active() {
            return Err(ControllerError::NotFinished(phase));
        }
        active.take();
        self.inner.reset();
        Ok(())
    }

    fn check_preconditions(&self, request: &ScanAllRequest) -> Result<ScanAllParams, ControllerError> {
        if let Err(report) = request.validate() {
            return Err(OrchestrationError::Precondition(format!(
                "A project must be selected before scanning ({})",
                report.to_string().trim()
            ))
            .into());
        }
        if self.settings.require_confirmation && !request.confirmed {
            return Err(OrchestrationError::Precondition(
                "Scanning all actions must be confirmed first".to_string(),
            )
            .into());
        }

        let project_id = request
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                OrchestrationError::Precondition("A project must be selected before scanning".to_string())
            })?;

        Ok(ScanAllParams {
            project_id: project_id.to_string(),
        })
    }
}

async fn send_cancel(client: &dyn JobClient, handle: &JobHandle) {
    match client.cancel(handle).await {
        Ok(()) => tracing::info!(job_id = %handle, "Cancel request sent"),
        Err(e) => tracing::warn!(job_id = %handle, error = %e, "Cancel request failed"),
    }
}

/// Everything the spawned loop needs, detached from the controller.
struct JobRun {
    inner: Arc<Inner>,
    client: Arc<dyn JobClient>,
    observer: Arc<dyn JobObserver>,
    settings: ControllerSettings,
    generation: u64,
    shutdown: CancellationToken,
}

enum Terminal {
    Reported(JobStatus),
    CancelUnacknowledged,
}

impl JobRun {
    async fn drive(self, params: ScanAllParams) {
        let submission = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            submission = self.client.submit(&params) => submission,
        };

        let handle = match submission {
            Err(e) => {
                tracing::error!(project_id = %params.project_id, error = %e, "Scan-all submission failed");
                let err = OrchestrationError::Transport(e);
                self.finish(ControllerPhase::Failed, format!("Failed to start scan: {}", err), None, &[]);
                return;
            }
            Ok(Submission::Immediate(status)) => {
                tracing::info!(
                    project_id = %params.project_id,
                    state = %status.state,
                    "Worker answered scan-all synchronously"
                );
                self.finish_reported(status);
                return;
            }
            Ok(Submission::Accepted(handle)) => handle,
        };

        let Some(cancel_pending) = self.inner.enter_running(self.generation, &handle) else {
            return;
        };
        tracing::info!(job_id = %handle, "Scan-all job accepted, polling");
        if cancel_pending {
            send_cancel(self.client.as_ref(), &handle).await;
        }

        let policy = PollPolicy::every(self.settings.poll_interval)
            .max_consecutive_failures(self.settings.max_poll_failures.max(1));
        let mut target = JobPoll {
            run: &self,
            handle: handle.clone(),
            polls_since_cancel: 0,
        };

        match poll::run(&mut target, &policy, &self.shutdown).await {
            PollOutcome::Done(Terminal::Reported(status)) => self.finish_reported(status),
            PollOutcome::Done(Terminal::CancelUnacknowledged) => {
                tracing::warn!(job_id = %handle, "Giving up on unacknowledged cancel");
                self.finish(ControllerPhase::Cancelled, CANCEL_UNACKNOWLEDGED.to_string(), None, &[]);
            }
            PollOutcome::TransportFailed(e) => {
                tracing::error!(job_id = %handle, error = %e, "Lost contact with worker");
                let err = OrchestrationError::Transport(e);
                self.finish(ControllerPhase::Failed, format!("Lost contact with the worker: {}", err), None, &[]);
            }
            PollOutcome::Exhausted { attempts } => {
                let err = OrchestrationError::TimeoutExceeded(format!(
                    "Scan did not finish after {} status checks",
                    attempts
                ));
                self.finish(ControllerPhase::Timeout, err.to_string(), None, &[]);
            }
            PollOutcome::Shutdown => {
                tracing::debug!(job_id = %handle, "Poll loop torn down");
            }
        }
    }

    fn finish_reported(&self, status: JobStatus) {
        let phase = ControllerPhase::from(status.state);
        let message = match status.state {
            WorkerState::Completed => status.message.clone().unwrap_or_default(),
            WorkerState::Failed => {
                let err = OrchestrationError::WorkerReported(
                    status.message.clone().unwrap_or_else(|| "Scan failed".to_string()),
                );
                err.to_string()
            }
            WorkerState::Timeout => status
                .message
                .clone()
                .unwrap_or_else(|| "Scan timed out on the worker".to_string()),
            _ => status
                .message
                .clone()
                .unwrap_or_else(|| "Scan was cancelled".to_string()),
        };
        let progress = summarize(&status);
        self.finish(phase, message, Some(progress), &status.results);
    }

    fn finish(
        &self,
        phase: ControllerPhase,
        message: String,
        progress: Option<DisplaySnapshot>,
        results: &[ItemResult],
    ) {
        let message = Some(message).filter(|m| !m.is_empty());
        let Some(elapsed) = self
            .inner
            .finish(self.generation, phase, message.clone(), progress)
        else {
            return;
        };

        metrics::counter!("scan_jobs_finished_total", "outcome" => phase.to_string()).increment(1);
        metrics::histogram!("scan_job_duration_seconds").record(elapsed.as_secs_f64());

        if phase == ControllerPhase::Completed {
            tracing::info!(results = results.len(), "Scan-all job completed");
            self.observer.on_complete(results);
        } else {
            let message = message.unwrap_or_else(|| format!("Scan {}", phase));
            tracing::warn!(phase = %phase, message = %message, "Scan-all job did not succeed");
            self.observer.on_error(&message);
        }
    }
}

struct JobPoll<'a> {
    run: &'a JobRun,
    handle: JobHandle,
    polls_since_cancel: u32,
}

#[async_trait]
impl<'a> PollTarget for JobPoll<'a> {
    type Output = Terminal;

    async fn tick(&mut self, attempt: u32) -> Result<Tick<Terminal>, ClientError> {
        let status = self.run.client.poll(&self.handle).await?;
        tracing::debug!(
            job_id = %self.handle,
            attempt = attempt,
            state = %status.state,
            "Polled scan-all job"
        );

        if let Some(snapshot) = self.run.inner.apply_progress(self.run.generation, summarize(&status)) {
            self.run.observer.on_status_change(&snapshot);
        }

        if status.state.is_terminal() {
            return Ok(Tick::Done(Terminal::Reported(status)));
        }

        if self.run.inner.cancel_requested(self.run.generation) {
            self.polls_since_cancel += 1;
            if self.polls_since_cancel >= self.run.settings.cancel_grace_polls {
                return Ok(Tick::Done(Terminal::CancelUnacknowledged));
            }
        }
        Ok(Tick::Pending)
    }
}
