//! The polling primitive shared by the scan controller and item pipelines.
//!
//! A [`PollTarget`] performs one status round per [`PollTarget::tick`] and
//! answers with a [`Tick`]. [`run`] drives it at a fixed cadence: the first
//! tick fires immediately, ticks never overlap, and the loop stops on the
//! first `Done`, on an exhausted attempt or failure budget, or when the
//! shutdown token fires.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::worker_client::ClientError;

/// Result of one poll round.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick<T> {
    /// Nothing terminal yet; poll again after the interval.
    Pending,
    /// A terminal condition was observed.
    Done(T),
}

/// How a poll loop ended.
#[derive(Debug)]
pub enum PollOutcome<T> {
    Done(T),
    /// `max_attempts` rounds ran without a terminal condition.
    Exhausted { attempts: u32 },
    /// `max_consecutive_failures` rounds in a row failed to reach the worker.
    TransportFailed(ClientError),
    /// The owner tore the loop down.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Ceiling on rounds, counting failed ones. `None` polls until terminal.
    pub max_attempts: Option<u32>,
    /// Consecutive transport failures tolerated before giving up.
    pub max_consecutive_failures: Option<u32>,
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            max_consecutive_failures: None,
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = Some(failures);
        self
    }
}

#[async_trait]
pub trait PollTarget: Send {
    type Output: Send;

    /// Perform one status round. `attempt` starts at 1.
    async fn tick(&mut self, attempt: u32) -> Result<Tick<Self::Output>, ClientError>;
}

/// Drive `target` until it reports `Done` or a budget runs out.
pub async fn run<P>(
    target: &mut P,
    policy: &PollPolicy,
    shutdown: &CancellationToken,
) -> PollOutcome<P::Output>
where
    P: PollTarget + ?Sized,
{
    // tokio::time::interval panics on a zero period
    let mut interval = tokio::time::interval(policy.interval.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts: u32 = 0;
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return PollOutcome::Shutdown,
            _ = interval.tick() => {}
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return PollOutcome::Shutdown,
            result = target.tick(attempts) => result,
        };

        match result {
            Ok(Tick::Done(output)) => return PollOutcome::Done(output),
            Ok(Tick::Pending) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                metrics::counter!("scan_poll_failures_total").increment(1);
                tracing::warn!(
                    attempt = attempts,
                    consecutive_failures = consecutive_failures,
                    error = %e,
                    "Poll round failed, will retry"
                );
                if policy
                    .max_consecutive_failures
                    .is_some_and(|max| consecutive_failures >= max)
                {
                    return PollOutcome::TransportFailed(e);
                }
            }
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return PollOutcome::Exhausted { attempts };
        }
    }
}

/// Owned handle to a spawned loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct LoopGuard {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl LoopGuard {
    /// Spawn `fut` on the runtime. `fut` should watch `shutdown` so it can
    /// finish cleanly; the task is aborted on drop regardless.
    pub fn spawn<F>(shutdown: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            shutdown,
            join: tokio::spawn(fut),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.join.abort();
    }
}
