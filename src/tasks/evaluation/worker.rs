use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::core::config::{AiSettings, WorkerSettings};
use crate::db::models::ClaimedJob;
use crate::services::evaluator::{EvaluationError, EvaluationRequest, Evaluator, InputLimits};
use crate::store::{CommitOutcome, JobStore, StoreError};

use super::{claim, commit};

const MAX_BACKOFF_DOUBLINGS: u32 = 3;

/// Per-worker configuration. Several differently configured workers may share a process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub max_retries: u32,
    pub batch_size: u32,
    pub idle_poll_interval: Duration,
    pub job_timeout: Duration,
    pub lease_duration: Duration,
    /// Pause between two jobs of the same batch, to stay under evaluator rate limits.
    pub eval_pause: Duration,
    pub store_backoff: Duration,
    pub input_limits: InputLimits,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            max_retries: 3,
            batch_size: 5,
            idle_poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(60),
            lease_duration: Duration::from_secs(300),
            eval_pause: Duration::ZERO,
            store_backoff: Duration::from_secs(1),
            input_limits: InputLimits::default(),
        }
    }
}

impl WorkerConfig {
    pub(crate) fn from_settings(worker: &WorkerSettings, ai: &AiSettings, worker_id: String) -> Self {
        Self {
            worker_id,
            max_retries: worker.max_retries,
            batch_size: worker.batch_size,
            idle_poll_interval: worker.idle_poll_interval,
            job_timeout: worker.job_timeout,
            lease_duration: worker.lease_duration,
            eval_pause: worker.eval_pause,
            store_backoff: worker.store_backoff,
            input_limits: InputLimits {
                max_question_chars: ai.max_question_chars,
                max_answer_chars: ai.max_answer_chars,
            },
        }
    }
}

/// Tally of one or more claim/evaluate/commit cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub done: usize,
    pub requeued: usize,
    pub exhausted: usize,
    pub stale: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: CommitOutcome) {
        match outcome {
            CommitOutcome::Done => self.done += 1,
            CommitOutcome::Requeued => self.requeued += 1,
            CommitOutcome::Exhausted => self.exhausted += 1,
            CommitOutcome::Stale => self.stale += 1,
        }
    }

    fn merge(&mut self, other: CycleReport) {
        self.claimed += other.claimed;
        self.done += other.done;
        self.requeued += other.requeued;
        self.exhausted += other.exhausted;
        self.stale += other.stale;
    }
}

/// Drives claim -> evaluate -> commit against a shared store. Holds no state between
/// cycles, so a restarted worker simply resumes polling.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn JobStore>,
    evaluator: Arc<dyn Evaluator>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, evaluator: Arc<dyn Evaluator>, config: WorkerConfig) -> Self {
        Self { store, evaluator, config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Polls until `shutdown` flips to true or its sender is dropped. A non-empty batch
    /// is followed by an immediate poll; an empty one by `idle_poll_interval`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Evaluation worker started"
        );

        let mut consecutive_errors = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle().await {
                Ok(report) if report.claimed > 0 => {
                    consecutive_errors = 0;
                    continue;
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    self.config.idle_poll_interval
                }
                Err(err) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    metrics::counter!("evaluation_store_errors_total").increment(1);
                    let delay = backoff_delay(self.config.store_backoff, consecutive_errors);
                    tracing::error!(
                        worker_id = %self.config.worker_id,
                        error = %err,
                        consecutive_errors,
                        backoff_ms = delay.as_millis() as u64,
                        "Job store round trip failed; abandoning cycle"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Evaluation worker stopped");
    }

    /// One claim followed by sequential processing of the batch. Before each job the
    /// leases of the jobs still waiting are renewed; a job whose lease was lost in the
    /// meantime is skipped, never evaluated. Evaluation failures are committed per job;
    /// only a store error ends the cycle early, leaving the remaining jobs to lease expiry.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let jobs = claim::claim_batch(self.store.as_ref(), &self.config).await?;
        let mut report = CycleReport { claimed: jobs.len(), ..CycleReport::default() };

        for (index, job) in jobs.iter().enumerate() {
            if index > 0 && !self.config.eval_pause.is_zero() {
                sleep(self.config.eval_pause).await;
            }

            let held = claim::renew_remaining(self.store.as_ref(), &self.config, &jobs[index..])
                .await?;
            if !held.contains(&job.id) {
                tracing::warn!(
                    worker_id = %self.config.worker_id,
                    job_id = job.id,
                    "Lease lost while queued in batch; skipping job"
                );
                metrics::counter!("evaluation_jobs_total", "status" => CommitOutcome::Stale.as_str())
                    .increment(1);
                report.record(CommitOutcome::Stale);
                continue;
            }

            let outcome = self.process_job(job).await?;
            report.record(outcome);
        }

        Ok(report)
    }

    /// Runs cycles until a claim comes back empty.
    pub async fn run_until_idle(&self) -> Result<CycleReport, StoreError> {
        self.drain(usize::MAX).await
    }

    /// Runs cycles until the queue is empty or at least `max_claimed` jobs were
    /// claimed. The last cycle may overshoot by less than one batch.
    pub async fn drain(&self, max_claimed: usize) -> Result<CycleReport, StoreError> {
        let mut total = CycleReport::default();
        while total.claimed < max_claimed {
            let report = self.run_cycle().await?;
            if report.claimed == 0 {
                break;
            }
            total.merge(report);
        }
        Ok(total)
    }

    async fn process_job(&self, job: &ClaimedJob) -> Result<CommitOutcome, StoreError> {
        let request = EvaluationRequest::bounded(&job.question, &job.answer, self.config.input_limits);
        let timer = Instant::now();

        let evaluated =
            match tokio::time::timeout(self.config.job_timeout, self.evaluator.evaluate(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(EvaluationError::Timeout(self.config.job_timeout)),
            };
        metrics::histogram!("evaluation_duration_seconds").record(timer.elapsed().as_secs_f64());

        match evaluated {
            Ok(result) => {
                commit::commit_success(self.store.as_ref(), &self.config, job, &result).await
            }
            Err(err) => commit::commit_failure(self.store.as_ref(), &self.config, job, &err).await,
        }
    }
}

/// Exponential back-off capped at 8x the base, with up to 25% jitter.
pub(crate) fn backoff_delay(base: Duration, consecutive_errors: u32) -> Duration {
    let doublings = consecutive_errors.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
    let delay = base.saturating_mul(1u32 << doublings);
    let jitter_cap = (delay.as_millis() / 4) as u64;
    if jitter_cap == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
}
