use crate::core::time::primitive_now_utc;
use crate::db::models::ClaimedJob;
use crate::db::types::JobStatus;
use crate::services::evaluator::{EvaluationError, EvaluationResult};
use crate::store::{CommitOutcome, FailedAttempt, JobStore, StoreError};

use super::WorkerConfig;

/// A failed attempt requeues the job while budget remains, otherwise it is terminal.
pub(crate) fn status_after_failure(new_retry_count: u32, max_retries: u32) -> JobStatus {
    if new_retry_count < max_retries {
        JobStatus::Pending
    } else {
        JobStatus::Failed
    }
}

pub(crate) async fn commit_success(
    store: &dyn JobStore,
    config: &WorkerConfig,
    job: &ClaimedJob,
    result: &EvaluationResult,
) -> Result<CommitOutcome, StoreError> {
    let outcome = store.commit_success(job.lease(), result, primitive_now_utc()).await?;

    match outcome {
        CommitOutcome::Done => tracing::info!(
            worker_id = %config.worker_id,
            job_id = job.id,
            total_score = result.total_score,
            "Evaluation committed"
        ),
        _ => tracing::warn!(
            worker_id = %config.worker_id,
            job_id = job.id,
            "Lease lost before commit; result discarded"
        ),
    }
    metrics::counter!("evaluation_jobs_total", "status" => outcome.as_str()).increment(1);

    Ok(outcome)
}

pub(crate) async fn commit_failure(
    store: &dyn JobStore,
    config: &WorkerConfig,
    job: &ClaimedJob,
    error: &EvaluationError,
) -> Result<CommitOutcome, StoreError> {
    let new_retry_count = u32::try_from(job.retry_count).unwrap_or(0).saturating_add(1);
    let message = error.to_string();
    let attempt = FailedAttempt {
        error: &message,
        new_retry_count,
        next_status: status_after_failure(new_retry_count, config.max_retries),
        now: primitive_now_utc(),
    };

    let outcome = store.commit_failure(job.lease(), attempt).await?;

    match outcome {
        CommitOutcome::Requeued => tracing::warn!(
            worker_id = %config.worker_id,
            job_id = job.id,
            retry_count = new_retry_count,
            max_retries = config.max_retries,
            error = %message,
            "Evaluation failed; job requeued"
        ),
        CommitOutcome::Exhausted => tracing::error!(
            worker_id = %config.worker_id,
            job_id = job.id,
            retry_count = new_retry_count,
            error = %message,
            "Retry budget exhausted; job permanently failed"
        ),
        _ => tracing::warn!(
            worker_id = %config.worker_id,
            job_id = job.id,
            error = %message,
            "Lease lost before failure commit"
        ),
    }
    metrics::counter!("evaluation_failures_total", "kind" => error.kind()).increment(1);
    metrics::counter!("evaluation_jobs_total", "status" => outcome.as_str()).increment(1);

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tasks::evaluation::claim::claim_batch;
    use crate::test_support::{worker_config, MemoryJobStore};

    fn result(score: f64) -> EvaluationResult {
        EvaluationResult::from_value(json!({"total_score": score, "feedback": "ok"})).unwrap()
    }

    #[test]
    fn failure_rule_requeues_until_budget_is_spent() {
        assert_eq!(status_after_failure(1, 3), JobStatus::Pending);
        assert_eq!(status_after_failure(2, 3), JobStatus::Pending);
        assert_eq!(status_after_failure(3, 3), JobStatus::Failed);
        assert_eq!(status_after_failure(1, 1), JobStatus::Failed);
    }

    #[tokio::test]
    async fn second_success_commit_leaves_result_unchanged() {
        let store = MemoryJobStore::new();
        store.seed(1).await;
        let config = worker_config("w1");
        let job = claim_batch(&store, &config).await.unwrap().remove(0);

        let first = commit_success(&store, &config, &job, &result(7.0)).await.unwrap();
        let stored = store.job(job.id).await;
        let second = commit_success(&store, &config, &job, &result(2.0)).await.unwrap();

        assert_eq!(first, CommitOutcome::Done);
        assert_eq!(second, CommitOutcome::Stale);
        let after = store.job(job.id).await;
        assert_eq!(after.total_score, Some(7.0));
        assert_eq!(after.completed_at, stored.completed_at);
        assert_eq!(after.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn failure_after_done_does_not_touch_job() {
        let store = MemoryJobStore::new();
        store.seed(1).await;
        let config = worker_config("w1");
        let job = claim_batch(&store, &config).await.unwrap().remove(0);
        commit_success(&store, &config, &job, &result(5.0)).await.unwrap();

        let err = EvaluationError::Transient("late".into());
        let outcome = commit_failure(&store, &config, &job, &err).await.unwrap();

        assert_eq!(outcome, CommitOutcome::Stale);
        let after = store.job(job.id).await;
        assert_eq!(after.status, JobStatus::Done);
        assert_eq!(after.retry_count, 0);
        assert!(after.last_error.is_none());
    }

    #[tokio::test]
    async fn failure_records_error_and_requeues() {
        let store = MemoryJobStore::new();
        store.seed(1).await;
        let config = worker_config("w1");
        let job = claim_batch(&store, &config).await.unwrap().remove(0);

        let err = EvaluationError::MalformedResult("missing total_score".into());
        let outcome = commit_failure(&store, &config, &job, &err).await.unwrap();

        assert_eq!(outcome, CommitOutcome::Requeued);
        let after = store.job(job.id).await;
        assert_eq!(after.status, JobStatus::Pending);
        assert_eq!(after.retry_count, 1);
        assert!(after.last_error.unwrap().contains("missing total_score"));
        assert!(after.lease_token.is_none());
    }

    #[tokio::test]
    async fn stale_worker_cannot_commit_over_reclaimed_job() {
        let store = MemoryJobStore::new();
        let ids = store.seed(1).await;
        let slow = worker_config("slow");
        let stale_job = claim_batch(&store, &slow).await.unwrap().remove(0);
        store.age_lease(ids[0], std::time::Duration::from_secs(3600)).await;

        let rescuer = worker_config("rescuer");
        let fresh_job = claim_batch(&store, &rescuer).await.unwrap().remove(0);

        let outcome = commit_success(&store, &slow, &stale_job, &result(1.0)).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Stale);

        let outcome = commit_success(&store, &rescuer, &fresh_job, &result(8.0)).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Done);
        assert_eq!(store.job(ids[0]).await.total_score, Some(8.0));
    }
}
