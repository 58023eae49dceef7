use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{ClaimedJob, EvaluationJob, JobCounts, JobLease};
use crate::db::types::JobStatus;
use crate::repositories::jobs;
use crate::services::evaluator::EvaluationResult;

use super::{ClaimRequest, CommitOutcome, FailedAttempt, JobStore, StoreError};

/// `JobStore` backed by the `evaluation_jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<ClaimedJob>, StoreError> {
        let params = jobs::ClaimParams {
            max_retries: to_i32(request.max_retries),
            batch_size: i64::from(request.batch_size),
            lease_cutoff: request.lease_cutoff,
            lease_token: request.lease_token,
            worker_id: &request.worker_id,
            now: request.now,
        };
        Ok(jobs::claim_batch(&self.pool, params).await?)
    }

    async fn renew_leases(
        &self,
        leases: &[JobLease],
        now: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        if leases.is_empty() {
            return Ok(Vec::new());
        }
        let ids = leases.iter().map(|lease| lease.id).collect();
        let tokens = leases.iter().map(|lease| lease.lease_token).collect();
        Ok(jobs::renew_leases(&self.pool, ids, tokens, now).await?)
    }

    async fn commit_success(
        &self,
        lease: JobLease,
        result: &EvaluationResult,
        completed_at: PrimitiveDateTime,
    ) -> Result<CommitOutcome, StoreError> {
        let applied = jobs::mark_done(
            &self.pool,
            lease.id,
            lease.lease_token,
            jobs::SuccessUpdate {
                total_score: result.total_score,
                content_score: result.content_score,
                organization_score: result.organization_score,
                language_score: result.language_score,
                grade: &result.grade,
                feedback: &result.feedback,
                result: result.raw.clone(),
                completed_at,
            },
        )
        .await?;

        Ok(if applied { CommitOutcome::Done } else { CommitOutcome::Stale })
    }

    async fn commit_failure(
        &self,
        lease: JobLease,
        attempt: FailedAttempt<'_>,
    ) -> Result<CommitOutcome, StoreError> {
        let status = jobs::mark_failed_attempt(
            &self.pool,
            lease.id,
            lease.lease_token,
            jobs::FailureUpdate {
                status: attempt.next_status,
                retry_count: to_i32(attempt.new_retry_count),
                error: attempt.error,
                now: attempt.now,
            },
        )
        .await?;

        Ok(match status {
            Some(JobStatus::Failed) => CommitOutcome::Exhausted,
            Some(_) => CommitOutcome::Requeued,
            None => CommitOutcome::Stale,
        })
    }

    async fn fail_expired_leases(
        &self,
        max_retries: u32,
        lease_cutoff: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        Ok(jobs::fail_exhausted(&self.pool, to_i32(max_retries), lease_cutoff, now).await?)
    }

    async fn enqueue(
        &self,
        question: &str,
        answer: &str,
        now: PrimitiveDateTime,
    ) -> Result<EvaluationJob, StoreError> {
        Ok(jobs::insert(&self.pool, question, answer, now).await?)
    }

    async fn find(&self, id: i64) -> Result<Option<EvaluationJob>, StoreError> {
        Ok(jobs::find_by_id(&self.pool, id).await?)
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        Ok(jobs::count_by_status(&self.pool).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(jobs::ping(&self.pool).await?)
    }
}
