//! The durable job store seen by workers and the API.
//!
//! Every method is atomic with respect to concurrent callers. `claim_batch` in
//! particular must select, lock and flip rows in a single step: a read followed by a
//! conditional write would let two workers claim the same job.

mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{ClaimedJob, EvaluationJob, JobCounts, JobLease};
use crate::db::types::JobStatus;
use crate::services::evaluator::EvaluationResult;

pub use postgres::PgJobStore;

/// `last_error` written when an abandoned lease is reclaimed or swept.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired before the worker committed";
pub const BUDGET_EXHAUSTED_ERROR: &str = "retry budget exhausted";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

/// Parameters of one claim round trip.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub max_retries: u32,
    pub batch_size: u32,
    pub worker_id: String,
    pub lease_token: Uuid,
    pub now: PrimitiveDateTime,
    /// `processing` rows locked before this instant are reclaimable.
    pub lease_cutoff: PrimitiveDateTime,
}

/// What a failed attempt does to the row.
#[derive(Debug, Clone)]
pub struct FailedAttempt<'a> {
    pub error: &'a str,
    pub new_retry_count: u32,
    pub next_status: JobStatus,
    pub now: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Done,
    Requeued,
    /// Retry budget exhausted; the job is terminally `failed`.
    Exhausted,
    /// The lease was no longer held (already committed, or reclaimed after expiry).
    Stale,
}

impl CommitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Requeued => "requeued",
            Self::Exhausted => "exhausted",
            Self::Stale => "stale",
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claims up to `batch_size` eligible jobs in ascending id order.
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<ClaimedJob>, StoreError>;

    /// Re-stamps `locked_at` on every lease still held and returns the renewed ids.
    /// A lease missing from the result was reclaimed or committed elsewhere.
    async fn renew_leases(
        &self,
        leases: &[JobLease],
        now: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError>;

    /// `processing -> done`. A no-op reporting `Stale` once the lease is gone.
    async fn commit_success(
        &self,
        lease: JobLease,
        result: &EvaluationResult,
        completed_at: PrimitiveDateTime,
    ) -> Result<CommitOutcome, StoreError>;

    /// `processing -> pending | failed`, recording the error and the new retry count.
    async fn commit_failure(
        &self,
        lease: JobLease,
        attempt: FailedAttempt<'_>,
    ) -> Result<CommitOutcome, StoreError>;

    /// Terminally fails rows that no claim can pick up any more. Returns their ids.
    async fn fail_expired_leases(
        &self,
        max_retries: u32,
        lease_cutoff: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError>;

    async fn enqueue(
        &self,
        question: &str,
        answer: &str,
        now: PrimitiveDateTime,
    ) -> Result<EvaluationJob, StoreError>;

    async fn find(&self, id: i64) -> Result<Option<EvaluationJob>, StoreError>;

    async fn counts(&self) -> Result<JobCounts, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
