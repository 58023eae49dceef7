use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{ClaimedJob, EvaluationJob};
use crate::db::types::JobStatus;
use crate::store::{BUDGET_EXHAUSTED_ERROR, LEASE_EXPIRED_ERROR};

use super::types::{ClaimParams, FailureUpdate, SuccessUpdate, CLAIMED_COLUMNS, COLUMNS};

pub(crate) async fn insert(
    pool: &PgPool,
    question: &str,
    answer: &str,
    now: PrimitiveDateTime,
) -> Result<EvaluationJob, sqlx::Error> {
    let query = format!(
        "INSERT INTO evaluation_jobs (question, answer, status, retry_count, created_at, updated_at)
         VALUES ($1, $2, $3, 0, $4, $4)
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, EvaluationJob>(&query)
        .bind(question)
        .bind(answer)
        .bind(JobStatus::Pending)
        .bind(now)
        .fetch_one(pool)
        .await
}

/// Selects, locks and flips a batch in one statement. Rows locked by a concurrent
/// claimer are skipped rather than waited on. Reclaiming an expired lease charges
/// the abandoned attempt to `retry_count`.
pub(crate) async fn claim_batch(
    pool: &PgPool,
    params: ClaimParams<'_>,
) -> Result<Vec<ClaimedJob>, sqlx::Error> {
    let query = format!(
        "WITH candidate AS (
            SELECT id
            FROM evaluation_jobs
            WHERE (status = $1 AND retry_count < $2)
               OR (status = $3 AND locked_at < $4 AND retry_count + 1 < $2)
            ORDER BY id
            LIMIT $5
            FOR UPDATE SKIP LOCKED
        )
        UPDATE evaluation_jobs AS jobs
        SET retry_count = CASE WHEN jobs.status = $3 THEN jobs.retry_count + 1
                               ELSE jobs.retry_count END,
            last_error = CASE WHEN jobs.status = $3 THEN $6 ELSE jobs.last_error END,
            status = $3,
            lease_token = $7,
            locked_by = $8,
            locked_at = $9,
            updated_at = $9
        FROM candidate
        WHERE jobs.id = candidate.id
        RETURNING {CLAIMED_COLUMNS}"
    );

    let mut claimed = sqlx::query_as::<_, ClaimedJob>(&query)
        .bind(JobStatus::Pending)
        .bind(params.max_retries)
        .bind(JobStatus::Processing)
        .bind(params.lease_cutoff)
        .bind(params.batch_size)
        .bind(LEASE_EXPIRED_ERROR)
        .bind(params.lease_token)
        .bind(params.worker_id)
        .bind(params.now)
        .fetch_all(pool)
        .await?;

    // RETURNING order is unspecified.
    claimed.sort_by_key(|job| job.id);
    Ok(claimed)
}

/// Extends the leases in one statement. Pairs whose token no longer matches are left
/// alone and missing from the returned ids.
pub(crate) async fn renew_leases(
    pool: &PgPool,
    ids: Vec<i64>,
    lease_tokens: Vec<Uuid>,
    now: PrimitiveDateTime,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE evaluation_jobs AS jobs
         SET locked_at = $1,
             updated_at = $1
         FROM UNNEST($2::bigint[], $3::uuid[]) AS held(id, lease_token)
         WHERE jobs.id = held.id
           AND jobs.lease_token = held.lease_token
           AND jobs.status = $4
         RETURNING jobs.id",
    )
    .bind(now)
    .bind(ids)
    .bind(lease_tokens)
    .bind(JobStatus::Processing)
    .fetch_all(pool)
    .await
}

pub(crate) async fn mark_done(
    pool: &PgPool,
    id: i64,
    lease_token: Uuid,
    params: SuccessUpdate<'_>,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE evaluation_jobs
         SET status = $1,
             total_score = $2,
             content_score = $3,
             organization_score = $4,
             language_score = $5,
             grade = $6,
             feedback = $7,
             result = $8,
             completed_at = $9,
             last_error = NULL,
             lease_token = NULL,
             locked_by = NULL,
             locked_at = NULL,
             updated_at = $9
         WHERE id = $10 AND status = $11 AND lease_token = $12",
    )
    .bind(JobStatus::Done)
    .bind(params.total_score)
    .bind(params.content_score)
    .bind(params.organization_score)
    .bind(params.language_score)
    .bind(params.grade)
    .bind(params.feedback)
    .bind(Json(params.result))
    .bind(params.completed_at)
    .bind(id)
    .bind(JobStatus::Processing)
    .bind(lease_token)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Returns the status the row moved to, or `None` when the lease is no longer held.
pub(crate) async fn mark_failed_attempt(
    pool: &PgPool,
    id: i64,
    lease_token: Uuid,
    params: FailureUpdate<'_>,
) -> Result<Option<JobStatus>, sqlx::Error> {
    sqlx::query_scalar::<_, JobStatus>(
        "UPDATE evaluation_jobs
         SET status = $1,
             retry_count = GREATEST(retry_count, $2),
             last_error = $3,
             lease_token = NULL,
             locked_by = NULL,
             locked_at = NULL,
             updated_at = $4
         WHERE id = $5 AND status = $6 AND lease_token = $7
         RETURNING status",
    )
    .bind(params.status)
    .bind(params.retry_count)
    .bind(params.error)
    .bind(params.now)
    .bind(id)
    .bind(JobStatus::Processing)
    .bind(lease_token)
    .fetch_optional(pool)
    .await
}

/// Terminally fails rows that can never be claimed again: expired leases whose charged
/// attempt would exhaust the budget, and pending rows already over budget.
pub(crate) async fn fail_exhausted(
    pool: &PgPool,
    max_retries: i32,
    lease_cutoff: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE evaluation_jobs
         SET retry_count = CASE WHEN status = $1 THEN retry_count + 1 ELSE retry_count END,
             last_error = CASE WHEN status = $1 THEN $2 ELSE COALESCE(last_error, $3) END,
             status = $4,
             lease_token = NULL,
             locked_by = NULL,
             locked_at = NULL,
             updated_at = $5
         WHERE (status = $1 AND locked_at < $6 AND retry_count + 1 >= $7)
            OR (status = $8 AND retry_count >= $7)
         RETURNING id",
    )
    .bind(JobStatus::Processing)
    .bind(LEASE_EXPIRED_ERROR)
    .bind(BUDGET_EXHAUSTED_ERROR)
    .bind(JobStatus::Failed)
    .bind(now)
    .bind(lease_cutoff)
    .bind(max_retries)
    .bind(JobStatus::Pending)
    .fetch_all(pool)
    .await
}
