use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::types::JobStatus;

pub(crate) const COLUMNS: &str = "\
    id, question, answer, status, retry_count, total_score, content_score, \
    organization_score, language_score, grade, feedback, result, last_error, lease_token, \
    locked_by, locked_at, completed_at, created_at, updated_at";

pub(crate) const CLAIMED_COLUMNS: &str = "\
    jobs.id, jobs.question, jobs.answer, jobs.retry_count, jobs.lease_token, jobs.locked_at, \
    jobs.created_at";

pub(crate) struct ClaimParams<'a> {
    pub(crate) max_retries: i32,
    pub(crate) batch_size: i64,
    pub(crate) lease_cutoff: PrimitiveDateTime,
    pub(crate) lease_token: Uuid,
    pub(crate) worker_id: &'a str,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) struct SuccessUpdate<'a> {
    pub(crate) total_score: f64,
    pub(crate) content_score: f64,
    pub(crate) organization_score: f64,
    pub(crate) language_score: f64,
    pub(crate) grade: &'a str,
    pub(crate) feedback: &'a str,
    pub(crate) result: serde_json::Value,
    pub(crate) completed_at: PrimitiveDateTime,
}

pub(crate) struct FailureUpdate<'a> {
    pub(crate) status: JobStatus,
    pub(crate) retry_count: i32,
    pub(crate) error: &'a str,
    pub(crate) now: PrimitiveDateTime,
}
