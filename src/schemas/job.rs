use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{EvaluationJob, JobCounts};
use crate::db::types::JobStatus;
use crate::tasks::evaluation::CycleReport;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct EnqueueJobRequest {
    #[validate(length(min = 1, message = "question must not be empty"))]
    pub(crate) question: String,
    /// An empty answer is accepted and graded as unanswered.
    #[serde(default)]
    pub(crate) answer: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobResponse {
    pub(crate) id: i64,
    pub(crate) status: JobStatus,
    pub(crate) retry_count: i32,
    pub(crate) last_error: Option<String>,
    pub(crate) total_score: Option<f64>,
    pub(crate) content_score: Option<f64>,
    pub(crate) organization_score: Option<f64>,
    pub(crate) language_score: Option<f64>,
    pub(crate) grade: Option<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) result: Option<Value>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    pub(crate) completed_at: Option<String>,
}

impl From<EvaluationJob> for JobResponse {
    fn from(job: EvaluationJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            retry_count: job.retry_count,
            last_error: job.last_error,
            total_score: job.total_score,
            content_score: job.content_score,
            organization_score: job.organization_score,
            language_score: job.language_score,
            grade: job.grade,
            feedback: job.feedback,
            result: job.result.map(|value| value.0),
            created_at: format_primitive(job.created_at),
            updated_at: format_primitive(job.updated_at),
            completed_at: job.completed_at.map(format_primitive),
        }
    }
}

fn default_drain_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct DrainJobsRequest {
    /// Upper bound on jobs claimed by this request.
    #[serde(default = "default_drain_limit")]
    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    pub(crate) limit: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct DrainJobsResponse {
    pub(crate) claimed: usize,
    pub(crate) done: usize,
    pub(crate) requeued: usize,
    pub(crate) failed: usize,
    pub(crate) stale: usize,
}

impl From<CycleReport> for DrainJobsResponse {
    fn from(report: CycleReport) -> Self {
        Self {
            claimed: report.claimed,
            done: report.done,
            requeued: report.requeued,
            failed: report.exhausted,
            stale: report.stale,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JobStatsResponse {
    pub(crate) pending: i64,
    pub(crate) processing: i64,
    pub(crate) done: i64,
    pub(crate) failed: i64,
    pub(crate) total: i64,
}

impl From<JobCounts> for JobStatsResponse {
    fn from(counts: JobCounts) -> Self {
        Self {
            pending: counts.pending,
            processing: counts.processing,
            done: counts.done,
            failed: counts.failed,
            total: counts.pending + counts.processing + counts.done + counts.failed,
        }
    }
}
