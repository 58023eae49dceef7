use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::types::JobStatus;

/// Full `evaluation_jobs` row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EvaluationJob {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub status: JobStatus,
    pub retry_count: i32,
    pub total_score: Option<f64>,
    pub content_score: Option<f64>,
    pub organization_score: Option<f64>,
    pub language_score: Option<f64>,
    pub grade: Option<String>,
    pub feedback: Option<String>,
    pub result: Option<Json<serde_json::Value>>,
    pub last_error: Option<String>,
    pub lease_token: Option<Uuid>,
    pub locked_by: Option<String>,
    pub locked_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// A job owned by one worker between its claim and its commit.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ClaimedJob {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub retry_count: i32,
    pub lease_token: Uuid,
    pub locked_at: PrimitiveDateTime,
    pub created_at: PrimitiveDateTime,
}

impl ClaimedJob {
    pub fn lease(&self) -> JobLease {
        JobLease { id: self.id, lease_token: self.lease_token }
    }
}

/// Identifies one claim. Commits only apply while the row still carries this token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLease {
    pub id: i64,
    pub lease_token: Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

impl JobCounts {
    pub(crate) fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}
