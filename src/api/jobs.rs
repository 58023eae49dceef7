use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::schemas::job::{
    DrainJobsRequest, DrainJobsResponse, EnqueueJobRequest, JobResponse, JobStatsResponse,
};
use crate::tasks::evaluation::{Worker, WorkerConfig};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(enqueue_job))
        .route("/stats", get(job_stats))
        .route("/drain", post(drain_jobs))
        .route("/:job_id", get(get_job))
}

async fn enqueue_job(
    State(state): State<AppState>,
    Json(payload): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if payload.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be blank".to_string()));
    }

    let job = state.jobs().enqueue(&payload.question, &payload.answer, primitive_now_utc()).await?;
    metrics::counter!("evaluation_jobs_enqueued_total").increment(1);
    tracing::info!(job_id = job.id, "Evaluation job enqueued");

    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// Processes pending work inline, on this request, with the configured worker settings.
async fn drain_jobs(
    State(state): State<AppState>,
    Json(payload): Json<DrainJobsRequest>,
) -> Result<Json<DrainJobsResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let settings = state.settings();
    let mut config = WorkerConfig::from_settings(
        settings.worker(),
        settings.ai(),
        format!("api-drain-{}", uuid::Uuid::new_v4()),
    );
    config.batch_size = config.batch_size.min(payload.limit);

    let worker = Worker::new(state.jobs().clone(), state.evaluator().clone(), config);
    let report = worker.drain(payload.limit as usize).await?;
    tracing::info!(
        claimed = report.claimed,
        done = report.done,
        requeued = report.requeued,
        failed = report.exhausted,
        stale = report.stale,
        "Drain request finished"
    );

    Ok(Json(DrainJobsResponse::from(report)))
}

async fn get_job(
    Path(job_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs()
        .find(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {job_id} not found")))?;

    Ok(Json(JobResponse::from(job)))
}

async fn job_stats(State(state): State<AppState>) -> Result<Json<JobStatsResponse>, ApiError> {
    let counts = state.jobs().counts().await?;
    Ok(Json(JobStatsResponse::from(counts)))
}
