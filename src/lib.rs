pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry};

pub use crate::db::models::{ClaimedJob, EvaluationJob, JobCounts, JobLease};
pub use crate::db::run_migrations;
pub use crate::db::types::JobStatus;
pub use crate::services::chat_evaluator::ChatCompletionsEvaluator;
pub use crate::services::evaluator::{
    parse_result, EvaluationError, EvaluationRequest, EvaluationResult, Evaluator, InputLimits,
};
pub use crate::store::{
    ClaimRequest, CommitOutcome, FailedAttempt, JobStore, PgJobStore, StoreError,
    BUDGET_EXHAUSTED_ERROR, LEASE_EXPIRED_ERROR,
};
pub use crate::tasks::evaluation::{CycleReport, Worker, WorkerConfig};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(settings.telemetry())?;
    core::metrics::init(settings.telemetry())?;

    let db_pool = db::init_pool(settings.database()).await?;
    db::run_migrations(&db_pool).await?;

    let evaluator: Arc<dyn Evaluator> = Arc::new(ChatCompletionsEvaluator::from_settings(
        settings.ai(),
        settings.worker().job_timeout,
    )?);
    let state = AppState::new(settings, Arc::new(PgJobStore::new(db_pool.clone())), evaluator);
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Evaluation queue API listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            core::shutdown::shutdown_signal().await;
        })
        .await;

    db_pool.close().await;
    tracing::info!("Database pool closed");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(settings.telemetry())?;
    core::metrics::init(settings.telemetry())?;

    let db_pool = db::init_pool(settings.database()).await?;
    db::run_migrations(&db_pool).await?;

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.clone()));
    let evaluator: Arc<dyn Evaluator> = Arc::new(ChatCompletionsEvaluator::from_settings(
        settings.ai(),
        settings.worker().job_timeout,
    )?);

    let result = tasks::scheduler::run(&settings, store, evaluator).await;

    db_pool.close().await;
    tracing::info!("Database pool closed");

    result?;

    Ok(())
}
