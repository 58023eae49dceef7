use sqlx::PgPool;

use crate::db::models::{EvaluationJob, JobCounts};
use crate::db::types::JobStatus;

use super::types::COLUMNS;

pub(crate) async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<EvaluationJob>, sqlx::Error> {
    let query = format!("SELECT {COLUMNS} FROM evaluation_jobs WHERE id = $1");
    sqlx::query_as::<_, EvaluationJob>(&query).bind(id).fetch_optional(pool).await
}

pub(crate) async fn count_by_status(pool: &PgPool) -> Result<JobCounts, sqlx::Error> {
    let rows = sqlx::query_as::<_, (JobStatus, i64)>(
        "SELECT status, COUNT(*) FROM evaluation_jobs GROUP BY status",
    )
    .fetch_all(pool)
    .await?;

    let mut counts = JobCounts::default();
    for (status, count) in rows {
        counts.add(status, count);
    }
    Ok(counts)
}

pub(crate) async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
