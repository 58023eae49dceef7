use uuid::Uuid;

use crate::core::time::{lease_cutoff, primitive_now_utc, seconds_between};
use crate::db::models::ClaimedJob;
use crate::store::{ClaimRequest, JobStore, StoreError};

use super::WorkerConfig;

/// Claims the next batch for this worker under a fresh lease token.
pub(crate) async fn claim_batch(
    store: &dyn JobStore,
    config: &WorkerConfig,
) -> Result<Vec<ClaimedJob>, StoreError> {
    let now = primitive_now_utc();
    let request = ClaimRequest {
        max_retries: config.max_retries,
        batch_size: config.batch_size,
        worker_id: config.worker_id.clone(),
        lease_token: Uuid::new_v4(),
        now,
        lease_cutoff: lease_cutoff(now, config.lease_duration),
    };

    let mut jobs = store.claim_batch(&request).await?;
    jobs.sort_by_key(|job| job.id);

    if !jobs.is_empty() {
        metrics::counter!("evaluation_jobs_claimed_total").increment(jobs.len() as u64);
        for job in &jobs {
            metrics::histogram!("evaluation_queue_latency_seconds")
                .record(seconds_between(job.created_at, now));
        }
        tracing::debug!(
            worker_id = %config.worker_id,
            claimed = jobs.len(),
            first_id = jobs.first().map(|job| job.id),
            last_id = jobs.last().map(|job| job.id),
            "Claimed evaluation batch"
        );
    }

    Ok(jobs)
}

/// Extends the leases of the jobs still waiting in this worker's batch, so time spent
/// on earlier jobs does not count against later ones. Returns the ids still held.
pub(crate) async fn renew_remaining(
    store: &dyn JobStore,
    config: &WorkerConfig,
    remaining: &[ClaimedJob],
) -> Result<Vec<i64>, StoreError> {
    let leases: Vec<_> = remaining.iter().map(ClaimedJob::lease).collect();
    let renewed = store.renew_leases(&leases, primitive_now_utc()).await?;

    if renewed.len() < leases.len() {
        tracing::warn!(
            worker_id = %config.worker_id,
            lost = leases.len() - renewed.len(),
            "Batch leases lost before evaluation"
        );
    }

    Ok(renewed)
}
