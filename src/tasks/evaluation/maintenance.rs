use std::time::Duration;

use crate::core::time::{lease_cutoff, primitive_now_utc};
use crate::store::{JobStore, StoreError};

/// Fails the rows no claim can ever pick up again, so they do not sit in
/// `processing` or `pending` forever after a crash on their last attempt.
pub(crate) async fn sweep_expired_leases(
    store: &dyn JobStore,
    max_retries: u32,
    lease_duration: Duration,
) -> Result<Vec<i64>, StoreError> {
    let now = primitive_now_utc();
    let failed = store
        .fail_expired_leases(max_retries, lease_cutoff(now, lease_duration), now)
        .await?;

    if !failed.is_empty() {
        metrics::counter!("evaluation_leases_expired_total").increment(failed.len() as u64);
        tracing::warn!(count = failed.len(), job_ids = ?failed, "Failed jobs with exhausted leases");
    }

    Ok(failed)
}
