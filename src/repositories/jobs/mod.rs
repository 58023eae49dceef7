mod commands;
mod queries;
mod types;

pub(crate) use commands::{
    claim_batch, fail_exhausted, insert, mark_done, mark_failed_attempt, renew_leases,
};
pub(crate) use queries::{count_by_status, find_by_id, ping};
pub(crate) use types::{ClaimParams, FailureUpdate, SuccessUpdate};
