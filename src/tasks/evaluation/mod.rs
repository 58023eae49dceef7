//! The evaluation worker: claim a batch, evaluate each job, commit each outcome.

mod claim;
mod commit;
pub(crate) mod maintenance;
mod worker;

pub use worker::{CycleReport, Worker, WorkerConfig};
