pub mod evaluation;
pub(crate) mod scheduler;
