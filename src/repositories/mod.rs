pub(crate) mod jobs;
